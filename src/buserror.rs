//! Bus error unit: latches bus and ECC faults and reports them on a hart
//! local line and, when wired, on a PLIC line.

use axerrno::{ax_err, AxResult};
use bitflags::bitflags;

use crate::consts::*;
use crate::controller::InterruptController;
use crate::device::BusErrorRecord;
use crate::handler::InterruptHandler;
use crate::regs::RegisterBank;
use crate::{CpuLocal, InterruptId, Plic};

bitflags! {
    /// Fault categories. Bit `n` is the category whose cause code is `n`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BusErrorEvents: u32 {
        const INST_CORRECTABLE_ECC = 1 << 2;
        const INST_UNCORRECTABLE_ECC = 1 << 3;
        const LOAD_STORE = 1 << 5;
        const DATA_CORRECTABLE_ECC = 1 << 6;
        const DATA_UNCORRECTABLE_ECC = 1 << 7;
    }
}

impl BusErrorEvents {
    /// The category a cause register value names. Code 0 and unknown codes
    /// name nothing.
    pub fn from_cause(code: u32) -> Self {
        1u32.checked_shl(code)
            .filter(|_| code != 0)
            .map_or(Self::empty(), Self::from_bits_truncate)
    }
}

pub struct BusErrorUnit<'a> {
    instance: usize,
    regs: &'a dyn RegisterBank,
    local: &'a CpuLocal<'a>,
    platform: Option<(&'a Plic<'a>, InterruptId)>,
}

impl<'a> BusErrorUnit<'a> {
    /// `local` must be the controller of `record.hart`. Without a `plic` the
    /// platform interrupt is left unwired.
    pub fn new(
        record: &BusErrorRecord,
        regs: &'a dyn RegisterBank,
        local: &'a CpuLocal<'a>,
        plic: Option<&'a Plic<'a>>,
    ) -> Self {
        let platform = match (plic, record.plic_line) {
            (Some(plic), Some(line)) => Some((plic, line)),
            (None, Some(line)) => {
                warn!("beu{}: plic line {line} wired but no plic given", record.instance);
                None
            }
            _ => None,
        };
        Self {
            instance: record.instance,
            regs,
            local,
            platform,
        }
    }

    pub fn instance(&self) -> usize {
        self.instance
    }

    /// Hart whose local controller receives the local interrupt.
    pub fn hart(&self) -> usize {
        self.local.hart()
    }

    pub fn local_interrupt_id(&self) -> InterruptId {
        INTERRUPT_ID_BEU
    }

    pub fn platform_interrupt_id(&self) -> Option<InterruptId> {
        self.platform.map(|(_, line)| line)
    }

    fn read_events(&self, offset: usize) -> AxResult<BusErrorEvents> {
        Ok(BusErrorEvents::from_bits_truncate(self.regs.read32(offset)?))
    }

    fn update_events(&self, offset: usize, events: BusErrorEvents, enabled: bool) -> AxResult {
        let mut current = self.read_events(offset)?;
        current.set(events, enabled);
        self.regs.write32(offset, current.bits())
    }

    /// Gates which categories are latched at all.
    pub fn set_event_enabled(&self, events: BusErrorEvents, enabled: bool) -> AxResult {
        debug!("beu{}: events {events:?} enabled: {enabled}", self.instance);
        self.update_events(BEU_ENABLE_OFFSET, events, enabled)
    }

    pub fn event_enabled(&self) -> AxResult<BusErrorEvents> {
        self.read_events(BEU_ENABLE_OFFSET)
    }

    /// Gates which latched categories raise the PLIC line.
    pub fn set_platform_interrupt(&self, events: BusErrorEvents, enabled: bool) -> AxResult {
        self.update_events(BEU_PLATFORM_INTERRUPT_OFFSET, events, enabled)
    }

    pub fn platform_interrupt(&self) -> AxResult<BusErrorEvents> {
        self.read_events(BEU_PLATFORM_INTERRUPT_OFFSET)
    }

    /// Gates which latched categories raise the hart local line.
    pub fn set_local_interrupt(&self, events: BusErrorEvents, enabled: bool) -> AxResult {
        self.update_events(BEU_LOCAL_INTERRUPT_OFFSET, events, enabled)
    }

    pub fn local_interrupt(&self) -> AxResult<BusErrorEvents> {
        self.read_events(BEU_LOCAL_INTERRUPT_OFFSET)
    }

    /// The category of the most recent latched fault, empty when none is.
    ///
    /// A later fault overwrites the cause, so read it from the handler of the
    /// line that reported it.
    pub fn get_cause(&self) -> AxResult<BusErrorEvents> {
        Ok(BusErrorEvents::from_cause(self.regs.read32(BEU_CAUSE_OFFSET)?))
    }

    pub fn clear_cause(&self) -> AxResult {
        self.regs.write32(BEU_CAUSE_OFFSET, 0)
    }

    /// Physical address of the most recent latched fault.
    pub fn event_address(&self) -> AxResult<u64> {
        let lo = self.regs.read32(BEU_VALUE_OFFSET)?;
        let hi = self.regs.read32(BEU_VALUE_OFFSET + 4)?;
        Ok(((hi as u64) << 32) | lo as u64)
    }

    /// Whether any of `events` has been latched since the accrued bits were
    /// last cleared. Independent of the cause register.
    pub fn is_event_accrued(&self, events: BusErrorEvents) -> AxResult<bool> {
        Ok(self.read_events(BEU_ACCRUED_OFFSET)?.intersects(events))
    }

    pub fn clear_event_accrued(&self, events: BusErrorEvents) -> AxResult {
        self.update_events(BEU_ACCRUED_OFFSET, events, false)
    }

    /// Registers `handler` on the hart local bus error line.
    pub fn register_local_handler(&self, handler: InterruptHandler, data: usize) -> AxResult {
        self.local.register_handler(INTERRUPT_ID_BEU, handler, data)
    }

    /// Registers `handler` on the PLIC line of this unit.
    pub fn register_platform_handler(&self, handler: InterruptHandler, data: usize) -> AxResult {
        match self.platform {
            Some((plic, line)) => plic.register_handler(line, handler, data),
            None => ax_err!(Unsupported, "bus error unit has no platform line"),
        }
    }
}
