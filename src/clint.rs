//! Core-local interruptor: per-hart software and timer interrupts and the
//! shared time counter.

use core::sync::atomic::{fence, AtomicBool, Ordering};

use axerrno::{ax_err, AxError, AxResult};

use crate::consts::*;
use crate::controller::{
    for_each_hart, Command, ControllerId, ControllerKind, HartMask, InterruptController,
};
use crate::handler::{InterruptHandler, VectorHandler};
use crate::regs::{CsrAccess, RegisterBank};
use crate::{CpuLocal, InterruptId};

/// Local controller ids the CLINT drives, in line order.
pub const CLINT_LINES: [InterruptId; 2] = [INTERRUPT_ID_SW, INTERRUPT_ID_TMR];

/// Hart id carried in a command's data word.
fn hart_of(data: u64) -> AxResult<usize> {
    match usize::try_from(data) {
        Ok(hart) => Ok(hart),
        Err(_) => ax_err!(InvalidInput, "hart id wider than usize"),
    }
}

pub struct Clint<'a> {
    instance: usize,
    regs: &'a dyn RegisterBank,
    csrs: &'a dyn CsrAccess,
    /// Local controller of each hart, indexed by hart id.
    parents: &'a [CpuLocal<'a>],
    initialized: AtomicBool,
}

impl<'a> Clint<'a> {
    pub const fn new(
        instance: usize,
        regs: &'a dyn RegisterBank,
        csrs: &'a dyn CsrAccess,
        parents: &'a [CpuLocal<'a>],
    ) -> Self {
        Self {
            instance,
            regs,
            csrs,
            parents,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn num_interrupts(&self) -> usize {
        CLINT_LINES.len()
    }

    pub fn num_harts(&self) -> usize {
        self.parents.len()
    }

    fn checked_hart(&self, hart: usize) -> AxResult<usize> {
        if hart < self.num_harts() {
            Ok(hart)
        } else {
            ax_err!(InvalidInput, "hart id out of range")
        }
    }

    fn checked_line(id: InterruptId) -> AxResult<InterruptId> {
        if CLINT_LINES.contains(&id) {
            Ok(id)
        } else {
            ax_err!(InvalidInput, "clint only drives the software and timer lines")
        }
    }

    /// Local controller of the executing hart.
    fn current_parent(&self) -> AxResult<&'a CpuLocal<'a>> {
        match self.parents.get(self.csrs.hart_id()) {
            Some(parent) => Ok(parent),
            None => ax_err!(BadState, "executing hart has no local controller"),
        }
    }

    /// Reads the 64-bit time counter with 32-bit accesses, retrying when the
    /// high word rolls over in between.
    pub fn mtime(&self) -> AxResult<u64> {
        loop {
            let hi = self.regs.read32(CLINT_MTIME_OFFSET + 4)?;
            let lo = self.regs.read32(CLINT_MTIME_OFFSET)?;
            if hi == self.regs.read32(CLINT_MTIME_OFFSET + 4)? {
                return Ok(((hi as u64) << 32) | lo as u64);
            }
        }
    }

    pub fn mtimecmp(&self, hart: usize) -> AxResult<u64> {
        let offset = CLINT_MTIMECMP_OFFSET + self.checked_hart(hart)? * 8;
        let lo = self.regs.read32(offset)?;
        let hi = self.regs.read32(offset + 4)?;
        Ok(((hi as u64) << 32) | lo as u64)
    }

    fn write_msip(&self, hart: usize, pending: bool) -> AxResult {
        let offset = CLINT_MSIP_OFFSET + self.checked_hart(hart)? * 4;
        self.regs.write32(offset, pending as u32)?;
        // Another hart may be reading or clearing this word.
        fence(Ordering::SeqCst);
        Ok(())
    }

    fn read_msip(&self, hart: usize) -> AxResult<bool> {
        let offset = CLINT_MSIP_OFFSET + self.checked_hart(hart)? * 4;
        Ok(self.regs.read32(offset)? & 1 != 0)
    }
}

impl<'a> InterruptController<'a> for Clint<'a> {
    fn id(&self) -> ControllerId {
        ControllerId::new(ControllerKind::Clint, self.instance)
    }

    fn init(&'a self) -> AxResult {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        for parent in self.parents {
            parent.init()?;
        }
        self.initialized.store(true, Ordering::Release);
        info!("clint{}: ready for {} harts", self.instance, self.num_harts());
        Ok(())
    }

    fn clear(&self, id: InterruptId) -> AxResult {
        match Self::checked_line(id)? {
            INTERRUPT_ID_SW => self.write_msip(self.csrs.hart_id(), false),
            _ => Err(AxError::Unsupported),
        }
    }

    fn set(&self, id: InterruptId) -> AxResult {
        match Self::checked_line(id)? {
            INTERRUPT_ID_SW => self.write_msip(self.csrs.hart_id(), true),
            _ => Err(AxError::Unsupported),
        }
    }

    fn is_pending(&self, id: InterruptId) -> AxResult<bool> {
        match Self::checked_line(id)? {
            INTERRUPT_ID_SW => self.read_msip(self.csrs.hart_id()),
            id => self.current_parent()?.is_pending(id),
        }
    }

    fn register_handler(
        &self,
        id: InterruptId,
        handler: InterruptHandler,
        data: usize,
    ) -> AxResult {
        let id = Self::checked_line(id)?;
        self.current_parent()?.register_handler(id, handler, data)
    }

    fn register_vector_handler(
        &self,
        id: InterruptId,
        handler: VectorHandler,
        data: usize,
    ) -> AxResult {
        let id = Self::checked_line(id)?;
        self.current_parent()?.register_vector_handler(id, handler, data)
    }

    fn enable(&self, id: InterruptId) -> AxResult {
        let id = Self::checked_line(id)?;
        self.current_parent()?.enable(id)
    }

    fn disable(&self, id: InterruptId) -> AxResult {
        let id = Self::checked_line(id)?;
        self.current_parent()?.disable(id)
    }

    fn command_request(&self, cmd: u32, data: &mut u64) -> AxResult {
        match Command::try_from(cmd)? {
            Command::TimerMtimeGet => *data = self.mtime()?,
            Command::SoftwareIpiClear => self.write_msip(hart_of(*data)?, false)?,
            Command::SoftwareIpiSet => self.write_msip(hart_of(*data)?, true)?,
            Command::SoftwareMsipGet => *data = self.read_msip(hart_of(*data)?)? as u64,
        }
        Ok(())
    }

    fn mtimecmp_set(&self, hart: usize, time: u64) -> AxResult {
        let offset = CLINT_MTIMECMP_OFFSET + self.checked_hart(hart)? * 8;
        // Park the high word at its maximum first so no intermediate value
        // fires early.
        self.regs.write32(offset + 4, u32::MAX)?;
        self.regs.write32(offset, time as u32)?;
        self.regs.write32(offset + 4, (time >> 32) as u32)
    }

    fn affinity_enable(&self, harts: HartMask, id: InterruptId) -> AxResult<HartMask> {
        let id = Self::checked_line(id)?;
        Ok(for_each_hart(harts, self.num_harts(), |hart| self.parents[hart].enable(id)))
    }

    fn affinity_disable(&self, harts: HartMask, id: InterruptId) -> AxResult<HartMask> {
        let id = Self::checked_line(id)?;
        Ok(for_each_hart(harts, self.num_harts(), |hart| self.parents[hart].disable(id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{ShadowBank, ShadowCsrs};

    struct Fixture {
        clint: &'static Clint<'static>,
        regs: &'static ShadowBank,
        csrs: &'static [ShadowCsrs],
        cpus: &'static [CpuLocal<'static>],
    }

    fn fixture(num_harts: usize) -> Fixture {
        let csrs: &'static [ShadowCsrs] =
            Box::leak((0..num_harts).map(ShadowCsrs::new).collect::<Vec<_>>().into_boxed_slice());
        let cpus: &'static [CpuLocal<'static>] = Box::leak(
            csrs.iter()
                .enumerate()
                .map(|(hart, csrs)| CpuLocal::new(hart, csrs))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
        );
        let regs: &'static ShadowBank = Box::leak(Box::new(ShadowBank::new(0x10000)));
        let clint = Box::leak(Box::new(Clint::new(0, regs, &csrs[0], cpus)));
        Fixture { clint, regs, csrs, cpus }
    }

    #[test]
    fn ipi_set_is_visible_until_cleared() {
        let f = fixture(2);
        f.clint.init().unwrap();

        let mut word = 1;
        f.clint.command_request(Command::SoftwareIpiSet as u32, &mut word).unwrap();

        let mut msip = 1;
        f.clint.command_request(Command::SoftwareMsipGet as u32, &mut msip).unwrap();
        assert_eq!(msip, 1);
        let mut other = 0;
        f.clint.command_request(Command::SoftwareMsipGet as u32, &mut other).unwrap();
        assert_eq!(other, 0);

        let mut word = 1;
        f.clint.command_request(Command::SoftwareIpiClear as u32, &mut word).unwrap();
        let mut msip = 1;
        f.clint.command_request(Command::SoftwareMsipGet as u32, &mut msip).unwrap();
        assert_eq!(msip, 0);
    }

    #[test]
    fn unknown_command_has_no_side_effect() {
        let f = fixture(1);
        let before = f.regs.snapshot();
        let mut data = 0;
        assert_eq!(f.clint.command_request(42, &mut data), Err(AxError::InvalidInput));
        let mut hart = 5;
        assert_eq!(
            f.clint.command_request(Command::SoftwareIpiSet as u32, &mut hart),
            Err(AxError::InvalidInput)
        );
        assert_eq!(f.regs.snapshot(), before);
    }

    #[test]
    fn wide_hart_ids_are_not_truncated() {
        let f = fixture(1);
        let before = f.regs.snapshot();
        // Hart 0 in the low word.
        for cmd in [Command::SoftwareIpiSet, Command::SoftwareIpiClear, Command::SoftwareMsipGet] {
            let mut data = 1u64 << 32;
            assert_eq!(f.clint.command_request(cmd as u32, &mut data), Err(AxError::InvalidInput));
            assert_eq!(data, 1u64 << 32);
        }
        assert_eq!(f.regs.snapshot(), before);
        assert_eq!(hart_of(u64::MAX).is_ok(), usize::BITS >= 64);
        assert_eq!(hart_of(3), Ok(3));
    }

    #[test]
    fn mtime_and_mtimecmp() {
        let f = fixture(2);
        f.regs.write32(CLINT_MTIME_OFFSET, 0x89ab_cdef).unwrap();
        f.regs.write32(CLINT_MTIME_OFFSET + 4, 0x0123_4567).unwrap();
        let mut now = 0;
        f.clint.command_request(Command::TimerMtimeGet as u32, &mut now).unwrap();
        assert_eq!(now, 0x0123_4567_89ab_cdef);

        f.clint.mtimecmp_set(1, now + 100).unwrap();
        assert_eq!(f.clint.mtimecmp(1), Ok(now + 100));
        assert_eq!(f.clint.mtimecmp(0), Ok(0));
        assert_eq!(f.clint.mtimecmp_set(2, 0), Err(AxError::InvalidInput));
    }

    #[test]
    fn lines_forward_to_the_executing_harts_local_controller() {
        let f = fixture(2);
        f.clint.init().unwrap();
        f.clint.register_handler(INTERRUPT_ID_TMR, |_, _| {}, 0).unwrap();
        f.clint.enable(INTERRUPT_ID_TMR).unwrap();
        assert!(f.cpus[0].is_enabled(INTERRUPT_ID_TMR).unwrap());
        assert!(!f.cpus[1].is_enabled(INTERRUPT_ID_TMR).unwrap());
        assert_eq!(f.clint.enable(INTERRUPT_ID_EXT), Err(AxError::InvalidInput));
        assert_eq!(f.clint.set_priority(INTERRUPT_ID_TMR, 1), Err(AxError::Unsupported));
    }

    #[test]
    fn affinity_enable_reports_failing_harts() {
        let f = fixture(2);
        f.clint.init().unwrap();
        let failed = f
            .clint
            .affinity_enable(HartMask::from_value(0b101), INTERRUPT_ID_SW)
            .unwrap();
        assert_eq!(failed.into_value(), 0b100);
        assert!(f.cpus[0].is_enabled(INTERRUPT_ID_SW).unwrap());
        assert!(!f.cpus[1].is_enabled(INTERRUPT_ID_SW).unwrap());
    }

    #[test]
    fn software_line_follows_the_executing_hart() {
        let f = fixture(2);
        f.clint.init().unwrap();
        f.clint.set(INTERRUPT_ID_SW).unwrap();
        assert_eq!(f.regs.read32(CLINT_MSIP_OFFSET), Ok(1));
        assert!(f.clint.is_pending(INTERRUPT_ID_SW).unwrap());
        f.clint.clear(INTERRUPT_ID_SW).unwrap();
        assert_eq!(f.regs.read32(CLINT_MSIP_OFFSET), Ok(0));

        f.csrs[0].set_hart_id(1);
        f.clint.set(INTERRUPT_ID_SW).unwrap();
        assert_eq!(f.regs.read32(CLINT_MSIP_OFFSET), Ok(0));
        assert_eq!(f.regs.read32(CLINT_MSIP_OFFSET + 4), Ok(1));
    }
}
