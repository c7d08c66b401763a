//! Per-hart view of the interrupt fabric.

use axerrno::{ax_err, AxResult};

use crate::consts::*;
use crate::controller::{Command, InterruptController};
use crate::handler::ExceptionHandler;
use crate::{BusErrorUnit, Clint, CpuLocal, InterruptId, Plic};

/// Handles and line ids of one hart. Obtained from [`crate::Platform::cpu`].
#[derive(Clone, Copy)]
pub struct CpuDevice<'a> {
    local: &'a CpuLocal<'a>,
    clint: Option<&'a Clint<'a>>,
    plic: Option<&'a Plic<'a>>,
    buserror: Option<&'a BusErrorUnit<'a>>,
}

impl<'a> CpuDevice<'a> {
    pub(crate) fn new(
        local: &'a CpuLocal<'a>,
        clint: Option<&'a Clint<'a>>,
        plic: Option<&'a Plic<'a>>,
        buserror: Option<&'a BusErrorUnit<'a>>,
    ) -> Self {
        Self {
            local,
            clint,
            plic,
            buserror,
        }
    }

    pub fn hart_id(&self) -> usize {
        self.local.hart()
    }

    pub fn interrupt_controller(&self) -> &'a CpuLocal<'a> {
        self.local
    }

    pub fn software_interrupt_id(&self) -> InterruptId {
        INTERRUPT_ID_SW
    }

    pub fn timer_interrupt_id(&self) -> InterruptId {
        INTERRUPT_ID_TMR
    }

    pub fn external_interrupt_id(&self) -> InterruptId {
        INTERRUPT_ID_EXT
    }

    /// PLIC context serving this hart.
    pub fn plic_context(&self) -> Option<usize> {
        self.plic.and_then(|plic| plic.context_ids(self.hart_id()))
    }

    pub fn buserror(&self) -> Option<&'a BusErrorUnit<'a>> {
        self.buserror
    }

    fn clint(&self) -> AxResult<&'a Clint<'a>> {
        match self.clint {
            Some(clint) => Ok(clint),
            None => ax_err!(Unsupported, "board has no clint"),
        }
    }

    fn command(&self, cmd: Command, data: u64) -> AxResult<u64> {
        let mut data = data;
        self.clint()?.command_request(cmd as u32, &mut data)?;
        Ok(data)
    }

    pub fn mtime(&self) -> AxResult<u64> {
        self.command(Command::TimerMtimeGet, 0)
    }

    /// Arms this hart's timer to fire once `mtime` reaches `time`.
    pub fn set_mtimecmp(&self, time: u64) -> AxResult {
        self.clint()?.mtimecmp_set(self.hart_id(), time)
    }

    /// Raises the software interrupt of `hart`.
    pub fn software_set_ipi(&self, hart: usize) -> AxResult {
        self.command(Command::SoftwareIpiSet, hart as u64).map(drop)
    }

    pub fn software_clear_ipi(&self, hart: usize) -> AxResult {
        self.command(Command::SoftwareIpiClear, hart as u64).map(drop)
    }

    /// Whether the software interrupt of `hart` is pending.
    pub fn software_msip(&self, hart: usize) -> AxResult<bool> {
        Ok(self.command(Command::SoftwareMsipGet, hart as u64)? != 0)
    }

    pub fn exception_register(&self, ecode: usize, handler: ExceptionHandler) -> AxResult {
        self.local.exception_register(ecode, handler)
    }

    pub fn cycle_count(&self) -> usize {
        self.local.cycle_count()
    }

    pub fn instret_count(&self) -> usize {
        self.local.instret_count()
    }
}

impl core::fmt::Debug for CpuDevice<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CpuDevice")
            .field("hart", &self.hart_id())
            .field("clint", &self.clint.is_some())
            .field("plic_context", &self.plic_context())
            .field("buserror", &self.buserror.map(|beu| beu.instance()))
            .finish()
    }
}
