//! The CPU local interrupt controller: machine mode `mie`/`mip`/`mtvec` of
//! one hart, its trap dispatch, and its exception handlers.

use core::sync::atomic::{AtomicBool, Ordering};

use axerrno::{ax_err, AxError, AxResult};
use spin::Mutex;

use crate::consts::*;
use crate::controller::{ControllerId, ControllerKind, InterruptController, Privilege, VectorMode};
use crate::handler::{
    Cascade, ExceptionHandler, HandlerTable, InterruptHandler, Registration, VectorHandler,
};
use crate::regs::{Csr, CsrAccess};
use crate::trap::TrapCause;
use crate::InterruptId;

struct LocalState<'a> {
    table: HandlerTable<'a, LOCAL_TABLE_SIZE>,
    exceptions: [Option<ExceptionHandler>; MAX_EXCEPTION_CODE],
    beu_enabled: bool,
}

pub struct CpuLocal<'a> {
    hart: usize,
    csrs: &'a dyn CsrAccess,
    initialized: AtomicBool,
    state: Mutex<LocalState<'a>>,
}

/// Handler slot of a local id. `None` when the id is outside the local id space.
fn slot_of(id: InterruptId) -> Option<usize> {
    match id {
        INTERRUPT_ID_BEU => Some(LOCAL_BEU_SLOT),
        id if id < LOCAL_INTERRUPTS => Some(id),
        _ => None,
    }
}

fn checked_slot(id: InterruptId) -> AxResult<usize> {
    match slot_of(id) {
        Some(slot) => Ok(slot),
        None => ax_err!(InvalidInput, "local interrupt id out of range"),
    }
}

impl<'a> CpuLocal<'a> {
    /// `csrs` must be the CSR file of `hart`.
    pub const fn new(hart: usize, csrs: &'a dyn CsrAccess) -> Self {
        Self {
            hart,
            csrs,
            initialized: AtomicBool::new(false),
            state: Mutex::new(LocalState {
                table: HandlerTable::new(),
                exceptions: [None; MAX_EXCEPTION_CODE],
                beu_enabled: false,
            }),
        }
    }

    pub fn hart(&self) -> usize {
        self.hart
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn ensure_initialized(&self) -> AxResult {
        if self.is_initialized() {
            Ok(())
        } else {
            ax_err!(BadState, "cpu local controller not initialized")
        }
    }

    /// Installs `handler` for machine exception `ecode`, replacing any previous one.
    pub fn exception_register(&self, ecode: usize, handler: ExceptionHandler) -> AxResult {
        if ecode >= MAX_EXCEPTION_CODE {
            return ax_err!(InvalidInput, "exception code out of range");
        }
        self.state.lock().exceptions[ecode] = Some(handler);
        debug!("hart {}: exception {ecode} handler registered", self.hart);
        Ok(())
    }

    /// Sets or clears `mstatus.MIE`.
    pub fn set_global_enable(&self, enabled: bool) {
        if enabled {
            self.csrs.set_bits(Csr::Mstatus, MSTATUS_MIE);
        } else {
            self.csrs.clear_bits(Csr::Mstatus, MSTATUS_MIE);
        }
    }

    pub fn is_globally_enabled(&self) -> bool {
        self.csrs.read(Csr::Mstatus) & MSTATUS_MIE != 0
    }

    pub fn is_enabled(&self, id: InterruptId) -> AxResult<bool> {
        match checked_slot(id)? {
            LOCAL_BEU_SLOT => Ok(self.state.lock().beu_enabled),
            bit => Ok(self.csrs.read(Csr::Mie) & (1 << bit) != 0),
        }
    }

    pub fn cycle_count(&self) -> usize {
        self.csrs.read(Csr::Mcycle)
    }

    pub fn instret_count(&self) -> usize {
        self.csrs.read(Csr::Minstret)
    }

    /// Points the hart's trap vector at `base`, keeping the current mode.
    ///
    /// In vectored mode `base` is the start of a table whose entry `i` is
    /// taken for interrupt `i`; entry 0 also takes every exception.
    pub fn set_trap_vector(&self, base: usize) -> AxResult {
        if base & MTVEC_MODE_MASK != 0 {
            return ax_err!(InvalidInput, "trap vector base not 4 byte aligned");
        }
        let mode = self.csrs.read(Csr::Mtvec) & MTVEC_MODE_MASK;
        self.csrs.write(Csr::Mtvec, base | mode);
        debug!("hart {}: trap vector at {base:#x}", self.hart);
        Ok(())
    }

    pub fn trap_vector(&self) -> usize {
        self.csrs.read(Csr::Mtvec) & !MTVEC_MODE_MASK
    }

    /// Address the hart jumps to when it takes the trap `cause`.
    pub fn trap_target(&self, cause: usize) -> AxResult<usize> {
        let base = self.trap_vector();
        match (self.vector_mode()?, TrapCause::decode(cause)) {
            (VectorMode::Vector, TrapCause::Interrupt(code)) => {
                Ok(base + code * MTVEC_VECTOR_STRIDE)
            }
            _ => Ok(base),
        }
    }

    /// Entry point from the trap vector: reads `mcause` and dispatches.
    pub fn handle_trap(&self) {
        self.dispatch(self.csrs.read(Csr::Mcause));
    }

    /// Entry point from entry `index` of a vectored trap table. Entry 0 is
    /// shared with exceptions and goes through [`CpuLocal::handle_trap`].
    pub fn vector_entry(&self, index: usize) {
        match index {
            0 => self.handle_trap(),
            code => self.dispatch_interrupt(code),
        }
    }

    /// Dispatches a raw `mcause` value.
    ///
    /// # Panics
    ///
    /// Panics on an exception with no handler registered; there is no way to
    /// resume from it.
    pub fn dispatch(&self, cause: usize) {
        match TrapCause::decode(cause) {
            TrapCause::Interrupt(code) => self.dispatch_interrupt(code),
            TrapCause::Exception(code) => self.dispatch_exception(code),
        }
    }

    fn dispatch_interrupt(&self, code: usize) {
        let Some(slot) = slot_of(code).and_then(|slot| self.state.lock().table.slot(slot)) else {
            warn!("hart {}: spurious interrupt cause {code}", self.hart);
            return;
        };
        trace!("hart {}: interrupt {code}", self.hart);
        slot.deliver(self.hart, code, code);
    }

    fn dispatch_exception(&self, code: usize) {
        let handler = self.state.lock().exceptions.get(code).copied().flatten();
        match handler {
            Some(handler) => handler(self.hart, code),
            None => {
                error!("hart {}: unhandled machine exception {code}", self.hart);
                panic!("unhandled machine exception {code} on hart {}", self.hart);
            }
        }
    }

    fn register(&self, id: InterruptId, registration: Registration) -> AxResult {
        let slot = checked_slot(id)?;
        self.state.lock().table.register(slot, registration)?;
        debug!("hart {}: local interrupt {id} registered", self.hart);
        Ok(())
    }

    fn write_enable(&self, id: InterruptId, enabled: bool) -> AxResult {
        let slot = checked_slot(id)?;
        self.ensure_initialized()?;
        match slot {
            LOCAL_BEU_SLOT => self.state.lock().beu_enabled = enabled,
            bit if enabled => self.csrs.set_bits(Csr::Mie, 1 << bit),
            bit => self.csrs.clear_bits(Csr::Mie, 1 << bit),
        }
        Ok(())
    }
}

impl<'a> InterruptController<'a> for CpuLocal<'a> {
    fn id(&self) -> ControllerId {
        ControllerId::new(ControllerKind::CpuLocal, self.hart)
    }

    fn init(&'a self) -> AxResult {
        if self.initialized.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.csrs.write(Csr::Mie, 0);
        self.csrs.clear_bits(Csr::Mtvec, MTVEC_MODE_MASK);
        info!("hart {}: cpu local interrupt controller ready", self.hart);
        Ok(())
    }

    fn set_vector_mode(&self, mode: VectorMode) -> AxResult {
        let bits = match mode {
            VectorMode::Direct => 0,
            VectorMode::Vector => 1,
            _ => return ax_err!(InvalidInput, "vector mode needs a CLIC"),
        };
        let mtvec = self.csrs.read(Csr::Mtvec);
        self.csrs.write(Csr::Mtvec, (mtvec & !MTVEC_MODE_MASK) | bits);
        Ok(())
    }

    fn vector_mode(&self) -> AxResult<VectorMode> {
        match self.csrs.read(Csr::Mtvec) & MTVEC_MODE_MASK {
            0 => Ok(VectorMode::Direct),
            1 => Ok(VectorMode::Vector),
            _ => Err(AxError::BadState),
        }
    }

    fn set_privilege(&self, privilege: Privilege) -> AxResult {
        match privilege {
            Privilege::Machine => Ok(()),
            _ => ax_err!(InvalidInput, "only machine mode is implemented"),
        }
    }

    fn privilege(&self) -> AxResult<Privilege> {
        Ok(Privilege::Machine)
    }

    fn clear(&self, id: InterruptId) -> AxResult {
        match checked_slot(id)? {
            LOCAL_BEU_SLOT => Err(AxError::Unsupported),
            bit => {
                self.csrs.clear_bits(Csr::Mip, 1 << bit);
                Ok(())
            }
        }
    }

    fn set(&self, id: InterruptId) -> AxResult {
        match checked_slot(id)? {
            LOCAL_BEU_SLOT => Err(AxError::Unsupported),
            bit => {
                self.csrs.set_bits(Csr::Mip, 1 << bit);
                Ok(())
            }
        }
    }

    fn is_pending(&self, id: InterruptId) -> AxResult<bool> {
        match checked_slot(id)? {
            LOCAL_BEU_SLOT => Err(AxError::Unsupported),
            bit => Ok(self.csrs.read(Csr::Mip) & (1 << bit) != 0),
        }
    }

    fn register_handler(
        &self,
        id: InterruptId,
        handler: InterruptHandler,
        data: usize,
    ) -> AxResult {
        self.register(id, Registration::Callback { handler, data })
    }

    fn register_vector_handler(
        &self,
        id: InterruptId,
        handler: VectorHandler,
        data: usize,
    ) -> AxResult {
        self.register(id, Registration::Vector { handler, data })
    }

    fn attach_cascade(&self, id: InterruptId, sink: &'a dyn Cascade) -> AxResult {
        let slot = checked_slot(id)?;
        self.state.lock().table.attach(slot, sink)
    }

    fn enable(&self, id: InterruptId) -> AxResult {
        self.write_enable(id, true)
    }

    fn disable(&self, id: InterruptId) -> AxResult {
        self.write_enable(id, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::ShadowCsrs;
    use crate::trap::exception;
    use core::sync::atomic::AtomicUsize;

    fn leak_cpu(hart: usize) -> (&'static ShadowCsrs, &'static CpuLocal<'static>) {
        let csrs: &'static ShadowCsrs = Box::leak(Box::new(ShadowCsrs::new(hart)));
        let cpu = Box::leak(Box::new(CpuLocal::new(hart, csrs)));
        (csrs, cpu)
    }

    static TIMER_HITS: AtomicUsize = AtomicUsize::new(0);

    fn on_timer(id: InterruptId, data: usize) {
        assert_eq!(id, INTERRUPT_ID_TMR);
        TIMER_HITS.fetch_add(data, Ordering::SeqCst);
    }

    #[test]
    fn enable_requires_init() {
        let (csrs, cpu) = leak_cpu(0);
        assert_eq!(cpu.enable(INTERRUPT_ID_TMR), Err(AxError::BadState));
        cpu.init().unwrap();
        cpu.enable(INTERRUPT_ID_TMR).unwrap();
        assert_eq!(csrs.read(Csr::Mie), 1 << INTERRUPT_ID_TMR);
        cpu.disable(INTERRUPT_ID_TMR).unwrap();
        assert_eq!(csrs.read(Csr::Mie), 0);
    }

    #[test]
    fn init_is_idempotent() {
        let (csrs, cpu) = leak_cpu(0);
        cpu.init().unwrap();
        cpu.enable(INTERRUPT_ID_LC0 + 2).unwrap();
        cpu.init().unwrap();
        assert_eq!(csrs.read(Csr::Mie), 1 << (INTERRUPT_ID_LC0 + 2));
    }

    #[test]
    fn out_of_range_ids_leave_state_untouched() {
        let (csrs, cpu) = leak_cpu(0);
        cpu.init().unwrap();
        let before = csrs.snapshot();
        for id in [LOCAL_INTERRUPTS, INTERRUPT_ID_BEU - 1, INTERRUPT_ID_BEU + 1, usize::MAX] {
            assert_eq!(cpu.register_handler(id, on_timer, 0), Err(AxError::InvalidInput));
            assert_eq!(cpu.enable(id), Err(AxError::InvalidInput));
            assert_eq!(cpu.disable(id), Err(AxError::InvalidInput));
            assert_eq!(cpu.set(id), Err(AxError::InvalidInput));
            assert_eq!(cpu.clear(id), Err(AxError::InvalidInput));
        }
        assert_eq!(csrs.snapshot(), before);
    }

    #[test]
    fn timer_interrupt_reaches_its_handler() {
        let (_, cpu) = leak_cpu(0);
        cpu.init().unwrap();
        cpu.register_handler(INTERRUPT_ID_TMR, on_timer, 5).unwrap();
        cpu.dispatch(TrapCause::Interrupt(INTERRUPT_ID_TMR).encode());
        assert_eq!(TIMER_HITS.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn unregistered_interrupt_is_ignored() {
        let (_, cpu) = leak_cpu(0);
        cpu.init().unwrap();
        cpu.dispatch(TrapCause::Interrupt(INTERRUPT_ID_LC0).encode());
        cpu.dispatch(TrapCause::Interrupt(1000).encode());
    }

    static BEU_HITS: AtomicUsize = AtomicUsize::new(0);

    fn on_beu(_: usize) {
        BEU_HITS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn bus_error_slot_is_separate_from_cause_codes() {
        let (csrs, cpu) = leak_cpu(0);
        cpu.init().unwrap();
        cpu.register_vector_handler(INTERRUPT_ID_BEU, on_beu, 0).unwrap();
        cpu.enable(INTERRUPT_ID_BEU).unwrap();
        assert!(cpu.is_enabled(INTERRUPT_ID_BEU).unwrap());
        assert_eq!(csrs.read(Csr::Mie), 0);
        cpu.dispatch(TrapCause::Interrupt(INTERRUPT_ID_BEU).encode());
        assert_eq!(BEU_HITS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn vector_mode_lives_in_mtvec() {
        let (csrs, cpu) = leak_cpu(0);
        csrs.write(Csr::Mtvec, 0x8000_0000);
        cpu.init().unwrap();
        assert_eq!(cpu.vector_mode(), Ok(VectorMode::Direct));
        cpu.set_vector_mode(VectorMode::Vector).unwrap();
        assert_eq!(csrs.read(Csr::Mtvec), 0x8000_0001);
        assert_eq!(cpu.vector_mode(), Ok(VectorMode::Vector));
        assert_eq!(cpu.set_vector_mode(VectorMode::HardwareVector), Err(AxError::InvalidInput));
        assert_eq!(cpu.vector_mode(), Ok(VectorMode::Vector));
    }

    #[test]
    fn trap_vector_base_and_mode_are_kept_apart() {
        let (csrs, cpu) = leak_cpu(0);
        cpu.init().unwrap();
        cpu.set_vector_mode(VectorMode::Vector).unwrap();
        cpu.set_trap_vector(0x8000_0100).unwrap();
        assert_eq!(csrs.read(Csr::Mtvec), 0x8000_0101);
        assert_eq!(cpu.trap_vector(), 0x8000_0100);
        assert_eq!(cpu.vector_mode(), Ok(VectorMode::Vector));

        let timer = TrapCause::Interrupt(INTERRUPT_ID_TMR).encode();
        assert_eq!(cpu.trap_target(timer), Ok(0x8000_0100 + 4 * INTERRUPT_ID_TMR));
        assert_eq!(cpu.trap_target(exception::MACHINE_ECALL), Ok(0x8000_0100));

        assert_eq!(cpu.set_trap_vector(0x8000_0202), Err(AxError::InvalidInput));
        assert_eq!(csrs.read(Csr::Mtvec), 0x8000_0101);

        cpu.set_vector_mode(VectorMode::Direct).unwrap();
        assert_eq!(cpu.trap_vector(), 0x8000_0100);
        assert_eq!(cpu.trap_target(timer), Ok(0x8000_0100));
    }

    static VECTOR_HITS: AtomicUsize = AtomicUsize::new(0);

    fn on_vector(data: usize) {
        VECTOR_HITS.fetch_add(data, Ordering::SeqCst);
    }

    static ENTRY_ECALLS: AtomicUsize = AtomicUsize::new(0);

    #[test]
    fn vector_entries_reach_their_registration() {
        let (csrs, cpu) = leak_cpu(0);
        cpu.init().unwrap();
        cpu.register_vector_handler(INTERRUPT_ID_TMR, on_vector, 5).unwrap();
        cpu.vector_entry(INTERRUPT_ID_TMR);
        cpu.vector_entry(INTERRUPT_ID_SW);
        assert_eq!(VECTOR_HITS.load(Ordering::SeqCst), 5);

        cpu.exception_register(exception::MACHINE_ECALL, |_, _| {
            ENTRY_ECALLS.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        csrs.poke(Csr::Mcause, exception::MACHINE_ECALL);
        cpu.vector_entry(0);
        assert_eq!(ENTRY_ECALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsupported_operations_are_distinguishable() {
        let (_, cpu) = leak_cpu(0);
        cpu.init().unwrap();
        assert_eq!(cpu.set_threshold(1), Err(AxError::Unsupported));
        assert_eq!(cpu.priority(INTERRUPT_ID_SW), Err(AxError::Unsupported));
        assert_eq!(cpu.enable_vector(INTERRUPT_ID_SW), Err(AxError::Unsupported));
        assert_eq!(cpu.command_request(0, &mut 0), Err(AxError::Unsupported));
        assert_eq!(cpu.privilege(), Ok(Privilege::Machine));
        assert_eq!(cpu.set_privilege(Privilege::User), Err(AxError::InvalidInput));
    }

    static ILLEGAL: AtomicUsize = AtomicUsize::new(0);

    fn on_illegal(hart: usize, ecode: usize) {
        ILLEGAL.fetch_add(hart * 10 + ecode, Ordering::SeqCst);
    }

    #[test]
    fn exceptions_use_their_own_table() {
        let (_, cpu) = leak_cpu(1);
        cpu.exception_register(exception::ILLEGAL_INSTRUCTION, on_illegal).unwrap();
        assert_eq!(
            cpu.exception_register(MAX_EXCEPTION_CODE, on_illegal),
            Err(AxError::InvalidInput)
        );
        cpu.dispatch(TrapCause::Exception(exception::ILLEGAL_INSTRUCTION).encode());
        assert_eq!(ILLEGAL.load(Ordering::SeqCst), 12);
    }

    #[test]
    #[should_panic(expected = "unhandled machine exception")]
    fn unregistered_exception_is_fatal() {
        let (_, cpu) = leak_cpu(0);
        cpu.dispatch(TrapCause::Exception(exception::LOAD_FAULT).encode());
    }

    #[test]
    fn handle_trap_reads_mcause() {
        let (csrs, cpu) = leak_cpu(0);
        cpu.exception_register(exception::BREAKPOINT, |_, _| {}).unwrap();
        csrs.write(Csr::Mcause, exception::BREAKPOINT);
        cpu.handle_trap();
    }

    #[test]
    fn global_enable_is_mstatus_mie() {
        let (csrs, cpu) = leak_cpu(0);
        cpu.set_global_enable(true);
        assert_eq!(csrs.read(Csr::Mstatus), MSTATUS_MIE);
        assert!(cpu.is_globally_enabled());
        cpu.set_global_enable(false);
        assert!(!cpu.is_globally_enabled());
    }
}
