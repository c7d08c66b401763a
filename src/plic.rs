//! Platform-level interrupt controller driver.

use core::sync::atomic::{AtomicBool, Ordering};

use axerrno::{ax_err, AxResult};
use spin::Mutex;

use crate::consts::*;
use crate::controller::{for_each_hart, ControllerId, ControllerKind, HartMask, InterruptController};
use crate::device::ControllerRecord;
use crate::handler::{Cascade, HandlerTable, InterruptHandler, Registration, VectorHandler};
use crate::regs::{CsrAccess, RegisterBank};
use crate::utils::word_bit;
use crate::{CpuLocal, InterruptId};

pub struct Plic<'a> {
    instance: usize,
    /// Number of ids, including the reserved id 0.
    num_interrupts: usize,
    max_priority: u32,
    regs: &'a dyn RegisterBank,
    csrs: &'a dyn CsrAccess,
    /// Local controller of each hart, indexed by hart id.
    parents: &'a [CpuLocal<'a>],
    /// PLIC context of each hart, indexed by hart id.
    contexts: &'a [usize],
    initialized: AtomicBool,
    table: Mutex<HandlerTable<'a, PLIC_MAX_SOURCES>>,
}

fn priority_offset(id: InterruptId) -> usize {
    PLIC_PRIORITY_OFFSET + id * 4
}

fn enable_offset(context: usize, id: InterruptId) -> usize {
    PLIC_ENABLE_OFFSET + context * PLIC_ENABLE_STRIDE + word_bit(id).0 * 4
}

fn threshold_offset(context: usize) -> usize {
    PLIC_CONTEXT_CTRL_OFFSET + context * PLIC_CONTEXT_STRIDE + PLIC_CONTEXT_THRESHOLD_OFFSET
}

fn claim_offset(context: usize) -> usize {
    PLIC_CONTEXT_CTRL_OFFSET + context * PLIC_CONTEXT_STRIDE + PLIC_CONTEXT_CLAIM_COMPLETE_OFFSET
}

impl<'a> Plic<'a> {
    pub fn new(
        record: &ControllerRecord,
        contexts: &'a [usize],
        regs: &'a dyn RegisterBank,
        csrs: &'a dyn CsrAccess,
        parents: &'a [CpuLocal<'a>],
    ) -> Self {
        let mut num_interrupts = record.num_interrupts;
        if num_interrupts > PLIC_MAX_SOURCES {
            warn!(
                "plic{}: {} sources wired, only the first {} are served",
                record.id.instance, num_interrupts, PLIC_MAX_SOURCES
            );
            num_interrupts = PLIC_MAX_SOURCES;
        }
        Self {
            instance: record.id.instance,
            num_interrupts,
            max_priority: record.max_priority,
            regs,
            csrs,
            parents,
            contexts,
            initialized: AtomicBool::new(false),
            table: Mutex::new(HandlerTable::new()),
        }
    }

    pub fn num_interrupts(&self) -> usize {
        self.num_interrupts
    }

    pub fn max_priority(&self) -> u32 {
        self.max_priority
    }

    pub fn num_harts(&self) -> usize {
        self.parents.len().min(self.contexts.len())
    }

    /// PLIC context serving `hart`, or `None` for a hart this PLIC does not reach.
    pub fn context_ids(&self, hart: usize) -> Option<usize> {
        if hart < self.num_harts() {
            self.contexts.get(hart).copied()
        } else {
            None
        }
    }

    fn checked_id(&self, id: InterruptId) -> AxResult<InterruptId> {
        if id != 0 && id < self.num_interrupts {
            Ok(id)
        } else {
            ax_err!(InvalidInput, "plic source id out of range")
        }
    }

    fn checked_level(&self, level: u32) -> AxResult<u32> {
        if level <= self.max_priority {
            Ok(level)
        } else {
            ax_err!(InvalidInput, "priority above the plic maximum")
        }
    }

    fn checked_context(&self, hart: usize) -> AxResult<usize> {
        match self.context_ids(hart) {
            Some(context) => Ok(context),
            None => ax_err!(InvalidInput, "hart has no plic context"),
        }
    }

    fn current_context(&self) -> AxResult<usize> {
        self.checked_context(self.csrs.hart_id())
    }

    fn ensure_initialized(&self) -> AxResult {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            ax_err!(BadState, "plic not initialized")
        }
    }

    fn write_enable(&self, context: usize, id: InterruptId, enabled: bool) -> AxResult {
        let offset = enable_offset(context, id);
        let bit = word_bit(id).1;
        let word = self.regs.read32(offset)?;
        let word = if enabled { word | bit } else { word & !bit };
        self.regs.write32(offset, word)
    }

    pub fn is_enabled(&self, hart: usize, id: InterruptId) -> AxResult<bool> {
        let id = self.checked_id(id)?;
        let context = self.checked_context(hart)?;
        Ok(self.regs.read32(enable_offset(context, id))? & word_bit(id).1 != 0)
    }

    /// Takes the highest priority eligible source of `hart`'s context.
    pub fn claim(&self, hart: usize) -> AxResult<Option<InterruptId>> {
        let context = self.checked_context(hart)?;
        match self.regs.read32(claim_offset(context))? {
            0 => Ok(None),
            id => Ok(Some(id as InterruptId)),
        }
    }

    /// Releases a source taken by [`Plic::claim`].
    pub fn complete(&self, hart: usize, id: InterruptId) -> AxResult {
        let context = self.checked_context(hart)?;
        self.regs.write32(claim_offset(context), id as u32)
    }

    fn register(&self, id: InterruptId, registration: Registration) -> AxResult {
        let id = self.checked_id(id)?;
        // A zero priority never interrupts.
        if self.priority(id)? == 0 {
            self.set_priority(id, PLIC_DEFAULT_PRIORITY.min(self.max_priority))?;
        }
        self.table.lock().register(id, registration)?;
        debug!("plic{}: source {id} registered", self.instance);
        Ok(())
    }
}

impl<'a> Cascade for Plic<'a> {
    /// Serves every eligible source of `hart`'s context, one claim at a time.
    fn cascade(&self, hart: usize, _parent_line: InterruptId) {
        for _ in 0..self.num_interrupts {
            let id = match self.claim(hart) {
                Ok(Some(id)) => id,
                Ok(None) => return,
                Err(err) => {
                    warn!("plic{}: claim on hart {hart} failed: {err:?}", self.instance);
                    return;
                }
            };
            trace!("plic{}: hart {hart} claimed source {id}", self.instance);
            let slot = self.table.lock().slot(id);
            match slot {
                Some(slot) => slot.deliver(hart, id, id),
                None => warn!(
                    "plic{}: claimed source {id} is past the handler table",
                    self.instance
                ),
            }
            if let Err(err) = self.complete(hart, id) {
                warn!("plic{}: complete of source {id} failed: {err:?}", self.instance);
            }
        }
    }
}

impl<'a> InterruptController<'a> for Plic<'a> {
    fn id(&self) -> ControllerId {
        ControllerId::new(ControllerKind::Plic, self.instance)
    }

    fn init(&'a self) -> AxResult {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        let words = self.num_interrupts.div_ceil(32);
        for hart in 0..self.num_harts() {
            let context = self.checked_context(hart)?;
            for word in 0..words {
                self.regs.write32(enable_offset(context, word * 32), 0)?;
            }
            self.regs.write32(threshold_offset(context), 0)?;

            let parent = &self.parents[hart];
            parent.init()?;
            parent.attach_cascade(INTERRUPT_ID_EXT, self)?;
            parent.enable(INTERRUPT_ID_EXT)?;
        }
        self.initialized.store(true, Ordering::Release);
        info!(
            "plic{}: {} sources, max priority {}, {} contexts",
            self.instance,
            self.num_interrupts,
            self.max_priority,
            self.num_harts()
        );
        Ok(())
    }

    fn is_pending(&self, id: InterruptId) -> AxResult<bool> {
        let id = self.checked_id(id)?;
        let (word, bit) = word_bit(id);
        Ok(self.regs.read32(PLIC_PENDING_OFFSET + word * 4)? & bit != 0)
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
        let id = self.checked_id(id)?;
        self.table.lock().attach(id, sink)
    }

    fn enable(&self, id: InterruptId) -> AxResult {
        let id = self.checked_id(id)?;
        self.ensure_initialized()?;
        self.write_enable(self.current_context()?, id, true)
    }

    fn disable(&self, id: InterruptId) -> AxResult {
        let id = self.checked_id(id)?;
        self.ensure_initialized()?;
        self.write_enable(self.current_context()?, id, false)
    }

    fn threshold(&self) -> AxResult<u32> {
        self.regs.read32(threshold_offset(self.current_context()?))
    }

    fn set_threshold(&self, level: u32) -> AxResult {
        let level = self.checked_level(level)?;
        self.regs.write32(threshold_offset(self.current_context()?), level)
    }

    fn priority(&self, id: InterruptId) -> AxResult<u32> {
        let id = self.checked_id(id)?;
        self.regs.read32(priority_offset(id))
    }

    fn set_priority(&self, id: InterruptId, priority: u32) -> AxResult {
        let id = self.checked_id(id)?;
        let priority = self.checked_level(priority)?;
        self.regs.write32(priority_offset(id), priority)
    }

    fn affinity_enable(&self, harts: HartMask, id: InterruptId) -> AxResult<HartMask> {
        let id = self.checked_id(id)?;
        self.ensure_initialized()?;
        Ok(for_each_hart(harts, self.num_harts(), |hart| {
            self.write_enable(self.checked_context(hart)?, id, true)
        }))
    }

    fn affinity_disable(&self, harts: HartMask, id: InterruptId) -> AxResult<HartMask> {
        let id = self.checked_id(id)?;
        self.ensure_initialized()?;
        Ok(for_each_hart(harts, self.num_harts(), |hart| {
            self.write_enable(self.checked_context(hart)?, id, false)
        }))
    }

    fn affinity_set_threshold(&self, harts: HartMask, level: u32) -> AxResult<HartMask> {
        let level = self.checked_level(level)?;
        Ok(for_each_hart(harts, self.num_harts(), |hart| {
            self.regs.write32(threshold_offset(self.checked_context(hart)?), level)
        }))
    }

    fn affinity_threshold(&self, hart: usize) -> AxResult<u32> {
        self.regs.read32(threshold_offset(self.checked_context(hart)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::Csr;
    use crate::sim::{PlicModel, ShadowBank, ShadowCsrs};
    use crate::trap::TrapCause;
    use axerrno::AxError;
    use core::sync::atomic::AtomicUsize;

    const NUM_INTERRUPTS: usize = 64;

    struct Fixture {
        plic: &'static Plic<'static>,
        model: &'static PlicModel,
        csrs: &'static [ShadowCsrs],
        cpus: &'static [CpuLocal<'static>],
    }

    fn fixture(num_harts: usize) -> Fixture {
        let record: &'static ControllerRecord = Box::leak(Box::new(ControllerRecord {
            id: ControllerId::new(ControllerKind::Plic, 0),
            base: 0x0C00_0000,
            size: 0x0400_0000,
            num_interrupts: NUM_INTERRUPTS,
            max_priority: 7,
            wiring: None,
        }));
        // Machine contexts of a part whose harts each have M and S contexts.
        let contexts: &'static [usize] =
            Box::leak((0..num_harts).map(|hart| hart * 2).collect::<Vec<_>>().into_boxed_slice());
        let csrs: &'static [ShadowCsrs] =
            Box::leak((0..num_harts).map(ShadowCsrs::new).collect::<Vec<_>>().into_boxed_slice());
        let cpus: &'static [CpuLocal<'static>] = Box::leak(
            csrs.iter()
                .enumerate()
                .map(|(hart, csrs)| CpuLocal::new(hart, csrs))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
        );
        let model: &'static PlicModel = Box::leak(Box::new(PlicModel::new(num_harts * 2)));
        let plic = Box::leak(Box::new(Plic::new(record, contexts, model, &csrs[0], cpus)));
        Fixture { plic, model, csrs, cpus }
    }

    #[test]
    fn claim_picks_highest_priority_then_lowest_id() {
        let f = fixture(1);
        f.plic.init().unwrap();
        for (id, priority) in [(3, 2), (9, 5), (12, 5), (20, 1)] {
            f.plic.set_priority(id, priority).unwrap();
            f.plic.enable(id).unwrap();
            f.model.raise(id);
        }
        f.plic.set_threshold(1).unwrap();

        assert_eq!(f.plic.claim(0), Ok(Some(9)));
        // Until completed, the outstanding claim is handed out again.
        assert_eq!(f.plic.claim(0), Ok(Some(9)));
        f.plic.complete(0, 9).unwrap();
        assert_eq!(f.plic.claim(0), Ok(Some(12)));
        f.plic.complete(0, 12).unwrap();
        assert_eq!(f.plic.claim(0), Ok(Some(3)));
        f.plic.complete(0, 3).unwrap();
        // Source 20 does not exceed the threshold.
        assert_eq!(f.plic.claim(0), Ok(None));
        assert!(f.plic.is_pending(20).unwrap());
    }

    #[test]
    fn disabled_or_zero_priority_sources_are_not_claimed() {
        let f = fixture(1);
        f.plic.init().unwrap();
        f.plic.set_priority(4, 3).unwrap();
        f.model.raise(4);
        f.model.raise(5);
        f.plic.enable(5).unwrap();
        assert_eq!(f.plic.claim(0), Ok(None));
        f.plic.enable(4).unwrap();
        assert_eq!(f.plic.claim(0), Ok(Some(4)));
    }

    #[test]
    fn enable_and_disable_leave_configuration_alone() {
        let f = fixture(1);
        f.plic.init().unwrap();
        f.plic.set_priority(7, 4).unwrap();
        f.plic.set_threshold(2).unwrap();
        for id in 1..NUM_INTERRUPTS {
            let priority = f.plic.priority(id).unwrap();
            f.plic.enable(id).unwrap();
            assert!(f.plic.is_enabled(0, id).unwrap());
            f.plic.disable(id).unwrap();
            assert!(!f.plic.is_enabled(0, id).unwrap());
            assert_eq!(f.plic.priority(id), Ok(priority));
            assert_eq!(f.plic.threshold(), Ok(2));
        }
    }

    #[test]
    fn out_of_range_ids_leave_registers_untouched() {
        let f = fixture(1);
        f.plic.init().unwrap();
        let before = f.model.snapshot();
        for id in [0, NUM_INTERRUPTS, PLIC_MAX_SOURCES + 1] {
            assert_eq!(f.plic.enable(id), Err(AxError::InvalidInput));
            assert_eq!(f.plic.disable(id), Err(AxError::InvalidInput));
            assert_eq!(f.plic.set_priority(id, 1), Err(AxError::InvalidInput));
            assert_eq!(f.plic.register_handler(id, |_, _| {}, 0), Err(AxError::InvalidInput));
            assert_eq!(
                f.plic.affinity_enable(HartMask::from_value(1), id),
                Err(AxError::InvalidInput)
            );
        }
        assert_eq!(f.plic.set_priority(1, 8), Err(AxError::InvalidInput));
        assert_eq!(f.plic.set_threshold(8), Err(AxError::InvalidInput));
        assert_eq!(f.model.snapshot(), before);
    }

    #[test]
    fn enable_requires_init() {
        let f = fixture(1);
        assert_eq!(f.plic.enable(1), Err(AxError::BadState));
        f.plic.set_priority(1, 1).unwrap();
    }

    #[test]
    fn init_is_idempotent() {
        let f = fixture(1);
        f.plic.init().unwrap();
        f.plic.enable(5).unwrap();
        f.plic.set_threshold(3).unwrap();
        f.plic.init().unwrap();
        assert!(f.plic.is_enabled(0, 5).unwrap());
        assert_eq!(f.plic.threshold(), Ok(3));
        assert!(f.cpus[0].is_enabled(INTERRUPT_ID_EXT).unwrap());
    }

    #[test]
    fn affinity_threshold_covers_selected_harts() {
        let f = fixture(2);
        f.plic.init().unwrap();
        let failed = f.plic.affinity_set_threshold(HartMask::from_value(0b111), 4).unwrap();
        assert_eq!(failed.into_value(), 0b100);
        assert_eq!(f.plic.affinity_threshold(0), Ok(4));
        assert_eq!(f.plic.affinity_threshold(1), Ok(4));
        assert_eq!(f.plic.affinity_threshold(2), Err(AxError::InvalidInput));
        assert_eq!(f.plic.context_ids(1), Some(2));
        assert_eq!(f.plic.context_ids(2), None);

        let failed = f.plic.affinity_enable(HartMask::from_value(0b10), 6).unwrap();
        assert!(failed.is_empty());
        assert!(f.plic.is_enabled(1, 6).unwrap());
        assert!(!f.plic.is_enabled(0, 6).unwrap());
    }

    #[test]
    fn registration_makes_a_source_eligible() {
        let f = fixture(1);
        f.plic.init().unwrap();
        assert_eq!(f.plic.priority(8), Ok(0));
        f.plic.register_handler(8, |_, _| {}, 0).unwrap();
        assert_eq!(f.plic.priority(8), Ok(PLIC_DEFAULT_PRIORITY));
        f.plic.set_priority(8, 6).unwrap();
        f.plic.register_handler(8, |_, _| {}, 0).unwrap();
        assert_eq!(f.plic.priority(8), Ok(6));
    }

    #[test]
    fn failed_priority_step_installs_no_handler() {
        let f = fixture(1);
        let record = ControllerRecord {
            id: ControllerId::new(ControllerKind::Plic, 1),
            base: 0,
            size: 4,
            num_interrupts: 8,
            max_priority: 7,
            wiring: None,
        };
        // Only the reserved source 0 has a priority register in this bank.
        let bank: &'static ShadowBank = Box::leak(Box::new(ShadowBank::new(4)));
        let plic = Plic::new(&record, &[0], bank, &f.csrs[0], f.cpus);
        assert_eq!(plic.register_handler(3, |_, _| {}, 0), Err(AxError::BadAddress));
        assert!(matches!(plic.table.lock().registration(3), Some(Registration::Empty)));
    }

    static UART_HITS: AtomicUsize = AtomicUsize::new(0);

    fn on_uart(id: InterruptId, data: usize) {
        assert_eq!(id, 10);
        UART_HITS.fetch_add(data, Ordering::SeqCst);
    }

    #[test]
    fn external_interrupt_is_claimed_served_and_completed() {
        let f = fixture(1);
        f.plic.init().unwrap();
        f.plic.register_handler(10, on_uart, 1).unwrap();
        f.plic.enable(10).unwrap();
        f.model.raise(10);
        f.model.raise(11);

        f.cpus[0].dispatch(TrapCause::Interrupt(INTERRUPT_ID_EXT).encode());
        assert_eq!(UART_HITS.load(Ordering::SeqCst), 1);
        // Completed, and source 11 was never enabled.
        assert_eq!(f.plic.claim(0), Ok(None));
        assert!(f.plic.is_pending(11).unwrap());
        assert_eq!(f.csrs[0].read(Csr::Mie), 1 << INTERRUPT_ID_EXT);
    }

    #[test]
    fn operations_target_the_executing_harts_context() {
        let f = fixture(2);
        f.plic.init().unwrap();
        f.csrs[0].set_hart_id(1);
        f.plic.enable(3).unwrap();
        f.plic.set_threshold(5).unwrap();
        assert!(f.plic.is_enabled(1, 3).unwrap());
        assert!(!f.plic.is_enabled(0, 3).unwrap());
        assert_eq!(f.plic.affinity_threshold(1), Ok(5));
        assert_eq!(f.plic.affinity_threshold(0), Ok(0));
    }
}
