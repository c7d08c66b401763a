//! Local and global external interrupt expanders.
//!
//! An expander presents a bank of numbered sub-lines, each wired to one line
//! of the controller above it: the local bank (16 lines) feeds the CPU local
//! controller, the global bank (127 lines) feeds the PLIC. Handlers live in
//! the expander's own table; the expander chains itself below every parent
//! line it owns, so when a parent line fires the sub-line is resolved here
//! before the device handler runs.

use core::sync::atomic::{AtomicBool, Ordering};

use axerrno::{ax_err, AxError, AxResult};
use spin::Mutex;

use crate::consts::*;
use crate::controller::{Controller, ControllerId, ControllerKind, HartMask, InterruptController};
use crate::handler::{Cascade, HandlerTable, InterruptHandler, Registration, VectorHandler};
use crate::InterruptId;

pub struct Expander<'a> {
    id: ControllerId,
    parent: Controller<'a>,
    /// Parent side id of sub-line 0.
    first_line: InterruptId,
    num_lines: usize,
    initialized: AtomicBool,
    table: Mutex<HandlerTable<'a, EXPANDER_MAX_LINES>>,
}

impl<'a> Expander<'a> {
    /// Sub-line `i` drives `first_line + i` on `parent`.
    ///
    /// `id.kind` must be [`ControllerKind::LocalExpander`] or
    /// [`ControllerKind::GlobalExpander`].
    pub fn new(
        id: ControllerId,
        parent: Controller<'a>,
        first_line: InterruptId,
        num_lines: usize,
    ) -> AxResult<Self> {
        if !matches!(id.kind, ControllerKind::LocalExpander | ControllerKind::GlobalExpander) {
            return ax_err!(InvalidInput, "not an expander kind");
        }
        if num_lines > EXPANDER_MAX_LINES {
            return ax_err!(InvalidInput, "expander wider than its handler table");
        }
        if first_line + num_lines > parent.num_interrupts() {
            return ax_err!(InvalidInput, "expander lines run past the parent's ids");
        }
        Ok(Self {
            id,
            parent,
            first_line,
            num_lines,
            initialized: AtomicBool::new(false),
            table: Mutex::new(HandlerTable::new()),
        })
    }

    pub fn interrupt_parent(&self) -> Controller<'a> {
        self.parent
    }

    /// Parent side id of sub-line `idx`.
    pub fn interrupt_lines(&self, idx: usize) -> Option<InterruptId> {
        (idx < self.num_lines).then(|| self.first_line + idx)
    }

    pub fn num_interrupts(&self) -> usize {
        self.num_lines
    }

    fn line(&self, idx: usize) -> AxResult<InterruptId> {
        match self.interrupt_lines(idx) {
            Some(line) => Ok(line),
            None => ax_err!(InvalidInput, "expander sub-line out of range"),
        }
    }

    fn sub_line(&self, parent_line: InterruptId) -> Option<usize> {
        parent_line
            .checked_sub(self.first_line)
            .filter(|idx| *idx < self.num_lines)
    }

    fn register(&self, idx: usize, registration: Registration) -> AxResult {
        let line = self.line(idx)?;
        // Parents with priorities ignore a zero priority line.
        if let Some(max) = self.parent.max_priority() {
            let parent = self.parent.as_dyn();
            if parent.priority(line)? == 0 {
                parent.set_priority(line, PLIC_DEFAULT_PRIORITY.min(max))?;
            }
        }
        self.table.lock().register(idx, registration)?;
        debug!("{:?}: sub-line {idx} registered on parent line {line}", self.id);
        Ok(())
    }
}

impl<'a> Cascade for Expander<'a> {
    fn cascade(&self, hart: usize, parent_line: InterruptId) {
        let Some(idx) = self.sub_line(parent_line) else {
            warn!("{:?}: parent line {parent_line} is not one of ours", self.id);
            return;
        };
        trace!("{:?}: sub-line {idx} fired on hart {hart}", self.id);
        let slot = self.table.lock().slot(idx);
        if let Some(slot) = slot {
            slot.deliver(hart, parent_line, idx);
        }
    }
}

impl<'a> InterruptController<'a> for Expander<'a> {
    fn id(&self) -> ControllerId {
        self.id
    }

    fn init(&'a self) -> AxResult {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        let parent = self.parent.as_dyn();
        parent.init()?;
        for idx in 0..self.num_lines {
            parent.attach_cascade(self.first_line + idx, self)?;
        }
        self.initialized.store(true, Ordering::Release);
        info!(
            "{:?}: {} sub-lines on {:?} from line {}",
            self.id, self.num_lines, self.parent, self.first_line
        );
        Ok(())
    }

    fn clear(&self, idx: usize) -> AxResult {
        self.parent.as_dyn().clear(self.line(idx)?)
    }

    fn set(&self, idx: usize) -> AxResult {
        self.parent.as_dyn().set(self.line(idx)?)
    }

    fn is_pending(&self, idx: usize) -> AxResult<bool> {
        self.parent.as_dyn().is_pending(self.line(idx)?)
    }

    fn register_handler(&self, idx: usize, handler: InterruptHandler, data: usize) -> AxResult {
        self.register(idx, Registration::Callback { handler, data })
    }

    fn register_vector_handler(&self, idx: usize, handler: VectorHandler, data: usize) -> AxResult {
        self.register(idx, Registration::Vector { handler, data })
    }

    fn enable(&self, idx: usize) -> AxResult {
        let line = self.line(idx)?;
        if !self.initialized.load(Ordering::Acquire) {
            return Err(AxError::BadState);
        }
        self.parent.as_dyn().enable(line)
    }

    fn disable(&self, idx: usize) -> AxResult {
        let line = self.line(idx)?;
        if !self.initialized.load(Ordering::Acquire) {
            return Err(AxError::BadState);
        }
        self.parent.as_dyn().disable(line)
    }

    fn threshold(&self) -> AxResult<u32> {
        self.parent.as_dyn().threshold()
    }

    fn set_threshold(&self, level: u32) -> AxResult {
        self.parent.as_dyn().set_threshold(level)
    }

    fn priority(&self, idx: usize) -> AxResult<u32> {
        self.parent.as_dyn().priority(self.line(idx)?)
    }

    fn set_priority(&self, idx: usize, priority: u32) -> AxResult {
        self.parent.as_dyn().set_priority(self.line(idx)?, priority)
    }

    fn preemptive_level(&self, idx: usize) -> AxResult<u32> {
        self.parent.as_dyn().preemptive_level(self.line(idx)?)
    }

    fn set_preemptive_level(&self, idx: usize, level: u32) -> AxResult {
        self.parent.as_dyn().set_preemptive_level(self.line(idx)?, level)
    }

    fn affinity_enable(&self, harts: HartMask, idx: usize) -> AxResult<HartMask> {
        self.parent.as_dyn().affinity_enable(harts, self.line(idx)?)
    }

    fn affinity_disable(&self, harts: HartMask, idx: usize) -> AxResult<HartMask> {
        self.parent.as_dyn().affinity_disable(harts, self.line(idx)?)
    }

    fn affinity_set_threshold(&self, harts: HartMask, level: u32) -> AxResult<HartMask> {
        self.parent.as_dyn().affinity_set_threshold(harts, level)
    }

    fn affinity_threshold(&self, hart: usize) -> AxResult<u32> {
        self.parent.as_dyn().affinity_threshold(hart)
    }
}
