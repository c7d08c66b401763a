//! The capability set shared by every interrupt controller, and the tagged
//! handle drivers hold.

use axerrno::{ax_err, AxError, AxResult};
use bitmaps::Bitmap;

use crate::consts::MAX_HARTS;
use crate::handler::{Cascade, InterruptHandler, VectorHandler};
use crate::{Clint, CpuLocal, Expander, InterruptId, Plic};

/// One bit per hart, for operations that target several hart contexts.
pub type HartMask = Bitmap<{ MAX_HARTS }>;

/// The kinds of controllers in the interrupt fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerKind {
    CpuLocal,
    Clint,
    Plic,
    LocalExpander,
    GlobalExpander,
}

/// Identity of one controller instance: its kind plus a small instance number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControllerId {
    pub kind: ControllerKind,
    pub instance: usize,
}

impl ControllerId {
    pub const fn new(kind: ControllerKind, instance: usize) -> Self {
        Self { kind, instance }
    }
}

/// Trap vector mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorMode {
    /// One trap entry that branches on the cause.
    Direct,
    /// Hardware jumps to `base + 4 * cause`.
    Vector,
    SelectiveNonVector,
    SelectiveVector,
    HardwareVector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    Machine,
    Supervisor,
    User,
}

/// Opcodes of the generic command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Command {
    /// Out: the current time counter.
    TimerMtimeGet = 0,
    /// In: a hart id. Clears that hart's software interrupt.
    SoftwareIpiClear = 1,
    /// In: a hart id. Raises that hart's software interrupt.
    SoftwareIpiSet = 2,
    /// In: a hart id. Out: 1 when its software interrupt is pending.
    SoftwareMsipGet = 3,
}

impl TryFrom<u32> for Command {
    type Error = AxError;

    fn try_from(raw: u32) -> AxResult<Self> {
        Ok(match raw {
            0 => Self::TimerMtimeGet,
            1 => Self::SoftwareIpiClear,
            2 => Self::SoftwareIpiSet,
            3 => Self::SoftwareMsipGet,
            _ => return ax_err!(InvalidInput, "unknown command opcode"),
        })
    }
}

/// Operations a controller may support.
///
/// Every operation a controller does not implement returns
/// [`AxError::Unsupported`]. Ids are relative to the controller they are
/// passed to.
#[allow(unused_variables)]
pub trait InterruptController<'a>: Sync {
    fn id(&self) -> ControllerId;

    /// Brings the controller up, initializing its parents first and chaining
    /// itself below them where needed. Calling it again is a no-op.
    fn init(&'a self) -> AxResult;

    fn set_vector_mode(&self, mode: VectorMode) -> AxResult {
        Err(AxError::Unsupported)
    }

    fn vector_mode(&self) -> AxResult<VectorMode> {
        Err(AxError::Unsupported)
    }

    fn set_privilege(&self, privilege: Privilege) -> AxResult {
        Err(AxError::Unsupported)
    }

    fn privilege(&self) -> AxResult<Privilege> {
        Err(AxError::Unsupported)
    }

    /// Clears the pending state of `id`.
    fn clear(&self, id: InterruptId) -> AxResult {
        Err(AxError::Unsupported)
    }

    /// Raises `id` by software.
    fn set(&self, id: InterruptId) -> AxResult {
        Err(AxError::Unsupported)
    }

    fn is_pending(&self, id: InterruptId) -> AxResult<bool> {
        Err(AxError::Unsupported)
    }

    fn register_handler(
        &self,
        id: InterruptId,
        handler: InterruptHandler,
        data: usize,
    ) -> AxResult {
        Err(AxError::Unsupported)
    }

    fn register_vector_handler(
        &self,
        id: InterruptId,
        handler: VectorHandler,
        data: usize,
    ) -> AxResult {
        Err(AxError::Unsupported)
    }

    /// Chains `sink` below line `id`; it runs before the line's registration.
    fn attach_cascade(&self, id: InterruptId, sink: &'a dyn Cascade) -> AxResult {
        Err(AxError::Unsupported)
    }

    fn enable(&self, id: InterruptId) -> AxResult {
        Err(AxError::Unsupported)
    }

    fn disable(&self, id: InterruptId) -> AxResult {
        Err(AxError::Unsupported)
    }

    fn enable_vector(&self, id: InterruptId) -> AxResult {
        Err(AxError::Unsupported)
    }

    fn disable_vector(&self, id: InterruptId) -> AxResult {
        Err(AxError::Unsupported)
    }

    fn threshold(&self) -> AxResult<u32> {
        Err(AxError::Unsupported)
    }

    fn set_threshold(&self, level: u32) -> AxResult {
        Err(AxError::Unsupported)
    }

    fn priority(&self, id: InterruptId) -> AxResult<u32> {
        Err(AxError::Unsupported)
    }

    fn set_priority(&self, id: InterruptId, priority: u32) -> AxResult {
        Err(AxError::Unsupported)
    }

    fn preemptive_level(&self, id: InterruptId) -> AxResult<u32> {
        Err(AxError::Unsupported)
    }

    fn set_preemptive_level(&self, id: InterruptId, level: u32) -> AxResult {
        Err(AxError::Unsupported)
    }

    /// Generic command channel: `cmd` is a [`Command`] opcode, `data` an in/out word.
    fn command_request(&self, cmd: u32, data: &mut u64) -> AxResult {
        Err(AxError::Unsupported)
    }

    fn mtimecmp_set(&self, hart: usize, time: u64) -> AxResult {
        Err(AxError::Unsupported)
    }

    /// Enables `id` on every hart in `harts`; returns the harts that failed.
    fn affinity_enable(&self, harts: HartMask, id: InterruptId) -> AxResult<HartMask> {
        Err(AxError::Unsupported)
    }

    /// Disables `id` on every hart in `harts`; returns the harts that failed.
    fn affinity_disable(&self, harts: HartMask, id: InterruptId) -> AxResult<HartMask> {
        Err(AxError::Unsupported)
    }

    /// Sets the threshold of every hart in `harts`; returns the harts that failed.
    fn affinity_set_threshold(&self, harts: HartMask, level: u32) -> AxResult<HartMask> {
        Err(AxError::Unsupported)
    }

    fn affinity_threshold(&self, hart: usize) -> AxResult<u32> {
        Err(AxError::Unsupported)
    }
}

/// Handle to a controller, tagged by kind.
#[derive(Clone, Copy)]
pub enum Controller<'a> {
    CpuLocal(&'a CpuLocal<'a>),
    Clint(&'a Clint<'a>),
    Plic(&'a Plic<'a>),
    LocalExpander(&'a Expander<'a>),
    GlobalExpander(&'a Expander<'a>),
}

impl<'a> Controller<'a> {
    pub fn as_dyn(self) -> &'a dyn InterruptController<'a> {
        match self {
            Self::CpuLocal(cpu) => cpu,
            Self::Clint(clint) => clint,
            Self::Plic(plic) => plic,
            Self::LocalExpander(expander) | Self::GlobalExpander(expander) => expander,
        }
    }

    pub fn id(self) -> ControllerId {
        self.as_dyn().id()
    }

    pub fn kind(self) -> ControllerKind {
        self.id().kind
    }

    /// Number of ids the controller owns.
    pub fn num_interrupts(self) -> usize {
        match self {
            Self::CpuLocal(_) => crate::consts::LOCAL_INTERRUPTS,
            Self::Clint(clint) => clint.num_interrupts(),
            Self::Plic(plic) => plic.num_interrupts(),
            Self::LocalExpander(expander) | Self::GlobalExpander(expander) => {
                expander.num_interrupts()
            }
        }
    }

    /// The controller an expander's lines feed. `None` for the other kinds,
    /// which are wired per hart.
    pub fn interrupt_parent(self) -> Option<Controller<'a>> {
        match self {
            Self::LocalExpander(expander) | Self::GlobalExpander(expander) => {
                Some(expander.interrupt_parent())
            }
            _ => None,
        }
    }

    /// Highest priority the controller's lines accept, following expanders
    /// up to the controller that owns the priorities. `None` when the chain
    /// has no priorities.
    pub fn max_priority(self) -> Option<u32> {
        match self {
            Self::Plic(plic) => Some(plic.max_priority()),
            Self::LocalExpander(expander) | Self::GlobalExpander(expander) => {
                expander.interrupt_parent().max_priority()
            }
            _ => None,
        }
    }

    /// Parent side id of expander sub-line `idx`.
    pub fn interrupt_lines(self, idx: usize) -> Option<InterruptId> {
        match self {
            Self::LocalExpander(expander) | Self::GlobalExpander(expander) => {
                expander.interrupt_lines(idx)
            }
            _ => None,
        }
    }
}

impl core::fmt::Debug for Controller<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("Controller").field(&self.id()).finish()
    }
}

/// Applies `op` to every hart in `harts` below `num_harts` and collects the
/// harts for which it failed. Harts past `num_harts` always fail.
pub(crate) fn for_each_hart(
    harts: HartMask,
    num_harts: usize,
    mut op: impl FnMut(usize) -> AxResult,
) -> HartMask {
    let mut failed = HartMask::new();
    for hart in 0..MAX_HARTS {
        if !harts.get(hart) {
            continue;
        }
        if hart >= num_harts || op(hart).is_err() {
            failed.set(hart, true);
        }
    }
    failed
}
