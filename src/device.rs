//! The static device table: where every controller lives and how its lines
//! are wired into the controller above it.
//!
//! Records are plain constants produced by the board description. Every
//! lookup here is a pure function of the instance identity.

use axaddrspace::HostPhysAddr;

use crate::consts::*;
use crate::controller::{ControllerId, ControllerKind};
use crate::InterruptId;

/// How a controller's lines reach its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wiring {
    /// Line `i` drives local id `lines[i]` on every hart's CPU local controller.
    PerHart(&'static [InterruptId]),
    /// Line `i` drives id `first + i` on `parent`.
    Contiguous {
        parent: ControllerId,
        first: InterruptId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerRecord {
    pub id: ControllerId,
    /// Register window. Zero for controllers reached through CSRs or through
    /// their parent.
    pub base: usize,
    pub size: usize,
    /// Number of ids, including the reserved id 0 of a PLIC.
    pub num_interrupts: usize,
    /// Highest priority a PLIC source or threshold accepts.
    pub max_priority: u32,
    pub wiring: Option<Wiring>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusErrorRecord {
    pub instance: usize,
    pub base: usize,
    pub size: usize,
    /// Hart whose local controller receives the local interrupt.
    pub hart: usize,
    /// PLIC id of the platform interrupt, when wired.
    pub plic_line: Option<InterruptId>,
}

#[derive(Debug, Clone, Copy)]
pub struct DeviceTable {
    pub num_harts: usize,
    /// PLIC machine mode context of each hart, indexed by hart id.
    pub plic_contexts: &'static [usize],
    pub controllers: &'static [ControllerRecord],
    pub bus_errors: &'static [BusErrorRecord],
}

impl DeviceTable {
    pub fn record(&self, id: ControllerId) -> Option<&'static ControllerRecord> {
        self.controllers.iter().find(|record| record.id == id)
    }

    pub fn records_of(
        &self,
        kind: ControllerKind,
    ) -> impl Iterator<Item = &'static ControllerRecord> {
        self.controllers.iter().filter(move |record| record.id.kind == kind)
    }

    pub fn base_address(&self, id: ControllerId) -> Option<HostPhysAddr> {
        self.record(id)
            .filter(|record| record.size != 0)
            .map(|record| HostPhysAddr::from_usize(record.base))
    }

    pub fn size(&self, id: ControllerId) -> Option<usize> {
        self.record(id).map(|record| record.size)
    }

    /// Line count of `id`; 0 when the table has no such controller.
    pub fn num_interrupts(&self, id: ControllerId) -> usize {
        self.record(id).map_or(0, |record| record.num_interrupts)
    }

    /// The single controller `id` feeds. `None` for unknown controllers and
    /// for controllers wired per hart.
    pub fn interrupt_parent(&self, id: ControllerId) -> Option<ControllerId> {
        match self.record(id)?.wiring? {
            Wiring::Contiguous { parent, .. } => Some(parent),
            Wiring::PerHart(_) => None,
        }
    }

    /// Parent side id of line `idx` of `id`.
    pub fn interrupt_lines(&self, id: ControllerId, idx: usize) -> Option<InterruptId> {
        let record = self.record(id)?;
        if idx >= record.num_interrupts {
            return None;
        }
        match record.wiring? {
            Wiring::Contiguous { first, .. } => Some(first + idx),
            Wiring::PerHart(lines) => lines.get(idx).copied(),
        }
    }

    pub fn plic_context(&self, hart: usize) -> Option<usize> {
        self.plic_contexts.get(hart).copied()
    }

    pub fn bus_error(&self, instance: usize) -> Option<&'static BusErrorRecord> {
        self.bus_errors.iter().find(|record| record.instance == instance)
    }
}

const fn cpu_local(hart: usize) -> ControllerRecord {
    ControllerRecord {
        id: ControllerId::new(ControllerKind::CpuLocal, hart),
        base: 0,
        size: 0,
        num_interrupts: LOCAL_INTERRUPTS,
        max_priority: 0,
        wiring: None,
    }
}

/// A single hart part with a CLINT, a PLIC with 129 sources, a local and a
/// global expander and one bus error unit.
pub static DEFAULT_BOARD: DeviceTable = DeviceTable {
    num_harts: 1,
    plic_contexts: &[0],
    controllers: &[
        cpu_local(0),
        ControllerRecord {
            id: ControllerId::new(ControllerKind::Clint, 0),
            base: 0x0200_0000,
            size: 0x1_0000,
            num_interrupts: 2,
            max_priority: 0,
            wiring: Some(Wiring::PerHart(&[INTERRUPT_ID_SW, INTERRUPT_ID_TMR])),
        },
        ControllerRecord {
            id: ControllerId::new(ControllerKind::Plic, 0),
            base: 0x0C00_0000,
            size: 0x0400_0000,
            num_interrupts: 130,
            max_priority: 7,
            wiring: Some(Wiring::PerHart(&[INTERRUPT_ID_EXT])),
        },
        ControllerRecord {
            id: ControllerId::new(ControllerKind::LocalExpander, 0),
            base: 0,
            size: 0,
            num_interrupts: LOCAL_EXPANDER_LINES,
            max_priority: 0,
            wiring: Some(Wiring::Contiguous {
                parent: ControllerId::new(ControllerKind::CpuLocal, 0),
                first: INTERRUPT_ID_LC0,
            }),
        },
        ControllerRecord {
            id: ControllerId::new(ControllerKind::GlobalExpander, 0),
            base: 0,
            size: 0,
            num_interrupts: GLOBAL_EXPANDER_LINES,
            max_priority: 0,
            // PLIC id 0 does not exist, so sub-line 0 lands on id 1.
            wiring: Some(Wiring::Contiguous {
                parent: ControllerId::new(ControllerKind::Plic, 0),
                first: 1,
            }),
        },
    ],
    bus_errors: &[BusErrorRecord {
        instance: 0,
        base: 0x1700_0000,
        size: 0x1000,
        hart: 0,
        plic_line: Some(128),
    }],
};
