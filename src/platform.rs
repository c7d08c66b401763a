//! The controller resolver: owns references to every controller on the board
//! and hands out handles by kind and instance.

use axerrno::AxResult;

use crate::controller::{Controller, ControllerId, ControllerKind, InterruptController};
use crate::device::DeviceTable;
use crate::{BusErrorUnit, Clint, CpuDevice, CpuLocal, Expander, Plic};

pub struct Platform<'a> {
    table: &'a DeviceTable,
    /// Indexed by hart id.
    cpus: &'a [CpuLocal<'a>],
    clints: &'a [Clint<'a>],
    plics: &'a [Plic<'a>],
    expanders: &'a [Expander<'a>],
    bus_errors: &'a [BusErrorUnit<'a>],
}

impl<'a> Platform<'a> {
    /// `cpus[i]` must be the local controller of hart `i`.
    pub fn new(
        table: &'a DeviceTable,
        cpus: &'a [CpuLocal<'a>],
        clints: &'a [Clint<'a>],
        plics: &'a [Plic<'a>],
        expanders: &'a [Expander<'a>],
        bus_errors: &'a [BusErrorUnit<'a>],
    ) -> Self {
        Self {
            table,
            cpus,
            clints,
            plics,
            expanders,
            bus_errors,
        }
    }

    pub fn table(&self) -> &'a DeviceTable {
        self.table
    }

    pub fn num_harts(&self) -> usize {
        self.cpus.len()
    }

    /// The controller `instance` of `kind`, or `None` when the board has none.
    pub fn get_controller(&self, kind: ControllerKind, instance: usize) -> Option<Controller<'a>> {
        let id = ControllerId::new(kind, instance);
        match kind {
            ControllerKind::CpuLocal => self.cpus.get(instance).map(Controller::CpuLocal),
            ControllerKind::Clint => {
                self.clints.iter().find(|c| c.id() == id).map(Controller::Clint)
            }
            ControllerKind::Plic => self.plics.iter().find(|p| p.id() == id).map(Controller::Plic),
            ControllerKind::LocalExpander => self
                .expanders
                .iter()
                .find(|e| e.id() == id)
                .map(Controller::LocalExpander),
            ControllerKind::GlobalExpander => self
                .expanders
                .iter()
                .find(|e| e.id() == id)
                .map(Controller::GlobalExpander),
        }
    }

    /// The device record of `hart`, or `None` for a hart the board does not have.
    pub fn cpu(&self, hart: usize) -> Option<CpuDevice<'a>> {
        let local = self.cpus.get(hart)?;
        let buserror = self.bus_errors.iter().find(|beu| beu.hart() == hart);
        Some(CpuDevice::new(local, self.clints.first(), self.plics.first(), buserror))
    }

    /// Initializes every controller, parents before the controllers chained
    /// below them.
    pub fn init(&self) -> AxResult {
        for cpu in self.cpus {
            cpu.init()?;
        }
        for clint in self.clints {
            clint.init()?;
        }
        for plic in self.plics {
            plic.init()?;
        }
        for expander in self.expanders {
            expander.init()?;
        }
        info!(
            "interrupt fabric up: {} harts, {} clint, {} plic, {} expanders, {} bus error units",
            self.cpus.len(),
            self.clints.len(),
            self.plics.len(),
            self.expanders.len(),
            self.bus_errors.len()
        );
        Ok(())
    }

    /// Dispatches a raw `mcause` value taken on `hart`.
    pub fn dispatch(&self, hart: usize, cause: usize) {
        match self.cpus.get(hart) {
            Some(cpu) => cpu.dispatch(cause),
            None => warn!("trap on unknown hart {hart}, cause {cause:#x}"),
        }
    }
}
