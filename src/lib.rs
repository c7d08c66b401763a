//! Machine mode interrupt controllers of a RISC-V microcontroller.
//!
//! The fabric, leaves first:
//!
//! - [`CpuLocal`]: `mie`/`mip`/`mtvec` of one hart, trap dispatch and
//!   exception handlers.
//! - [`Clint`]: per-hart software and timer interrupts, `mtime`/`mtimecmp`.
//! - [`Plic`]: prioritized external sources behind the machine external
//!   interrupt, served by claim/complete.
//! - [`Expander`]: banks of sub-lines forwarded 1:1 onto the CPU local
//!   controller (local bank) or the PLIC (global bank).
//! - [`BusErrorUnit`]: bus and ECC fault reporting.
//!
//! A [`Platform`] holds them all and resolves handles by kind and instance.
//! Drivers register a handler on the controller at the top of their chain and
//! enable the line; a trap on the executing hart goes through
//! [`Platform::dispatch`] (or [`CpuLocal::handle_trap`]) and is resolved down
//! the chain to the registered handler.

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate log;

#[cfg(any(test, feature = "sim"))]
extern crate alloc;

mod buserror;
mod clint;
mod consts;
mod controller;
mod cpu;
mod cpu_local;
mod device;
mod expander;
mod handler;
mod platform;
mod plic;
mod regs;
mod utils;

pub mod trap;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use consts::*;

pub use buserror::{BusErrorEvents, BusErrorUnit};
pub use clint::{Clint, CLINT_LINES};
pub use controller::{
    Command, Controller, ControllerId, ControllerKind, HartMask, InterruptController, Privilege,
    VectorMode,
};
pub use cpu::CpuDevice;
pub use cpu_local::CpuLocal;
pub use device::{BusErrorRecord, ControllerRecord, DeviceTable, Wiring, DEFAULT_BOARD};
pub use expander::Expander;
pub use handler::{Cascade, ExceptionHandler, InterruptHandler, Registration, VectorHandler};
pub use platform::Platform;
pub use plic::Plic;
pub use regs::{Csr, CsrAccess, MmioBank, RegisterBank};

#[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
pub use regs::MachineCsrs;

/// Interrupt number, relative to the controller it is passed to.
pub type InterruptId = usize;
