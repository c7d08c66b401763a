//! Register access seams: memory mapped register banks and machine CSRs.
//!
//! Controllers never touch hardware directly. They go through a
//! [`RegisterBank`] (device registers, by offset) or a [`CsrAccess`] (the
//! executing hart's machine CSRs), so the same driver code runs against real
//! hardware or against the shadow models in [`crate::sim`].

use axaddrspace::{device::AccessWidth, HostPhysAddr};
use axerrno::{ax_err, AxResult};

use crate::utils::*;

/// A bank of memory mapped device registers, addressed by byte offset.
pub trait RegisterBank: Sync {
    fn read(&self, offset: usize, width: AccessWidth) -> AxResult<usize>;

    fn write(&self, offset: usize, width: AccessWidth, val: usize) -> AxResult;

    fn read32(&self, offset: usize) -> AxResult<u32> {
        self.read(offset, AccessWidth::Dword).map(|val| val as u32)
    }

    fn write32(&self, offset: usize, val: u32) -> AxResult {
        self.write(offset, AccessWidth::Dword, val as usize)
    }
}

/// Device registers reached through volatile loads and stores.
pub struct MmioBank {
    base: HostPhysAddr,
    size: usize,
}

impl MmioBank {
    /// # Safety
    ///
    /// `[base, base + size)` must be the register window of a device, mapped
    /// one to one, and must stay valid for the lifetime of the bank.
    pub unsafe fn new(base: HostPhysAddr, size: usize) -> Self {
        Self { base, size }
    }

    pub fn base(&self) -> HostPhysAddr {
        self.base
    }

    fn target(&self, offset: usize, width: AccessWidth) -> AxResult<HostPhysAddr> {
        match offset.checked_add(width_bytes(width)) {
            Some(end) if end <= self.size => {
                Ok(HostPhysAddr::from_usize(self.base.as_usize() + offset))
            }
            _ => ax_err!(BadAddress, "register access outside the bank"),
        }
    }
}

impl RegisterBank for MmioBank {
    fn read(&self, offset: usize, width: AccessWidth) -> AxResult<usize> {
        let addr = self.target(offset, width)?;
        // SAFETY: the bank covers a device window (see `new`) and the access is in bounds.
        unsafe { perform_mmio_read(addr, width) }
    }

    fn write(&self, offset: usize, width: AccessWidth, val: usize) -> AxResult {
        let addr = self.target(offset, width)?;
        // SAFETY: as above.
        unsafe { perform_mmio_write(addr, width, val) }
    }
}

/// Machine mode CSRs used by the interrupt subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Csr {
    Mstatus,
    Mie,
    Mip,
    Mtvec,
    Mcause,
    Mepc,
    Mtval,
    Mhartid,
    Mcycle,
    Minstret,
}

impl Csr {
    pub const COUNT: usize = 10;

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// The CSR file of the hart executing the call.
pub trait CsrAccess: Sync {
    fn read(&self, csr: Csr) -> usize;

    /// Writes to read-only CSRs are ignored.
    fn write(&self, csr: Csr, val: usize);

    fn set_bits(&self, csr: Csr, mask: usize) {
        self.write(csr, self.read(csr) | mask);
    }

    fn clear_bits(&self, csr: Csr, mask: usize) {
        self.write(csr, self.read(csr) & !mask);
    }

    fn hart_id(&self) -> usize {
        self.read(Csr::Mhartid)
    }
}

#[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
pub use machine::MachineCsrs;

#[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
mod machine {
    use core::arch::asm;

    use super::{Csr, CsrAccess};

    macro_rules! csrr {
        ($name:literal) => {{
            let bits: usize;
            // SAFETY: reading a machine CSR has no side effects.
            unsafe { asm!(concat!("csrr {0}, ", $name), out(reg) bits) };
            bits
        }};
    }

    macro_rules! csr_op {
        ($op:literal, $name:literal, $val:expr) => {
            // SAFETY: the caller runs in machine mode and owns this hart's trap state.
            unsafe { asm!(concat!($op, " ", $name, ", {0}"), in(reg) $val) }
        };
    }

    macro_rules! writable {
        ($csr:expr, $op:literal, $val:expr) => {
            match $csr {
                Csr::Mstatus => csr_op!($op, "mstatus", $val),
                Csr::Mie => csr_op!($op, "mie", $val),
                Csr::Mip => csr_op!($op, "mip", $val),
                Csr::Mtvec => csr_op!($op, "mtvec", $val),
                Csr::Mcause => csr_op!($op, "mcause", $val),
                Csr::Mepc => csr_op!($op, "mepc", $val),
                Csr::Mtval => csr_op!($op, "mtval", $val),
                Csr::Mhartid | Csr::Mcycle | Csr::Minstret => {}
            }
        };
    }

    /// The real CSR file of the executing hart.
    pub struct MachineCsrs;

    impl CsrAccess for MachineCsrs {
        fn read(&self, csr: Csr) -> usize {
            match csr {
                Csr::Mstatus => csrr!("mstatus"),
                Csr::Mie => csrr!("mie"),
                Csr::Mip => csrr!("mip"),
                Csr::Mtvec => csrr!("mtvec"),
                Csr::Mcause => csrr!("mcause"),
                Csr::Mepc => csrr!("mepc"),
                Csr::Mtval => csrr!("mtval"),
                Csr::Mhartid => csrr!("mhartid"),
                Csr::Mcycle => csrr!("mcycle"),
                Csr::Minstret => csrr!("minstret"),
            }
        }

        fn write(&self, csr: Csr, val: usize) {
            writable!(csr, "csrw", val)
        }

        fn set_bits(&self, csr: Csr, mask: usize) {
            writable!(csr, "csrs", mask)
        }

        fn clear_bits(&self, csr: Csr, mask: usize) {
            writable!(csr, "csrc", mask)
        }
    }
}
