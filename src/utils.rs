use core::result::Result::Ok;
use axaddrspace::{device::AccessWidth, HostPhysAddr};
use axerrno::AxResult;

// Machine mode runs without translation, so physical addresses are dereferenced as is.

/// # Safety
///
/// `addr` must point into a device register bank that tolerates an access of `width`.
pub(crate) unsafe fn perform_mmio_read(addr: HostPhysAddr, width: AccessWidth) -> AxResult<usize> {
    let addr = addr.as_usize() as *const u8;

    match width {
        AccessWidth::Byte => Ok(unsafe { addr.read_volatile() as _ }),
        AccessWidth::Word => Ok(unsafe { (addr as *const u16).read_volatile() as _ }),
        AccessWidth::Dword => Ok(unsafe { (addr as *const u32).read_volatile() as _ }),
        AccessWidth::Qword => Ok(unsafe { (addr as *const u64).read_volatile() as _ }),
    }
}

/// # Safety
///
/// `addr` must point into a device register bank that tolerates a store of `width`.
pub(crate) unsafe fn perform_mmio_write(
    addr: HostPhysAddr,
    width: AccessWidth,
    val: usize,
) -> AxResult<()> {
    let addr = addr.as_usize() as *mut u8;

    match width {
        AccessWidth::Byte => unsafe {
            addr.write_volatile(val as _);
        },
        AccessWidth::Word => unsafe {
            (addr as *mut u16).write_volatile(val as _);
        },
        AccessWidth::Dword => unsafe {
            (addr as *mut u32).write_volatile(val as _);
        },
        AccessWidth::Qword => unsafe {
            (addr as *mut u64).write_volatile(val as _);
        },
    }

    Ok(())
}

/// Byte size of an access.
pub(crate) fn width_bytes(width: AccessWidth) -> usize {
    match width {
        AccessWidth::Byte => 1,
        AccessWidth::Word => 2,
        AccessWidth::Dword => 4,
        AccessWidth::Qword => 8,
    }
}

/// Word index and bit mask of `index` in a packed array of 32-bit words.
pub(crate) fn word_bit(index: usize) -> (usize, u32) {
    (index / 32, 1u32 << (index % 32))
}
