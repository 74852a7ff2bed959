//
// regs.rs - Admin Queue Device Registers
//
// Purpose:
//   Access to the three registers of the device's configuration BAR that the admin
//   queue protocol touches: the ring base (page frame number), the doorbell and the
//   event counter.
//
// How it works:
//   `Registers` is the seam between the protocol engine and the device. Values cross
//   it in host byte order. `MmioRegisters` is the hardware implementation: volatile
//   32-bit big-endian accesses at fixed offsets of a mapped BAR. The BAR is either
//   supplied as a raw pointer by the surrounding driver or mapped from a PCI
//   `resourceN` file.
//
// Main components:
//   - Register: the registers used by the admin queue.
//   - Registers: trait implemented by hardware and by device models.
//   - MmioRegisters: memory-mapped big-endian register block.
//

use std::fs::OpenOptions;
use std::os::fd::AsRawFd as _;
use std::path::Path;
use std::{io, ptr};

use crate::dma::OwnedMmap;

/// Registers used by the admin queue protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    /// Ring base address divided by the page size. Zero releases the ring.
    AdminqPfn,
    /// Written with the producer counter to announce new commands.
    AdminqDoorbell,
    /// Number of commands the device has consumed. Read only.
    AdminqEventCounter,
}

impl Register {
    /// Byte offset of the register inside the configuration BAR.
    pub const fn offset(self) -> usize {
        match self {
            Register::AdminqPfn => 0x10,
            Register::AdminqDoorbell => 0x14,
            Register::AdminqEventCounter => 0x18,
        }
    }
}

/// Access to the device registers.
///
/// Reads of `AdminqEventCounter` and `AdminqPfn` reflect device state that changes
/// asynchronously; implementations must never cache them.
pub trait Registers: Send + Sync {
    fn read(&self, reg: Register) -> u32;
    fn write(&self, reg: Register, value: u32);
}

enum Bar {
    Borrowed(*mut u8),
    Mapped(OwnedMmap),
}

/// Big-endian memory-mapped register block.
pub struct MmioRegisters {
    bar: Bar,
}

// Register accesses are single volatile 32-bit operations.
unsafe impl Send for MmioRegisters {}
unsafe impl Sync for MmioRegisters {}

impl MmioRegisters {
    /// Wraps an already mapped configuration BAR.
    ///
    /// # Safety
    /// `base` must point to a mapping of at least `0x1c` bytes that stays valid and
    /// 4-byte aligned for the lifetime of the returned value.
    pub unsafe fn from_raw(base: *mut u8) -> Self {
        MmioRegisters {
            bar: Bar::Borrowed(base),
        }
    }

    /// Maps the configuration BAR from a PCI resource file such as
    /// `/sys/bus/pci/devices/0000:00:04.0/resource0`.
    pub fn open(resource: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(resource)?;
        let len = file.metadata()?.len() as usize;
        if len < Register::AdminqEventCounter.offset() + 4 {
            return Err(io::Error::other(format!(
                "{} is too small to hold the admin queue registers",
                resource.display()
            )));
        }
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(MmioRegisters {
            bar: Bar::Mapped(OwnedMmap(ptr, len)),
        })
    }

    fn reg_ptr(&self, reg: Register) -> *mut u32 {
        let base = match &self.bar {
            Bar::Borrowed(base) => *base,
            Bar::Mapped(mmap) => mmap.as_u8_ptr(),
        };
        unsafe { base.add(reg.offset()) as *mut u32 }
    }
}

impl Registers for MmioRegisters {
    fn read(&self, reg: Register) -> u32 {
        u32::from_be(unsafe { ptr::read_volatile(self.reg_ptr(reg)) })
    }

    fn write(&self, reg: Register, value: u32) {
        unsafe { ptr::write_volatile(self.reg_ptr(reg), value.to_be()) }
    }
}

//
// ================================================================================================
//   UNITTESTS
// ================================================================================================
//
#[cfg(test)]
mod tests {
    use super::{MmioRegisters, Register, Registers as _};
    use crate::dma::OwnedMmap;

    #[test]
    fn test_mmio_is_big_endian_at_fixed_offsets() {
        let page = OwnedMmap::mmap(4096).unwrap();
        let regs = unsafe { MmioRegisters::from_raw(page.as_u8_ptr()) };
        regs.write(Register::AdminqDoorbell, 0x0102_0304);
        regs.write(Register::AdminqPfn, 7);
        let raw = unsafe { std::slice::from_raw_parts(page.as_u8_ptr(), 0x1c) };
        assert_eq!(&raw[0x14..0x18], &[1, 2, 3, 4]);
        assert_eq!(&raw[0x10..0x14], &[0, 0, 0, 7]);
        assert_eq!(regs.read(Register::AdminqDoorbell), 0x0102_0304);
        assert_eq!(regs.read(Register::AdminqEventCounter), 0);
    }
}
