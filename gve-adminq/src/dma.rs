//! # Device-Visible Memory
//!
//! ## Purpose
//!
//! Every buffer the device reads or writes (the command ring, extended command
//! payloads, RSS staging buffers, the describe-device page) lives in memory that is
//! owned by the driver and known to the device by a bus address. This module
//! provides the owner type for such buffers.
//!
//! ## How it works
//!
//! `OwnedMmap` allocates page-aligned anonymous memory with `libc::mmap` and returns
//! it with `munmap` on drop. A `DmaMapper` turns the host address into the address
//! the device uses; `IdentityMapper` is the trivial mapping used when the device
//! shares the host address space. `DmaRegion` ties the two together and undoes the
//! mapping before the memory is released, so a region can never be freed while the
//! device still knows it by address.
//!
//! ## Main components
//!
//! - `OwnedMmap`: Safe owner of an anonymous memory mapping.
//! - `DmaMapper`, `IdentityMapper`: Host to bus address translation.
//! - `DmaRegion`: Mapped, zero-initialised buffer with a bus address.

use std::sync::Arc;
use std::{io, ptr};

use crate::error::{AdminqError, Result};

/// A safe wrapper for an anonymous memory-mapped region.
pub struct OwnedMmap(
    /// A raw pointer to the beginning of the mapped area.
    pub *mut libc::c_void,
    /// The total size of the mapped area in bytes.
    pub usize,
);

// The mapping is plain memory; ownership moves with the value.
unsafe impl Send for OwnedMmap {}

impl OwnedMmap {
    /// Creates a new zero-filled mapping of at least `size` bytes.
    ///
    /// The size is rounded up to the system page size, so the start of the mapping is
    /// always page aligned.
    pub fn mmap(size: usize) -> io::Result<Self> {
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize };
        let aligned_size = (size.max(1) + page_size - 1) & !(page_size - 1);
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                aligned_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(OwnedMmap(ptr, aligned_size))
    }

    /// Returns the mapping as a byte pointer.
    pub fn as_u8_ptr(&self) -> *mut u8 {
        self.0 as *mut u8
    }

    /// Returns the size of the mapping in bytes.
    pub fn len(&self) -> usize {
        self.1
    }

    /// Returns `true` if the mapping has a size of zero.
    pub fn is_empty(&self) -> bool {
        self.1 == 0
    }
}

impl Drop for OwnedMmap {
    fn drop(&mut self) {
        unsafe {
            if self.0 != libc::MAP_FAILED && !self.0.is_null() {
                let res = libc::munmap(self.0, self.1);
                if res < 0 {
                    log::error!("Failed to unmap memory: {}", io::Error::last_os_error());
                }
            }
        }
    }
}

/// Translates host memory into addresses the device can use.
pub trait DmaMapper: Send + Sync {
    /// Makes `len` bytes at `host` visible to the device.
    ///
    /// # Returns
    /// The bus address the device must use for the first byte.
    fn map(&self, host: *mut u8, len: usize) -> io::Result<u64>;

    /// Revokes a mapping previously returned by `map`.
    fn unmap(&self, bus_addr: u64, len: usize);
}

/// Mapper for devices that address host memory directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityMapper;

impl DmaMapper for IdentityMapper {
    fn map(&self, host: *mut u8, _len: usize) -> io::Result<u64> {
        Ok(host as u64)
    }

    fn unmap(&self, _bus_addr: u64, _len: usize) {}
}

/// A zero-initialised, device-visible buffer.
///
/// The buffer is unmapped from the device and freed when the value is dropped.
pub struct DmaRegion {
    mmap: OwnedMmap,
    len: usize,
    bus_addr: u64,
    mapper: Arc<dyn DmaMapper>,
}

impl DmaRegion {
    /// Allocates and maps `len` bytes.
    ///
    /// # Returns
    /// `ResourceExhausted` if the memory cannot be obtained or mapped.
    pub fn alloc(mapper: &Arc<dyn DmaMapper>, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(AdminqError::InvalidArgument);
        }
        let mmap = OwnedMmap::mmap(len).map_err(|e| {
            log::error!("failed to allocate {len} bytes of DMA memory: {e}");
            AdminqError::ResourceExhausted
        })?;
        let bus_addr = mapper.map(mmap.as_u8_ptr(), len).map_err(|e| {
            log::error!("failed to map {len} bytes for the device: {e}");
            AdminqError::ResourceExhausted
        })?;
        Ok(DmaRegion {
            mmap,
            len,
            bus_addr,
            mapper: Arc::clone(mapper),
        })
    }

    /// Allocates a region holding a copy of `bytes`.
    pub fn with_contents(mapper: &Arc<dyn DmaMapper>, bytes: &[u8]) -> Result<Self> {
        let mut region = Self::alloc(mapper, bytes.len())?;
        region.write(0, bytes);
        Ok(region)
    }

    /// The address the device uses for the first byte of the region.
    pub fn bus_addr(&self) -> u64 {
        self.bus_addr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.mmap.as_u8_ptr()
    }

    /// Copies `bytes` into the region at `offset`.
    pub fn write(&mut self, offset: usize, bytes: &[u8]) {
        assert!(
            offset + bytes.len() <= self.len,
            "write past the end of a DMA region"
        );
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.as_ptr().add(offset), bytes.len());
        }
    }

    /// Copies the current contents of the region, including anything the device wrote.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.len];
        unsafe {
            ptr::copy_nonoverlapping(self.as_ptr(), out.as_mut_ptr(), self.len);
        }
        out
    }
}

impl Drop for DmaRegion {
    fn drop(&mut self) {
        self.mapper.unmap(self.bus_addr, self.len);
    }
}
