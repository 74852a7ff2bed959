//! # Simulated IOMMU
//!
//! ## Purpose
//!
//! Gives every buffer the driver shares with the simulated device a bus address that
//! differs from its host address, so a driver that hands out host pointers instead of
//! mapped addresses is caught immediately.
//!
//! ## How it works
//!
//! Bus addresses are handed out from a monotonically growing window, each mapping
//! aligned to `BUS_PAGE`. The device model translates bus addresses back to host
//! memory through `read` and `write`, which fail for anything not currently mapped.
//! The number of live mappings is exposed so tests can check that side buffers are
//! released on every path.

use std::collections::BTreeMap;
use std::io;
use std::ptr;
use std::sync::Mutex;

use anyhow::{Result, bail};
use gve_adminq::DmaMapper;

/// Alignment of every bus address handed out.
pub const BUS_PAGE: u64 = 4096;
/// First bus address handed out.
pub const BUS_BASE: u64 = 0x1000_0000;

#[derive(Debug, Clone, Copy)]
struct Mapping {
    host: usize,
    len: usize,
}

#[derive(Debug)]
struct Window {
    next: u64,
    mappings: BTreeMap<u64, Mapping>,
}

#[derive(Debug)]
pub struct SimIommu {
    window: Mutex<Window>,
}

impl Default for SimIommu {
    fn default() -> Self {
        SimIommu {
            window: Mutex::new(Window {
                next: BUS_BASE,
                mappings: BTreeMap::new(),
            }),
        }
    }
}

impl SimIommu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mappings the driver has not revoked yet.
    pub fn live_mappings(&self) -> usize {
        self.lock().mappings.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Window> {
        self.window.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Resolves `len` bytes at `bus` to a host pointer.
    pub fn translate(&self, bus: u64, len: usize) -> Result<*mut u8> {
        let window = self.lock();
        let Some((&start, m)) = window.mappings.range(..=bus).next_back() else {
            bail!("bus address {bus:#x} is not mapped");
        };
        let offset = (bus - start) as usize;
        if offset + len > m.len {
            bail!(
                "access {bus:#x}+{len} overruns the mapping at {start:#x} of {} bytes",
                m.len
            );
        }
        Ok((m.host + offset) as *mut u8)
    }

    /// Copies `len` bytes of device-visible memory.
    pub fn read(&self, bus: u64, len: usize) -> Result<Vec<u8>> {
        let src = self.translate(bus, len)?;
        let mut out = vec![0u8; len];
        unsafe { ptr::copy_nonoverlapping(src, out.as_mut_ptr(), len) };
        Ok(out)
    }

    /// Writes `bytes` into device-visible memory.
    pub fn write(&self, bus: u64, bytes: &[u8]) -> Result<()> {
        let dst = self.translate(bus, bytes.len())?;
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len()) };
        Ok(())
    }
}

impl DmaMapper for SimIommu {
    fn map(&self, host: *mut u8, len: usize) -> io::Result<u64> {
        if host.is_null() || len == 0 {
            return Err(io::Error::from(io::ErrorKind::InvalidInput));
        }
        let mut window = self.lock();
        let bus = window.next;
        let span = (len as u64).div_ceil(BUS_PAGE) * BUS_PAGE;
        window.next += span;
        window.mappings.insert(
            bus,
            Mapping {
                host: host as usize,
                len,
            },
        );
        log::trace!("iommu: mapped {len} bytes at {bus:#x}");
        Ok(bus)
    }

    fn unmap(&self, bus_addr: u64, len: usize) {
        let mut window = self.lock();
        match window.mappings.remove(&bus_addr) {
            Some(m) if m.len == len => log::trace!("iommu: unmapped {len} bytes at {bus_addr:#x}"),
            Some(m) => log::warn!(
                "iommu: unmap of {bus_addr:#x} with length {len}, mapped with {}",
                m.len
            ),
            None => log::warn!("iommu: unmap of unknown bus address {bus_addr:#x}"),
        }
    }
}
