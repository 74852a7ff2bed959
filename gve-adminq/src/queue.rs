//! # Admin Queue
//!
//! ## Purpose
//!
//! `AdminQueue` owns the command ring of one device and is the only path through which
//! the driver talks to the device's control plane. This file holds the lifecycle:
//! installing the ring, releasing it, and rebuilding it after a fatal error.
//!
//! ## How it works
//!
//! Allocation maps one page of DMA memory and writes its page frame number to the
//! device. Release writes zero to the same register and polls until the device reads
//! back zero, which is its acknowledgement that it stopped touching the ring. Only then
//! is the memory returned. The per-command paths live in `issue.rs`, `kick.rs` and
//! `execute.rs`.
//!
//! None of the operations are internally synchronised. They take `&mut self`, so a
//! caller sharing the queue between threads wraps it in a lock held across the whole
//! build, issue and drain sequence.
//!
//! ## Main components
//!
//! - `AdminQueue`: Ring owner and device transport.
//! - `QueueState`: Whether the queue can accept commands.

use std::sync::Arc;
use std::thread;

use crate::config::AdminqConfig;
use crate::dma::{DmaMapper, DmaRegion};
use crate::error::{AdminqError, Result};
use crate::regs::{Register, Registers};
use crate::ring::CommandRing;
use crate::stats::AdminqStats;

/// Lifecycle of an admin queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// The ring is installed and commands can be issued.
    Ready,
    /// A wait timed out or the counters went out of step; the ring must be rebuilt
    /// with `AdminQueue::reset`.
    Unrecoverable,
    /// The ring was handed back to the device and freed.
    Released,
}

pub struct AdminQueue {
    pub(crate) regs: Arc<dyn Registers>,
    pub(crate) mapper: Arc<dyn DmaMapper>,
    pub(crate) config: AdminqConfig,
    pub(crate) ring: Option<CommandRing>,
    pub(crate) state: QueueState,
    pub(crate) stats: AdminqStats,
}

impl AdminQueue {
    /// Allocates the command ring and installs it on the device.
    ///
    /// # Arguments
    /// * `regs` - The device registers.
    /// * `mapper` - Translates ring and side buffer memory to bus addresses.
    /// * `config` - Ring geometry and polling bounds.
    ///
    /// # Returns
    /// A ready queue, `ResourceExhausted` if the ring memory cannot be obtained, or
    /// `InvalidArgument` for an unusable configuration.
    pub fn new(
        regs: Arc<dyn Registers>,
        mapper: Arc<dyn DmaMapper>,
        config: AdminqConfig,
    ) -> Result<Self> {
        config.validate()?;
        let mut queue = AdminQueue {
            regs,
            mapper,
            config,
            ring: None,
            state: QueueState::Released,
            stats: AdminqStats::default(),
        };
        queue.install()?;
        Ok(queue)
    }

    fn install(&mut self) -> Result<()> {
        let ring = CommandRing::alloc(&self.mapper, self.config.page_size)?;
        let bus_addr = ring.bus_addr();
        if bus_addr % self.config.page_size as u64 != 0 {
            log::error!("admin queue ring at {bus_addr:#x} is not page aligned");
            return Err(AdminqError::InvalidArgument);
        }
        let pfn = u32::try_from(bus_addr / self.config.page_size as u64).map_err(|_| {
            log::error!("admin queue ring at {bus_addr:#x} is out of the device's reach");
            AdminqError::InvalidArgument
        })?;
        self.regs.write(Register::AdminqPfn, pfn);
        log::info!(
            "admin queue installed at {bus_addr:#x} with {} slots",
            ring.slots()
        );
        self.ring = Some(ring);
        self.state = QueueState::Ready;
        Ok(())
    }

    /// Tells the device to stop using the ring and frees it once acknowledged.
    ///
    /// The device may keep reading the ring until it clears the base register, so this
    /// call never frees the memory early. After `max_release_checks` polls the hang is
    /// logged as a fatal platform error and polling continues. Calling it on a released
    /// queue does nothing.
    pub fn release(&mut self) {
        let Some(ring) = self.ring.take() else {
            return;
        };
        self.regs.write(Register::AdminqPfn, 0);
        let mut checks = 0u32;
        while self.regs.read(Register::AdminqPfn) != 0 {
            checks = checks.saturating_add(1);
            if checks == self.config.max_release_checks {
                log::error!(
                    "Unrecoverable platform error! admin queue not released after {checks} checks"
                );
            }
            thread::sleep(self.config.sleep);
        }
        drop(ring);
        self.state = QueueState::Released;
        log::debug!("admin queue released after {checks} checks");
    }

    /// Releases the ring and installs a fresh one.
    ///
    /// This is the only way out of `QueueState::Unrecoverable`. The producer counter
    /// restarts at zero; the device resets its event counter when the ring is released.
    pub fn reset(&mut self) -> Result<()> {
        self.release();
        self.install()
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn config(&self) -> &AdminqConfig {
        &self.config
    }

    pub fn stats(&self) -> &AdminqStats {
        &self.stats
    }

    /// Number of commands written since the ring was installed.
    pub fn producer(&self) -> u32 {
        self.ring.as_ref().map_or(0, CommandRing::producer)
    }

    /// Number of commands the device has consumed, read from the device.
    pub fn event_counter(&self) -> u32 {
        self.regs.read(Register::AdminqEventCounter)
    }

    /// Number of slots in the ring.
    pub fn slots(&self) -> usize {
        self.config.slots()
    }

    /// Allocates a device-visible side buffer owned by the caller.
    pub fn alloc_dma(&self, len: usize) -> Result<DmaRegion> {
        DmaRegion::alloc(&self.mapper, len)
    }

    /// Allocates a device-visible side buffer holding a copy of `bytes`.
    pub fn dma_with_contents(&self, bytes: &[u8]) -> Result<DmaRegion> {
        DmaRegion::with_contents(&self.mapper, bytes)
    }

    pub(crate) fn ensure_ready(&self) -> Result<()> {
        match self.state {
            QueueState::Ready => Ok(()),
            QueueState::Unrecoverable => Err(AdminqError::Unrecoverable),
            QueueState::Released => Err(AdminqError::InvalidState),
        }
    }

    pub(crate) fn ring_ref(&self) -> Result<&CommandRing> {
        self.ring.as_ref().ok_or(AdminqError::InvalidState)
    }

    pub(crate) fn ring_mut(&mut self) -> Result<&mut CommandRing> {
        self.ring.as_mut().ok_or(AdminqError::InvalidState)
    }
}

impl Drop for AdminQueue {
    fn drop(&mut self) {
        self.release();
    }
}
