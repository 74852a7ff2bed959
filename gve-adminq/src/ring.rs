//! # Command Ring
//!
//! ## Purpose
//!
//! The page of command slots shared with the device, with the producer bookkeeping
//! owned by the driver.
//!
//! ## How it works
//!
//! The ring is a single `DmaRegion` split into `SLOT_SIZE` slots. The producer counter
//! is monotonic and only ever masked when it is turned into a slot index, so
//! `producer - event_counter` is the number of commands in flight even after the
//! counters wrap. Slot images are copied in whole by the driver; the status word is
//! the only field the device writes back and it is read with acquire ordering so a
//! completion is never observed before the device's other writes.
//!
//! ## Main components
//!
//! - `CommandRing`: Slot storage plus producer counter and index mask.

use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::command::{SLOT_SIZE, STATUS_OFFSET};
use crate::dma::{DmaMapper, DmaRegion};
use crate::error::Result;

pub struct CommandRing {
    region: DmaRegion,
    producer: u32,
    mask: u32,
}

impl CommandRing {
    /// Allocates a zeroed ring of `page_size / SLOT_SIZE` slots.
    pub fn alloc(mapper: &Arc<dyn DmaMapper>, page_size: usize) -> Result<Self> {
        debug_assert!(page_size.is_power_of_two() && page_size >= 2 * SLOT_SIZE);
        let region = DmaRegion::alloc(mapper, page_size)?;
        Ok(CommandRing {
            region,
            producer: 0,
            mask: (page_size / SLOT_SIZE) as u32 - 1,
        })
    }

    /// Bus address of slot 0.
    pub fn bus_addr(&self) -> u64 {
        self.region.bus_addr()
    }

    /// Number of slots.
    pub fn slots(&self) -> usize {
        self.mask as usize + 1
    }

    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// Total number of commands written since allocation.
    pub fn producer(&self) -> u32 {
        self.producer
    }

    /// Returns `true` when writing one more slot would catch up with the device.
    pub fn is_full(&self, event_counter: u32) -> bool {
        (self.producer.wrapping_add(1) & self.mask) == (event_counter & self.mask)
    }

    fn slot_ptr(&self, counter: u32) -> *mut u8 {
        let index = (counter & self.mask) as usize;
        unsafe { self.region.as_ptr().add(index * SLOT_SIZE) }
    }

    /// Writes a slot image at the producer position and advances the producer.
    ///
    /// # Returns
    /// The counter value the command was written at.
    pub fn push(&mut self, slot: &[u8; SLOT_SIZE]) -> u32 {
        let at = self.producer;
        unsafe { ptr::copy_nonoverlapping(slot.as_ptr(), self.slot_ptr(at), SLOT_SIZE) };
        self.producer = self.producer.wrapping_add(1);
        at
    }

    /// Reads the big-endian status word the device wrote for the command at `counter`.
    pub fn status_at(&self, counter: u32) -> u32 {
        let status = unsafe { &*(self.slot_ptr(counter).add(STATUS_OFFSET) as *const AtomicU32) };
        u32::from_be(status.load(Ordering::Acquire))
    }

    /// Copies the slot that holds the command at `counter`.
    pub fn slot_at(&self, counter: u32) -> [u8; SLOT_SIZE] {
        let mut out = [0u8; SLOT_SIZE];
        unsafe { ptr::copy_nonoverlapping(self.slot_ptr(counter), out.as_mut_ptr(), SLOT_SIZE) };
        out
    }
}
