//! # Issuing Commands
//!
//! ## Purpose
//!
//! Implements `AdminQueue::issue`, which places one command in the ring without
//! notifying the device. Several commands can be issued and then flushed together with
//! a single `kick_and_wait`.
//!
//! ## How it works
//!
//! The ring is full when the slot after the producer is the slot the device will read
//! next. In that case everything outstanding is flushed first; a flush drains the ring
//! completely, so a ring that is still full afterwards means the driver and device
//! disagree about the counters.

use crate::command::Command;
use crate::error::{AdminqError, Result};
use crate::queue::{AdminQueue, QueueState};

impl AdminQueue {
    /// Writes a command into the next free slot.
    ///
    /// The device is not told about the command until `kick` or `kick_and_wait`.
    ///
    /// # Returns
    /// The slot index the command was written to. If the ring had to be flushed to make
    /// room and one of the flushed commands failed, that failure is returned and the new
    /// command is not written. `Unrecoverable` if the ring is still full after a flush; the
    /// queue then has to be rebuilt with `reset`.
    pub fn issue(&mut self, cmd: &Command) -> Result<u32> {
        self.ensure_ready()?;
        let tail = self.event_counter();
        if self.ring_ref()?.is_full(tail) {
            log::debug!("admin queue full at producer {}, flushing", self.producer());
            self.kick_and_wait()?;
            let tail = self.event_counter();
            if self.ring_ref()?.is_full(tail) {
                log::error!(
                    "admin queue still full after flush: producer {} event counter {tail}",
                    self.producer()
                );
                self.state = QueueState::Unrecoverable;
                return Err(AdminqError::Unrecoverable);
            }
        }
        let ring = self.ring_mut()?;
        let at = ring.push(&cmd.encode());
        let index = at & ring.mask();
        self.stats.count_issue(cmd.accounting_opcode());
        log::trace!("issued {:?} at slot {index}", cmd.opcode());
        Ok(index)
    }
}
