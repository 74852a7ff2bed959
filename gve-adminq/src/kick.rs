//! # Device Notification and Completion
//!
//! ## Purpose
//!
//! Implements the doorbell write and the completion wait of the admin queue, and the
//! combination of both that drains every outstanding command.
//!
//! ## How it works
//!
//! `kick` publishes the producer counter through the doorbell. `wait_for_completion`
//! polls the event counter register until it reaches the target, sleeping between
//! reads. Once the device caught up, `kick_and_wait` reads the status word of every
//! slot issued since the previous drain. All of them are inspected, so the ring is
//! always left empty, and the first failure is the one reported.
//!
//! ## Main components
//!
//! - `kick`: Doorbell write.
//! - `wait_for_completion`: Bounded poll of the event counter.
//! - `kick_and_wait`: Flush with status collection.

use std::sync::atomic::{Ordering, fence};
use std::thread;

use crate::error::{AdminqError, DeviceStatus, Result};
use crate::queue::{AdminQueue, QueueState};
use crate::regs::Register;

impl AdminQueue {
    /// Publishes the producer counter to the device.
    pub fn kick(&self) {
        // slot contents must be visible before the doorbell
        fence(Ordering::Release);
        self.regs.write(Register::AdminqDoorbell, self.producer());
    }

    /// Polls the event counter until it equals `target`.
    ///
    /// # Returns
    /// `Ok(())` once the device consumed everything up to `target`. After
    /// `max_event_counter_checks` reads the queue is marked unrecoverable, the timeout
    /// counter is bumped and `Timeout` is returned.
    pub fn wait_for_completion(&mut self, target: u32) -> Result<()> {
        for _ in 0..self.config.max_event_counter_checks {
            if self.event_counter() == target {
                fence(Ordering::Acquire);
                return Ok(());
            }
            thread::sleep(self.config.sleep);
        }
        self.stats.timeouts = self.stats.timeouts.wrapping_add(1);
        self.state = QueueState::Unrecoverable;
        log::error!(
            "admin queue timed out waiting for event counter {target} (at {})",
            self.event_counter()
        );
        Err(AdminqError::Timeout)
    }

    /// Kicks the device and waits until every issued command completed.
    ///
    /// # Returns
    /// `Ok(())` if every drained command passed, otherwise the error of the first
    /// failing command. Transport failures (`Timeout`, `Unrecoverable`) are returned as
    /// is and leave the slots uninspected.
    pub fn kick_and_wait(&mut self) -> Result<()> {
        self.ensure_ready()?;
        let tail = self.event_counter();
        let head = self.producer();
        self.kick();
        self.wait_for_completion(head)?;

        let ring = self.ring_ref()?;
        let mut first = Ok(());
        let mut failed = 0u32;
        for i in 0..head.wrapping_sub(tail) {
            let counter = tail.wrapping_add(i);
            let status = ring.status_at(counter);
            if let Err(err) = DeviceStatus::check(status) {
                let slot = ring.slot_at(counter);
                let opcode = u32::from_be_bytes([slot[0], slot[1], slot[2], slot[3]]);
                log::error!("AQ command {opcode:#x} failed with status {status:#x}: {err}");
                failed += 1;
                if first.is_ok() {
                    first = Err(err);
                }
            }
        }
        self.stats.cmd_fail = self.stats.cmd_fail.wrapping_add(failed);
        first
    }
}
