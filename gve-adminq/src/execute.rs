//! # Isolated and Extended Commands
//!
//! ## Purpose
//!
//! Implements commands that must run on an otherwise empty ring, and the extended
//! command wrapper for payloads larger than a slot.
//!
//! ## How it works
//!
//! `execute` refuses to run unless the device has consumed everything that was issued,
//! then issues the command and drains it. `execute_extended` copies the real payload
//! into a side buffer owned by the call and executes a wrapper command that points to
//! it. The side buffer is dropped, and thereby unmapped and freed, when the call
//! returns, whatever the outcome.

use crate::command::{Command, Opcode};
use crate::error::{AdminqError, Result};
use crate::queue::AdminQueue;

impl AdminQueue {
    /// Issues a command on a drained ring and waits for its completion.
    ///
    /// # Returns
    /// The command's result, or `InvalidState` if earlier commands are still pending.
    pub fn execute(&mut self, cmd: &Command) -> Result<()> {
        self.ensure_ready()?;
        let tail = self.event_counter();
        let head = self.producer();
        if tail != head {
            log::error!(
                "admin queue not drained before {:?}: producer {head} event counter {tail}",
                cmd.opcode()
            );
            return Err(AdminqError::InvalidState);
        }
        self.issue(cmd)?;
        self.kick_and_wait()
    }

    /// Executes a command whose payload is carried out of band.
    ///
    /// # Arguments
    /// * `inner_opcode` - The opcode the device dispatches the payload to.
    /// * `payload` - The encoded inner command.
    pub fn execute_extended(&mut self, inner_opcode: Opcode, payload: &[u8]) -> Result<()> {
        let inner_length = u32::try_from(payload.len()).map_err(|_| AdminqError::InvalidArgument)?;
        let buffer = self.dma_with_contents(payload)?;
        let cmd = Command::Extended {
            inner_opcode: inner_opcode as u32,
            inner_length,
            inner_command_addr: buffer.bus_addr(),
        };
        self.execute(&cmd)
    }
}
