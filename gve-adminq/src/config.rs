//! # Admin Queue Configuration
//!
//! Tunables for ring geometry and the polling loops. The defaults match what the
//! device firmware expects from a production driver; tests shrink the page and the
//! sleep interval to exercise overflow and timeout paths quickly.

use std::time::Duration;

use crate::command::SLOT_SIZE;
use crate::error::{AdminqError, Result};

/// Default size of the ring buffer and of the describe-device page.
pub const DEFAULT_PAGE_SIZE: usize = 4096;
/// Default pause between two reads of a device register in a polling loop.
pub const DEFAULT_SLEEP: Duration = Duration::from_millis(20);
/// Default number of event counter reads before a command is declared timed out.
pub const DEFAULT_MAX_EVENT_COUNTER_CHECKS: u32 = 100;
/// Default number of base register reads before a release is reported as stuck.
pub const DEFAULT_MAX_RELEASE_CHECKS: u32 = 500;

/// Configuration options for allocating an admin queue.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AdminqConfig {
    /// Size in bytes of the ring buffer; the ring holds `page_size / 64` slots.
    ///
    /// Must be a power of two holding at least two slots. The ring base register is
    /// programmed in units of this size.
    pub page_size: usize,
    /// Pause between polls of the event counter and of the base register.
    pub sleep: Duration,
    /// Event counter reads after a doorbell write before giving up with `Timeout`.
    pub max_event_counter_checks: u32,
    /// Base register reads during release before the hang is logged as fatal.
    ///
    /// Release keeps polling after the bound is hit; the value only controls when the
    /// condition is escalated in the log.
    pub max_release_checks: u32,
}

impl Default for AdminqConfig {
    fn default() -> Self {
        AdminqConfig {
            page_size: DEFAULT_PAGE_SIZE,
            sleep: DEFAULT_SLEEP,
            max_event_counter_checks: DEFAULT_MAX_EVENT_COUNTER_CHECKS,
            max_release_checks: DEFAULT_MAX_RELEASE_CHECKS,
        }
    }
}

impl AdminqConfig {
    /// Number of command slots the configured page holds.
    pub fn slots(&self) -> usize {
        self.page_size / SLOT_SIZE
    }

    /// Checks that the configuration describes a usable ring.
    pub fn validate(&self) -> Result<()> {
        if !self.page_size.is_power_of_two() || self.page_size < 2 * SLOT_SIZE {
            log::error!("admin queue page size {} is not usable", self.page_size);
            return Err(AdminqError::InvalidArgument);
        }
        if self.max_event_counter_checks == 0 {
            log::error!("admin queue needs at least one event counter check");
            return Err(AdminqError::InvalidArgument);
        }
        Ok(())
    }
}
