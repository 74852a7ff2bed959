// Public modules and re-exports
pub mod command;
pub mod config;
pub mod control;
pub mod descriptor;
pub mod dma;
pub mod error;
pub mod flow;
pub mod negotiate;
pub mod queue;
pub mod regs;
pub mod ring;
pub mod rss;
pub mod stats;

pub use command::{Command, Opcode};
pub use config::AdminqConfig;
pub use control::{DeviceControl, PtypeEntry, ResourceParams, RxQueueParams, TxQueueParams};
pub use dma::{DmaMapper, DmaRegion, IdentityMapper};
pub use error::{AdminqError, DeviceStatus, Result};
pub use flow::{FlowAction, FlowRule, FlowRuleDirectory, FlowSpec, FlowType};
pub use negotiate::{DeviceInfo, QueueFormat};
pub use queue::{AdminQueue, QueueState};
pub use regs::{MmioRegisters, Register, Registers};
pub use rss::{RssConfig, RssConfigurator, RssHashAlgorithm, RssHashFunction};
pub use stats::AdminqStats;

// Internal modules, hidden from documentation
#[doc(hidden)]
pub mod execute;
#[doc(hidden)]
pub mod issue;
#[doc(hidden)]
pub mod kick;
#[doc(hidden)]
pub mod wire;

#[cfg(test)]
mod tests;
