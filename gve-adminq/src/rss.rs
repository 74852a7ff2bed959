//! # Receive Side Scaling
//!
//! ## Purpose
//!
//! Pushes the RSS hash key, indirection table and hash algorithm to the device, and
//! keeps the driver's view of the configuration for the management surface.
//!
//! ## How it works
//!
//! `configure` stages the key and the table (as big-endian u32 entries) into side
//! buffers that live only for the duration of the call and executes one configure-RSS
//! command pointing to them. An empty key or table is sent as a null address with zero
//! length, which the device reads as "leave unchanged". `RssConfigurator` layers the
//! management semantics on top: defaults on first use, validation against the device
//! limits, and a local copy that only changes once the device accepted the update.
//!
//! ## Main components
//!
//! - `RssHashAlgorithm`, `RssHashFunction`: Algorithm on the wire and in requests.
//! - `RssConfig`: Algorithm, key and indirection table.
//! - `configure()`: One configure-RSS round trip.
//! - `RssConfigurator`: Local state plus get/set operations.

use crate::command::{Command, RssCommand};
use crate::dma::DmaRegion;
use crate::error::{AdminqError, Result};
use crate::queue::AdminQueue;

pub const RSS_HASH_IPV4: u16 = 1 << 0;
pub const RSS_HASH_TCPV4: u16 = 1 << 1;
pub const RSS_HASH_IPV6: u16 = 1 << 2;
pub const RSS_HASH_IPV6_EX: u16 = 1 << 3;
pub const RSS_HASH_TCPV6: u16 = 1 << 4;
pub const RSS_HASH_TCPV6_EX: u16 = 1 << 5;
pub const RSS_HASH_UDPV4: u16 = 1 << 6;
pub const RSS_HASH_UDPV6: u16 = 1 << 7;
pub const RSS_HASH_UDPV6_EX: u16 = 1 << 8;

/// Hash types this driver asks the device to use.
pub const RSS_SUPPORTED_HASH_TYPES: u16 =
    RSS_HASH_TCPV4 | RSS_HASH_UDPV4 | RSS_HASH_TCPV6 | RSS_HASH_UDPV6;

/// Size of the hash key.
pub const RSS_KEY_SIZE: usize = 40;
/// Number of indirection table entries.
pub const RSS_INDIR_SIZE: usize = 128;

/// Well-known Toeplitz key used until a key is configured.
pub const DEFAULT_RSS_KEY: [u8; RSS_KEY_SIZE] = [
    0x6d, 0x5a, 0x56, 0xda, 0x25, 0x5b, 0x0e, 0xc2, 0x41, 0x67, 0x25, 0x3d, 0x43, 0xa3, 0x8f,
    0xb0, 0xd0, 0xca, 0x2b, 0xcb, 0xae, 0x7b, 0x30, 0xb4, 0x77, 0xcb, 0x2d, 0xa3, 0x80, 0x30,
    0xf2, 0x0c, 0x6a, 0x42, 0xb7, 0x3b, 0xbe, 0xac, 0x01, 0xfa,
];

/// Hash algorithm identifiers on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RssHashAlgorithm {
    #[default]
    Undefined = 0,
    Toeplitz = 1,
}

/// Hash function requested by a management caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RssHashFunction {
    /// Keep the current algorithm.
    NoChange,
    Toeplitz,
}

/// RSS settings. Empty `key` or `indir` mean "unchanged" when sent to the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RssConfig {
    pub algorithm: RssHashAlgorithm,
    pub key: Vec<u8>,
    pub indir: Vec<u32>,
}

impl RssConfig {
    /// Default configuration spreading the table evenly over `num_rx_queues` queues.
    pub fn defaults(num_rx_queues: u16) -> Self {
        RssConfig {
            algorithm: RssHashAlgorithm::Toeplitz,
            key: DEFAULT_RSS_KEY.to_vec(),
            indir: (0..RSS_INDIR_SIZE as u32)
                .map(|i| i % u32::from(num_rx_queues.max(1)))
                .collect(),
        }
    }
}

/// Sends `config` to the device in a single configure-RSS command.
///
/// The staging buffers are freed when the call returns, whatever the outcome.
pub fn configure(aq: &mut AdminQueue, config: &RssConfig) -> Result<()> {
    let key_size = u16::try_from(config.key.len()).map_err(|_| AdminqError::InvalidArgument)?;
    let lut_size = u16::try_from(config.indir.len()).map_err(|_| AdminqError::InvalidArgument)?;

    let key_buf: Option<DmaRegion> = if config.key.is_empty() {
        None
    } else {
        Some(aq.dma_with_contents(&config.key)?)
    };
    let lut_buf: Option<DmaRegion> = if config.indir.is_empty() {
        None
    } else {
        let bytes: Vec<u8> = config.indir.iter().flat_map(|e| e.to_be_bytes()).collect();
        Some(aq.dma_with_contents(&bytes)?)
    };

    let cmd = Command::ConfigureRss(RssCommand {
        hash_types: RSS_SUPPORTED_HASH_TYPES,
        hash_alg: config.algorithm as u8,
        hash_key_size: key_size,
        hash_lut_size: lut_size,
        hash_key_addr: key_buf.as_ref().map_or(0, DmaRegion::bus_addr),
        hash_lut_addr: lut_buf.as_ref().map_or(0, DmaRegion::bus_addr),
    });
    aq.execute(&cmd)
}

/// The driver's RSS state.
#[derive(Debug, Default)]
pub struct RssConfigurator {
    config: RssConfig,
}

impl RssConfigurator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the configuration last accepted by the device.
    ///
    /// # Returns
    /// `Unsupported` until RSS has been configured once.
    pub fn get_rxfh(&self) -> Result<&RssConfig> {
        match self.config.algorithm {
            RssHashAlgorithm::Undefined => Err(AdminqError::Unsupported),
            RssHashAlgorithm::Toeplitz => Ok(&self.config),
        }
    }

    /// Updates the indirection table, the key and/or the hash function.
    ///
    /// The first call installs the defaults before applying the request, so the device
    /// always receives a complete configuration once. Later calls send only the parts
    /// that change and return early when nothing does.
    ///
    /// # Arguments
    /// * `aq` - The admin queue of the device.
    /// * `num_rx_queues` - Number of receive queues table entries may point to.
    /// * `indir` - New indirection table of `RSS_INDIR_SIZE` entries, if any.
    /// * `key` - New hash key of `RSS_KEY_SIZE` bytes, if any.
    /// * `hfunc` - Requested hash function.
    pub fn set_rxfh(
        &mut self,
        aq: &mut AdminQueue,
        num_rx_queues: u16,
        indir: Option<&[u32]>,
        key: Option<&[u8]>,
        hfunc: RssHashFunction,
    ) -> Result<()> {
        if num_rx_queues == 0 {
            return Err(AdminqError::InvalidArgument);
        }
        if let Some(indir) = indir {
            if indir.len() != RSS_INDIR_SIZE
                || indir.iter().any(|q| *q >= u32::from(num_rx_queues))
            {
                log::error!("RSS indirection table does not fit {num_rx_queues} queues");
                return Err(AdminqError::InvalidArgument);
            }
        }
        if key.is_some_and(|k| k.len() != RSS_KEY_SIZE) {
            log::error!("RSS key must be {RSS_KEY_SIZE} bytes");
            return Err(AdminqError::InvalidArgument);
        }

        let init = self.config.algorithm == RssHashAlgorithm::Undefined;
        if !init && indir.is_none() && key.is_none() && hfunc == RssHashFunction::NoChange {
            return Ok(());
        }

        let mut next = if init {
            RssConfig::defaults(num_rx_queues)
        } else {
            self.config.clone()
        };
        if hfunc == RssHashFunction::Toeplitz {
            next.algorithm = RssHashAlgorithm::Toeplitz;
        }
        if let Some(indir) = indir {
            next.indir = indir.to_vec();
        }
        if let Some(key) = key {
            next.key = key.to_vec();
        }

        let mut update = next.clone();
        if !init && key.is_none() {
            update.key = Vec::new();
        }
        if !init && indir.is_none() {
            update.indir = Vec::new();
        }
        configure(aq, &update)?;
        self.config = next;
        Ok(())
    }
}
