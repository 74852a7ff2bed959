//! # Device Option Negotiation
//!
//! ## Purpose
//!
//! Turns a parsed device descriptor into the configuration the driver will run with:
//! the queue format, ring sizes, MTU limits, buffer sizes and optional features.
//!
//! ## How it works
//!
//! Negotiation runs in two passes. `DeviceOptionSet::parse` visits every option node
//! and keeps the ones it recognises and whose length and required-features mask are
//! acceptable; a bad option is logged and skipped, an unknown one is ignored, and only
//! a chain boundary violation fails the parse. `negotiate` then picks the queue format
//! by fixed priority (DQO-RDA, DQO-QPL, GQI-RDA, GQI-QPL) and applies the remaining
//! options, each gated by the supported-features mask carried in the option that
//! selected the format.
//!
//! ## Main components
//!
//! - `QueueFormat`: The data-plane queue formats.
//! - `DeviceOptionSet`: Recognised options from one descriptor.
//! - `DeviceInfo`: Negotiated device configuration.
//! - `negotiate()`: Format selection and feature enabling.

use std::fmt;

use eui48::MacAddress;

use crate::descriptor::{DeviceDescriptor, DeviceOption};
use crate::error::{AdminqError, Result};
use crate::wire::WireRead;

pub const OPTION_GQI_RAW_ADDRESSING: u16 = 0x1;
pub const OPTION_GQI_RDA: u16 = 0x2;
pub const OPTION_GQI_QPL: u16 = 0x3;
pub const OPTION_DQO_RDA: u16 = 0x4;
pub const OPTION_DQO_QPL: u16 = 0x7;
pub const OPTION_JUMBO_FRAMES: u16 = 0x8;
pub const OPTION_BUFFER_SIZES: u16 = 0xa;
pub const OPTION_FLOW_STEERING: u16 = 0xb;

/// Supported-features bit enabling the jumbo frames option.
pub const FEATURE_JUMBO_FRAMES: u32 = 1 << 2;
/// Supported-features bit enabling the buffer sizes option.
pub const FEATURE_BUFFER_SIZES: u32 = 1 << 4;
/// Supported-features bit enabling the flow steering option.
pub const FEATURE_FLOW_STEERING: u32 = 1 << 5;

pub const ETH_MIN_MTU: u16 = 68;
/// Size of a GQI transmit descriptor.
pub const GQI_TX_DESC_SIZE: usize = 16;
/// Size of a GQI receive descriptor.
pub const GQI_RX_DESC_SIZE: usize = 64;

pub const DEFAULT_PACKET_BUFFER_SIZE: u16 = 2048;
pub const MIN_PACKET_BUFFER_SIZE: u16 = 2048;
pub const MAX_PACKET_BUFFER_SIZE: u16 = 4096;
pub const DEFAULT_HEADER_BUFFER_SIZE: u16 = 128;
pub const MIN_HEADER_BUFFER_SIZE: u16 = 64;
pub const MAX_HEADER_BUFFER_SIZE: u16 = 256;
pub const DQO_QPL_DEFAULT_TX_PAGES: u16 = 512;
pub const DQO_QPL_DEFAULT_RX_PAGES: u16 = 2048;

/// Data-plane queue formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum QueueFormat {
    /// In-order queues addressing buffers directly.
    GqiRda = 0x1,
    /// In-order queues using registered page lists.
    GqiQpl = 0x2,
    /// Out-of-order queues addressing buffers directly.
    DqoRda = 0x3,
    /// Out-of-order queues using registered page lists.
    DqoQpl = 0x4,
}

impl QueueFormat {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x1 => Some(QueueFormat::GqiRda),
            0x2 => Some(QueueFormat::GqiQpl),
            0x3 => Some(QueueFormat::DqoRda),
            0x4 => Some(QueueFormat::DqoQpl),
            _ => None,
        }
    }

    pub fn is_gqi(self) -> bool {
        matches!(self, QueueFormat::GqiRda | QueueFormat::GqiQpl)
    }

    pub fn is_dqo(self) -> bool {
        !self.is_gqi()
    }

    /// Returns `true` when queues address buffers directly instead of through
    /// registered page lists.
    pub fn is_raw_addressing(self) -> bool {
        matches!(self, QueueFormat::GqiRda | QueueFormat::DqoRda)
    }
}

impl fmt::Display for QueueFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueueFormat::GqiRda => "GQI RDA",
            QueueFormat::GqiQpl => "GQI QPL",
            QueueFormat::DqoRda => "DQO RDA",
            QueueFormat::DqoQpl => "DQO QPL",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GqiOption {
    pub supported_features_mask: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DqoRdaOption {
    pub supported_features_mask: u32,
    pub tx_comp_ring_entries: u16,
    pub rx_buff_ring_entries: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DqoQplOption {
    pub supported_features_mask: u32,
    pub tx_pages_per_qpl: u16,
    pub rx_pages_per_qpl: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumboFramesOption {
    pub supported_features_mask: u32,
    pub max_mtu: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSizesOption {
    pub supported_features_mask: u32,
    pub packet_buffer_size: u16,
    pub header_buffer_size: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowSteeringOption {
    pub supported_features_mask: u32,
    pub max_flow_rules: u16,
}

/// Options recognised in one descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceOptionSet {
    pub gqi_raw_addressing: bool,
    pub gqi_rda: Option<GqiOption>,
    pub gqi_qpl: Option<GqiOption>,
    pub dqo_rda: Option<DqoRdaOption>,
    pub dqo_qpl: Option<DqoQplOption>,
    pub jumbo_frames: Option<JumboFramesOption>,
    pub buffer_sizes: Option<BufferSizesOption>,
    pub flow_steering: Option<FlowSteeringOption>,
}

/// Expected payload size of each recognised option, `None` for unknown ids.
fn expected_len(id: u16) -> Option<(&'static str, usize)> {
    match id {
        OPTION_GQI_RAW_ADDRESSING => Some(("Raw Addressing", 0)),
        OPTION_GQI_RDA => Some(("GQI RDA", 4)),
        OPTION_GQI_QPL => Some(("GQI QPL", 4)),
        OPTION_DQO_RDA => Some(("DQO RDA", 8)),
        OPTION_DQO_QPL => Some(("DQO QPL", 8)),
        OPTION_JUMBO_FRAMES => Some(("Jumbo Frames", 8)),
        OPTION_BUFFER_SIZES => Some(("Buffer Sizes", 8)),
        OPTION_FLOW_STEERING => Some(("Flow Steering", 8)),
        _ => None,
    }
}

/// Required-features mask every recognised option must carry.
const REQUIRED_FEATURES_MASK: u32 = 0;

impl DeviceOptionSet {
    /// Collects the acceptable options from a descriptor's chain.
    ///
    /// # Arguments
    /// * `desc` - The parsed descriptor header.
    /// * `buf` - The descriptor page `desc` was parsed from.
    ///
    /// # Returns
    /// The recognised options, or `Protocol` if a node crosses the descriptor's end.
    pub fn parse(desc: &DeviceDescriptor, buf: &[u8]) -> Result<Self> {
        let mut set = DeviceOptionSet::default();
        for option in desc.options(buf) {
            set.accept(&option?)?;
        }
        Ok(set)
    }

    fn accept(&mut self, opt: &DeviceOption<'_>) -> Result<()> {
        let Some((name, expected)) = expected_len(opt.id) else {
            log::debug!("unrecognized device option {:#x} not enabled", opt.id);
            return Ok(());
        };
        let length = opt.length as usize;
        let length_ok = if opt.id == OPTION_GQI_RAW_ADDRESSING {
            length == expected
        } else {
            length >= expected
        };
        if !length_ok || opt.required_features_mask != REQUIRED_FEATURES_MASK {
            log::warn!(
                "length or required features mask of device option {name} is wrong: \
                 expected length {expected} mask {REQUIRED_FEATURES_MASK:#x}, \
                 got length {length} mask {:#x}; skipping",
                opt.required_features_mask
            );
            return Ok(());
        }
        if length > expected {
            log::warn!("device option {name} is larger than expected ({length} > {expected})");
        }

        let mut r = WireRead::new(opt.payload);
        match opt.id {
            OPTION_GQI_RAW_ADDRESSING => self.gqi_raw_addressing = true,
            OPTION_GQI_RDA => {
                self.gqi_rda = Some(GqiOption {
                    supported_features_mask: r.u32()?,
                })
            }
            OPTION_GQI_QPL => {
                self.gqi_qpl = Some(GqiOption {
                    supported_features_mask: r.u32()?,
                })
            }
            OPTION_DQO_RDA => {
                self.dqo_rda = Some(DqoRdaOption {
                    supported_features_mask: r.u32()?,
                    tx_comp_ring_entries: r.u16()?,
                    rx_buff_ring_entries: r.u16()?,
                })
            }
            OPTION_DQO_QPL => {
                self.dqo_qpl = Some(DqoQplOption {
                    supported_features_mask: r.u32()?,
                    tx_pages_per_qpl: r.u16()?,
                    rx_pages_per_qpl: r.u16()?,
                })
            }
            OPTION_JUMBO_FRAMES => {
                self.jumbo_frames = Some(JumboFramesOption {
                    supported_features_mask: r.u32()?,
                    max_mtu: r.u16()?,
                })
            }
            OPTION_BUFFER_SIZES => {
                self.buffer_sizes = Some(BufferSizesOption {
                    supported_features_mask: r.u32()?,
                    packet_buffer_size: r.u16()?,
                    header_buffer_size: r.u16()?,
                })
            }
            OPTION_FLOW_STEERING => {
                let supported_features_mask = r.u32()?;
                r.skip(2)?;
                self.flow_steering = Some(FlowSteeringOption {
                    supported_features_mask,
                    max_flow_rules: r.u16()?,
                })
            }
            _ => {}
        }
        Ok(())
    }
}

/// Configuration negotiated with the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub queue_format: QueueFormat,
    /// Supported-features mask of the option that selected the queue format.
    pub supported_features: u32,
    pub max_registered_pages: u64,
    pub tx_desc_cnt: u16,
    pub rx_desc_cnt: u16,
    pub default_num_queues: u16,
    pub mtu: u16,
    pub max_mtu: u16,
    pub num_event_counters: u16,
    pub mac: MacAddress,
    pub tx_pages_per_qpl: u16,
    pub rx_data_slot_cnt: u16,
    /// DQO-RDA completion ring size.
    pub tx_comp_ring_entries: u16,
    /// DQO-RDA buffer ring size.
    pub rx_buff_ring_entries: u16,
    pub packet_buffer_size: u16,
    /// Zero when the device does not support header split.
    pub header_buffer_size: u16,
    /// Zero when flow steering is not available.
    pub max_flow_rules: u16,
    pub supports_lro: bool,
}

/// Replaces `size` by `default` unless it is a power of two within `[min, max]`.
pub fn sanitize_buffer_size(size: u16, min: u16, max: u16, default: u16) -> u16 {
    if size.is_power_of_two() && (min..=max).contains(&size) {
        size
    } else {
        log::debug!(
            "buffer size {size} outside [{min}, {max}] or not a power of two, using {default}"
        );
        default
    }
}

/// Selects the queue format and the supported-features mask that gates other options.
fn select_format(options: &DeviceOptionSet, pinned: Option<QueueFormat>) -> (QueueFormat, u32) {
    if let Some(op) = options.dqo_rda {
        (QueueFormat::DqoRda, op.supported_features_mask)
    } else if let Some(op) = options.dqo_qpl {
        (QueueFormat::DqoQpl, op.supported_features_mask)
    } else if let Some(op) = options.gqi_rda {
        (QueueFormat::GqiRda, op.supported_features_mask)
    } else if options.gqi_raw_addressing || pinned == Some(QueueFormat::GqiRda) {
        (QueueFormat::GqiRda, 0)
    } else {
        let mask = options.gqi_qpl.map_or(0, |op| op.supported_features_mask);
        (QueueFormat::GqiQpl, mask)
    }
}

/// Derives the device configuration from a descriptor and its options.
///
/// # Arguments
/// * `desc` - The parsed descriptor header.
/// * `options` - The options recognised in the same descriptor.
/// * `pinned` - The format chosen by an earlier negotiation with this device, if any.
/// * `page_size` - The host page size GQI rings must fill at least once.
///
/// # Returns
/// The negotiated configuration, or `Protocol` when the descriptor's values are
/// unusable (GQI rings smaller than a page, MTU below the Ethernet minimum).
pub fn negotiate(
    desc: &DeviceDescriptor,
    options: &DeviceOptionSet,
    pinned: Option<QueueFormat>,
    page_size: usize,
) -> Result<DeviceInfo> {
    let (queue_format, supported) = select_format(options, pinned);
    log::info!("Driver is running with {queue_format} queue format.");

    let mut info = DeviceInfo {
        queue_format,
        supported_features: supported,
        max_registered_pages: desc.max_registered_pages,
        tx_desc_cnt: desc.tx_queue_entries,
        rx_desc_cnt: desc.rx_queue_entries,
        default_num_queues: desc.default_num_queues,
        mtu: desc.mtu,
        max_mtu: desc.mtu,
        num_event_counters: desc.counters,
        mac: desc.mac,
        tx_pages_per_qpl: desc.tx_pages_per_qpl,
        rx_data_slot_cnt: desc.rx_pages_per_qpl,
        tx_comp_ring_entries: 0,
        rx_buff_ring_entries: 0,
        packet_buffer_size: DEFAULT_PACKET_BUFFER_SIZE,
        header_buffer_size: 0,
        max_flow_rules: 0,
        supports_lro: queue_format.is_dqo(),
    };

    if queue_format.is_gqi() {
        if info.tx_desc_cnt as usize * GQI_TX_DESC_SIZE < page_size {
            return Err(AdminqError::protocol(format!(
                "tx descriptor count {} does not fill a page",
                info.tx_desc_cnt
            )));
        }
        if info.rx_desc_cnt as usize * GQI_RX_DESC_SIZE < page_size {
            return Err(AdminqError::protocol(format!(
                "rx descriptor count {} does not fill a page",
                info.rx_desc_cnt
            )));
        }
        if info.rx_data_slot_cnt < info.rx_desc_cnt {
            log::warn!(
                "rx data slot count is below rx descriptor count, lowering descriptor count to {}",
                info.rx_data_slot_cnt
            );
            info.rx_desc_cnt = info.rx_data_slot_cnt;
        }
    } else if let Some(op) = options.dqo_rda {
        info.tx_comp_ring_entries = op.tx_comp_ring_entries;
        info.rx_buff_ring_entries = op.rx_buff_ring_entries;
    }

    if info.mtu < ETH_MIN_MTU {
        return Err(AdminqError::protocol(format!(
            "MTU {} is below minimum MTU",
            info.mtu
        )));
    }

    enable_supported_features(&mut info, options, supported);
    Ok(info)
}

fn enable_supported_features(info: &mut DeviceInfo, options: &DeviceOptionSet, supported: u32) {
    let jumbo = supported & FEATURE_JUMBO_FRAMES != 0;
    if let Some(op) = options.jumbo_frames.filter(|_| jumbo) {
        log::info!("JUMBO FRAMES device option enabled.");
        info.max_mtu = op.max_mtu;
    }

    let dqo_qpl = info.queue_format == QueueFormat::DqoQpl;
    if let Some(op) = options.dqo_qpl.filter(|_| dqo_qpl) {
        info.tx_pages_per_qpl = match op.tx_pages_per_qpl {
            0 => DQO_QPL_DEFAULT_TX_PAGES,
            n => n,
        };
        info.rx_data_slot_cnt = match op.rx_pages_per_qpl {
            0 => DQO_QPL_DEFAULT_RX_PAGES,
            n => n,
        };
    }

    if let Some(op) = options
        .buffer_sizes
        .filter(|_| supported & FEATURE_BUFFER_SIZES != 0 && info.queue_format.is_dqo())
    {
        log::info!("BUFFER SIZES device option enabled.");
        info.packet_buffer_size = sanitize_buffer_size(
            op.packet_buffer_size,
            MIN_PACKET_BUFFER_SIZE,
            MAX_PACKET_BUFFER_SIZE,
            DEFAULT_PACKET_BUFFER_SIZE,
        );
        if op.header_buffer_size != 0 {
            info.header_buffer_size = sanitize_buffer_size(
                op.header_buffer_size,
                MIN_HEADER_BUFFER_SIZE,
                MAX_HEADER_BUFFER_SIZE,
                DEFAULT_HEADER_BUFFER_SIZE,
            );
        }
    }

    if let Some(op) = options
        .flow_steering
        .filter(|op| supported & FEATURE_FLOW_STEERING != 0 && op.max_flow_rules > 0)
    {
        log::info!(
            "FLOW STEERING device option enabled with {} rules.",
            op.max_flow_rules
        );
        info.max_flow_rules = op.max_flow_rules;
    }
}
