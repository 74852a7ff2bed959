//! # Admin Queue Commands
//!
//! ## Purpose
//!
//! Defines every command the driver can place on the admin queue and its exact
//! position inside a 64-byte ring slot.
//!
//! ## How it works
//!
//! A slot starts with the opcode and the status word (both big-endian u32), followed by
//! a 56-byte opcode-specific payload. At the API boundary commands are a tagged enum;
//! `Command::encode` serialises a variant field by field into the slot image and
//! `Command::decode` parses one back, so no `repr(C)` struct ever touches
//! device-visible memory. Payloads that do not fit in a slot travel as an
//! `Command::Extended` wrapper pointing to a side buffer.
//!
//! ## Main components
//!
//! - `Opcode`: Command identifiers, including extended inner opcodes.
//! - `Command`: The tagged command variants.
//! - `DeviceResources`, `TxQueueCommand`, `RxQueueCommand`, `RssCommand`: Larger payloads.

use static_assertions::const_assert;

use crate::error::{AdminqError, Result};
use crate::negotiate::QueueFormat;
use crate::wire::{WireRead, WireWrite};

/// Size of one ring slot in bytes.
pub const SLOT_SIZE: usize = 64;
/// Offset of the status word inside a slot.
pub const STATUS_OFFSET: usize = 4;
/// Offset of the payload inside a slot.
pub const PAYLOAD_OFFSET: usize = 8;

const_assert!(SLOT_SIZE.is_power_of_two());
const_assert!(crate::config::DEFAULT_PAGE_SIZE % SLOT_SIZE == 0);

/// Version of the device descriptor layout the driver understands.
pub const DEVICE_DESCRIPTOR_VERSION: u32 = 1;
/// Page list id used by queues that address buffers directly.
pub const RAW_ADDRESSING_QPL_ID: u32 = 0xFFFF_FFFF;
/// `SetDriverParameter` type selecting the MTU.
pub const DRIVER_PARAMETER_MTU: u32 = 0x1;

/// Admin queue command identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum Opcode {
    DescribeDevice = 0x1,
    ConfigureDeviceResources = 0x2,
    RegisterPageList = 0x3,
    UnregisterPageList = 0x4,
    CreateTxQueue = 0x5,
    CreateRxQueue = 0x6,
    DestroyTxQueue = 0x7,
    DestroyRxQueue = 0x8,
    DeconfigureDeviceResources = 0x9,
    ConfigureRss = 0xA,
    SetDriverParameter = 0xB,
    ReportStats = 0xC,
    ReportLinkSpeed = 0xD,
    GetPtypeMap = 0xE,
    VerifyDriverCompatibility = 0xF,
    Extended = 0xFF,
    /// Extended only.
    ConfigureFlowRule = 0x101,
}

impl Opcode {
    const ALL: [Opcode; 17] = [
        Opcode::DescribeDevice,
        Opcode::ConfigureDeviceResources,
        Opcode::RegisterPageList,
        Opcode::UnregisterPageList,
        Opcode::CreateTxQueue,
        Opcode::CreateRxQueue,
        Opcode::DestroyTxQueue,
        Opcode::DestroyRxQueue,
        Opcode::DeconfigureDeviceResources,
        Opcode::ConfigureRss,
        Opcode::SetDriverParameter,
        Opcode::ReportStats,
        Opcode::ReportLinkSpeed,
        Opcode::GetPtypeMap,
        Opcode::VerifyDriverCompatibility,
        Opcode::Extended,
        Opcode::ConfigureFlowRule,
    ];

    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| *op as u32 == raw)
    }
}

/// Parameters of `Command::ConfigureDeviceResources`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceResources {
    pub counter_array_addr: u64,
    pub irq_db_addr: u64,
    pub num_counters: u32,
    pub num_irq_dbs: u32,
    pub irq_db_stride: u32,
    pub ntfy_blk_msix_base_idx: u32,
    pub queue_format: QueueFormat,
}

/// Parameters of `Command::CreateTxQueue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxQueueCommand {
    pub queue_id: u32,
    pub queue_resources_addr: u64,
    pub tx_ring_addr: u64,
    pub queue_page_list_id: u32,
    pub ntfy_id: u32,
    pub tx_comp_ring_addr: u64,
    pub tx_ring_size: u16,
    pub tx_comp_ring_size: u16,
}

/// Parameters of `Command::CreateRxQueue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RxQueueCommand {
    pub queue_id: u32,
    pub index: u32,
    pub ntfy_id: u32,
    pub queue_resources_addr: u64,
    pub rx_desc_ring_addr: u64,
    pub rx_data_ring_addr: u64,
    pub queue_page_list_id: u32,
    pub rx_ring_size: u16,
    pub packet_buffer_size: u16,
    pub rx_buff_ring_size: u16,
    pub enable_rsc: bool,
    pub header_buffer_size: u16,
}

/// Parameters of `Command::ConfigureRss`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RssCommand {
    pub hash_types: u16,
    pub hash_alg: u8,
    pub hash_key_size: u16,
    pub hash_lut_size: u16,
    pub hash_key_addr: u64,
    pub hash_lut_addr: u64,
}

/// A command as it appears in one ring slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    DescribeDevice {
        descriptor_addr: u64,
        version: u32,
        available_length: u32,
    },
    ConfigureDeviceResources(DeviceResources),
    RegisterPageList {
        page_list_id: u32,
        num_pages: u32,
        page_address_list_addr: u64,
        page_size: u64,
    },
    UnregisterPageList { page_list_id: u32 },
    CreateTxQueue(TxQueueCommand),
    CreateRxQueue(RxQueueCommand),
    DestroyTxQueue { queue_id: u32 },
    DestroyRxQueue { queue_id: u32 },
    DeconfigureDeviceResources,
    ConfigureRss(RssCommand),
    SetDriverParameter {
        parameter_type: u32,
        parameter_value: u64,
    },
    ReportStats {
        stats_report_len: u64,
        stats_report_addr: u64,
        interval: u64,
    },
    ReportLinkSpeed { link_speed_addr: u64 },
    GetPtypeMap {
        ptype_map_len: u64,
        ptype_map_addr: u64,
    },
    VerifyDriverCompatibility {
        driver_info_len: u64,
        driver_info_addr: u64,
    },
    /// Wrapper for a command whose payload lives in a side buffer.
    Extended {
        inner_opcode: u32,
        inner_length: u32,
        inner_command_addr: u64,
    },
}

impl Command {
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::DescribeDevice { .. } => Opcode::DescribeDevice,
            Command::ConfigureDeviceResources(_) => Opcode::ConfigureDeviceResources,
            Command::RegisterPageList { .. } => Opcode::RegisterPageList,
            Command::UnregisterPageList { .. } => Opcode::UnregisterPageList,
            Command::CreateTxQueue(_) => Opcode::CreateTxQueue,
            Command::CreateRxQueue(_) => Opcode::CreateRxQueue,
            Command::DestroyTxQueue { .. } => Opcode::DestroyTxQueue,
            Command::DestroyRxQueue { .. } => Opcode::DestroyRxQueue,
            Command::DeconfigureDeviceResources => Opcode::DeconfigureDeviceResources,
            Command::ConfigureRss(_) => Opcode::ConfigureRss,
            Command::SetDriverParameter { .. } => Opcode::SetDriverParameter,
            Command::ReportStats { .. } => Opcode::ReportStats,
            Command::ReportLinkSpeed { .. } => Opcode::ReportLinkSpeed,
            Command::GetPtypeMap { .. } => Opcode::GetPtypeMap,
            Command::VerifyDriverCompatibility { .. } => Opcode::VerifyDriverCompatibility,
            Command::Extended { .. } => Opcode::Extended,
        }
    }

    /// The raw opcode the command is accounted under: the inner opcode for extended
    /// commands, the slot opcode otherwise.
    pub fn accounting_opcode(&self) -> u32 {
        match self {
            Command::Extended { inner_opcode, .. } => *inner_opcode,
            other => other.opcode() as u32,
        }
    }

    /// Serialises the command into a slot image with a zero status word.
    pub fn encode(&self) -> [u8; SLOT_SIZE] {
        let mut slot = [0u8; SLOT_SIZE];
        let mut w = WireWrite::new(&mut slot);
        w.u32(self.opcode() as u32).u32(0);
        match self {
            Command::DescribeDevice {
                descriptor_addr,
                version,
                available_length,
            } => {
                w.u64(*descriptor_addr).u32(*version).u32(*available_length);
            }
            Command::ConfigureDeviceResources(r) => {
                w.u64(r.counter_array_addr)
                    .u64(r.irq_db_addr)
                    .u32(r.num_counters)
                    .u32(r.num_irq_dbs)
                    .u32(r.irq_db_stride)
                    .u32(r.ntfy_blk_msix_base_idx)
                    .u8(r.queue_format as u8);
            }
            Command::RegisterPageList {
                page_list_id,
                num_pages,
                page_address_list_addr,
                page_size,
            } => {
                w.u32(*page_list_id)
                    .u32(*num_pages)
                    .u64(*page_address_list_addr)
                    .u64(*page_size);
            }
            Command::UnregisterPageList { page_list_id } => {
                w.u32(*page_list_id);
            }
            Command::CreateTxQueue(q) => {
                w.u32(q.queue_id)
                    .skip(4)
                    .u64(q.queue_resources_addr)
                    .u64(q.tx_ring_addr)
                    .u32(q.queue_page_list_id)
                    .u32(q.ntfy_id)
                    .u64(q.tx_comp_ring_addr)
                    .u16(q.tx_ring_size)
                    .u16(q.tx_comp_ring_size);
            }
            Command::CreateRxQueue(q) => {
                w.u32(q.queue_id)
                    .u32(q.index)
                    .skip(4)
                    .u32(q.ntfy_id)
                    .u64(q.queue_resources_addr)
                    .u64(q.rx_desc_ring_addr)
                    .u64(q.rx_data_ring_addr)
                    .u32(q.queue_page_list_id)
                    .u16(q.rx_ring_size)
                    .u16(q.packet_buffer_size)
                    .u16(q.rx_buff_ring_size)
                    .u8(q.enable_rsc as u8)
                    .skip(1)
                    .u16(q.header_buffer_size);
            }
            Command::DestroyTxQueue { queue_id } | Command::DestroyRxQueue { queue_id } => {
                w.u32(*queue_id);
            }
            Command::DeconfigureDeviceResources => {}
            Command::ConfigureRss(r) => {
                w.u16(r.hash_types)
                    .u8(r.hash_alg)
                    .skip(1)
                    .u16(r.hash_key_size)
                    .u16(r.hash_lut_size)
                    .u64(r.hash_key_addr)
                    .u64(r.hash_lut_addr);
            }
            Command::SetDriverParameter {
                parameter_type,
                parameter_value,
            } => {
                w.u32(*parameter_type).skip(4).u64(*parameter_value);
            }
            Command::ReportStats {
                stats_report_len,
                stats_report_addr,
                interval,
            } => {
                w.u64(*stats_report_len)
                    .u64(*stats_report_addr)
                    .u64(*interval);
            }
            Command::ReportLinkSpeed { link_speed_addr } => {
                w.u64(*link_speed_addr);
            }
            Command::GetPtypeMap {
                ptype_map_len,
                ptype_map_addr,
            } => {
                w.u64(*ptype_map_len).u64(*ptype_map_addr);
            }
            Command::VerifyDriverCompatibility {
                driver_info_len,
                driver_info_addr,
            } => {
                w.u64(*driver_info_len).u64(*driver_info_addr);
            }
            Command::Extended {
                inner_opcode,
                inner_length,
                inner_command_addr,
            } => {
                w.u32(*inner_opcode)
                    .u32(*inner_length)
                    .u64(*inner_command_addr);
            }
        }
        debug_assert!(w.position() <= SLOT_SIZE);
        slot
    }

    /// Parses a slot image. The status word is ignored.
    pub fn decode(slot: &[u8]) -> Result<Command> {
        let mut r = WireRead::new(slot);
        let raw = r.u32()?;
        r.skip(4)?;
        let Some(opcode) = Opcode::from_raw(raw) else {
            let msg = format!("unknown opcode {raw:#x} in slot");
            return Err(AdminqError::protocol(msg));
        };
        let cmd = match opcode {
            Opcode::DescribeDevice => Command::DescribeDevice {
                descriptor_addr: r.u64()?,
                version: r.u32()?,
                available_length: r.u32()?,
            },
            Opcode::ConfigureDeviceResources => {
                let counter_array_addr = r.u64()?;
                let irq_db_addr = r.u64()?;
                let num_counters = r.u32()?;
                let num_irq_dbs = r.u32()?;
                let irq_db_stride = r.u32()?;
                let ntfy_blk_msix_base_idx = r.u32()?;
                let raw_format = r.u8()?;
                let queue_format = QueueFormat::from_raw(raw_format).ok_or_else(|| {
                    AdminqError::protocol(format!("unknown queue format {raw_format:#x}"))
                })?;
                Command::ConfigureDeviceResources(DeviceResources {
                    counter_array_addr,
                    irq_db_addr,
                    num_counters,
                    num_irq_dbs,
                    irq_db_stride,
                    ntfy_blk_msix_base_idx,
                    queue_format,
                })
            }
            Opcode::RegisterPageList => Command::RegisterPageList {
                page_list_id: r.u32()?,
                num_pages: r.u32()?,
                page_address_list_addr: r.u64()?,
                page_size: r.u64()?,
            },
            Opcode::UnregisterPageList => Command::UnregisterPageList {
                page_list_id: r.u32()?,
            },
            Opcode::CreateTxQueue => {
                let queue_id = r.u32()?;
                r.skip(4)?;
                Command::CreateTxQueue(TxQueueCommand {
                    queue_id,
                    queue_resources_addr: r.u64()?,
                    tx_ring_addr: r.u64()?,
                    queue_page_list_id: r.u32()?,
                    ntfy_id: r.u32()?,
                    tx_comp_ring_addr: r.u64()?,
                    tx_ring_size: r.u16()?,
                    tx_comp_ring_size: r.u16()?,
                })
            }
            Opcode::CreateRxQueue => {
                let queue_id = r.u32()?;
                let index = r.u32()?;
                r.skip(4)?;
                let mut q = RxQueueCommand {
                    queue_id,
                    index,
                    ntfy_id: r.u32()?,
                    queue_resources_addr: r.u64()?,
                    rx_desc_ring_addr: r.u64()?,
                    rx_data_ring_addr: r.u64()?,
                    queue_page_list_id: r.u32()?,
                    rx_ring_size: r.u16()?,
                    packet_buffer_size: r.u16()?,
                    rx_buff_ring_size: r.u16()?,
                    enable_rsc: r.u8()? != 0,
                    header_buffer_size: 0,
                };
                r.skip(1)?;
                q.header_buffer_size = r.u16()?;
                Command::CreateRxQueue(q)
            }
            Opcode::DestroyTxQueue => Command::DestroyTxQueue { queue_id: r.u32()? },
            Opcode::DestroyRxQueue => Command::DestroyRxQueue { queue_id: r.u32()? },
            Opcode::DeconfigureDeviceResources => Command::DeconfigureDeviceResources,
            Opcode::ConfigureRss => {
                let hash_types = r.u16()?;
                let hash_alg = r.u8()?;
                r.skip(1)?;
                Command::ConfigureRss(RssCommand {
                    hash_types,
                    hash_alg,
                    hash_key_size: r.u16()?,
                    hash_lut_size: r.u16()?,
                    hash_key_addr: r.u64()?,
                    hash_lut_addr: r.u64()?,
                })
            }
            Opcode::SetDriverParameter => {
                let parameter_type = r.u32()?;
                r.skip(4)?;
                Command::SetDriverParameter {
                    parameter_type,
                    parameter_value: r.u64()?,
                }
            }
            Opcode::ReportStats => Command::ReportStats {
                stats_report_len: r.u64()?,
                stats_report_addr: r.u64()?,
                interval: r.u64()?,
            },
            Opcode::ReportLinkSpeed => Command::ReportLinkSpeed {
                link_speed_addr: r.u64()?,
            },
            Opcode::GetPtypeMap => Command::GetPtypeMap {
                ptype_map_len: r.u64()?,
                ptype_map_addr: r.u64()?,
            },
            Opcode::VerifyDriverCompatibility => Command::VerifyDriverCompatibility {
                driver_info_len: r.u64()?,
                driver_info_addr: r.u64()?,
            },
            Opcode::Extended => Command::Extended {
                inner_opcode: r.u32()?,
                inner_length: r.u32()?,
                inner_command_addr: r.u64()?,
            },
            Opcode::ConfigureFlowRule => {
                return Err(AdminqError::protocol(
                    "configure flow rule is only valid inside an extended command",
                ));
            }
        };
        Ok(cmd)
    }
}
