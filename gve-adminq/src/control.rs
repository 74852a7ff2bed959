//! # Device Control
//!
//! ## Purpose
//!
//! The management API of the device: bring-up (describe, configure resources), queue
//! creation and teardown, link and statistics queries, flow steering and RSS. Every
//! operation maps to exactly one admin queue command, or one command per queue for the
//! batched queue operations.
//!
//! ## How it works
//!
//! `DeviceControl` owns the `AdminQueue` together with the state negotiated from the
//! device: the `DeviceInfo` produced by `describe_device`, the flow rule directory and
//! the RSS configuration. Commands whose fields depend on the queue format read it from
//! the negotiated info, so callers only pass addresses and identifiers. Responses that
//! come back through memory (descriptor, link speed, packet type map) are read from
//! side buffers owned by the call.
//!
//! ## Main components
//!
//! - `DeviceControl`: Management API facade.
//! - `TxQueueParams`, `RxQueueParams`, `ResourceParams`: Caller-provided addresses.
//! - `PtypeEntry`: One entry of the packet type map.

use crate::command::{
    Command, DEVICE_DESCRIPTOR_VERSION, DRIVER_PARAMETER_MTU, DeviceResources,
    RAW_ADDRESSING_QPL_ID, RxQueueCommand, TxQueueCommand,
};
use crate::descriptor::DeviceDescriptor;
use crate::error::{AdminqError, Result};
use crate::flow::{FlowRule, FlowRuleDirectory};
use crate::negotiate::{DeviceInfo, DeviceOptionSet, ETH_MIN_MTU, QueueFormat, negotiate};
use crate::queue::AdminQueue;
use crate::rss::{self, RssConfig, RssConfigurator, RssHashFunction};
use crate::stats::AdminqStats;
use crate::wire::WireWrite;

/// Size of the page the device writes its descriptor into.
pub const DESCRIPTOR_PAGE_SIZE: usize = 4096;
/// Number of entries in the packet type map.
pub const NUM_PTYPES: usize = 1024;

/// Addresses of the device-wide resources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceParams {
    pub counter_array_addr: u64,
    pub irq_db_addr: u64,
    pub num_counters: u32,
    pub num_irq_dbs: u32,
    pub irq_db_stride: u32,
    pub ntfy_blk_msix_base_idx: u32,
}

/// Caller side of a transmit queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxQueueParams {
    pub queue_id: u32,
    pub ntfy_id: u32,
    pub queue_resources_addr: u64,
    pub tx_ring_addr: u64,
    /// Completion ring, DQO formats only.
    pub tx_comp_ring_addr: u64,
    /// Registered page list, ignored by raw addressing formats.
    pub qpl_id: u32,
}

/// Caller side of a receive queue.
///
/// For DQO formats `desc_ring_addr` is the completion ring and `data_ring_addr` the
/// buffer ring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxQueueParams {
    pub queue_id: u32,
    pub ntfy_id: u32,
    pub queue_resources_addr: u64,
    pub desc_ring_addr: u64,
    pub data_ring_addr: u64,
    /// Registered page list, ignored by raw addressing formats.
    pub qpl_id: u32,
}

/// Decoded packet type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PtypeEntry {
    pub l3_type: u8,
    pub l4_type: u8,
}

pub struct DeviceControl {
    aq: AdminQueue,
    info: Option<DeviceInfo>,
    pinned_format: Option<QueueFormat>,
    flow_rules: FlowRuleDirectory,
    rss: RssConfigurator,
    num_rx_queues: u16,
    header_split: bool,
    lro: bool,
}

impl DeviceControl {
    pub fn new(aq: AdminQueue) -> Self {
        DeviceControl {
            aq,
            info: None,
            pinned_format: None,
            flow_rules: FlowRuleDirectory::default(),
            rss: RssConfigurator::new(),
            num_rx_queues: 0,
            header_split: false,
            lro: false,
        }
    }

    pub fn admin_queue(&self) -> &AdminQueue {
        &self.aq
    }

    pub fn admin_queue_mut(&mut self) -> &mut AdminQueue {
        &mut self.aq
    }

    pub fn stats(&self) -> &AdminqStats {
        self.aq.stats()
    }

    /// The configuration negotiated by the last `describe_device`.
    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.info.as_ref()
    }

    fn info(&self) -> Result<&DeviceInfo> {
        self.info.as_ref().ok_or_else(|| {
            log::error!("device has not been described yet");
            AdminqError::InvalidState
        })
    }

    /// Queries the device descriptor and negotiates the device configuration.
    ///
    /// The queue format chosen here is kept for later negotiations with the same
    /// device. The flow rule limit and the receive queue count are taken from the
    /// result.
    pub fn describe_device(&mut self) -> Result<DeviceInfo> {
        let page = self.aq.alloc_dma(DESCRIPTOR_PAGE_SIZE)?;
        self.aq.execute(&Command::DescribeDevice {
            descriptor_addr: page.bus_addr(),
            version: DEVICE_DESCRIPTOR_VERSION,
            available_length: DESCRIPTOR_PAGE_SIZE as u32,
        })?;
        let buf = page.to_vec();
        drop(page);

        let desc = DeviceDescriptor::parse(&buf)?;
        let options = DeviceOptionSet::parse(&desc, &buf)?;
        let info = negotiate(&desc, &options, self.pinned_format, DESCRIPTOR_PAGE_SIZE)?;
        log::info!(
            "device {} mtu {} max mtu {} queues {}",
            desc.mac.to_hex_string(),
            info.mtu,
            info.max_mtu,
            info.default_num_queues
        );

        self.pinned_format = Some(info.queue_format);
        self.flow_rules.set_max_rules(info.max_flow_rules);
        self.num_rx_queues = info.default_num_queues;
        self.lro = info.supports_lro;
        self.header_split = false;
        self.info = Some(info);
        Ok(info)
    }

    /// Hands the event counter array and interrupt doorbells to the device.
    pub fn configure_device_resources(&mut self, params: &ResourceParams) -> Result<()> {
        let queue_format = self.info()?.queue_format;
        let cmd = Command::ConfigureDeviceResources(DeviceResources {
            counter_array_addr: params.counter_array_addr,
            irq_db_addr: params.irq_db_addr,
            num_counters: params.num_counters,
            num_irq_dbs: params.num_irq_dbs,
            irq_db_stride: params.irq_db_stride,
            ntfy_blk_msix_base_idx: params.ntfy_blk_msix_base_idx,
            queue_format,
        });
        self.aq.execute(&cmd)
    }

    pub fn deconfigure_device_resources(&mut self) -> Result<()> {
        self.aq.execute(&Command::DeconfigureDeviceResources)
    }

    /// Registers a queue page list.
    ///
    /// # Arguments
    /// * `id` - Page list id queues will refer to.
    /// * `pages` - Bus addresses of the pages.
    /// * `page_size` - Size of each page.
    pub fn register_page_list(&mut self, id: u32, pages: &[u64], page_size: u64) -> Result<()> {
        let max = self.info()?.max_registered_pages;
        let count = pages.len();
        if count == 0 || count as u64 > max {
            log::error!("page list {id} has {count} pages, device allows {max}");
            return Err(AdminqError::InvalidArgument);
        }
        let num_pages = u32::try_from(count).map_err(|_| AdminqError::InvalidArgument)?;
        let mut list = vec![0u8; count * 8];
        let mut w = WireWrite::new(&mut list);
        for page in pages {
            w.u64(*page);
        }
        let list = self.aq.dma_with_contents(&list)?;
        self.aq.execute(&Command::RegisterPageList {
            page_list_id: id,
            num_pages,
            page_address_list_addr: list.bus_addr(),
            page_size,
        })
    }

    pub fn unregister_page_list(&mut self, id: u32) -> Result<()> {
        let cmd = Command::UnregisterPageList { page_list_id: id };
        self.aq.execute(&cmd)
    }

    fn tx_command(info: &DeviceInfo, q: &TxQueueParams) -> TxQueueCommand {
        let format = info.queue_format;
        let mut cmd = TxQueueCommand {
            queue_id: q.queue_id,
            queue_resources_addr: q.queue_resources_addr,
            tx_ring_addr: q.tx_ring_addr,
            queue_page_list_id: if format.is_raw_addressing() {
                RAW_ADDRESSING_QPL_ID
            } else {
                q.qpl_id
            },
            ntfy_id: q.ntfy_id,
            ..Default::default()
        };
        if format.is_dqo() {
            cmd.tx_ring_size = info.tx_desc_cnt;
            cmd.tx_comp_ring_addr = q.tx_comp_ring_addr;
            cmd.tx_comp_ring_size = match format {
                QueueFormat::DqoRda => info.tx_comp_ring_entries,
                _ => info.tx_desc_cnt,
            };
        }
        cmd
    }

    fn rx_command(&self, info: &DeviceInfo, q: &RxQueueParams) -> RxQueueCommand {
        let format = info.queue_format;
        let mut cmd = RxQueueCommand {
            queue_id: q.queue_id,
            index: q.queue_id,
            ntfy_id: q.ntfy_id,
            queue_resources_addr: q.queue_resources_addr,
            rx_desc_ring_addr: q.desc_ring_addr,
            rx_data_ring_addr: q.data_ring_addr,
            queue_page_list_id: if format.is_raw_addressing() {
                RAW_ADDRESSING_QPL_ID
            } else {
                q.qpl_id
            },
            rx_ring_size: info.rx_desc_cnt,
            packet_buffer_size: info.packet_buffer_size,
            ..Default::default()
        };
        if format.is_dqo() {
            cmd.rx_buff_ring_size = match format {
                QueueFormat::DqoRda => info.rx_buff_ring_entries,
                _ => info.rx_desc_cnt,
            };
            cmd.enable_rsc = self.lro;
            if self.header_split {
                cmd.header_buffer_size = info.header_buffer_size;
            }
        }
        cmd
    }

    /// Creates transmit queues, one command per queue, drained together.
    pub fn create_tx_queues(&mut self, queues: &[TxQueueParams]) -> Result<()> {
        let info = *self.info()?;
        for q in queues {
            let cmd = Self::tx_command(&info, q);
            self.aq.issue(&Command::CreateTxQueue(cmd))?;
        }
        self.aq.kick_and_wait()
    }

    /// Creates receive queues, one command per queue, drained together.
    pub fn create_rx_queues(&mut self, queues: &[RxQueueParams]) -> Result<()> {
        let info = *self.info()?;
        for q in queues {
            let cmd = self.rx_command(&info, q);
            self.aq.issue(&Command::CreateRxQueue(cmd))?;
        }
        self.aq.kick_and_wait()
    }

    /// Destroys transmit queues `start..start + count`.
    pub fn destroy_tx_queues(&mut self, start: u32, count: u32) -> Result<()> {
        for queue_id in start..start.saturating_add(count) {
            self.aq.issue(&Command::DestroyTxQueue { queue_id })?;
        }
        self.aq.kick_and_wait()
    }

    /// Destroys receive queues `0..count`.
    pub fn destroy_rx_queues(&mut self, count: u32) -> Result<()> {
        for queue_id in 0..count {
            self.aq.issue(&Command::DestroyRxQueue { queue_id })?;
        }
        self.aq.kick_and_wait()
    }

    /// Number of receive queues flow rules and the RSS table may target.
    pub fn num_rx_queues(&self) -> u16 {
        self.num_rx_queues
    }

    pub fn set_num_rx_queues(&mut self, count: u16) -> Result<()> {
        if count == 0 || count > self.info()?.default_num_queues.max(1) {
            return Err(AdminqError::InvalidArgument);
        }
        self.num_rx_queues = count;
        Ok(())
    }

    /// Enables receive header split for queues created afterwards.
    pub fn set_header_split(&mut self, enable: bool) -> Result<()> {
        if enable && self.info()?.header_buffer_size == 0 {
            return Err(AdminqError::Unsupported);
        }
        self.header_split = enable;
        Ok(())
    }

    /// Enables receive segment coalescing for queues created afterwards.
    pub fn set_lro(&mut self, enable: bool) -> Result<()> {
        if enable && !self.info()?.supports_lro {
            return Err(AdminqError::Unsupported);
        }
        self.lro = enable;
        Ok(())
    }

    /// Sets the device MTU.
    ///
    /// # Returns
    /// `InvalidArgument` outside `[68, max_mtu]`.
    pub fn set_mtu(&mut self, mtu: u16) -> Result<()> {
        let max_mtu = self.info()?.max_mtu;
        if !(ETH_MIN_MTU..=max_mtu).contains(&mtu) {
            log::error!("MTU {mtu} outside [{ETH_MIN_MTU}, {max_mtu}]");
            return Err(AdminqError::InvalidArgument);
        }
        self.aq.execute(&Command::SetDriverParameter {
            parameter_type: DRIVER_PARAMETER_MTU,
            parameter_value: u64::from(mtu),
        })?;
        if let Some(info) = self.info.as_mut() {
            info.mtu = mtu;
        }
        Ok(())
    }

    /// Asks the device to write statistics to `addr` every `interval` milliseconds.
    pub fn report_stats(&mut self, len: u64, addr: u64, interval: u64) -> Result<()> {
        self.aq.execute(&Command::ReportStats {
            stats_report_len: len,
            stats_report_addr: addr,
            interval,
        })
    }

    /// Queries the link speed in bits per second.
    pub fn report_link_speed(&mut self) -> Result<u64> {
        let buf = self.aq.alloc_dma(8)?;
        self.aq.execute(&Command::ReportLinkSpeed {
            link_speed_addr: buf.bus_addr(),
        })?;
        let bytes = buf.to_vec();
        let mut word = [0u8; 8];
        word.copy_from_slice(&bytes[..8]);
        Ok(u64::from_be_bytes(word))
    }

    /// Fetches the packet type map used to decode DQO completions.
    pub fn get_ptype_map(&mut self) -> Result<Vec<PtypeEntry>> {
        let len = NUM_PTYPES * 2;
        let buf = self.aq.alloc_dma(len)?;
        self.aq.execute(&Command::GetPtypeMap {
            ptype_map_len: len as u64,
            ptype_map_addr: buf.bus_addr(),
        })?;
        Ok(buf
            .to_vec()
            .chunks_exact(2)
            .map(|e| PtypeEntry {
                l3_type: e[0],
                l4_type: e[1],
            })
            .collect())
    }

    /// Sends the driver information blob for a compatibility check.
    pub fn verify_driver_compatibility(&mut self, driver_info: &[u8]) -> Result<()> {
        let buf = self.aq.dma_with_contents(driver_info)?;
        self.aq.execute(&Command::VerifyDriverCompatibility {
            driver_info_len: driver_info.len() as u64,
            driver_info_addr: buf.bus_addr(),
        })
    }

    pub fn add_flow_rule(&mut self, rule: FlowRule) -> Result<()> {
        self.flow_rules.add(&mut self.aq, rule, self.num_rx_queues)
    }

    pub fn delete_flow_rule(&mut self, location: u16) -> Result<()> {
        self.flow_rules.delete(&mut self.aq, location)
    }

    /// Removes every rule from the device, then forgets them locally.
    pub fn reset_flow_rules(&mut self) -> Result<()> {
        self.flow_rules.reset(&mut self.aq)?;
        self.flow_rules.clear();
        Ok(())
    }

    pub fn enumerate_flow_rules(&self, out: &mut [u32]) -> Result<usize> {
        self.flow_rules.enumerate(out)
    }

    pub fn get_flow_rule(&self, location: u16) -> Result<&FlowRule> {
        self.flow_rules.get(location)
    }

    pub fn flow_rule_count(&self) -> usize {
        self.flow_rules.len()
    }

    pub fn max_flow_rules(&self) -> u16 {
        self.flow_rules.max_rules()
    }

    /// Sends an RSS configuration as is.
    pub fn configure_rss(&mut self, config: &RssConfig) -> Result<()> {
        rss::configure(&mut self.aq, config)
    }

    pub fn get_rxfh(&self) -> Result<&RssConfig> {
        self.rss.get_rxfh()
    }

    pub fn set_rxfh(
        &mut self,
        indir: Option<&[u32]>,
        key: Option<&[u8]>,
        hfunc: RssHashFunction,
    ) -> Result<()> {
        let num_rx_queues = self.num_rx_queues;
        self.rss.set_rxfh(&mut self.aq, num_rx_queues, indir, key, hfunc)
    }
}
