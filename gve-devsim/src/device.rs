//! # Simulated Device
//!
//! ## Purpose
//!
//! A model of the device side of the admin queue protocol, driven entirely through
//! the `Registers` trait. It lets the protocol engine run end to end in tests without
//! hardware.
//!
//! ## How it works
//!
//! Writing a page frame number installs the ring; writing zero releases it and resets
//! the event counter. A doorbell write makes the device consume every slot between its
//! event counter and the written producer value: each slot is decoded, its effect is
//! applied to the model state, and a big-endian status word is stored back into the
//! slot with release ordering. The event counter is then published, either at once or
//! after a configurable number of reads, which models a device that completes
//! asynchronously. A stalled device never consumes anything.
//!
//! Test controls inject per-opcode failures, completion latency, a slow release
//! acknowledgement and a stall. Everything the device saw is recorded and can be
//! inspected afterwards.
//!
//! ## Main components
//!
//! - `SimDevice`: The register block and command processor.
//! - `SimRss`: The RSS configuration as the device holds it.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context as _, Result, anyhow};
use gve_adminq::command::{SLOT_SIZE, STATUS_OFFSET};
use gve_adminq::flow::{FlowRuleCommand, FlowRuleOp};
use gve_adminq::{Command, DeviceStatus, Opcode, Register, Registers};

use crate::iommu::SimIommu;

/// RSS state held by the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimRss {
    pub hash_types: u16,
    pub hash_alg: u8,
    pub key: Vec<u8>,
    pub indir: Vec<u32>,
}

#[derive(Debug, Default)]
struct State {
    page_size: usize,
    pfn: u32,
    /// Base register value still reported while a release is being acknowledged.
    releasing_pfn: u32,
    event_counter: u32,
    doorbell: u32,

    stalled: bool,
    completion_delay: u32,
    pending: Option<(u32, u32)>,
    release_delay: u32,
    release_reads_left: u32,
    failures: VecDeque<(u32, u32)>,

    descriptor: Vec<u8>,
    link_speed: u64,
    ptypes: Vec<(u8, u8)>,

    pfn_writes: Vec<u32>,
    doorbell_writes: u32,
    log: Vec<Command>,
    resources_configured: bool,
    page_lists: BTreeMap<u32, Vec<u64>>,
    tx_queues: BTreeSet<u32>,
    rx_queues: BTreeSet<u32>,
    mtu: Option<u64>,
    driver_info: Vec<u8>,
    flow_rules: BTreeMap<u16, FlowRuleCommand>,
    rss: Option<SimRss>,
}

pub struct SimDevice {
    iommu: Arc<SimIommu>,
    state: Mutex<State>,
}

impl SimDevice {
    /// Creates a device whose ring base register is in units of `page_size`.
    pub fn new(iommu: Arc<SimIommu>, page_size: usize) -> Self {
        SimDevice {
            iommu,
            state: Mutex::new(State {
                page_size,
                link_speed: 100_000_000_000,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sets the blob written in response to describe-device.
    pub fn set_descriptor(&self, descriptor: Vec<u8>) {
        self.lock().descriptor = descriptor;
    }

    pub fn set_link_speed(&self, bps: u64) {
        self.lock().link_speed = bps;
    }

    pub fn set_ptype_map(&self, ptypes: Vec<(u8, u8)>) {
        self.lock().ptypes = ptypes;
    }

    /// A stalled device ignores doorbells, so every wait times out.
    pub fn set_stalled(&self, stalled: bool) {
        self.lock().stalled = stalled;
    }

    /// Number of event counter reads after a doorbell before the new value shows.
    pub fn set_completion_delay(&self, reads: u32) {
        self.lock().completion_delay = reads;
    }

    /// Number of base register reads that still return the old value after a release.
    pub fn set_release_delay(&self, reads: u32) {
        self.lock().release_delay = reads;
    }

    /// Completes the next command accounted under `opcode` with `status`.
    pub fn fail_next(&self, opcode: Opcode, status: DeviceStatus) {
        self.fail_next_raw(opcode as u32, status as u32);
    }

    /// Like `fail_next` with an arbitrary status word.
    pub fn fail_next_raw(&self, opcode: u32, status: u32) {
        self.lock().failures.push_back((opcode, status));
    }

    /// Commands consumed so far, in order.
    pub fn commands(&self) -> Vec<Command> {
        self.lock().log.clone()
    }

    pub fn clear_commands(&self) {
        self.lock().log.clear();
    }

    /// Every value written to the ring base register.
    pub fn pfn_writes(&self) -> Vec<u32> {
        self.lock().pfn_writes.clone()
    }

    pub fn doorbell_writes(&self) -> u32 {
        self.lock().doorbell_writes
    }

    /// Total commands consumed since the ring was last installed.
    pub fn consumed(&self) -> u32 {
        self.lock().event_counter
    }

    pub fn resources_configured(&self) -> bool {
        self.lock().resources_configured
    }

    pub fn page_list(&self, id: u32) -> Option<Vec<u64>> {
        self.lock().page_lists.get(&id).cloned()
    }

    pub fn tx_queues(&self) -> Vec<u32> {
        self.lock().tx_queues.iter().copied().collect()
    }

    pub fn rx_queues(&self) -> Vec<u32> {
        self.lock().rx_queues.iter().copied().collect()
    }

    pub fn mtu(&self) -> Option<u64> {
        self.lock().mtu
    }

    pub fn driver_info(&self) -> Vec<u8> {
        self.lock().driver_info.clone()
    }

    /// Flow rules installed on the device, ordered by location.
    pub fn flow_rules(&self) -> Vec<FlowRuleCommand> {
        self.lock().flow_rules.values().copied().collect()
    }

    pub fn rss(&self) -> Option<SimRss> {
        self.lock().rss.clone()
    }

    fn consume(&self, state: &mut State, producer: u32) {
        let ring = u64::from(state.pfn) * state.page_size as u64;
        let mask = (state.page_size / SLOT_SIZE) as u32 - 1;
        // slots behind an unpublished completion were already consumed
        let mut counter = match state.pending {
            Some((target, _)) => target,
            None => state.event_counter,
        };
        while counter != producer {
            let slot_addr = ring + u64::from(counter & mask) * SLOT_SIZE as u64;
            let status = match self.process_slot(state, slot_addr) {
                Ok(status) => status,
                Err(e) => {
                    log::warn!("device: slot {counter}: {e:#}");
                    DeviceStatus::Internal as u32
                }
            };
            if let Err(e) = self.store_status(slot_addr, status) {
                log::warn!("device: cannot complete slot {counter}: {e:#}");
            }
            counter = counter.wrapping_add(1);
        }
        if state.completion_delay == 0 {
            state.event_counter = producer;
        } else {
            state.pending = Some((producer, state.completion_delay));
        }
    }

    fn store_status(&self, slot_addr: u64, status: u32) -> Result<()> {
        let ptr = self.iommu.translate(slot_addr + STATUS_OFFSET as u64, 4)?;
        let word = unsafe { AtomicU32::from_ptr(ptr.cast::<u32>()) };
        word.store(status.to_be(), Ordering::Release);
        Ok(())
    }

    fn process_slot(&self, state: &mut State, slot_addr: u64) -> Result<u32> {
        let slot = self.iommu.read(slot_addr, SLOT_SIZE)?;
        let cmd = match Command::decode(&slot) {
            Ok(cmd) => cmd,
            Err(e) => {
                log::warn!("device: rejecting slot: {e}");
                return Ok(DeviceStatus::InvalidArgument as u32);
            }
        };
        log::debug!("device: {:?}", cmd);
        state.log.push(cmd);
        let opcode = cmd.accounting_opcode();
        let injected = state
            .failures
            .iter()
            .position(|(op, _)| *op == opcode)
            .and_then(|at| state.failures.remove(at));
        if let Some((_, status)) = injected {
            return Ok(status);
        }
        let status = self.apply(state, &cmd)?;
        Ok(status as u32)
    }

    fn apply(&self, state: &mut State, cmd: &Command) -> Result<DeviceStatus> {
        use DeviceStatus as S;
        let status = match *cmd {
            Command::DescribeDevice {
                descriptor_addr,
                available_length,
                ..
            } => {
                if state.descriptor.len() > available_length as usize {
                    S::OutOfRange
                } else {
                    self.iommu
                        .write(descriptor_addr, &state.descriptor)
                        .context("describe device")?;
                    S::Passed
                }
            }
            Command::ConfigureDeviceResources(_) => {
                state.resources_configured = true;
                S::Passed
            }
            Command::DeconfigureDeviceResources => {
                state.resources_configured = false;
                S::Passed
            }
            Command::RegisterPageList {
                page_list_id,
                num_pages,
                page_address_list_addr,
                ..
            } => {
                if state.page_lists.contains_key(&page_list_id) {
                    S::AlreadyExists
                } else {
                    let raw = self
                        .iommu
                        .read(page_address_list_addr, num_pages as usize * 8)
                        .context("page address list")?;
                    let pages = raw
                        .chunks_exact(8)
                        .map(|c| u64::from_be_bytes(c.try_into().unwrap_or_default()))
                        .collect();
                    state.page_lists.insert(page_list_id, pages);
                    S::Passed
                }
            }
            Command::UnregisterPageList { page_list_id } => {
                match state.page_lists.remove(&page_list_id) {
                    Some(_) => S::Passed,
                    None => S::NotFound,
                }
            }
            Command::CreateTxQueue(q) => insert_status(state.tx_queues.insert(q.queue_id)),
            Command::CreateRxQueue(q) => insert_status(state.rx_queues.insert(q.queue_id)),
            Command::DestroyTxQueue { queue_id } => {
                remove_status(state.tx_queues.remove(&queue_id))
            }
            Command::DestroyRxQueue { queue_id } => {
                remove_status(state.rx_queues.remove(&queue_id))
            }
            Command::ConfigureRss(r) => {
                let rss = state.rss.get_or_insert_with(SimRss::default);
                rss.hash_types = r.hash_types;
                rss.hash_alg = r.hash_alg;
                if r.hash_key_addr != 0 {
                    rss.key = self
                        .iommu
                        .read(r.hash_key_addr, usize::from(r.hash_key_size))
                        .context("rss key")?;
                }
                if r.hash_lut_addr != 0 {
                    rss.indir = self
                        .iommu
                        .read(r.hash_lut_addr, usize::from(r.hash_lut_size) * 4)
                        .context("rss indirection table")?
                        .chunks_exact(4)
                        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                        .collect();
                }
                S::Passed
            }
            Command::SetDriverParameter {
                parameter_value, ..
            } => {
                state.mtu = Some(parameter_value);
                S::Passed
            }
            Command::ReportStats { .. } => S::Passed,
            Command::ReportLinkSpeed { link_speed_addr } => {
                self.iommu
                    .write(link_speed_addr, &state.link_speed.to_be_bytes())
                    .context("link speed")?;
                S::Passed
            }
            Command::GetPtypeMap {
                ptype_map_len,
                ptype_map_addr,
            } => {
                let mut map = vec![0u8; ptype_map_len as usize];
                for (entry, (l3, l4)) in map.chunks_exact_mut(2).zip(&state.ptypes) {
                    entry[0] = *l3;
                    entry[1] = *l4;
                }
                self.iommu.write(ptype_map_addr, &map).context("ptype map")?;
                S::Passed
            }
            Command::VerifyDriverCompatibility {
                driver_info_len,
                driver_info_addr,
            } => {
                state.driver_info = self
                    .iommu
                    .read(driver_info_addr, driver_info_len as usize)
                    .context("driver info")?;
                S::Passed
            }
            Command::Extended {
                inner_opcode,
                inner_length,
                inner_command_addr,
            } => {
                let payload = self
                    .iommu
                    .read(inner_command_addr, inner_length as usize)
                    .context("extended command payload")?;
                match Opcode::from_raw(inner_opcode) {
                    Some(Opcode::ConfigureFlowRule) => apply_flow_rule(state, &payload)?,
                    _ => S::Unimplemented,
                }
            }
        };
        Ok(status)
    }
}

fn insert_status(inserted: bool) -> DeviceStatus {
    if inserted {
        DeviceStatus::Passed
    } else {
        DeviceStatus::AlreadyExists
    }
}

fn remove_status(removed: bool) -> DeviceStatus {
    if removed {
        DeviceStatus::Passed
    } else {
        DeviceStatus::NotFound
    }
}

fn apply_flow_rule(state: &mut State, payload: &[u8]) -> Result<DeviceStatus> {
    let cmd = FlowRuleCommand::decode(payload).map_err(|e| anyhow!("flow rule: {e}"))?;
    let status = match cmd.op {
        FlowRuleOp::Add => {
            if state.flow_rules.contains_key(&cmd.location) {
                DeviceStatus::AlreadyExists
            } else {
                state.flow_rules.insert(cmd.location, cmd);
                DeviceStatus::Passed
            }
        }
        FlowRuleOp::Delete => remove_status(state.flow_rules.remove(&cmd.location).is_some()),
        FlowRuleOp::Reset => {
            state.flow_rules.clear();
            DeviceStatus::Passed
        }
    };
    Ok(status)
}

impl Registers for SimDevice {
    fn read(&self, reg: Register) -> u32 {
        let mut state = self.lock();
        match reg {
            Register::AdminqPfn => {
                if state.release_reads_left > 0 {
                    state.release_reads_left -= 1;
                    state.releasing_pfn
                } else {
                    state.pfn
                }
            }
            Register::AdminqDoorbell => state.doorbell,
            Register::AdminqEventCounter => {
                if let Some((target, reads)) = state.pending {
                    if reads == 0 {
                        state.event_counter = target;
                        state.pending = None;
                    } else {
                        state.pending = Some((target, reads - 1));
                    }
                }
                state.event_counter
            }
        }
    }

    fn write(&self, reg: Register, value: u32) {
        let mut state = self.lock();
        match reg {
            Register::AdminqPfn => {
                state.pfn_writes.push(value);
                if value == 0 {
                    log::debug!("device: ring at pfn {:#x} released", state.pfn);
                    state.releasing_pfn = state.pfn;
                    state.release_reads_left = state.release_delay;
                    state.event_counter = 0;
                    state.doorbell = 0;
                    state.pending = None;
                } else {
                    log::debug!("device: ring installed at pfn {value:#x}");
                    state.release_reads_left = 0;
                }
                state.pfn = value;
            }
            Register::AdminqDoorbell => {
                state.doorbell_writes += 1;
                state.doorbell = value;
                if state.stalled || state.pfn == 0 {
                    return;
                }
                self.consume(&mut state, value);
            }
            Register::AdminqEventCounter => {
                log::warn!("device: write to read-only event counter ignored");
            }
        }
    }
}
