//! # Flow Steering Rules
//!
//! ## Purpose
//!
//! Keeps the driver's copy of the receive flow steering rules and mirrors every change
//! to the device through the extended configure-flow-rule command.
//!
//! ## How it works
//!
//! Rules live in a `BTreeMap` keyed by location, so iteration is always in ascending
//! location order and the insert position is found by the map. A change is sent to the
//! device first and applied locally only when the device accepted it, so both sides
//! always hold the same set. Two rules with the same flow type, key and mask are
//! duplicates regardless of their target queue.
//!
//! Keys and masks are normalised per flow type when a rule is built: IPv4 rules only
//! keep the first four address bytes, port based protocols drop the SPI and IPsec
//! protocols drop the ports. The wire layout shares those fields, so two rules that
//! encode identically also compare equal.
//!
//! ## Main components
//!
//! - `FlowType`, `FlowSpec`, `FlowAction`, `FlowRule`: Rule model.
//! - `FlowRuleCommand`: Wire encoding of the configure-flow-rule payload.
//! - `FlowRuleDirectory`: Ordered rule set synchronised with the device.
//! - `prefix_match_v4()`, `prefix_match_v6()`: Key and mask from network prefixes.

use std::collections::BTreeMap;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use ipnet::{Ipv4Net, Ipv6Net};

use crate::command::Opcode;
use crate::error::{AdminqError, Result};
use crate::queue::AdminQueue;
use crate::wire::{WireRead, WireWrite};

/// Size of an encoded flow match specification.
pub const FLOW_SPEC_LEN: usize = 40;
/// Size of the configure-flow-rule payload.
pub const FLOW_RULE_CMD_LEN: usize = 8 + 2 * FLOW_SPEC_LEN;

/// Traffic classes a rule can match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum FlowType {
    TcpV4 = 0,
    UdpV4 = 1,
    SctpV4 = 2,
    AhV4 = 3,
    EspV4 = 4,
    TcpV6 = 5,
    UdpV6 = 6,
    SctpV6 = 7,
    AhV6 = 8,
    EspV6 = 9,
}

impl FlowType {
    pub fn from_raw(raw: u16) -> Option<Self> {
        use FlowType::*;
        let all = [
            TcpV4, UdpV4, SctpV4, AhV4, EspV4, TcpV6, UdpV6, SctpV6, AhV6, EspV6,
        ];
        all.get(usize::from(raw)).copied()
    }

    pub fn is_ipv6(self) -> bool {
        self as u16 >= FlowType::TcpV6 as u16
    }

    /// Returns `true` for IPsec types, which match on the SPI instead of ports.
    pub fn uses_spi(self) -> bool {
        matches!(
            self,
            FlowType::AhV4 | FlowType::EspV4 | FlowType::AhV6 | FlowType::EspV6
        )
    }

    /// Transport protocol name.
    pub fn protocol_name(self) -> &'static str {
        match self {
            FlowType::TcpV4 | FlowType::TcpV6 => "TCP",
            FlowType::UdpV4 | FlowType::UdpV6 => "UDP",
            FlowType::SctpV4 | FlowType::SctpV6 => "SCTP",
            FlowType::AhV4 | FlowType::AhV6 => "AH",
            FlowType::EspV4 | FlowType::EspV6 => "ESP",
        }
    }
}

/// Header fields a rule matches on; used both as key and as mask.
///
/// IPv4 addresses occupy the first four bytes of the address fields. `tos` holds the
/// IPv4 type of service or the IPv6 traffic class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FlowSpec {
    pub src_ip: [u8; 16],
    pub dst_ip: [u8; 16],
    pub src_port: u16,
    pub dst_port: u16,
    pub spi: u32,
    pub tos: u8,
}

fn v4_bytes(addr: Ipv4Addr) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..4].copy_from_slice(&addr.octets());
    out
}

impl FlowSpec {
    pub fn ipv4(src: Ipv4Addr, dst: Ipv4Addr) -> Self {
        FlowSpec {
            src_ip: v4_bytes(src),
            dst_ip: v4_bytes(dst),
            ..Default::default()
        }
    }

    pub fn ipv6(src: Ipv6Addr, dst: Ipv6Addr) -> Self {
        FlowSpec {
            src_ip: src.octets(),
            dst_ip: dst.octets(),
            ..Default::default()
        }
    }

    pub fn with_ports(mut self, src_port: u16, dst_port: u16) -> Self {
        self.src_port = src_port;
        self.dst_port = dst_port;
        self
    }

    pub fn with_spi(mut self, spi: u32) -> Self {
        self.spi = spi;
        self
    }

    pub fn with_tos(mut self, tos: u8) -> Self {
        self.tos = tos;
        self
    }

    fn normalized(mut self, flow_type: FlowType) -> Self {
        if !flow_type.is_ipv6() {
            self.src_ip[4..].fill(0);
            self.dst_ip[4..].fill(0);
        }
        if flow_type.uses_spi() {
            self.src_port = 0;
            self.dst_port = 0;
        } else {
            self.spi = 0;
        }
        self
    }

    fn encode(&self, flow_type: FlowType, w: &mut WireWrite<'_>) {
        w.bytes(&self.src_ip).bytes(&self.dst_ip);
        if flow_type.uses_spi() {
            w.u32(self.spi);
        } else {
            w.u16(self.src_port).u16(self.dst_port);
        }
        w.u8(self.tos).skip(3);
    }

    fn decode(flow_type: FlowType, r: &mut WireRead<'_>) -> Result<Self> {
        let mut spec = FlowSpec {
            src_ip: r.array()?,
            dst_ip: r.array()?,
            ..Default::default()
        };
        if flow_type.uses_spi() {
            spec.spi = r.u32()?;
        } else {
            spec.src_port = r.u16()?;
            spec.dst_port = r.u16()?;
        }
        spec.tos = r.u8()?;
        r.skip(3)?;
        Ok(spec)
    }

    fn fmt_ip(addr: &[u8; 16], ipv6: bool) -> String {
        if ipv6 {
            Ipv6Addr::from(*addr).to_string()
        } else {
            Ipv4Addr::new(addr[0], addr[1], addr[2], addr[3]).to_string()
        }
    }
}

/// Key and mask matching source and destination IPv4 prefixes.
pub fn prefix_match_v4(src: Ipv4Net, dst: Ipv4Net) -> (FlowSpec, FlowSpec) {
    (
        FlowSpec::ipv4(src.network(), dst.network()),
        FlowSpec::ipv4(src.netmask(), dst.netmask()),
    )
}

/// Key and mask matching source and destination IPv6 prefixes.
pub fn prefix_match_v6(src: Ipv6Net, dst: Ipv6Net) -> (FlowSpec, FlowSpec) {
    (
        FlowSpec::ipv6(src.network(), dst.network()),
        FlowSpec::ipv6(src.netmask(), dst.netmask()),
    )
}

/// What the device does with a matching packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowAction {
    /// Deliver to the receive queue with this index.
    Queue(u16),
    /// Drop the packet. Not supported by the device.
    Discard,
}

/// A steering rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowRule {
    pub location: u16,
    pub flow_type: FlowType,
    pub key: FlowSpec,
    pub mask: FlowSpec,
    pub action: FlowAction,
}

impl FlowRule {
    /// Builds a rule with key and mask normalised for `flow_type`.
    pub fn new(
        location: u16,
        flow_type: FlowType,
        key: FlowSpec,
        mask: FlowSpec,
        action: FlowAction,
    ) -> Self {
        FlowRule {
            location,
            flow_type,
            key: key.normalized(flow_type),
            mask: mask.normalized(flow_type),
            action,
        }
    }

    /// Returns `true` if both rules match the same traffic, whatever their action.
    pub fn same_match(&self, other: &FlowRule) -> bool {
        self.flow_type == other.flow_type && self.key == other.key && self.mask == other.mask
    }
}

impl fmt::Display for FlowRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ipv6 = self.flow_type.is_ipv6();
        write!(
            f,
            "rule {}: {}{} src {}",
            self.location,
            self.flow_type.protocol_name(),
            if ipv6 { "6" } else { "4" },
            FlowSpec::fmt_ip(&self.key.src_ip, ipv6),
        )?;
        if !self.flow_type.uses_spi() {
            write!(f, ":{}", self.key.src_port)?;
        }
        write!(f, " dst {}", FlowSpec::fmt_ip(&self.key.dst_ip, ipv6))?;
        if self.flow_type.uses_spi() {
            write!(f, " spi {:#x}", self.key.spi)?;
        } else {
            write!(f, ":{}", self.key.dst_port)?;
        }
        match self.action {
            FlowAction::Queue(q) => write!(f, " -> queue {q}"),
            FlowAction::Discard => write!(f, " -> discard"),
        }
    }
}

/// Operation carried by a configure-flow-rule command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FlowRuleOp {
    Add = 0,
    Delete = 1,
    Reset = 2,
}

/// Payload of the extended configure-flow-rule command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowRuleCommand {
    pub op: FlowRuleOp,
    pub location: u16,
    pub flow_type: FlowType,
    pub action: u16,
    pub key: FlowSpec,
    pub mask: FlowSpec,
}

impl FlowRuleCommand {
    fn bare(op: FlowRuleOp, location: u16) -> Self {
        FlowRuleCommand {
            op,
            location,
            flow_type: FlowType::TcpV4,
            action: 0,
            key: FlowSpec::default(),
            mask: FlowSpec::default(),
        }
    }

    /// Builds an add command. Discard rules cannot be expressed and are rejected.
    pub fn add(rule: &FlowRule) -> Result<Self> {
        let FlowAction::Queue(queue) = rule.action else {
            return Err(AdminqError::Unsupported);
        };
        Ok(FlowRuleCommand {
            op: FlowRuleOp::Add,
            location: rule.location,
            flow_type: rule.flow_type,
            action: queue,
            key: rule.key,
            mask: rule.mask,
        })
    }

    pub fn delete(location: u16) -> Self {
        Self::bare(FlowRuleOp::Delete, location)
    }

    pub fn reset() -> Self {
        Self::bare(FlowRuleOp::Reset, 0)
    }

    pub fn encode(&self) -> [u8; FLOW_RULE_CMD_LEN] {
        let mut out = [0u8; FLOW_RULE_CMD_LEN];
        let mut w = WireWrite::new(&mut out);
        w.u16(self.op as u16)
            .u16(self.location)
            .u16(self.flow_type as u16)
            .u16(self.action);
        self.key.encode(self.flow_type, &mut w);
        self.mask.encode(self.flow_type, &mut w);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = WireRead::new(buf);
        let op = match r.u16()? {
            0 => FlowRuleOp::Add,
            1 => FlowRuleOp::Delete,
            2 => FlowRuleOp::Reset,
            other => return Err(unknown("flow rule op", other)),
        };
        let location = r.u16()?;
        let raw_type = r.u16()?;
        let flow_type = FlowType::from_raw(raw_type);
        let flow_type = flow_type.ok_or_else(|| unknown("flow type", raw_type))?;
        let action = r.u16()?;
        Ok(FlowRuleCommand {
            op,
            location,
            flow_type,
            action,
            key: FlowSpec::decode(flow_type, &mut r)?,
            mask: FlowSpec::decode(flow_type, &mut r)?,
        })
    }
}

fn unknown(what: &str, raw: u16) -> AdminqError {
    AdminqError::protocol(format!("unknown {what} {raw}"))
}

/// The driver's set of flow rules, ordered by location.
#[derive(Debug, Default)]
pub struct FlowRuleDirectory {
    rules: BTreeMap<u16, FlowRule>,
    max_rules: u16,
}

impl FlowRuleDirectory {
    /// Creates an empty directory for a device accepting `max_rules` rules.
    pub fn new(max_rules: u16) -> Self {
        FlowRuleDirectory {
            rules: BTreeMap::new(),
            max_rules,
        }
    }

    pub fn max_rules(&self) -> u16 {
        self.max_rules
    }

    pub(crate) fn set_max_rules(&mut self, max_rules: u16) {
        self.max_rules = max_rules;
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn ensure_supported(&self) -> Result<()> {
        if self.max_rules == 0 {
            return Err(AdminqError::Unsupported);
        }
        Ok(())
    }

    /// Looks up the rule at `location`.
    ///
    /// # Returns
    /// `Unsupported` if the device has no flow steering, `InvalidArgument` if no rule
    /// is stored there.
    pub fn get(&self, location: u16) -> Result<&FlowRule> {
        self.ensure_supported()?;
        self.rules
            .get(&location)
            .ok_or(AdminqError::InvalidArgument)
    }

    /// Rules in ascending location order.
    pub fn iter(&self) -> impl Iterator<Item = &FlowRule> {
        self.rules.values()
    }

    /// Installs a rule on the device and records it.
    ///
    /// # Arguments
    /// * `aq` - The admin queue of the device.
    /// * `rule` - The rule to add.
    /// * `num_rx_queues` - Number of receive queues a rule may target.
    ///
    /// # Returns
    /// `Unsupported` if the device has no flow steering or the action is a discard,
    /// `ResourceExhausted` when the device limit is reached, `InvalidArgument` for a
    /// target queue that does not exist, `AlreadyExists` for an occupied location or a
    /// duplicate match, or the device's failure.
    pub fn add(&mut self, aq: &mut AdminQueue, rule: FlowRule, num_rx_queues: u16) -> Result<()> {
        self.ensure_supported()?;
        if self.rules.len() >= self.max_rules as usize {
            log::error!(
                "Reached the limit of max allowed flow rules ({})",
                self.max_rules
            );
            return Err(AdminqError::ResourceExhausted);
        }
        let cmd = FlowRuleCommand::add(&rule)?;
        if cmd.action >= num_rx_queues {
            log::error!(
                "flow rule {} targets queue {} of {num_rx_queues}",
                rule.location,
                cmd.action
            );
            return Err(AdminqError::InvalidArgument);
        }
        if self.rules.contains_key(&rule.location) {
            log::error!("flow rule {} already exists", rule.location);
            return Err(AdminqError::AlreadyExists);
        }
        if let Some(dup) = self.rules.values().find(|r| r.same_match(&rule)) {
            log::error!(
                "flow rule {} duplicates rule {}",
                rule.location,
                dup.location
            );
            return Err(AdminqError::AlreadyExists);
        }

        aq.execute_extended(Opcode::ConfigureFlowRule, &cmd.encode())?;
        log::info!("added flow {rule}");
        self.rules.insert(rule.location, rule);
        Ok(())
    }

    /// Removes the rule at `location` from the device and from the directory.
    ///
    /// # Returns
    /// `Unsupported` if the device has no flow steering, `InvalidArgument` if no rule is
    /// stored there; the directory is unchanged if the device rejects the removal.
    pub fn delete(&mut self, aq: &mut AdminQueue, location: u16) -> Result<()> {
        self.ensure_supported()?;
        if !self.rules.contains_key(&location) {
            return Err(AdminqError::InvalidArgument);
        }
        let cmd = FlowRuleCommand::delete(location);
        aq.execute_extended(Opcode::ConfigureFlowRule, &cmd.encode())?;
        self.rules.remove(&location);
        log::info!("deleted flow rule {location}");
        Ok(())
    }

    /// Asks the device to drop every rule.
    ///
    /// The directory itself is left as is; call `clear` once the reset succeeded.
    pub fn reset(&self, aq: &mut AdminQueue) -> Result<()> {
        let cmd = FlowRuleCommand::reset();
        aq.execute_extended(Opcode::ConfigureFlowRule, &cmd.encode())
    }

    /// Forgets every rule without talking to the device.
    pub fn clear(&mut self) {
        self.rules.clear();
    }

    /// Writes the locations of all rules into `out` in ascending order.
    ///
    /// # Returns
    /// The number of locations written, or `BufferTooSmall` if `out` cannot hold them
    /// all. In that case `out` holds the lowest locations. `Unsupported` if the device
    /// has no flow steering.
    pub fn enumerate(&self, out: &mut [u32]) -> Result<usize> {
        self.ensure_supported()?;
        for (i, location) in self.rules.keys().enumerate() {
            let Some(slot) = out.get_mut(i) else {
                return Err(AdminqError::BufferTooSmall);
            };
            *slot = u32::from(*location);
        }
        Ok(self.rules.len())
    }
}
