//! # Device Descriptor
//!
//! ## Purpose
//!
//! Parses the descriptor page filled in by the describe-device command: a fixed header
//! followed by a chain of device options in type-length-value form.
//!
//! ## How it works
//!
//! `DeviceDescriptor::parse` reads the 40-byte header and validates the declared total
//! length against the page it came from. `DeviceDescriptor::options` walks the option
//! chain. Each node's header gives the payload length, which places the next node; a
//! node that would end past the declared total length poisons the whole chain, since
//! nothing after it can be trusted. The iterator yields the raw nodes and leaves their
//! interpretation to the negotiator.
//!
//! ## Main components
//!
//! - `DeviceDescriptor`: Decoded descriptor header.
//! - `DeviceOption`: One raw option node.
//! - `DeviceOptions`: Iterator over the option chain.

use eui48::MacAddress;

use crate::error::{AdminqError, Result};
use crate::wire::{WireRead, WireWrite};

/// Size of the descriptor header.
pub const DESCRIPTOR_HEADER_LEN: usize = 40;
/// Size of an option node header.
pub const OPTION_HEADER_LEN: usize = 8;

/// Decoded header of a device descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub max_registered_pages: u64,
    pub tx_queue_entries: u16,
    pub rx_queue_entries: u16,
    pub default_num_queues: u16,
    pub mtu: u16,
    pub counters: u16,
    pub tx_pages_per_qpl: u16,
    pub rx_pages_per_qpl: u16,
    pub mac: MacAddress,
    pub num_device_options: u16,
    pub total_length: u16,
}

impl DeviceDescriptor {
    /// Decodes the descriptor header at the start of `buf`.
    ///
    /// # Returns
    /// `Protocol` if the buffer is shorter than the header or than the declared total
    /// length, or if the total length does not cover the header.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = WireRead::new(buf);
        let max_registered_pages = r.u64()?;
        r.skip(2)?;
        let desc = DeviceDescriptor {
            max_registered_pages,
            tx_queue_entries: r.u16()?,
            rx_queue_entries: r.u16()?,
            default_num_queues: r.u16()?,
            mtu: r.u16()?,
            counters: r.u16()?,
            tx_pages_per_qpl: r.u16()?,
            rx_pages_per_qpl: r.u16()?,
            mac: MacAddress::new(r.array()?),
            num_device_options: r.u16()?,
            total_length: r.u16()?,
        };
        r.skip(6)?;
        let total = desc.total_length as usize;
        if total < DESCRIPTOR_HEADER_LEN || total > buf.len() {
            return Err(AdminqError::protocol(format!(
                "descriptor total length {total} outside [{DESCRIPTOR_HEADER_LEN}, {}]",
                buf.len()
            )));
        }
        Ok(desc)
    }

    /// Encodes the header in device layout.
    pub fn encode(&self) -> [u8; DESCRIPTOR_HEADER_LEN] {
        let mut out = [0u8; DESCRIPTOR_HEADER_LEN];
        WireWrite::new(&mut out)
            .u64(self.max_registered_pages)
            .skip(2)
            .u16(self.tx_queue_entries)
            .u16(self.rx_queue_entries)
            .u16(self.default_num_queues)
            .u16(self.mtu)
            .u16(self.counters)
            .u16(self.tx_pages_per_qpl)
            .u16(self.rx_pages_per_qpl)
            .bytes(self.mac.as_bytes())
            .u16(self.num_device_options)
            .u16(self.total_length);
        out
    }

    /// Iterates the option chain that follows the header in `buf`.
    ///
    /// `buf` must be the same buffer the header was parsed from.
    pub fn options<'a>(&self, buf: &'a [u8]) -> DeviceOptions<'a> {
        let end = (self.total_length as usize).min(buf.len());
        DeviceOptions {
            buf: &buf[..end],
            offset: DESCRIPTOR_HEADER_LEN,
            remaining: self.num_device_options,
        }
    }
}

/// One raw option node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceOption<'a> {
    pub id: u16,
    pub length: u16,
    pub required_features_mask: u32,
    pub payload: &'a [u8],
}

impl DeviceOption<'_> {
    /// Appends an option node in device layout to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let mut hdr = [0u8; OPTION_HEADER_LEN];
        WireWrite::new(&mut hdr)
            .u16(self.id)
            .u16(self.length)
            .u32(self.required_features_mask);
        out.extend_from_slice(&hdr);
        out.extend_from_slice(self.payload);
    }
}

/// Iterator over the option chain of a descriptor.
///
/// Yields at most `num_device_options` nodes. A boundary violation is yielded as an
/// error and ends the iteration.
pub struct DeviceOptions<'a> {
    buf: &'a [u8],
    offset: usize,
    remaining: u16,
}

impl<'a> Iterator for DeviceOptions<'a> {
    type Item = Result<DeviceOption<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let start = self.offset;
        let payload_start = start + OPTION_HEADER_LEN;
        let header = self.buf.get(start..payload_start);
        let Some(header) = header else {
            self.remaining = 0;
            return Some(Err(AdminqError::protocol(format!(
                "option header at {start} runs past descriptor length {}",
                self.buf.len()
            ))));
        };
        let id = u16::from_be_bytes([header[0], header[1]]);
        let length = u16::from_be_bytes([header[2], header[3]]);
        let required_features_mask =
            u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        let next = payload_start + length as usize;
        if next > self.buf.len() {
            self.remaining = 0;
            return Some(Err(AdminqError::protocol(format!(
                "option {id:#x} ends at {next}, past descriptor length {}",
                self.buf.len()
            ))));
        }
        self.offset = next;
        Some(Ok(DeviceOption {
            id,
            length,
            required_features_mask,
            payload: &self.buf[payload_start..next],
        }))
    }
}
