//! Builder for device descriptor pages.
//!
//! Produces the bytes a device writes in response to describe-device: the fixed header
//! followed by the TLV option chain. The typed helpers cover the options the driver
//! understands; `option` and `total_length` allow malformed chains for negative tests.

use eui48::MacAddress;
use gve_adminq::descriptor::{DESCRIPTOR_HEADER_LEN, DeviceDescriptor, DeviceOption};
use gve_adminq::negotiate::{
    OPTION_BUFFER_SIZES, OPTION_DQO_QPL, OPTION_DQO_RDA, OPTION_FLOW_STEERING,
    OPTION_GQI_QPL, OPTION_GQI_RAW_ADDRESSING, OPTION_GQI_RDA, OPTION_JUMBO_FRAMES,
};

#[derive(Debug, Clone)]
struct RawOption {
    id: u16,
    mask: u32,
    payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    header: DeviceDescriptor,
    options: Vec<RawOption>,
    total_length: Option<u16>,
}

impl Default for DescriptorBuilder {
    fn default() -> Self {
        DescriptorBuilder {
            header: DeviceDescriptor {
                max_registered_pages: 1 << 16,
                tx_queue_entries: 512,
                rx_queue_entries: 1024,
                default_num_queues: 8,
                mtu: 1460,
                counters: 32,
                tx_pages_per_qpl: 512,
                rx_pages_per_qpl: 1024,
                mac: MacAddress::new([0x42, 0x01, 0x0a, 0x80, 0x00, 0x05]),
                num_device_options: 0,
                total_length: 0,
            },
            options: Vec::new(),
            total_length: None,
        }
    }
}

fn u32_u16_u16(a: u32, b: u16, c: u16) -> Vec<u8> {
    let mut out = a.to_be_bytes().to_vec();
    out.extend_from_slice(&b.to_be_bytes());
    out.extend_from_slice(&c.to_be_bytes());
    out
}

impl DescriptorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mtu(mut self, mtu: u16) -> Self {
        self.header.mtu = mtu;
        self
    }

    pub fn mac(mut self, mac: [u8; 6]) -> Self {
        self.header.mac = MacAddress::new(mac);
        self
    }

    pub fn default_num_queues(mut self, queues: u16) -> Self {
        self.header.default_num_queues = queues;
        self
    }

    pub fn max_registered_pages(mut self, pages: u64) -> Self {
        self.header.max_registered_pages = pages;
        self
    }

    pub fn queue_entries(mut self, tx: u16, rx: u16) -> Self {
        self.header.tx_queue_entries = tx;
        self.header.rx_queue_entries = rx;
        self
    }

    /// Appends an arbitrary option.
    pub fn option(mut self, id: u16, required_features_mask: u32, payload: Vec<u8>) -> Self {
        self.options.push(RawOption {
            id,
            mask: required_features_mask,
            payload,
        });
        self
    }

    pub fn raw_addressing(self) -> Self {
        self.option(OPTION_GQI_RAW_ADDRESSING, 0, Vec::new())
    }

    pub fn gqi_rda(self, supported_features: u32) -> Self {
        self.option(OPTION_GQI_RDA, 0, supported_features.to_be_bytes().to_vec())
    }

    pub fn gqi_qpl(self, supported_features: u32) -> Self {
        self.option(OPTION_GQI_QPL, 0, supported_features.to_be_bytes().to_vec())
    }

    pub fn dqo_rda(self, supported_features: u32, tx_comp_ring: u16, rx_buff_ring: u16) -> Self {
        let payload = u32_u16_u16(supported_features, tx_comp_ring, rx_buff_ring);
        self.option(OPTION_DQO_RDA, 0, payload)
    }

    pub fn dqo_qpl(self, supported_features: u32, tx_pages: u16, rx_pages: u16) -> Self {
        let payload = u32_u16_u16(supported_features, tx_pages, rx_pages);
        self.option(OPTION_DQO_QPL, 0, payload)
    }

    pub fn jumbo_frames(self, max_mtu: u16) -> Self {
        self.option(OPTION_JUMBO_FRAMES, 0, u32_u16_u16(0, max_mtu, 0))
    }

    pub fn buffer_sizes(self, packet: u16, header: u16) -> Self {
        self.option(OPTION_BUFFER_SIZES, 0, u32_u16_u16(0, packet, header))
    }

    pub fn flow_steering(self, max_rules: u16) -> Self {
        self.option(OPTION_FLOW_STEERING, 0, u32_u16_u16(0, 0, max_rules))
    }

    /// Overrides the total length written in the header.
    pub fn total_length(mut self, total_length: u16) -> Self {
        self.total_length = Some(total_length);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for o in &self.options {
            DeviceOption {
                id: o.id,
                length: o.payload.len() as u16,
                required_features_mask: o.mask,
                payload: &o.payload,
            }
            .encode_into(&mut body);
        }
        let mut header = self.header;
        header.num_device_options = self.options.len() as u16;
        header.total_length = self
            .total_length
            .unwrap_or((DESCRIPTOR_HEADER_LEN + body.len()) as u16);
        let mut out = header.encode().to_vec();
        out.extend_from_slice(&body);
        out
    }
}
