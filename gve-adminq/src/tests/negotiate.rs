#![cfg(test)]

use eui48::MacAddress;

use crate::descriptor::{DESCRIPTOR_HEADER_LEN, DeviceDescriptor, DeviceOption, OPTION_HEADER_LEN};
use crate::negotiate::*;
use crate::{AdminqError, Result};

const PAGE: usize = 4096;

struct Opt {
    id: u16,
    mask: u32,
    payload: Vec<u8>,
}

fn opt(id: u16, payload: Vec<u8>) -> Opt {
    Opt {
        id,
        mask: 0,
        payload,
    }
}

fn be32(v: u32) -> Vec<u8> {
    v.to_be_bytes().to_vec()
}

fn be32_16_16(a: u32, b: u16, c: u16) -> Vec<u8> {
    let mut out = be32(a);
    out.extend_from_slice(&b.to_be_bytes());
    out.extend_from_slice(&c.to_be_bytes());
    out
}

fn header() -> DeviceDescriptor {
    DeviceDescriptor {
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
    }
}

fn page(mut desc: DeviceDescriptor, options: &[Opt]) -> Vec<u8> {
    let mut body = Vec::new();
    for o in options {
        DeviceOption {
            id: o.id,
            length: o.payload.len() as u16,
            required_features_mask: o.mask,
            payload: &o.payload,
        }
        .encode_into(&mut body);
    }
    desc.num_device_options = options.len() as u16;
    desc.total_length = (DESCRIPTOR_HEADER_LEN + body.len()) as u16;
    let mut buf = desc.encode().to_vec();
    buf.extend_from_slice(&body);
    buf.resize(PAGE, 0);
    buf
}

fn run(desc: DeviceDescriptor, options: &[Opt], pinned: Option<QueueFormat>) -> Result<DeviceInfo> {
    let buf = page(desc, options);
    let desc = DeviceDescriptor::parse(&buf)?;
    let set = DeviceOptionSet::parse(&desc, &buf)?;
    negotiate(&desc, &set, pinned, PAGE)
}

fn format_of(options: &[Opt]) -> QueueFormat {
    run(header(), options, None).unwrap().queue_format
}

#[test]
fn test_dqo_rda_wins_regardless_of_order() {
    let dqo = || opt(OPTION_DQO_RDA, be32_16_16(0, 1024, 2048));
    let gqi = || opt(OPTION_GQI_QPL, be32(0));
    let a = run(header(), &[gqi(), dqo()], None).unwrap();
    let b = run(header(), &[dqo(), gqi()], None).unwrap();
    assert_eq!(a.queue_format, QueueFormat::DqoRda);
    assert_eq!(b.queue_format, QueueFormat::DqoRda);
    let rings = (a.tx_comp_ring_entries, a.rx_buff_ring_entries);
    assert_eq!(rings, (1024, 2048));
    assert!(a.supports_lro);
}

#[test]
fn test_priority_order() {
    let all = [
        opt(OPTION_GQI_QPL, be32(0)),
        opt(OPTION_GQI_RDA, be32(0)),
        opt(OPTION_DQO_QPL, be32_16_16(0, 0, 0)),
    ];
    assert_eq!(format_of(&all), QueueFormat::DqoQpl);
    assert_eq!(format_of(&all[..2]), QueueFormat::GqiRda);
    assert_eq!(format_of(&all[..1]), QueueFormat::GqiQpl);
    assert_eq!(format_of(&[]), QueueFormat::GqiQpl);
}

#[test]
fn test_raw_addressing_option_and_pinned_format() {
    let raw = opt(OPTION_GQI_RAW_ADDRESSING, vec![]);
    assert_eq!(format_of(&[raw]), QueueFormat::GqiRda);
    // a pinned raw addressing mode survives a descriptor without options
    let info = run(header(), &[], Some(QueueFormat::GqiRda)).unwrap();
    assert_eq!(info.queue_format, QueueFormat::GqiRda);
    // raw addressing must carry no payload at all
    let raw = opt(OPTION_GQI_RAW_ADDRESSING, vec![0, 0, 0, 0]);
    assert_eq!(format_of(&[raw]), QueueFormat::GqiQpl);
}

#[test]
fn test_mask_mismatch_is_skipped_and_parsing_continues() {
    let mut bad = opt(OPTION_DQO_RDA, be32_16_16(0, 512, 512));
    bad.mask = 0x1;
    let jumbo = opt(OPTION_JUMBO_FRAMES, be32_16_16(0, 9000, 0));
    let gqi = opt(OPTION_GQI_QPL, be32(FEATURE_JUMBO_FRAMES));
    let info = run(header(), &[bad, gqi, jumbo], None).unwrap();
    assert_eq!(info.queue_format, QueueFormat::GqiQpl);
    assert_eq!(info.max_mtu, 9000);
}

#[test]
fn test_short_option_is_skipped_and_long_option_accepted() {
    let short = opt(OPTION_DQO_RDA, be32(0));
    let mut long = be32_16_16(0, 256, 512);
    long.extend_from_slice(&[0xee; 12]);
    let long = opt(OPTION_DQO_QPL, long);
    let info = run(header(), &[short, long], None).unwrap();
    assert_eq!(info.queue_format, QueueFormat::DqoQpl);
    assert_eq!((info.tx_pages_per_qpl, info.rx_data_slot_cnt), (256, 512));
}

#[test]
fn test_unknown_option_is_ignored() {
    let unknown = opt(0x77, vec![1, 2, 3]);
    let gqi = opt(OPTION_GQI_RDA, be32(0));
    assert_eq!(format_of(&[unknown, gqi]), QueueFormat::GqiRda);
}

#[test]
fn test_chain_past_total_length_fails_whole_parse() {
    let options = [opt(OPTION_GQI_QPL, be32(0)), opt(OPTION_GQI_RDA, be32(0))];
    let mut buf = page(header(), &options);
    // shrink the declared total length into the second option
    let total = (DESCRIPTOR_HEADER_LEN + OPTION_HEADER_LEN + 4 + OPTION_HEADER_LEN + 2) as u16;
    buf[32..34].copy_from_slice(&total.to_be_bytes());
    let desc = DeviceDescriptor::parse(&buf).unwrap();
    let parsed = DeviceOptionSet::parse(&desc, &buf);
    assert!(matches!(parsed, Err(AdminqError::Protocol(_))));
}

#[test]
fn test_jumbo_requires_feature_bit() {
    let jumbo = || opt(OPTION_JUMBO_FRAMES, be32_16_16(0, 9000, 0));
    let gqi = opt(OPTION_GQI_QPL, be32(0));
    let info = run(header(), &[gqi, jumbo()], None).unwrap();
    assert_eq!(info.max_mtu, 1460);
    let gqi = opt(OPTION_GQI_QPL, be32(FEATURE_JUMBO_FRAMES));
    let info = run(header(), &[gqi, jumbo()], None).unwrap();
    assert_eq!(info.max_mtu, 9000);
}

#[test]
fn test_buffer_sizes_are_sanitized() {
    let dqo = opt(OPTION_DQO_RDA, be32_16_16(FEATURE_BUFFER_SIZES, 512, 512));
    let sizes = |pkt, hdr| opt(OPTION_BUFFER_SIZES, be32_16_16(0, pkt, hdr));

    let info = run(header(), &[dqo, sizes(4096, 256)], None).unwrap();
    assert_eq!(info.packet_buffer_size, 4096);
    assert_eq!(info.header_buffer_size, 256);

    let dqo = opt(OPTION_DQO_RDA, be32_16_16(FEATURE_BUFFER_SIZES, 512, 512));
    let info = run(header(), &[dqo, sizes(3000, 100)], None).unwrap();
    assert_eq!(
        (info.packet_buffer_size, info.header_buffer_size),
        (DEFAULT_PACKET_BUFFER_SIZE, DEFAULT_HEADER_BUFFER_SIZE)
    );

    let dqo = opt(OPTION_DQO_RDA, be32_16_16(FEATURE_BUFFER_SIZES, 512, 512));
    let info = run(header(), &[dqo, sizes(8192, 32)], None).unwrap();
    assert_eq!(
        (info.packet_buffer_size, info.header_buffer_size),
        (DEFAULT_PACKET_BUFFER_SIZE, DEFAULT_HEADER_BUFFER_SIZE)
    );

    let dqo = opt(OPTION_DQO_RDA, be32_16_16(FEATURE_BUFFER_SIZES, 512, 512));
    let info = run(header(), &[dqo, sizes(2048, 0)], None).unwrap();
    assert_eq!(info.header_buffer_size, 0);
}

#[test]
fn test_buffer_sizes_ignored_for_gqi() {
    let gqi = opt(OPTION_GQI_QPL, be32(FEATURE_BUFFER_SIZES));
    let sizes = opt(OPTION_BUFFER_SIZES, be32_16_16(0, 4096, 128));
    let info = run(header(), &[gqi, sizes], None).unwrap();
    assert_eq!(info.packet_buffer_size, DEFAULT_PACKET_BUFFER_SIZE);
    assert_eq!(info.header_buffer_size, 0);
}

#[test]
fn test_flow_steering_limit() {
    let gqi = opt(OPTION_GQI_QPL, be32(FEATURE_FLOW_STEERING));
    let steering = opt(OPTION_FLOW_STEERING, be32_16_16(0, 0, 32));
    let info = run(header(), &[gqi, steering], None).unwrap();
    assert_eq!(info.max_flow_rules, 32);
    let steering = opt(OPTION_FLOW_STEERING, be32_16_16(0, 0, 32));
    assert_eq!(run(header(), &[steering], None).unwrap().max_flow_rules, 0);
}

#[test]
fn test_dqo_qpl_zero_pages_use_defaults() {
    let dqo = opt(OPTION_DQO_QPL, be32_16_16(0, 0, 0));
    let info = run(header(), &[dqo], None).unwrap();
    assert_eq!(info.tx_pages_per_qpl, DQO_QPL_DEFAULT_TX_PAGES);
    assert_eq!(info.rx_data_slot_cnt, DQO_QPL_DEFAULT_RX_PAGES);
}

#[test]
fn test_gqi_ring_and_mtu_validation() {
    let mut desc = header();
    desc.tx_queue_entries = 128;
    assert!(matches!(run(desc, &[], None), Err(AdminqError::Protocol(_))));

    let mut desc = header();
    desc.rx_queue_entries = 32;
    assert!(matches!(run(desc, &[], None), Err(AdminqError::Protocol(_))));

    let mut desc = header();
    desc.mtu = 60;
    assert!(matches!(run(desc, &[], None), Err(AdminqError::Protocol(_))));

    // DQO rings are not held to the GQI page minimum
    let mut desc = header();
    desc.tx_queue_entries = 64;
    let dqo = opt(OPTION_DQO_RDA, be32_16_16(0, 64, 64));
    assert!(run(desc, &[dqo], None).is_ok());
}

#[test]
fn test_gqi_rx_descriptors_limited_by_data_slots() {
    let mut desc = header();
    desc.rx_pages_per_qpl = 512;
    let info = run(desc, &[], None).unwrap();
    assert_eq!(info.rx_desc_cnt, 512);
    let mac = MacAddress::new([0x42, 0x01, 0x0a, 0x80, 0x00, 0x05]);
    assert_eq!(info.mac, mac);
    assert_eq!(info.default_num_queues, 8);
}

#[test]
fn test_sanitize_buffer_size() {
    assert_eq!(sanitize_buffer_size(4096, 2048, 4096, 2048), 4096);
    assert_eq!(sanitize_buffer_size(1024, 2048, 4096, 2048), 2048);
    assert_eq!(sanitize_buffer_size(0, 64, 256, 128), 128);
}
