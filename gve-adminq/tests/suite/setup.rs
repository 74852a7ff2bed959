//
// setup.rs - Shared Fixtures for Admin Queue Integration Tests
//
// Purpose:
//   Builds simulated devices and the driver objects attached to them, so every test
//   starts from the same state with logging routed to the test harness.
//
// How it works:
//   A bench couples the simulated IOMMU and device. `small_ring` uses a 256-byte page,
//   which gives a four-slot ring where overflow paths are reached with a handful of
//   commands. `steering_device` describes a GQI device with jumbo frames and flow
//   steering enabled.
//

use std::net::Ipv4Addr;

use gve_adminq::negotiate::{FEATURE_FLOW_STEERING, FEATURE_JUMBO_FRAMES};
use gve_adminq::{DeviceControl, FlowAction, FlowRule, FlowSpec, FlowType};
use gve_devsim::{DescriptorBuilder, SimBench, fast_config};

pub const MAX_FLOW_RULES: u16 = 4;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn bench() -> SimBench {
    init_logging();
    SimBench::new(fast_config(4096))
}

/// Four-slot ring.
pub fn small_ring() -> SimBench {
    init_logging();
    SimBench::new(fast_config(256))
}

pub fn steering_descriptor() -> DescriptorBuilder {
    DescriptorBuilder::new()
        .gqi_qpl(FEATURE_FLOW_STEERING | FEATURE_JUMBO_FRAMES)
        .jumbo_frames(9000)
        .flow_steering(MAX_FLOW_RULES)
}

pub fn steering_device() -> (SimBench, DeviceControl) {
    let bench = bench();
    let dev = bench.described(&steering_descriptor()).expect("describe");
    (bench, dev)
}

/// TCP/IPv4 rule matching 10.0.0.`src`:`port` to 10.0.0.1:80 exactly.
pub fn tcp4_rule(location: u16, src: u8, port: u16, queue: u16) -> FlowRule {
    let key = FlowSpec::ipv4(Ipv4Addr::new(10, 0, 0, src), Ipv4Addr::new(10, 0, 0, 1))
        .with_ports(port, 80);
    let mask = FlowSpec::ipv4(Ipv4Addr::BROADCAST, Ipv4Addr::BROADCAST).with_ports(0xffff, 0xffff);
    let action = FlowAction::Queue(queue);
    FlowRule::new(location, FlowType::TcpV4, key, mask, action)
}
