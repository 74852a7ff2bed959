//
// device_control.rs - Integration Tests for Device Bring-Up and Management
//
// Purpose:
//   Exercises `DeviceControl` against the simulated device: descriptor negotiation,
//   resource and queue management, and the query commands that answer through
//   device-written buffers.
//

pub mod suite;

use gve_adminq::command::RAW_ADDRESSING_QPL_ID;
use gve_adminq::negotiate::{FEATURE_BUFFER_SIZES, FEATURE_JUMBO_FRAMES};
use gve_adminq::{
    AdminqError, Command, DeviceControl, DeviceStatus, Opcode, PtypeEntry, QueueFormat,
    ResourceParams, RxQueueParams, TxQueueParams,
};
use gve_devsim::DescriptorBuilder;

fn dqo_rda_descriptor() -> DescriptorBuilder {
    DescriptorBuilder::new()
        .dqo_rda(FEATURE_BUFFER_SIZES, 1024, 2048)
        .buffer_sizes(4096, 128)
        .jumbo_frames(9000)
}

fn tx(queue_id: u32) -> TxQueueParams {
    TxQueueParams {
        queue_id,
        ntfy_id: queue_id,
        queue_resources_addr: 0x8000 + u64::from(queue_id) * 0x40,
        tx_ring_addr: 0x10_0000 + u64::from(queue_id) * 0x1000,
        tx_comp_ring_addr: 0x20_0000 + u64::from(queue_id) * 0x1000,
        qpl_id: queue_id,
    }
}

fn rx(queue_id: u32) -> RxQueueParams {
    RxQueueParams {
        queue_id,
        ntfy_id: 16 + queue_id,
        queue_resources_addr: 0x9000 + u64::from(queue_id) * 0x40,
        desc_ring_addr: 0x30_0000 + u64::from(queue_id) * 0x1000,
        data_ring_addr: 0x40_0000 + u64::from(queue_id) * 0x1000,
        qpl_id: 100 + queue_id,
    }
}

#[test]
fn test_describe_device_negotiates_dqo_rda() {
    let bench = suite::setup::bench();
    let descriptor = dqo_rda_descriptor().mac([2, 0, 0, 0, 0, 1]);
    let dev = bench.described(&descriptor).unwrap();
    let info = *dev.device_info().unwrap();

    assert_eq!(info.queue_format, QueueFormat::DqoRda);
    let rings = (info.tx_comp_ring_entries, info.rx_buff_ring_entries);
    assert_eq!(rings, (1024, 2048));
    assert_eq!(info.packet_buffer_size, 4096);
    assert_eq!(info.header_buffer_size, 128);
    // jumbo frames were offered but not listed as supported
    assert_eq!(info.max_mtu, 1460);
    assert_eq!(info.mac.to_hex_string(), "02:00:00:00:00:01");
    assert_eq!(dev.num_rx_queues(), 8);
    assert_eq!(dev.max_flow_rules(), 0);

    assert_eq!(dev.stats().describe_device_cnt, 1);
    match bench.device.commands()[0] {
        Command::DescribeDevice {
            version,
            available_length,
            ..
        } => assert_eq!((version, available_length), (1, 4096)),
        other => panic!("unexpected command {other:?}"),
    }
    // only the ring is left mapped
    assert_eq!(bench.iommu.live_mappings(), 1);
}

#[test]
fn test_describe_device_failures() {
    let bench = suite::setup::bench();
    let mut dev = DeviceControl::new(bench.admin_queue().unwrap());

    let descriptor = DescriptorBuilder::new().gqi_qpl(0).total_length(45).build();
    bench.device.set_descriptor(descriptor);
    assert!(matches!(dev.describe_device(), Err(AdminqError::Protocol(_))));
    assert!(dev.device_info().is_none());

    let descriptor = DescriptorBuilder::new().mtu(60).build();
    bench.device.set_descriptor(descriptor);
    assert!(matches!(dev.describe_device(), Err(AdminqError::Protocol(_))));

    let descriptor = DescriptorBuilder::new().build();
    bench.device.set_descriptor(descriptor);
    bench
        .device
        .fail_next(Opcode::DescribeDevice, DeviceStatus::Unavailable);
    assert_eq!(
        dev.describe_device().map(|_| ()),
        Err(AdminqError::TryAgain)
    );

    let info = dev.describe_device().unwrap();
    assert_eq!(info.queue_format, QueueFormat::GqiQpl);
    assert_eq!(bench.iommu.live_mappings(), 1);
}

#[test]
fn test_queue_format_is_kept_across_describes() {
    let bench = suite::setup::bench();
    let descriptor = DescriptorBuilder::new().raw_addressing();
    let mut dev = bench.described(&descriptor).unwrap();
    assert_eq!(dev.device_info().unwrap().queue_format, QueueFormat::GqiRda);

    let descriptor = DescriptorBuilder::new().build();
    bench.device.set_descriptor(descriptor);
    let info = dev.describe_device().unwrap();
    assert_eq!(info.queue_format, QueueFormat::GqiRda);
}

#[test]
fn test_operations_before_describe_are_rejected() {
    let bench = suite::setup::bench();
    let mut dev = DeviceControl::new(bench.admin_queue().unwrap());
    assert_eq!(dev.set_mtu(1500), Err(AdminqError::InvalidState));
    assert_eq!(
        dev.configure_device_resources(&ResourceParams::default()),
        Err(AdminqError::InvalidState)
    );
    assert_eq!(
        dev.create_tx_queues(&[tx(0)]),
        Err(AdminqError::InvalidState)
    );
    assert!(bench.device.commands().is_empty());
}

#[test]
fn test_dqo_rda_bring_up_and_teardown() {
    let bench = suite::setup::bench();
    let mut dev = bench.described(&dqo_rda_descriptor()).unwrap();
    bench.device.clear_commands();

    let resources = ResourceParams {
        counter_array_addr: 0x7000,
        irq_db_addr: 0x7800,
        num_counters: 8,
        num_irq_dbs: 8,
        irq_db_stride: 64,
        ntfy_blk_msix_base_idx: 0,
    };
    dev.configure_device_resources(&resources).unwrap();
    assert!(bench.device.resources_configured());

    dev.create_tx_queues(&[tx(0), tx(1)]).unwrap();
    dev.create_rx_queues(&[rx(0), rx(1)]).unwrap();
    assert_eq!(bench.device.tx_queues(), vec![0, 1]);
    assert_eq!(bench.device.rx_queues(), vec![0, 1]);

    let commands = bench.device.commands();
    let Command::ConfigureDeviceResources(r) = commands[0] else {
        panic!("unexpected command {:?}", commands[0]);
    };
    assert_eq!(r.queue_format, QueueFormat::DqoRda);
    assert_eq!(r.num_counters, 8);

    let Command::CreateTxQueue(t) = commands[2] else {
        panic!("unexpected command {:?}", commands[2]);
    };
    assert_eq!(t.queue_id, 1);
    assert_eq!(t.queue_page_list_id, RAW_ADDRESSING_QPL_ID);
    assert_eq!((t.tx_ring_size, t.tx_comp_ring_size), (512, 1024));
    assert_eq!(t.tx_comp_ring_addr, tx(1).tx_comp_ring_addr);

    let Command::CreateRxQueue(q) = commands[3] else {
        panic!("unexpected command {:?}", commands[3]);
    };
    assert_eq!((q.queue_id, q.index, q.ntfy_id), (0, 0, 16));
    assert_eq!(q.queue_page_list_id, RAW_ADDRESSING_QPL_ID);
    assert_eq!((q.rx_ring_size, q.rx_buff_ring_size), (1024, 2048));
    assert_eq!(q.packet_buffer_size, 4096);
    assert!(q.enable_rsc);
    assert_eq!(q.header_buffer_size, 0);

    dev.destroy_tx_queues(0, 2).unwrap();
    dev.destroy_rx_queues(2).unwrap();
    dev.deconfigure_device_resources().unwrap();
    assert!(bench.device.tx_queues().is_empty());
    assert!(bench.device.rx_queues().is_empty());
    assert!(!bench.device.resources_configured());

    let stats = dev.stats();
    assert_eq!(stats.create_tx_queue_cnt, 2);
    assert_eq!(stats.create_rx_queue_cnt, 2);
    assert_eq!(stats.destroy_tx_queue_cnt, 2);
    assert_eq!(stats.destroy_rx_queue_cnt, 2);
    assert_eq!(stats.dcfg_device_resources_cnt, 1);
}

#[test]
fn test_gqi_qpl_queues_use_page_lists() {
    let bench = suite::setup::bench();
    let mut dev = bench.described(&DescriptorBuilder::new()).unwrap();
    bench.device.clear_commands();

    let pages = vec![0x10_0000, 0x10_1000, 0x10_2000];
    dev.register_page_list(100, &pages, 4096).unwrap();
    assert_eq!(bench.device.page_list(100), Some(pages));
    dev.create_rx_queues(&[rx(0)]).unwrap();

    let Command::CreateRxQueue(q) = bench.device.commands()[1] else {
        panic!("expected a create rx queue command");
    };
    assert_eq!(q.queue_page_list_id, 100);
    assert_eq!((q.rx_ring_size, q.rx_buff_ring_size), (1024, 0));
    assert!(!q.enable_rsc);

    // registering the same id twice is refused by the device
    assert_eq!(
        dev.register_page_list(100, &[0x20_0000], 4096),
        Err(AdminqError::InvalidArgument)
    );
    dev.unregister_page_list(100).unwrap();
    assert_eq!(bench.device.page_list(100), None);
    assert_eq!(
        dev.unregister_page_list(100),
        Err(AdminqError::InvalidArgument)
    );
    assert_eq!(bench.iommu.live_mappings(), 1);
}

#[test]
fn test_register_page_list_limits() {
    let bench = suite::setup::bench();
    let descriptor = DescriptorBuilder::new().max_registered_pages(2);
    let mut dev = bench.described(&descriptor).unwrap();
    bench.device.clear_commands();
    assert_eq!(
        dev.register_page_list(1, &[], 4096),
        Err(AdminqError::InvalidArgument)
    );
    assert_eq!(
        dev.register_page_list(1, &[0x1000, 0x2000, 0x3000], 4096),
        Err(AdminqError::InvalidArgument)
    );
    assert!(bench.device.commands().is_empty());
    dev.register_page_list(1, &[0x1000, 0x2000], 4096).unwrap();
}

#[test]
fn test_batched_queue_creation_reports_failure() {
    let bench = suite::setup::bench();
    let mut dev = bench.described(&DescriptorBuilder::new()).unwrap();
    bench
        .device
        .fail_next(Opcode::CreateTxQueue, DeviceStatus::ResourceExhausted);

    assert_eq!(
        dev.create_tx_queues(&[tx(0), tx(1), tx(2)]),
        Err(AdminqError::ResourceExhausted)
    );
    assert_eq!(bench.device.tx_queues(), vec![1, 2]);
    assert_eq!(dev.stats().cmd_fail, 1);
}

#[test]
fn test_header_split_and_lro() {
    let bench = suite::setup::bench();
    let mut dev = bench.described(&dqo_rda_descriptor()).unwrap();
    dev.set_header_split(true).unwrap();
    dev.set_lro(false).unwrap();
    bench.device.clear_commands();
    dev.create_rx_queues(&[rx(0)]).unwrap();
    let Command::CreateRxQueue(q) = bench.device.commands()[0] else {
        panic!("expected a create rx queue command");
    };
    assert_eq!(q.header_buffer_size, 128);
    assert!(!q.enable_rsc);

    let bench = suite::setup::bench();
    let mut dev = bench.described(&DescriptorBuilder::new()).unwrap();
    assert_eq!(dev.set_header_split(true), Err(AdminqError::Unsupported));
    assert_eq!(dev.set_lro(true), Err(AdminqError::Unsupported));
    dev.set_header_split(false).unwrap();
}

#[test]
fn test_set_mtu() {
    let bench = suite::setup::bench();
    let descriptor = DescriptorBuilder::new()
        .gqi_qpl(FEATURE_JUMBO_FRAMES)
        .jumbo_frames(9000);
    let mut dev = bench.described(&descriptor).unwrap();

    dev.set_mtu(9000).unwrap();
    assert_eq!(bench.device.mtu(), Some(9000));
    assert_eq!(dev.device_info().unwrap().mtu, 9000);

    assert_eq!(dev.set_mtu(9001), Err(AdminqError::InvalidArgument));
    assert_eq!(dev.set_mtu(67), Err(AdminqError::InvalidArgument));
    dev.set_mtu(68).unwrap();

    bench
        .device
        .fail_next(Opcode::SetDriverParameter, DeviceStatus::FailedPrecondition);
    assert_eq!(dev.set_mtu(1500), Err(AdminqError::TryAgain));
    assert_eq!(dev.device_info().unwrap().mtu, 68);
    assert_eq!(dev.stats().set_driver_parameter_cnt, 3);
}

#[test]
fn test_link_speed_and_ptype_map() {
    let bench = suite::setup::bench();
    let mut dev = bench.described(&DescriptorBuilder::new()).unwrap();

    bench.device.set_link_speed(25_000_000_000);
    assert_eq!(dev.report_link_speed().unwrap(), 25_000_000_000);

    bench.device.set_ptype_map(vec![(1, 2), (3, 4)]);
    let map = dev.get_ptype_map().unwrap();
    let entry = |l3_type, l4_type| PtypeEntry { l3_type, l4_type };
    assert_eq!(map.len(), 1024);
    assert_eq!(map[0], entry(1, 2));
    assert_eq!(map[1], entry(3, 4));
    assert_eq!(map[2], PtypeEntry::default());

    bench
        .device
        .fail_next(Opcode::ReportLinkSpeed, DeviceStatus::Unimplemented);
    assert_eq!(dev.report_link_speed(), Err(AdminqError::Unsupported));
    assert_eq!(bench.iommu.live_mappings(), 1);
}

#[test]
fn test_driver_compatibility_and_stats_report() {
    let bench = suite::setup::bench();
    let mut dev = bench.described(&DescriptorBuilder::new()).unwrap();
    let blob = b"gve-adminq 0.1.0 linux x86_64".to_vec();
    dev.verify_driver_compatibility(&blob).unwrap();
    assert_eq!(bench.device.driver_info(), blob);

    dev.report_stats(4096, 0xdead_0000, 20_000).unwrap();
    let last = *bench.device.commands().last().unwrap();
    assert_eq!(
        last,
        Command::ReportStats {
            stats_report_len: 4096,
            stats_report_addr: 0xdead_0000,
            interval: 20_000,
        }
    );
    assert_eq!(dev.stats().verify_driver_compatibility_cnt, 1);
}

#[test]
fn test_num_rx_queues_bounds() {
    let bench = suite::setup::bench();
    let descriptor = DescriptorBuilder::new().default_num_queues(4);
    let mut dev = bench.described(&descriptor).unwrap();
    assert_eq!(dev.num_rx_queues(), 4);
    dev.set_num_rx_queues(2).unwrap();
    assert_eq!(dev.num_rx_queues(), 2);
    assert_eq!(dev.set_num_rx_queues(0), Err(AdminqError::InvalidArgument));
    assert_eq!(dev.set_num_rx_queues(5), Err(AdminqError::InvalidArgument));
}
