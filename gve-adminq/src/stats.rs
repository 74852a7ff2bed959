//! Admin queue counters.
//!
//! One counter per opcode plus the failure and timeout totals. Names follow the
//! driver's statistics surface so they can be exported as-is.

use crate::command::Opcode;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdminqStats {
    /// Commands written into the ring.
    pub prod_cnt: u32,
    /// Commands whose completion status was a failure.
    pub cmd_fail: u32,
    /// Waits that gave up on the event counter.
    pub timeouts: u32,
    pub describe_device_cnt: u32,
    pub cfg_device_resources_cnt: u32,
    pub register_page_list_cnt: u32,
    pub unregister_page_list_cnt: u32,
    pub create_tx_queue_cnt: u32,
    pub create_rx_queue_cnt: u32,
    pub destroy_tx_queue_cnt: u32,
    pub destroy_rx_queue_cnt: u32,
    pub dcfg_device_resources_cnt: u32,
    pub cfg_rss_cnt: u32,
    pub set_driver_parameter_cnt: u32,
    pub report_stats_cnt: u32,
    pub report_link_speed_cnt: u32,
    pub get_ptype_map_cnt: u32,
    pub verify_driver_compatibility_cnt: u32,
    pub cfg_flow_rule_cnt: u32,
}

impl AdminqStats {
    /// Accounts one issued command under its raw (inner, for extended) opcode.
    pub(crate) fn count_issue(&mut self, raw_opcode: u32) {
        self.prod_cnt = self.prod_cnt.wrapping_add(1);
        let counter = match Opcode::from_raw(raw_opcode) {
            Some(Opcode::DescribeDevice) => &mut self.describe_device_cnt,
            Some(Opcode::ConfigureDeviceResources) => &mut self.cfg_device_resources_cnt,
            Some(Opcode::RegisterPageList) => &mut self.register_page_list_cnt,
            Some(Opcode::UnregisterPageList) => &mut self.unregister_page_list_cnt,
            Some(Opcode::CreateTxQueue) => &mut self.create_tx_queue_cnt,
            Some(Opcode::CreateRxQueue) => &mut self.create_rx_queue_cnt,
            Some(Opcode::DestroyTxQueue) => &mut self.destroy_tx_queue_cnt,
            Some(Opcode::DestroyRxQueue) => &mut self.destroy_rx_queue_cnt,
            Some(Opcode::DeconfigureDeviceResources) => &mut self.dcfg_device_resources_cnt,
            Some(Opcode::ConfigureRss) => &mut self.cfg_rss_cnt,
            Some(Opcode::SetDriverParameter) => &mut self.set_driver_parameter_cnt,
            Some(Opcode::ReportStats) => &mut self.report_stats_cnt,
            Some(Opcode::ReportLinkSpeed) => &mut self.report_link_speed_cnt,
            Some(Opcode::GetPtypeMap) => &mut self.get_ptype_map_cnt,
            Some(Opcode::VerifyDriverCompatibility) => &mut self.verify_driver_compatibility_cnt,
            Some(Opcode::ConfigureFlowRule) => &mut self.cfg_flow_rule_cnt,
            Some(Opcode::Extended) | None => {
                log::error!("unknown admin queue command opcode {raw_opcode:#x}");
                return;
            }
        };
        *counter = counter.wrapping_add(1);
    }

    /// Counters as `(name, value)` pairs in a stable order.
    pub fn named(&self) -> [(&'static str, u32); 19] {
        [
            ("adminq_prod_cnt", self.prod_cnt),
            ("adminq_cmd_fail", self.cmd_fail),
            ("adminq_timeouts", self.timeouts),
            ("adminq_describe_device_cnt", self.describe_device_cnt),
            (
                "adminq_cfg_device_resources_cnt",
                self.cfg_device_resources_cnt,
            ),
            ("adminq_register_page_list_cnt", self.register_page_list_cnt),
            (
                "adminq_unregister_page_list_cnt",
                self.unregister_page_list_cnt,
            ),
            ("adminq_create_tx_queue_cnt", self.create_tx_queue_cnt),
            ("adminq_create_rx_queue_cnt", self.create_rx_queue_cnt),
            ("adminq_destroy_tx_queue_cnt", self.destroy_tx_queue_cnt),
            ("adminq_destroy_rx_queue_cnt", self.destroy_rx_queue_cnt),
            (
                "adminq_dcfg_device_resources_cnt",
                self.dcfg_device_resources_cnt,
            ),
            (
                "adminq_set_driver_parameter_cnt",
                self.set_driver_parameter_cnt,
            ),
            ("adminq_report_stats_cnt", self.report_stats_cnt),
            ("adminq_report_link_speed_cnt", self.report_link_speed_cnt),
            ("adminq_cfg_flow_rule", self.cfg_flow_rule_cnt),
            ("adminq_cfg_rss_cnt", self.cfg_rss_cnt),
            ("adminq_get_ptype_map_cnt", self.get_ptype_map_cnt),
            (
                "adminq_verify_driver_compatibility_cnt",
                self.verify_driver_compatibility_cnt,
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::AdminqStats;

    #[test]
    fn test_extended_counts_under_inner_opcode() {
        let mut stats = AdminqStats::default();
        stats.count_issue(0x101);
        stats.count_issue(0x1);
        stats.count_issue(0x77);
        assert_eq!(stats.prod_cnt, 3);
        assert_eq!(stats.cfg_flow_rule_cnt, 1);
        assert_eq!(stats.describe_device_cnt, 1);
        let named = stats.named();
        assert_eq!(named[0], ("adminq_prod_cnt", 3));
        assert!(named.contains(&("adminq_cfg_flow_rule", 1)));
        assert_eq!(named[15], ("adminq_cfg_flow_rule", 1));
        assert_eq!(named[16].0, "adminq_cfg_rss_cnt");
    }
}
