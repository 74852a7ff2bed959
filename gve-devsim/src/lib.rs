//! A software model of the device side of the admin queue, for tests.
//!
//! `SimIommu` hands out bus addresses for driver memory, `SimDevice` implements the
//! device registers and executes commands, and `DescriptorBuilder` produces describe
//! responses. `SimBench` wires the three to an `AdminQueue` or a `DeviceControl`.

pub mod descriptor;
pub mod device;
pub mod iommu;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use gve_adminq::{AdminQueue, AdminqConfig, DeviceControl, DmaMapper, Registers};

pub use descriptor::DescriptorBuilder;
pub use device::{SimDevice, SimRss};
pub use iommu::SimIommu;

/// Configuration with a short poll interval, suitable for tests.
pub fn fast_config(page_size: usize) -> AdminqConfig {
    AdminqConfig {
        page_size,
        sleep: Duration::from_micros(50),
        max_event_counter_checks: 20,
        max_release_checks: 10,
    }
}

/// A simulated device together with the IOMMU it shares with the driver.
pub struct SimBench {
    pub iommu: Arc<SimIommu>,
    pub device: Arc<SimDevice>,
    pub config: AdminqConfig,
}

impl SimBench {
    pub fn new(config: AdminqConfig) -> Self {
        let iommu = Arc::new(SimIommu::new());
        let device = Arc::new(SimDevice::new(Arc::clone(&iommu), config.page_size));
        SimBench {
            iommu,
            device,
            config,
        }
    }

    /// Installs an admin queue on the device.
    pub fn admin_queue(&self) -> Result<AdminQueue> {
        let regs: Arc<dyn Registers> = self.device.clone();
        let mapper: Arc<dyn DmaMapper> = self.iommu.clone();
        AdminQueue::new(regs, mapper, self.config).context("admin queue install")
    }

    /// Installs an admin queue and describes the device with `descriptor`.
    pub fn described(&self, descriptor: &DescriptorBuilder) -> Result<DeviceControl> {
        self.device.set_descriptor(descriptor.build());
        let mut dev = DeviceControl::new(self.admin_queue()?);
        dev.describe_device().context("describe device")?;
        Ok(dev)
    }
}
