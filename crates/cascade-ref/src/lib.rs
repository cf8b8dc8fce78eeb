// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

//! Opens cascade boards on every bus the driver knows and hands them back as
//! [`cascade_if::Device`]s ready for admin commands.

use std::time::Duration;

use cascade_if::{CascadeConfig, Device, PlatformError, Timeouts, Topology};
use cascade_pcie::{PcieDevice, PcieTimeouts};
use cascade_usb::{UsbDevice, UsbTimeouts};

mod detect;
pub mod error;
mod transport;

pub use detect::detect_devices;
pub use error::CascadeError;
pub use transport::Transport;

pub fn pcie_timeouts(timeouts: &Timeouts) -> PcieTimeouts {
    PcieTimeouts {
        admin: Duration::from_millis(timeouts.pcie_admin_ms),
        mailbox: Duration::from_millis(timeouts.pcie_mailbox_ms),
        irq_ack: Duration::from_millis(timeouts.pcie_irq_ack_ms),
        flash: Duration::from_millis(timeouts.pcie_flash_ms),
    }
}

pub fn usb_timeouts(timeouts: &Timeouts) -> UsbTimeouts {
    UsbTimeouts {
        admin: Duration::from_millis(timeouts.usb_admin_ms),
        data: Duration::from_millis(timeouts.usb_data_ms),
        header: Duration::from_millis(timeouts.usb_header_ms),
        debug_write: Duration::from_millis(timeouts.usb_debug_write_ms),
        debug_read: Duration::from_millis(timeouts.usb_debug_read_ms),
    }
}

/// Wrap an already opened pcie board.
pub fn pcie_device(device: PcieDevice, config: &CascadeConfig) -> Result<Device, CascadeError> {
    let topology = Topology::from_config(&config.topology)?;
    let max_chips = device.layout().max_chips();
    if topology.total_chip_count > max_chips {
        return Err(PlatformError::InvalidTopology(format!(
            "{} chips configured but the {:?} bar layout reaches only {max_chips}",
            topology.total_chip_count,
            device.layout()
        ))
        .into());
    }

    Ok(Device::new(device.id, Box::new(Transport::Pcie(device)), topology))
}

pub fn open_pcie(id: usize, config: &CascadeConfig) -> Result<Device, CascadeError> {
    let device = PcieDevice::open_with(id, pcie_timeouts(&config.timeouts))?;
    pcie_device(device, config)
}

/// Wrap an already opened usb board. The firmware learns the mpu group roles before any
/// admin command reaches it.
pub fn usb_device(device: UsbDevice, config: &CascadeConfig) -> Result<Device, CascadeError> {
    let topology = Topology::from_config(&config.topology)?;
    device.config_mpu_group(&topology.roles)?;
    tracing::debug!(
        "usb device {} configured with {} mpu groups",
        device.id,
        topology.group_count
    );

    Ok(Device::new(device.id, Box::new(Transport::Usb(device)), topology))
}

#[cfg(feature = "usb")]
pub fn open_usb(id: usize, config: &CascadeConfig) -> Result<Device, CascadeError> {
    let device = UsbDevice::open(id, usb_timeouts(&config.timeouts))?;
    usb_device(device, config)
}
