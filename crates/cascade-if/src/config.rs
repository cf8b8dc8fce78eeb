// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

use cascade_core::Generation;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    pub timeouts: Timeouts,
    pub topology: TopologyConfig,
}

/// Every wait the drivers perform, in milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub pcie_admin_ms: u64,
    pub pcie_mailbox_ms: u64,
    pub pcie_irq_ack_ms: u64,
    pub pcie_flash_ms: u64,
    pub usb_admin_ms: u64,
    pub usb_data_ms: u64,
    pub usb_header_ms: u64,
    pub usb_debug_write_ms: u64,
    pub usb_debug_read_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            pcie_admin_ms: 3_000,
            pcie_mailbox_ms: 1_000,
            pcie_irq_ack_ms: 1_000,
            pcie_flash_ms: 5_000,
            usb_admin_ms: 30_000,
            usb_data_ms: 30_000,
            usb_header_ms: 1_000,
            usb_debug_write_ms: 1_000,
            usb_debug_read_ms: 500,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    pub generation: Generation,
    pub total_chip_count: u32,
    /// Defaults to every chip.
    pub configured_chip_count: Option<u32>,
    pub group_count: u32,
    pub roles: Vec<u32>,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            generation: Generation::default(),
            total_chip_count: 4,
            configured_chip_count: None,
            group_count: 1,
            roles: Vec::new(),
        }
    }
}
