// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CfgFailType {
    #[error("Nix error: {0}")]
    Nix(#[from] nix::Error),

    #[error("Size mismatch: received {0} bytes")]
    SizeMismatch(usize),
}

#[derive(Error, Debug)]
pub enum PciOpenError {
    #[error("Failed to open device /dev/memx{id}: {source}")]
    DeviceOpenFailed { id: usize, source: std::io::Error },

    #[error("Could not find the pci device backing /dev/memx{id}")]
    SysfsNotFound { id: usize },

    #[error("Failed to map {name} from device {id}: {source}")]
    BarMappingFailed {
        name: String,
        id: usize,
        source: std::io::Error,
    },

    #[error("DMA buffer mapping failed for device {id} with error {source}")]
    DmaMappingFailed { id: usize, source: std::io::Error },
}

#[derive(Error, Debug)]
pub enum PciError {
    #[error("xflow access to chip {chip} rejected: {reason}")]
    NotReady { chip: u32, reason: String },

    #[error("Tried to access offset 0x{offset:x} of a {len} byte window")]
    OutOfRange { offset: usize, len: usize },

    #[error("Address 0x{addr:08x} is outside of the accessible sram range")]
    InvalidSramAddress { addr: u32 },

    #[error("Read 0xffffffff from the mailbox: the device is gone")]
    DeviceGone,

    #[error("{what} timed out after {timeout:?}")]
    Timeout {
        what: &'static str,
        timeout: std::time::Duration,
    },

    #[error("Failed to read from device {id} config space[offset: {offset}, size: {size}]; Failed with {source}")]
    CfgReadFailed {
        id: usize,
        offset: usize,
        size: usize,

        source: CfgFailType,
    },

    #[error("Device {id} has no PCI Express capability")]
    NoPcieCapability { id: usize },

    #[error("Image of {size} bytes does not fit into {capacity} bytes")]
    ImageTooLarge { size: usize, capacity: usize },

    #[error("Firmware flash reported 0x{0:x}")]
    FlashFailed(u32),

    #[error("Chip {chip} is not present on this board")]
    ChipOutOfRange { chip: u32 },

    #[error("{0}")]
    DeviceOpenError(#[from] PciOpenError),
}
