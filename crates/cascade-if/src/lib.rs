// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0
#![crate_type = "lib"]

//! Cascade-if implements the transport independent half of the driver: the admin command
//! dispatcher, chip addressing, and the device state shared by every command.
//! Transports plug in through [`AdminTransport`] and optionally [`DataPath`].

pub mod config;
mod device;
pub mod error;
mod throughput;
mod topology;
mod transport;
mod version;

pub use config::{CascadeConfig, Timeouts, TopologyConfig};
pub use device::Device;
pub use error::{BtWrapper, PlatformError};
pub use throughput::{StreamThroughput, Throughput};
pub use topology::Topology;
pub use transport::{AdminTransport, Capabilities, DataPath};
pub use version::{version_words, DRIVER_VERSION};
