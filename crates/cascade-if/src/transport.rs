// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use cascade_core::{AccessTarget, AdminStatus, ImageKind, TransportCmd};

/// What a transport can do beyond the basic admin round trip.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Several chips can have an admin command in flight at once.
    pub parallel_download: bool,
    /// The reply to an i2c transaction has to be read back from chip 0 memory.
    pub i2c_readback: bool,
    /// Chip registers can be read and written directly.
    pub register_access: bool,
    /// The firmware accepts self-test commands over this transport.
    pub self_test: bool,
}

/// This trait abstracts the lowest level command primitives of a board. Every method
/// requires exclusive access to the device; the caller provides it.
///
/// Only `trigger` and `fetch_result` are needed for the admin protocol, the rest are hooks
/// for features that are carried differently by each transport.
pub trait AdminTransport: Send {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    /// Hand `cmd` to the firmware of `chip`.
    fn trigger(&self, chip: u32, cmd: &TransportCmd) -> Result<(), Box<dyn std::error::Error>>;

    /// Wait for the command previously triggered on `chip` to finish and copy its result into
    /// `cmd`.
    fn fetch_result(
        &self,
        chip: u32,
        cmd: &mut TransportCmd,
    ) -> Result<AdminStatus, Box<dyn std::error::Error>>;

    /// Hand the slot of `chip` back as idle without waiting for its result.
    fn reset_slot(&self, _chip: u32) -> Result<(), Box<dyn std::error::Error>> {
        Ok(())
    }

    /// Fill in the link information of the host interface.
    fn interface_info(&self, _cmd: &mut TransportCmd) -> Result<(), Box<dyn std::error::Error>> {
        Ok(())
    }

    /// Fill in the MPU utilization for `chip`.
    fn mpu_utilization(
        &self,
        chip: u32,
        cmd: &mut TransportCmd,
    ) -> Result<(), Box<dyn std::error::Error>>;

    /// Pick up the reply of a completed i2c transaction.
    fn i2c_readback(&self, _cmd: &mut TransportCmd) -> Result<(), Box<dyn std::error::Error>> {
        Ok(())
    }

    fn remote_command(
        &self,
        chip: u32,
        command: u32,
        param: u32,
        param2: u32,
    ) -> Result<(), Box<dyn std::error::Error>>;

    fn download(&self, kind: ImageKind, image: &[u8]) -> Result<(), Box<dyn std::error::Error>>;

    fn read_register(
        &self,
        _chip: u32,
        _addr: u32,
        _target: AccessTarget,
    ) -> Result<u32, Box<dyn std::error::Error>> {
        Err(format!("{} does not support register access", self.name()).into())
    }

    fn write_register(
        &self,
        _chip: u32,
        _addr: u32,
        _value: u32,
        _target: AccessTarget,
    ) -> Result<(), Box<dyn std::error::Error>> {
        Err(format!("{} does not support register access", self.name()).into())
    }

    /// Acknowledge an interrupt the device raised and describe the event it carried.
    fn pending_event(&self) -> Result<Option<String>, Box<dyn std::error::Error>> {
        Ok(None)
    }

    /// The inference data endpoints, if the transport carries them.
    fn data_path(&self) -> Option<Arc<dyn DataPath>> {
        None
    }
}

/// Bulk data to and from the accelerator. Usable concurrently with admin commands.
pub trait DataPath: Send + Sync {
    fn write(&self, data: &[u8]) -> Result<usize, Box<dyn std::error::Error>>;

    /// Block until the device produces output or the read is aborted.
    fn read(&self) -> Result<Vec<u8>, Box<dyn std::error::Error>>;

    fn abort(&self);
}
