// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Instant,
};

use cascade_core::{
    command::{MAX_DFP_DESCRIPTORS, RMTCMD_THERMAL_THROTTLE},
    AccessTarget, AdminStatus, FeatureId, ImageKind, Opcode, TransportCmd,
};

use crate::{
    error::PlatformError,
    throughput::{StreamThroughput, Throughput},
    topology::Topology,
    transport::{AdminTransport, Capabilities, DataPath},
    version::version_words,
};

/// Only the chip and io fields of a gpio target are kept.
const GPIO_TARGET_MASK: u32 = 0xFFF;

struct DeviceState {
    transport: Box<dyn AdminTransport>,
    throughput: Throughput,
    gpio_target: u32,
    thermal_throttling_disabled: bool,
}

/// One accelerator board.
///
/// Every admin command holds the device lock from dispatch to completion, so commands on a
/// device are totally ordered. The data path lives outside the lock and can be used while a
/// command is in flight.
pub struct Device {
    pub id: usize,
    topology: Topology,
    capabilities: Capabilities,
    transport_name: &'static str,
    data_path: Option<Arc<dyn DataPath>>,
    state: Mutex<DeviceState>,
}

impl Device {
    pub fn new(id: usize, transport: Box<dyn AdminTransport>, topology: Topology) -> Self {
        Self {
            id,
            capabilities: transport.capabilities(),
            transport_name: transport.name(),
            data_path: transport.data_path(),
            topology,
            state: Mutex::new(DeviceState {
                transport,
                throughput: Throughput::default(),
                gpio_target: 0,
                thermal_throttling_disabled: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport_name
    }

    /// Run one admin command to completion.
    ///
    /// Errors reported by the firmware, and chip selectors outside the device, come back as
    /// the status in `cmd` with `Ok(())`. `Err` means the command could not be carried out at
    /// all.
    pub fn admin_command(&self, cmd: &mut TransportCmd) -> Result<(), PlatformError> {
        let mut state = self.lock();
        tracing::debug!(
            "admin command op {:#x} sub op {:#x} chip {}",
            cmd.sq.op_code,
            cmd.sq.sub_op_code,
            cmd.chip()
        );

        match cmd.opcode() {
            Some(Opcode::GetFeature) => self.get_feature(&mut state, cmd),
            Some(Opcode::SetFeature) => self.chip_command(&state, cmd),
            Some(Opcode::SelfTest) if self.capabilities.self_test => {
                self.chip_command(&state, cmd)
            }
            Some(Opcode::DownloadDfp) => self.download_dfp(&state, cmd),
            Some(Opcode::DevIoCtrl) if cmd.feature_id() == Some(FeatureId::I2cTransceive) => {
                cmd.sq.op_code = Opcode::SetFeature as u16;
                self.chip_command(&state, cmd)?;
                if self.capabilities.i2c_readback && cmd.status().is_ok() {
                    state.transport.i2c_readback(cmd)?;
                }
                Ok(())
            }
            _ => {
                tracing::error!(
                    "unsupported admin command op {:#x} sub op {:#x}",
                    cmd.sq.op_code,
                    cmd.sq.sub_op_code
                );
                Err(PlatformError::Unsupported {
                    op_code: cmd.sq.op_code,
                    sub_op_code: cmd.sq.sub_op_code,
                })
            }
        }
    }

    /// Reject a chip outside the device the way the firmware would.
    fn reject_out_of_range(&self, cmd: &mut TransportCmd) -> bool {
        if self.topology.contains(cmd.chip()) {
            return false;
        }
        tracing::debug!(
            "chip {} out of range for a {} chip device",
            cmd.chip(),
            self.topology.total_chip_count
        );
        cmd.set_status(AdminStatus::PARAMETER_FAIL);
        true
    }

    fn round_trip(
        state: &DeviceState,
        chip: u32,
        cmd: &mut TransportCmd,
    ) -> Result<(), PlatformError> {
        state.transport.trigger(chip, cmd)?;
        let status = state.transport.fetch_result(chip, cmd)?;
        cmd.set_status(status);
        Ok(())
    }

    fn chip_command(&self, state: &DeviceState, cmd: &mut TransportCmd) -> Result<(), PlatformError> {
        if self.reject_out_of_range(cmd) {
            return Ok(());
        }
        Self::round_trip(state, cmd.chip(), cmd)
    }

    fn get_feature(
        &self,
        state: &mut DeviceState,
        cmd: &mut TransportCmd,
    ) -> Result<(), PlatformError> {
        match cmd.feature_id() {
            Some(FeatureId::Throughput) => {
                let words = state.throughput.take_words();
                cmd.cq.data[..words.len()].copy_from_slice(&words);
                cmd.set_status(AdminStatus::NO_ERROR);
            }
            Some(FeatureId::InterfaceInfo) => state.transport.interface_info(cmd)?,
            Some(FeatureId::PowerManagement | FeatureId::Frequency | FeatureId::Gpio) => {
                self.chip_command(state, cmd)?
            }
            Some(FeatureId::HwInfo) => {
                let words = self.topology.hw_info();
                cmd.cq.data[..words.len()].copy_from_slice(&words);
                cmd.set_status(AdminStatus::NO_ERROR);
            }
            Some(FeatureId::MpuUtilization) => {
                if !self.reject_out_of_range(cmd) {
                    state.transport.mpu_utilization(cmd.chip(), cmd)?;
                }
            }
            _ => Self::round_trip(state, 0, cmd)?,
        }

        if cmd.feature_id() == Some(FeatureId::Info) {
            let [low, high] = version_words();
            cmd.cq.data[7] = low;
            cmd.cq.data[8] = high;
        }

        Ok(())
    }

    /// Start the per-chip downloads described by `cmd` together, then wait for each in turn.
    ///
    /// Every descriptor must name a chip of this device, otherwise nothing is started. The
    /// first chip to fail decides the status of the whole command and the remaining chips are
    /// not waited for; their slots are handed back idle.
    fn download_dfp(&self, state: &DeviceState, cmd: &mut TransportCmd) -> Result<(), PlatformError> {
        if !self.capabilities.parallel_download {
            tracing::error!("{} cannot run parallel dfp downloads", self.transport_name);
            return Err(PlatformError::Unsupported {
                op_code: cmd.sq.op_code,
                sub_op_code: cmd.sq.sub_op_code,
            });
        }

        let mut commands: Vec<TransportCmd> = (0..MAX_DFP_DESCRIPTORS)
            .filter_map(|index| cmd.dfp_chip_command(index))
            .collect();

        if let Some(foreign) = commands
            .iter()
            .find(|chip_cmd| !self.topology.contains(chip_cmd.chip()))
        {
            tracing::error!(
                "dfp descriptor for chip {} on a {} chip device",
                foreign.chip(),
                self.topology.total_chip_count
            );
            cmd.set_status(AdminStatus::PARAMETER_FAIL);
            return Ok(());
        }

        for (index, chip_cmd) in commands.iter().enumerate() {
            if let Err(err) = state.transport.trigger(chip_cmd.chip(), chip_cmd) {
                Self::abandon(state, &commands[..=index]);
                return Err(err.into());
            }
        }

        cmd.set_status(AdminStatus::NO_ERROR);
        for index in 0..commands.len() {
            let chip = commands[index].chip();
            let status = match state.transport.fetch_result(chip, &mut commands[index]) {
                Ok(status) => status,
                Err(err) => {
                    Self::abandon(state, &commands[index..]);
                    return Err(err.into());
                }
            };
            commands[index].set_status(status);

            if !status.is_ok() {
                tracing::error!("dfp download on chip {chip} failed with {status}");
                cmd.set_status(status);
                Self::abandon(state, &commands[index + 1..]);
                break;
            }
        }

        Ok(())
    }

    /// Reset the slots of commands that were started but will not be waited for.
    fn abandon(state: &DeviceState, commands: &[TransportCmd]) {
        for chip_cmd in commands {
            if let Err(err) = state.transport.reset_slot(chip_cmd.chip()) {
                tracing::warn!("failed to reset the slot of chip {}: {err}", chip_cmd.chip());
            }
        }
    }

    /// Choose the chip and io [`Device::read_gpio`] samples: chip in bits 11..8, io in 7..0.
    pub fn set_gpio_target(&self, raw: u32) {
        self.lock().gpio_target = raw & GPIO_TARGET_MASK;
    }

    /// The current gpio target as `(chip, io)`.
    pub fn gpio_target(&self) -> (u32, u32) {
        let target = self.lock().gpio_target;
        ((target >> 8) & 0xF, target & 0xFF)
    }

    pub fn read_gpio(&self) -> Result<u32, PlatformError> {
        let (chip, io) = self.gpio_target();

        let mut cmd = TransportCmd::feature(Opcode::GetFeature, FeatureId::Gpio).with_chip(chip);
        cmd.cq.data[0] = io;
        self.admin_command(&mut cmd)?;

        match cmd.status() {
            AdminStatus::NO_ERROR => Ok(cmd.cq.data[1]),
            status => Err(PlatformError::DeviceStatus(status)),
        }
    }

    pub fn write_gpio(&self, chip: u32, io: u32, level: u32) -> Result<(), PlatformError> {
        let mut cmd = TransportCmd::feature(Opcode::SetFeature, FeatureId::Gpio)
            .with_chip(chip)
            .with_params(&[io, level]);
        self.admin_command(&mut cmd)?;

        match cmd.status() {
            AdminStatus::NO_ERROR => Ok(()),
            status => Err(PlatformError::DeviceStatus(status)),
        }
    }

    /// Turn firmware thermal throttling on or off on every chip.
    pub fn set_thermal_throttling(&self, enabled: bool) -> Result<(), PlatformError> {
        let mut state = self.lock();
        tracing::info!(
            "setting thermal throttling {}",
            if enabled { "on" } else { "off" }
        );

        for chip in 0..self.topology.total_chip_count {
            state
                .transport
                .remote_command(chip, RMTCMD_THERMAL_THROTTLE, enabled as u32, 0)?;
        }
        state.thermal_throttling_disabled = !enabled;

        Ok(())
    }

    pub fn thermal_throttling_disabled(&self) -> bool {
        self.lock().thermal_throttling_disabled
    }

    pub fn record_tx(&self, bytes: usize, elapsed: std::time::Duration) {
        self.lock().throughput.record_tx(bytes, elapsed);
    }

    pub fn record_rx(&self, bytes: usize, elapsed: std::time::Duration) {
        self.lock().throughput.record_rx(bytes, elapsed);
    }

    pub fn report_stream(&self, stream: StreamThroughput) {
        self.lock().throughput.report_stream(stream);
    }

    fn data_path(&self) -> Result<&Arc<dyn DataPath>, PlatformError> {
        self.data_path
            .as_ref()
            .ok_or(PlatformError::NotSupportedBy(self.transport_name, "a data path"))
    }

    pub fn write(&self, data: &[u8]) -> Result<usize, PlatformError> {
        let path = self.data_path()?;
        let start = Instant::now();
        let written = path.write(data)?;
        self.record_tx(written, start.elapsed());
        Ok(written)
    }

    pub fn read(&self) -> Result<Vec<u8>, PlatformError> {
        let path = self.data_path()?;
        let start = Instant::now();
        let data = path.read()?;
        self.record_rx(data.len(), start.elapsed());
        Ok(data)
    }

    /// Release a reader blocked in [`Device::read`].
    pub fn abort_read(&self) {
        if let Some(path) = &self.data_path {
            path.abort();
        }
    }

    pub fn download(&self, kind: ImageKind, image: &[u8]) -> Result<(), PlatformError> {
        let state = self.lock();
        tracing::info!("downloading {kind:?} of {} bytes", image.len());
        state.transport.download(kind, image)?;
        Ok(())
    }

    /// The event behind a pending interrupt, `None` when the device raised nothing.
    pub fn pending_event(&self) -> Result<Option<String>, PlatformError> {
        let state = self.lock();
        Ok(state.transport.pending_event()?)
    }

    fn check_register_access(&self, chip: u32) -> Result<(), PlatformError> {
        if !self.capabilities.register_access {
            return Err(PlatformError::NotSupportedBy(
                self.transport_name,
                "register access",
            ));
        }
        if !self.topology.contains(chip) {
            return Err(PlatformError::ChipOutOfRange {
                chip,
                total: self.topology.total_chip_count,
            });
        }
        Ok(())
    }

    pub fn read_register(
        &self,
        chip: u32,
        addr: u32,
        target: AccessTarget,
    ) -> Result<u32, PlatformError> {
        self.check_register_access(chip)?;
        let state = self.lock();
        Ok(state.transport.read_register(chip, addr, target)?)
    }

    pub fn write_register(
        &self,
        chip: u32,
        addr: u32,
        value: u32,
        target: AccessTarget,
    ) -> Result<(), PlatformError> {
        self.check_register_access(chip)?;
        let state = self.lock();
        Ok(state.transport.write_register(chip, addr, value, target)?)
    }
}
