// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

use cascade_core::{command::TRANSPORT_CMD_SIZE, AdminStatus, Opcode, TransportCmd};

use crate::{
    error::UsbError, transfer::header, UsbDevice, FWCFG_ID_ADM_COMMAND, FWCFG_ID_GET_FEATURE,
    FWCFG_ID_SET_FEATURE, MAX_OPS_SIZE,
};

fn config_id(cmd: &TransportCmd) -> u32 {
    match cmd.opcode() {
        Some(Opcode::SetFeature) => FWCFG_ID_SET_FEATURE,
        Some(Opcode::GetFeature) => FWCFG_ID_GET_FEATURE,
        _ => FWCFG_ID_ADM_COMMAND,
    }
}

impl UsbDevice {
    /// Send the header and body of `cmd` to the firmware.
    pub fn trigger(&self, cmd: &TransportCmd) -> Result<(), UsbError> {
        let id = config_id(cmd);
        tracing::debug!(
            "usb admin {:#x} op {:#x} sub op {:#x}",
            id,
            cmd.sq.op_code,
            cmd.sq.sub_op_code
        );

        self.send_fw(
            &header(&[id, TRANSPORT_CMD_SIZE as u32]),
            self.timeouts.header,
        )?;
        self.send_fw(cmd.as_bytes(), self.timeouts.admin)?;

        Ok(())
    }

    /// Read the firmware's reply into `cmd` and return its completion status.
    pub fn fetch_result(&self, cmd: &mut TransportCmd) -> Result<AdminStatus, UsbError> {
        let response = self.receive_fw(MAX_OPS_SIZE, self.timeouts.admin)?;
        if response.len() < TRANSPORT_CMD_SIZE {
            return Err(UsbError::ShortRead {
                expected: TRANSPORT_CMD_SIZE,
                actual: response.len(),
            });
        }

        *cmd = TransportCmd::from_bytes(&response[..TRANSPORT_CMD_SIZE]).map_err(|_| {
            UsbError::ShortRead {
                expected: TRANSPORT_CMD_SIZE,
                actual: response.len(),
            }
        })?;

        let status = cmd.status();
        if !status.is_ok() {
            tracing::error!(
                "admin error {status} for sub op {} on chip {}",
                cmd.sq.sub_op_code,
                cmd.chip()
            );
        }
        Ok(status)
    }

    pub fn trigger_and_fetch(&self, cmd: &mut TransportCmd) -> Result<(), UsbError> {
        self.trigger(cmd)?;
        self.fetch_result(cmd)?;
        Ok(())
    }
}
