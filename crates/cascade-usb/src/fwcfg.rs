// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

use cascade_core::{ImageKind, MAX_SUPPORT_CHIP_NUM};

use crate::{
    error::UsbError,
    transfer::{header, le_word},
    UsbDevice, FWCFG_ID_CLR, FWCFG_ID_DFP, FWCFG_ID_FW, FWCFG_ID_MPU_GROUP, MAX_OPS_SIZE,
};

impl UsbDevice {
    /// Tell the firmware the current configuration transfer is over.
    pub fn clear_fw_id(&self) -> Result<(), UsbError> {
        self.send_fw(&header(&[FWCFG_ID_CLR, 0]), self.timeouts.admin)?;
        self.send_fw(&[], self.timeouts.admin)?;
        Ok(())
    }

    /// Run `body` as one configuration transfer, clearing the id afterwards whatever happened.
    fn configure<T>(&self, body: impl FnOnce() -> Result<T, UsbError>) -> Result<T, UsbError> {
        let result = body();
        let clear = self.clear_fw_id();
        if let Err(err) = &clear {
            tracing::warn!("Failed to clear the config id: {err}");
        }
        let value = result?;
        clear?;
        Ok(value)
    }

    pub fn download(&self, kind: ImageKind, image: &[u8]) -> Result<(), UsbError> {
        let id = match kind {
            ImageKind::Firmware => FWCFG_ID_FW,
            ImageKind::Dfp => FWCFG_ID_DFP,
        };
        tracing::debug!("downloading {kind:?} of {} bytes", image.len());

        self.configure(|| {
            self.send_fw(&header(&[id, image.len() as u32]), self.timeouts.admin)?;
            for chunk in image.chunks(MAX_OPS_SIZE) {
                self.send_fw(chunk, self.timeouts.admin)?;
            }

            let ack = self.receive_fw(4, self.timeouts.admin)?;
            let code = le_word(&ack, 0).ok_or(UsbError::ShortRead {
                expected: 4,
                actual: ack.len(),
            })?;
            if code != 0 {
                tracing::error!("{kind:?} download rejected with {code:#x}");
                return Err(UsbError::DownloadRejected(code));
            }
            Ok(())
        })
    }

    /// Assign each chip its role in an MPU group.
    pub fn config_mpu_group(
        &self,
        roles: &[u32; MAX_SUPPORT_CHIP_NUM as usize],
    ) -> Result<(), UsbError> {
        self.configure(|| {
            self.send_fw(
                &header(&[FWCFG_ID_MPU_GROUP, MAX_SUPPORT_CHIP_NUM * 4]),
                self.timeouts.admin,
            )?;
            self.send_fw(&header(roles), self.timeouts.admin)?;
            Ok(())
        })
    }
}
