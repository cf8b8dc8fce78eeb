// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

use cascade_if::{CascadeConfig, Device};
use cascade_pcie::PcieDevice;

use crate::error::CascadeError;

/// Open every board on the system, pcie boards first.
///
/// A board that fails to open is logged and skipped; an empty list is not an error.
pub fn detect_devices(config: &CascadeConfig) -> Result<Vec<Device>, CascadeError> {
    let mut devices = Vec::new();

    let detect_bar = indicatif::ProgressBar::new_spinner().with_style(
        indicatif::ProgressStyle::default_spinner()
            .template("{spinner:.green} Detecting devices (found {pos})")
            .map_err(|err| CascadeError::Custom(err.to_string()))?,
    );

    for id in PcieDevice::scan() {
        detect_bar.set_message(format!("opening memx{id}"));
        match crate::open_pcie(id, config) {
            Ok(device) => {
                detect_bar.inc(1);
                devices.push(device);
            }
            Err(err) => tracing::warn!("Skipping pcie device {id}: {err}"),
        }
    }

    #[cfg(feature = "usb")]
    for id in cascade_usb::UsbDevice::scan() {
        detect_bar.set_message(format!("opening usb device {id}"));
        match crate::open_usb(id, config) {
            Ok(device) => {
                detect_bar.inc(1);
                devices.push(device);
            }
            Err(err) => tracing::warn!("Skipping usb device {id}: {err}"),
        }
    }

    detect_bar.finish_and_clear();
    tracing::info!("Found {} cascade devices", devices.len());

    Ok(devices)
}
