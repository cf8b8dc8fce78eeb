// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum UsbError {
    #[error("Could not submit transfer on endpoint {endpoint:#04x}: {reason}")]
    SubmitError { endpoint: u8, reason: String },

    #[error("Write on endpoint {endpoint:#04x} did not complete within {timeout:?}")]
    WriteTimeout { endpoint: u8, timeout: Duration },

    #[error("Read on endpoint {endpoint:#04x} did not complete within {timeout:?}")]
    ReadTimeout { endpoint: u8, timeout: Duration },

    #[error("Expected {expected} bytes but the device returned {actual}")]
    ShortRead { expected: usize, actual: usize },

    #[error("Read was aborted")]
    Aborted,

    #[error("Device rejected the download with code {0:#x}")]
    DownloadRejected(u32),

    #[error("Transfer on endpoint {endpoint:#04x} failed: {reason}")]
    Transfer { endpoint: u8, reason: String },

    #[error("No cascade usb device found")]
    NoDevice,

    #[cfg(feature = "usb")]
    #[error(transparent)]
    Rusb(#[from] rusb::Error),
}
