// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

use cascade_if::PlatformError;
use cascade_pcie::{PciError, PciOpenError};
use cascade_usb::UsbError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error(transparent)]
    PlatformError(#[from] PlatformError),

    #[error(transparent)]
    PciOpenError(#[from] PciOpenError),

    #[error(transparent)]
    PciError(#[from] PciError),

    #[error(transparent)]
    UsbError(#[from] UsbError),

    #[error("{0}")]
    Custom(String),
}
