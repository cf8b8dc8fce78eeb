// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Display;

use cascade_core::AdminStatus;
use thiserror::Error;

#[derive(Debug)]
pub struct BtWrapper(pub std::backtrace::Backtrace);

impl BtWrapper {
    #[inline(always)]
    pub fn capture() -> Self {
        Self(std::backtrace::Backtrace::capture())
    }
}

impl Display for BtWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let std::backtrace::BacktraceStatus::Captured = self.0.status() {
            self.0.fmt(f)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Unsupported admin command op {op_code:#x} sub op {sub_op_code:#x}")]
    Unsupported { op_code: u16, sub_op_code: u16 },

    #[error("Chip {chip} is out of range, the device has {total} chips")]
    ChipOutOfRange { chip: u32, total: u32 },

    #[error("The {0} transport does not support {1}")]
    NotSupportedBy(&'static str, &'static str),

    #[error("Device reported {0}")]
    DeviceStatus(AdminStatus),

    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    #[error("{0}\n{1}")]
    Transport(Box<dyn std::error::Error>, BtWrapper),

    #[error("{0}\n{1}")]
    Generic(String, BtWrapper),
}

impl From<Box<dyn std::error::Error>> for PlatformError {
    #[inline]
    fn from(e: Box<dyn std::error::Error>) -> Self {
        Self::Transport(e, BtWrapper::capture())
    }
}

impl From<String> for PlatformError {
    #[inline]
    fn from(e: String) -> Self {
        Self::Generic(e, BtWrapper::capture())
    }
}
