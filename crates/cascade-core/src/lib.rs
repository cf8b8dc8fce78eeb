// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::str::FromStr;

pub mod command;
pub mod poll;

pub use command::{
    AdminStatus, CommandError, CompletionEntry, DfpDescriptorWord, FeatureId, Opcode,
    SlotStatus, SubmissionEntry, TransportCmd,
};
pub use poll::{poll_until, Deadline, PollOutcome};

/// Largest number of chips a single board can chain together.
pub const MAX_SUPPORT_CHIP_NUM: u32 = 16;

#[derive(Clone, Hash, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Generation {
    Cascade,
    CascadePlus,
}

impl Default for Generation {
    fn default() -> Self {
        Self::CascadePlus
    }
}

impl Generation {
    /// Value reported in word 0 of the hw-info feature.
    pub fn as_u32(&self) -> u32 {
        match self {
            Generation::Cascade => 3,
            Generation::CascadePlus => 4,
        }
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            3 => Some(Generation::Cascade),
            4 => Some(Generation::CascadePlus),
            _ => None,
        }
    }

    pub fn is_cascade_plus(&self) -> bool {
        matches!(self, Generation::CascadePlus)
    }
}

impl FromStr for Generation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cascade" => Ok(Generation::Cascade),
            "cascade-plus" | "cascade+" => Ok(Generation::CascadePlus),
            err => Err(err.to_string()),
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Generation::Cascade => write!(f, "Cascade"),
            Generation::CascadePlus => write!(f, "Cascade+"),
        }
    }
}

/// What the xflow window of a chip is pointed at during a register access.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessTarget {
    /// The chip's internal logic.
    #[default]
    Mpu,
    /// The external buffer view.
    Buffer,
}

impl AccessTarget {
    /// Value written to the xflow control register.
    pub fn control_value(&self) -> u32 {
        match self {
            AccessTarget::Mpu => 0,
            AccessTarget::Buffer => 1,
        }
    }
}

impl FromStr for AccessTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mpu" => Ok(AccessTarget::Mpu),
            "buffer" => Ok(AccessTarget::Buffer),
            err => Err(err.to_string()),
        }
    }
}

/// What a download carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageKind {
    /// Chip firmware, burned to flash.
    Firmware,
    /// A compiled model.
    Dfp,
}

impl FromStr for ImageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "firmware" | "fw" => Ok(ImageKind::Firmware),
            "dfp" | "model" => Ok(ImageKind::Dfp),
            err => Err(err.to_string()),
        }
    }
}
