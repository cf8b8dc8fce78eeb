// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

use cascade_core::{Generation, MAX_SUPPORT_CHIP_NUM};
use serde::Serialize;

use crate::{config::TopologyConfig, error::PlatformError};

/// The chips behind one device. Fixed when the device is attached.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Topology {
    pub generation: Generation,
    pub total_chip_count: u32,
    pub configured_chip_count: u32,
    pub group_count: u32,
    pub roles: [u32; MAX_SUPPORT_CHIP_NUM as usize],
}

impl Topology {
    pub fn new(generation: Generation, total_chip_count: u32) -> Self {
        Self {
            generation,
            total_chip_count,
            configured_chip_count: total_chip_count,
            group_count: 1,
            roles: [0; MAX_SUPPORT_CHIP_NUM as usize],
        }
    }

    pub fn from_config(config: &TopologyConfig) -> Result<Self, PlatformError> {
        let total = config.total_chip_count;
        if total == 0 || total > MAX_SUPPORT_CHIP_NUM {
            return Err(PlatformError::InvalidTopology(format!(
                "total chip count {total} must be in 1..={MAX_SUPPORT_CHIP_NUM}"
            )));
        }

        let configured = config.configured_chip_count.unwrap_or(total);
        if configured > total {
            return Err(PlatformError::InvalidTopology(format!(
                "configured chip count {configured} exceeds total {total}"
            )));
        }

        if config.roles.len() > MAX_SUPPORT_CHIP_NUM as usize {
            return Err(PlatformError::InvalidTopology(format!(
                "{} chip roles given but at most {MAX_SUPPORT_CHIP_NUM} chips exist",
                config.roles.len()
            )));
        }
        let mut roles = [0; MAX_SUPPORT_CHIP_NUM as usize];
        roles[..config.roles.len()].copy_from_slice(&config.roles);

        Ok(Self {
            generation: config.generation,
            total_chip_count: total,
            configured_chip_count: configured,
            group_count: config.group_count,
            roles,
        })
    }

    pub fn contains(&self, chip: u32) -> bool {
        chip < self.total_chip_count
    }

    /// Result words of the hw-info feature.
    pub fn hw_info(&self) -> [u32; 4] {
        [
            self.generation.as_u32(),
            self.total_chip_count,
            self.configured_chip_count,
            self.group_count,
        ]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn from_config_defaults() {
        let config = TopologyConfig {
            total_chip_count: 2,
            ..Default::default()
        };
        let topology = Topology::from_config(&config).unwrap();

        assert_eq!(topology.configured_chip_count, 2);
        assert_eq!(topology.hw_info(), [4, 2, 2, 1]);
        assert!(topology.contains(1));
        assert!(!topology.contains(2));
    }

    #[test]
    fn rejects_bad_counts() {
        let config = TopologyConfig {
            total_chip_count: 17,
            ..Default::default()
        };
        assert!(Topology::from_config(&config).is_err());

        let config = TopologyConfig {
            total_chip_count: 2,
            configured_chip_count: Some(3),
            ..Default::default()
        };
        assert!(Topology::from_config(&config).is_err());
    }
}
