// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

use std::{os::unix::prelude::FileTypeExt, path::PathBuf, sync::Arc, time::Duration};

mod admin;
pub mod bar;
pub mod cfg;
pub mod dma;
mod error;
mod flash;
pub mod irq;
pub mod window;
pub mod xflow;

pub use admin::{ADMCMD_SIZE, ADMCMD_VIRTUAL_OFFSET, RMTCMD_SIZE, RMTCMD_VIRTUAL_OFFSET};
pub use bar::{BarLayout, Bars};
pub use cfg::{ConfigSpace, LinkInfo};
pub use dma::{DmaRegion, HostDma, MappedDma, DMA_COHERENT_BUFFER_SIZE};
pub use error::{CfgFailType, PciError, PciOpenError};
pub use flash::DATASRAM_BASE;
pub use irq::IrqRoute;
pub use window::{MemoryWindow, MmapWindow, RegisterWindow};
pub use xflow::{AccessTarget, Xflow};

/// SRAM word the firmware updates with per-chip MPU utilization.
pub const MPUUTIL_BASE: u32 = 0x4004_6D00;

#[derive(Clone, Copy, Debug)]
pub struct PcieTimeouts {
    /// Wait for an admin slot to complete.
    pub admin: Duration,
    /// Wait on the legacy firmware mailbox.
    pub mailbox: Duration,
    /// Wait for the firmware to clear a legacy interrupt.
    pub irq_ack: Duration,
    /// Wait for the firmware to burn an image to flash.
    pub flash: Duration,
}

impl Default for PcieTimeouts {
    fn default() -> Self {
        Self {
            admin: Duration::from_secs(3),
            mailbox: Duration::from_secs(1),
            irq_ack: Duration::from_secs(1),
            flash: Duration::from_secs(5),
        }
    }
}

pub struct PcieDevice {
    pub id: usize,

    pub xflow: Xflow,
    pub dma: Arc<dyn DmaRegion>,
    pub config_space: Option<ConfigSpace>,

    pub timeouts: PcieTimeouts,
}

impl PcieDevice {
    /// Assemble a device from already mapped resources.
    pub fn from_parts(
        id: usize,
        bars: Bars,
        dma: Arc<dyn DmaRegion>,
        config_space: Option<ConfigSpace>,
        timeouts: PcieTimeouts,
    ) -> Self {
        Self {
            id,
            xflow: Xflow::new(bars, timeouts.mailbox),
            dma,
            config_space,
            timeouts,
        }
    }

    fn sysfs_path(id: usize) -> Result<PathBuf, PciOpenError> {
        std::fs::canonicalize(format!("/sys/class/memx/memx{id}/device"))
            .map_err(|_| PciOpenError::SysfsNotFound { id })
    }

    pub fn open(id: usize) -> Result<PcieDevice, PciOpenError> {
        Self::open_with(id, PcieTimeouts::default())
    }

    pub fn open_with(id: usize, timeouts: PcieTimeouts) -> Result<PcieDevice, PciOpenError> {
        let path = format!("/dev/memx{id}");
        let fd = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| PciOpenError::DeviceOpenFailed { id, source })?;

        let sysfs = Self::sysfs_path(id)?;
        let bars = Bars::open_sysfs(id, &sysfs)?;

        let config_space = match ConfigSpace::open(id, &sysfs.join("config")) {
            Ok(cfg) => Some(cfg),
            Err(err) => {
                tracing::debug!("Could not open config space of device {id}: {err}");
                None
            }
        };

        let dma = MappedDma::map(&fd, DMA_COHERENT_BUFFER_SIZE)
            .map_err(|source| PciOpenError::DmaMappingFailed { id, source })?;

        Ok(Self::from_parts(
            id,
            bars,
            Arc::new(dma),
            config_space,
            timeouts,
        ))
    }

    pub fn layout(&self) -> BarLayout {
        self.xflow.layout()
    }

    pub fn scan() -> Vec<usize> {
        let output = std::fs::read_dir("/dev");
        let output = match output {
            Ok(output) => output,
            Err(err) => {
                tracing::debug!("When reading /dev for a scan hit error: {err}");
                return Vec::new();
            }
        };

        let mut output = output
            .filter_map(|entry| {
                let entry = entry.ok()?;

                if !entry.file_type().ok()?.is_char_device() {
                    return None;
                }

                let path = entry.path();
                let file_name = path.file_name()?.to_str()?;
                file_name.strip_prefix("memx")?.parse::<usize>().ok()
            })
            .collect::<Vec<_>>();

        output.sort();

        output
    }

    pub fn mpu_utilization(&self, chip: u32) -> Result<u32, PciError> {
        self.xflow.sram_read(MPUUTIL_BASE + (chip << 2))
    }

    pub fn link_info(&self) -> Result<LinkInfo, PciError> {
        match &self.config_space {
            Some(cfg) => cfg.link_info(),
            None => Err(PciError::NotReady {
                chip: 0,
                reason: "config space is not available".to_string(),
            }),
        }
    }
}
