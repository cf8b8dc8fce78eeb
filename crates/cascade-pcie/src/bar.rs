// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

use std::{path::Path, sync::Arc};

use crate::{
    error::PciOpenError,
    window::{MmapWindow, RegisterWindow},
};

pub const MAX_BAR: usize = 6;

/// How the board exposes its memory through the PCI BARs. Fixed once the device is opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BarLayout {
    /// A single 1 MiB SRAM window; chip registers are reached through the firmware mailbox.
    Sram1Mb,
    /// BAR0 virtual buffer, BAR2 16 MiB config interface, BAR4 SRAM.
    ThreeBar,
    /// BAR0 virtual buffer, BAR2 config interface, BAR4 MSI-X, BAR5 SRAM.
    FourBar,
}

impl BarLayout {
    pub fn detect(present: [bool; MAX_BAR]) -> Option<Self> {
        if present[0] && present[2] && present[4] && present[5] {
            Some(BarLayout::FourBar)
        } else if present[0] && present[2] && present[4] {
            Some(BarLayout::ThreeBar)
        } else if present[0] {
            Some(BarLayout::Sram1Mb)
        } else {
            None
        }
    }

    pub fn conf_bar(&self) -> usize {
        match self {
            BarLayout::Sram1Mb => 0,
            BarLayout::ThreeBar | BarLayout::FourBar => 2,
        }
    }

    pub fn vbuf_bar(&self) -> usize {
        0
    }

    pub fn sram_bar(&self) -> usize {
        match self {
            BarLayout::Sram1Mb => 0,
            BarLayout::ThreeBar => 4,
            BarLayout::FourBar => 5,
        }
    }

    /// Number of chips whose registers are reachable in this layout.
    pub fn max_chips(&self) -> u32 {
        match self {
            BarLayout::ThreeBar => 4,
            BarLayout::Sram1Mb | BarLayout::FourBar => cascade_core::MAX_SUPPORT_CHIP_NUM,
        }
    }
}

/// The mapped BARs of one device.
pub struct Bars {
    pub layout: BarLayout,
    windows: [Option<Arc<dyn RegisterWindow>>; MAX_BAR],
    /// Chip address of the first byte of the config window.
    pub conf_offset: usize,
    /// Chip address of the first byte of the virtual-buffer window.
    pub vbuf_offset: usize,
}

impl Bars {
    pub fn new(layout: BarLayout) -> Self {
        Self {
            layout,
            windows: Default::default(),
            conf_offset: 0,
            vbuf_offset: 0,
        }
    }

    pub fn with_window(mut self, index: usize, window: Arc<dyn RegisterWindow>) -> Self {
        if index < MAX_BAR {
            self.windows[index] = Some(window);
        }
        self
    }

    pub fn with_offsets(mut self, conf_offset: usize, vbuf_offset: usize) -> Self {
        self.conf_offset = conf_offset;
        self.vbuf_offset = vbuf_offset;
        self
    }

    pub fn get(&self, index: usize) -> Option<&Arc<dyn RegisterWindow>> {
        self.windows.get(index).and_then(|w| w.as_ref())
    }

    pub fn conf(&self) -> Option<&Arc<dyn RegisterWindow>> {
        self.get(self.layout.conf_bar())
    }

    pub fn vbuf(&self) -> Option<&Arc<dyn RegisterWindow>> {
        self.get(self.layout.vbuf_bar())
    }

    pub fn sram(&self) -> Option<&Arc<dyn RegisterWindow>> {
        self.get(self.layout.sram_bar())
    }

    /// Map every `resourceN` file of the pci device at `sysfs` and work out the layout from
    /// which ones exist.
    pub fn open_sysfs(id: usize, sysfs: &Path) -> Result<Self, PciOpenError> {
        let mut present = [false; MAX_BAR];
        for (index, present) in present.iter_mut().enumerate() {
            *present = sysfs.join(format!("resource{index}")).exists();
        }

        let layout = BarLayout::detect(present).ok_or(PciOpenError::SysfsNotFound { id })?;
        tracing::debug!("device {id} uses bar layout {layout:?}");

        let mut bars = Bars::new(layout);
        for (index, _) in present.iter().enumerate().filter(|(_, p)| **p) {
            let name = format!("resource{index}");
            let window = MmapWindow::open(&sysfs.join(&name)).map_err(|source| {
                PciOpenError::BarMappingFailed {
                    name: name.clone(),
                    id,
                    source,
                }
            })?;
            bars = bars.with_window(index, Arc::new(window));
        }

        Ok(bars)
    }
}
