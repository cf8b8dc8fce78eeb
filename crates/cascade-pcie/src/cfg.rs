// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

use std::os::fd::AsRawFd;

use crate::error::{CfgFailType, PciError};

const PCI_STATUS: u32 = 0x06;
const PCI_STATUS_CAP_LIST: u16 = 0x10;
const PCI_CAPABILITY_LIST: u32 = 0x34;
const PCI_CAP_ID_EXP: u8 = 0x10;
const PCI_EXP_LNKCAP: u32 = 0x0c;
const PCI_EXP_LNKSTA: u32 = 0x12;
/// Upper bound on the capability chain, guards against a looping list.
const MAX_CAPABILITIES: usize = 48;

/// PCI express link capabilities and the negotiated link status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkInfo {
    pub link_capabilities: u32,
    pub link_status: u16,
}

impl LinkInfo {
    /// Negotiated link speed (1 = 2.5GT/s, 2 = 5GT/s, ...).
    pub fn current_speed(&self) -> u16 {
        self.link_status & 0xf
    }

    pub fn current_width(&self) -> u16 {
        (self.link_status >> 4) & 0x3f
    }

    pub fn max_speed(&self) -> u32 {
        self.link_capabilities & 0xf
    }

    pub fn max_width(&self) -> u32 {
        (self.link_capabilities >> 4) & 0x3f
    }
}

/// The sysfs `config` file of a pci device.
pub struct ConfigSpace {
    id: usize,
    file: std::fs::File,
}

impl ConfigSpace {
    pub fn open(id: usize, path: &std::path::Path) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new().read(true).open(path)?;
        Ok(Self { id, file })
    }

    pub fn read_cfg(&self, byte_offset: u32, data: &mut [u8]) -> Result<(), PciError> {
        let size = nix::sys::uio::pread(self.file.as_raw_fd(), data, byte_offset as i64);
        match size {
            Ok(size) => {
                if size != data.len() {
                    return Err(PciError::CfgReadFailed {
                        id: self.id,
                        offset: byte_offset as usize,
                        size: data.len(),
                        source: CfgFailType::SizeMismatch(size),
                    });
                }
            }
            Err(err) => {
                return Err(PciError::CfgReadFailed {
                    id: self.id,
                    offset: byte_offset as usize,
                    size: data.len(),
                    source: CfgFailType::Nix(err),
                });
            }
        }

        Ok(())
    }

    pub fn read_u8(&self, byte_offset: u32) -> Result<u8, PciError> {
        let mut data = [0u8; 1];
        self.read_cfg(byte_offset, &mut data)?;
        Ok(data[0])
    }

    pub fn read_u16(&self, byte_offset: u32) -> Result<u16, PciError> {
        let mut data = [0u8; 2];
        self.read_cfg(byte_offset, &mut data)?;
        Ok(u16::from_le_bytes(data))
    }

    pub fn read_u32(&self, byte_offset: u32) -> Result<u32, PciError> {
        let mut data = [0u8; 4];
        self.read_cfg(byte_offset, &mut data)?;
        Ok(u32::from_le_bytes(data))
    }

    pub fn find_capability(&self, cap_id: u8) -> Result<Option<u32>, PciError> {
        if self.read_u16(PCI_STATUS)? & PCI_STATUS_CAP_LIST == 0 {
            return Ok(None);
        }

        let mut pos = self.read_u8(PCI_CAPABILITY_LIST)? & !0x3;
        for _ in 0..MAX_CAPABILITIES {
            if pos < 0x40 {
                break;
            }
            let id = self.read_u8(pos as u32)?;
            if id == cap_id {
                return Ok(Some(pos as u32));
            }
            pos = self.read_u8(pos as u32 + 1)? & !0x3;
        }

        Ok(None)
    }

    pub fn link_info(&self) -> Result<LinkInfo, PciError> {
        let cap = self
            .find_capability(PCI_CAP_ID_EXP)?
            .ok_or(PciError::NoPcieCapability { id: self.id })?;

        Ok(LinkInfo {
            link_capabilities: self.read_u32(cap + PCI_EXP_LNKCAP)?,
            link_status: self.read_u16(cap + PCI_EXP_LNKSTA)?,
        })
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    /// Write a fake config space with a power management capability at 0x40 followed by the
    /// pci express capability at 0x50.
    pub(crate) fn fake_config_space(name: &str, with_express: bool) -> std::path::PathBuf {
        let mut config = vec![0u8; 256];
        config[0x06] = PCI_STATUS_CAP_LIST as u8;
        config[0x34] = 0x40;
        config[0x40] = 0x01;
        config[0x41] = if with_express { 0x50 } else { 0 };
        if with_express {
            config[0x50] = PCI_CAP_ID_EXP;
            config[0x5c..0x60].copy_from_slice(&0x0000_0843u32.to_le_bytes());
            config[0x62..0x64].copy_from_slice(&0x1043u16.to_le_bytes());
        }

        let path = std::env::temp_dir().join(format!(
            "cascade-cfg-{name}-{}",
            std::process::id()
        ));
        std::fs::write(&path, config).unwrap();
        path
    }

    #[test]
    fn link_info_from_capability_chain() {
        let path = fake_config_space("link", true);
        let cfg = ConfigSpace::open(0, &path).unwrap();
        let link = cfg.link_info().unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(link.link_capabilities, 0x843);
        assert_eq!(link.link_status, 0x1043);
        assert_eq!(link.current_speed(), 3);
        assert_eq!(link.current_width(), 4);
        assert_eq!(link.max_width(), 4);
    }

    #[test]
    fn missing_express_capability() {
        let path = fake_config_space("nolink", false);
        let cfg = ConfigSpace::open(1, &path).unwrap();
        let result = cfg.link_info();
        std::fs::remove_file(&path).ok();

        assert!(matches!(result, Err(PciError::NoPcieCapability { id: 1 })));
    }

    #[test]
    fn short_read_is_reported() {
        let path = std::env::temp_dir().join(format!("cascade-cfg-short-{}", std::process::id()));
        std::fs::write(&path, [0u8; 8]).unwrap();
        let cfg = ConfigSpace::open(2, &path).unwrap();
        let result = cfg.read_u32(0x10);
        std::fs::remove_file(&path).ok();

        assert!(matches!(
            result,
            Err(PciError::CfgReadFailed {
                source: CfgFailType::SizeMismatch(0),
                ..
            })
        ));
    }
}
