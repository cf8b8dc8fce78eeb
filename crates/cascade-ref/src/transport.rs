// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use cascade_core::{AccessTarget, AdminStatus, ImageKind, TransportCmd};
use cascade_if::{AdminTransport, Capabilities, DataPath};
use cascade_pcie::PcieDevice;
use cascade_usb::{UsbDataPath, UsbDevice};

/// Registers are reached through a 4 KiB window; the upper bits select the window base.
const REGISTER_WINDOW_MASK: u32 = 0xFFF;

pub(crate) fn split_register_address(addr: u32) -> (u32, u32) {
    (addr & !REGISTER_WINDOW_MASK, addr & REGISTER_WINDOW_MASK)
}

/// The bus a board is attached through.
pub enum Transport {
    Pcie(PcieDevice),
    Usb(UsbDevice),
}

impl AdminTransport for Transport {
    fn name(&self) -> &'static str {
        match self {
            Transport::Pcie(_) => "pcie",
            Transport::Usb(_) => "usb",
        }
    }

    fn capabilities(&self) -> Capabilities {
        match self {
            Transport::Pcie(_) => Capabilities {
                parallel_download: true,
                i2c_readback: false,
                register_access: true,
                self_test: true,
            },
            Transport::Usb(_) => Capabilities {
                parallel_download: false,
                i2c_readback: true,
                register_access: false,
                self_test: false,
            },
        }
    }

    fn trigger(&self, chip: u32, cmd: &TransportCmd) -> Result<(), Box<dyn std::error::Error>> {
        match self {
            Transport::Pcie(device) => device.admin_trigger(chip, cmd)?,
            Transport::Usb(device) => device.trigger(cmd)?,
        }
        Ok(())
    }

    fn fetch_result(
        &self,
        chip: u32,
        cmd: &mut TransportCmd,
    ) -> Result<AdminStatus, Box<dyn std::error::Error>> {
        Ok(match self {
            Transport::Pcie(device) => device.admin_fetch_result(chip, cmd)?,
            Transport::Usb(device) => device.fetch_result(cmd)?,
        })
    }

    fn reset_slot(&self, chip: u32) -> Result<(), Box<dyn std::error::Error>> {
        if let Transport::Pcie(device) = self {
            device.admin_reset_slot(chip)?;
        }
        Ok(())
    }

    fn interface_info(&self, cmd: &mut TransportCmd) -> Result<(), Box<dyn std::error::Error>> {
        match self {
            Transport::Pcie(device) => {
                let link = device.link_info()?;
                cmd.cq.data[0] = link.link_capabilities;
                cmd.cq.data[1] = link.link_status as u32;
                cmd.set_status(AdminStatus::NO_ERROR);
            }
            // The firmware has nothing to report about the usb link.
            Transport::Usb(_) => {}
        }
        Ok(())
    }

    fn mpu_utilization(
        &self,
        chip: u32,
        cmd: &mut TransportCmd,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match self {
            Transport::Pcie(device) => {
                cmd.cq.data[0] = device.mpu_utilization(chip)?;
                cmd.set_status(AdminStatus::NO_ERROR);
            }
            Transport::Usb(device) => match device.mpu_utilization() {
                Ok(words) => {
                    let len = words.len().min(cmd.cq.data.len());
                    cmd.cq.data[..len].copy_from_slice(&words[..len]);
                    cmd.set_status(AdminStatus::NO_ERROR);
                }
                Err(err) => {
                    tracing::warn!("Failed to read mpu utilization from usb device {}: {err}", device.id);
                    cmd.set_status(AdminStatus::UNKNOWN_FAIL);
                }
            },
        }
        Ok(())
    }

    fn i2c_readback(&self, cmd: &mut TransportCmd) -> Result<(), Box<dyn std::error::Error>> {
        if let Transport::Usb(device) = self {
            device.i2c_readback(cmd)?;
        }
        Ok(())
    }

    fn remote_command(
        &self,
        chip: u32,
        command: u32,
        param: u32,
        param2: u32,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match self {
            Transport::Pcie(device) => device.remote_command(chip, command, param, param2)?,
            Transport::Usb(device) => device.remote_command(chip, command, param, param2)?,
        }
        Ok(())
    }

    fn download(&self, kind: ImageKind, image: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
        match (self, kind) {
            (Transport::Pcie(device), ImageKind::Firmware) => device.flash_firmware(image)?,
            (Transport::Pcie(device), ImageKind::Dfp) => device.stage_dfp(image)?,
            (Transport::Usb(device), kind) => device.download(kind, image)?,
        }
        Ok(())
    }

    fn read_register(
        &self,
        chip: u32,
        addr: u32,
        target: AccessTarget,
    ) -> Result<u32, Box<dyn std::error::Error>> {
        match self {
            Transport::Pcie(device) => {
                let (base, offset) = split_register_address(addr);
                Ok(device.xflow.read(chip, base, offset, target)?)
            }
            Transport::Usb(_) => Err("usb does not support register access".into()),
        }
    }

    fn write_register(
        &self,
        chip: u32,
        addr: u32,
        value: u32,
        target: AccessTarget,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match self {
            Transport::Pcie(device) => {
                let (base, offset) = split_register_address(addr);
                Ok(device.xflow.write(chip, base, offset, value, target)?)
            }
            Transport::Usb(_) => Err("usb does not support register access".into()),
        }
    }

    fn pending_event(&self) -> Result<Option<String>, Box<dyn std::error::Error>> {
        match self {
            Transport::Pcie(device) => Ok(device.legacy_event()?.map(|route| route.describe())),
            // Completions arrive on the endpoints themselves.
            Transport::Usb(_) => Ok(None),
        }
    }

    fn data_path(&self) -> Option<Arc<dyn DataPath>> {
        match self {
            Transport::Pcie(_) => None,
            Transport::Usb(device) => Some(Arc::new(UsbStream(device.data_path()))),
        }
    }
}

/// The usb bulk data endpoints seen through the generic data path.
struct UsbStream(UsbDataPath);

impl DataPath for UsbStream {
    fn write(&self, data: &[u8]) -> Result<usize, Box<dyn std::error::Error>> {
        Ok(self.0.write(data)?)
    }

    fn read(&self) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
        Ok(self.0.read()?)
    }

    fn abort(&self) {
        self.0.abort()
    }
}
