// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use cascade_core::{
    command::{RMTCMD_FLASH_UPDATE, RMTCMD_REGISTER_WRITE},
    poll_until, PollOutcome,
};

use crate::{error::PciError, xflow::CHIP_SRAM_BASE, xflow::CHIP_SRAM_MAX_SIZE, PcieDevice};

/// Where a firmware image is staged before the firmware burns it to flash.
pub const DATASRAM_BASE: u32 = 0x4008_0000;
pub const RMTCMD_PARAM: u32 = 0x4004_6F48;
pub const RMTCMD_COMMD: u32 = 0x4004_6F44;

const FLASH_PASS: u32 = 1;

/// Register write that takes the qspi controller out of reset.
const QSPI_RESET_REGISTER: u32 = 0x2000_0208;
const QSPI_RESET_RELEASE: u32 = 0x700f_0036;
const QSPI_RESET_SETTLE: Duration = Duration::from_millis(50);

impl PcieDevice {
    /// Burn `image` to the qspi flash of chip 0.
    ///
    /// The image must already have been validated, the new firmware is only active after a
    /// reboot.
    pub fn flash_firmware(&self, image: &[u8]) -> Result<(), PciError> {
        let capacity = (CHIP_SRAM_BASE + CHIP_SRAM_MAX_SIZE - DATASRAM_BASE) as usize;
        if image.len() > capacity {
            return Err(PciError::ImageTooLarge {
                size: image.len(),
                capacity,
            });
        }

        self.remote_command(
            0,
            RMTCMD_REGISTER_WRITE,
            QSPI_RESET_REGISTER,
            QSPI_RESET_RELEASE,
        )?;
        std::thread::sleep(QSPI_RESET_SETTLE);

        for (index, bytes) in image.chunks(4).enumerate() {
            let mut word = [0u8; 4];
            word[..bytes.len()].copy_from_slice(bytes);
            self.xflow
                .sram_write(DATASRAM_BASE + index as u32 * 4, u32::from_le_bytes(word))?;
        }

        self.xflow.sram_write(RMTCMD_PARAM, 0)?;
        self.xflow.sram_write(RMTCMD_COMMD, RMTCMD_FLASH_UPDATE)?;

        let outcome = poll_until(self.timeouts.flash, || {
            let result = self.xflow.sram_read(RMTCMD_PARAM)?;
            Ok::<_, PciError>((result != 0).then_some(result))
        })?;

        match outcome {
            PollOutcome::Ready(FLASH_PASS) => {
                tracing::info!("Update qspi flash passed, reboot to activate the new firmware");
                Ok(())
            }
            PollOutcome::Ready(result) => Err(PciError::FlashFailed(result)),
            PollOutcome::TimedOut(_) => Err(PciError::Timeout {
                what: "qspi flash update",
                timeout: self.timeouts.flash,
            }),
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::{
        bar::{BarLayout, Bars},
        dma::HostDma,
        window::MemoryWindow,
        PcieTimeouts,
    };

    fn device(flash: Duration) -> (PcieDevice, Arc<MemoryWindow>, HostDma) {
        let sram = Arc::new(MemoryWindow::new(CHIP_SRAM_MAX_SIZE as usize));
        let dma = HostDma::new(crate::DMA_COHERENT_BUFFER_SIZE);
        let device = PcieDevice::from_parts(
            0,
            Bars::new(BarLayout::ThreeBar).with_window(4, sram.clone()),
            Arc::new(dma.clone()),
            None,
            PcieTimeouts {
                flash,
                ..Default::default()
            },
        );
        (device, sram, dma)
    }

    fn firmware(sram: Arc<MemoryWindow>, result: u32) -> std::thread::JoinHandle<()> {
        let commd = (RMTCMD_COMMD - CHIP_SRAM_BASE) as usize;
        let param = (RMTCMD_PARAM - CHIP_SRAM_BASE) as usize;
        std::thread::spawn(move || loop {
            if sram.peek(commd) == RMTCMD_FLASH_UPDATE {
                sram.poke(param, result);
                return;
            }
            std::thread::sleep(Duration::from_micros(100));
        })
    }

    #[test]
    fn flash_pass() {
        let (device, sram, dma) = device(Duration::from_secs(5));
        let fw = firmware(sram.clone(), FLASH_PASS);

        device.flash_firmware(&[1, 2, 3, 4, 5]).unwrap();
        fw.join().unwrap();

        let data = (DATASRAM_BASE - CHIP_SRAM_BASE) as usize;
        assert_eq!(sram.peek(data), 0x0403_0201);
        assert_eq!(sram.peek(data + 4), 0x05);
        // qspi reset release went through the chip 0 remote command slot
        assert_eq!(dma.load(crate::RMTCMD_VIRTUAL_OFFSET), RMTCMD_REGISTER_WRITE);
    }

    #[test]
    fn flash_reported_failure() {
        let (device, sram, _dma) = device(Duration::from_secs(5));
        let fw = firmware(sram, 7);

        assert!(matches!(
            device.flash_firmware(&[0; 16]),
            Err(PciError::FlashFailed(7))
        ));
        fw.join().unwrap();
    }

    #[test]
    fn flash_timeout() {
        let (device, _sram, _dma) = device(Duration::from_millis(50));
        assert!(matches!(
            device.flash_firmware(&[0; 16]),
            Err(PciError::Timeout { .. })
        ));
    }
}
