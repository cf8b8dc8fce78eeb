// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

//! Admin command slots in the coherent DMA buffer.
//!
//! Each chip owns a 256 byte slot; all slots share one page which is synced as a unit.
//!
//! | words  | contents                    |
//! |--------|-----------------------------|
//! | 0..16  | submission entry            |
//! | 16     | completion status           |
//! | 17..33 | completion data             |
//! | 33     | slot handshake              |

use cascade_core::{
    poll_until, AdminStatus, FeatureId, Opcode, PollOutcome, SlotStatus, TransportCmd,
    MAX_SUPPORT_CHIP_NUM,
};

use crate::{error::PciError, PcieDevice};

pub const ADMCMD_VIRTUAL_OFFSET: usize = 0xF_E000;
pub const ADMCMD_SIZE: usize = 0x100;
const ADMCMD_PAGE_SIZE: usize = 0x1000;

const U32_ADMCMD_CQ_STATUS_OFFSET: usize = 16;
const U32_ADMCMD_CQ_DATA_OFFSET: usize = 17;
const U32_ADMCMD_STATUS_OFFSET: usize = 33;

pub const RMTCMD_VIRTUAL_OFFSET: usize = 0xF_F000;
pub const RMTCMD_SIZE: usize = 0x10;
const RMTCMD_PAGE_SIZE: usize = 0x1000;
const RMTCMD_COMMAND: usize = 0x0;
const RMTCMD_PARAM: usize = 0x4;
const RMTCMD_PARAM2: usize = 0x8;

const THROUGHPUT_DATA_BEGIN_CHIP_LAST: usize = 4;
const THROUGHPUT_DATA_END_CHIP_LAST: usize = 8;

/// Word offset into a chip's admin slot.
pub(crate) fn slot_word(chip: u32, word: usize) -> usize {
    ADMCMD_VIRTUAL_OFFSET + chip as usize * ADMCMD_SIZE + word * 4
}

impl PcieDevice {
    fn check_chip(chip: u32) -> Result<(), PciError> {
        if chip >= MAX_SUPPORT_CHIP_NUM {
            return Err(PciError::ChipOutOfRange { chip });
        }
        Ok(())
    }

    fn admin_page_sync_for_device(&self) {
        self.dma
            .sync_for_device(ADMCMD_VIRTUAL_OFFSET, ADMCMD_PAGE_SIZE);
    }

    fn admin_page_sync_for_cpu(&self) {
        self.dma.sync_for_cpu(ADMCMD_VIRTUAL_OFFSET, ADMCMD_PAGE_SIZE);
    }

    /// Place `cmd` into the slot of `chip` and hand it to the firmware.
    pub fn admin_trigger(&self, chip: u32, cmd: &TransportCmd) -> Result<(), PciError> {
        Self::check_chip(chip)?;

        for (index, word) in cmd.as_words().iter().enumerate() {
            self.dma.write32(slot_word(chip, index), *word)?;
        }
        self.dma.write32(
            slot_word(chip, U32_ADMCMD_STATUS_OFFSET),
            SlotStatus::Receive as u32,
        )?;
        self.admin_page_sync_for_device();

        Ok(())
    }

    fn admin_data_from_device(&self, chip: u32, cmd: &mut TransportCmd) -> Result<(), PciError> {
        let is_throughput = cmd.opcode() == Some(Opcode::GetFeature)
            && cmd.feature_id() == Some(FeatureId::Throughput);
        let (start, end) = match (is_throughput, chip) {
            (true, 0) => (0, THROUGHPUT_DATA_BEGIN_CHIP_LAST),
            (true, _) => (THROUGHPUT_DATA_BEGIN_CHIP_LAST, THROUGHPUT_DATA_END_CHIP_LAST),
            (false, _) => (0, cmd.cq.data.len()),
        };

        let read_offset = if cmd.feature_id() == Some(FeatureId::I2cTransceive) {
            0
        } else {
            U32_ADMCMD_CQ_DATA_OFFSET
        };

        self.admin_page_sync_for_cpu();
        for index in start..end {
            cmd.cq.data[index] = self.dma.read32(slot_word(chip, read_offset + index))?;
        }

        Ok(())
    }

    /// Wait for the firmware to complete the command in the slot of `chip`.
    ///
    /// The slot is handed back as idle whatever the outcome. A slot that never completes is
    /// reported as [`AdminStatus::TIMEOUT_FAIL`].
    pub fn admin_fetch_result(
        &self,
        chip: u32,
        cmd: &mut TransportCmd,
    ) -> Result<AdminStatus, PciError> {
        Self::check_chip(chip)?;

        let sub_op = cmd.sq.sub_op_code;
        let mut last_status = 0;
        let outcome: Result<PollOutcome<AdminStatus>, PciError> =
            poll_until(self.timeouts.admin, || {
                self.admin_page_sync_for_cpu();
                last_status = self.dma.read32(slot_word(chip, U32_ADMCMD_STATUS_OFFSET))?;
                if SlotStatus::from_u32(last_status) != Some(SlotStatus::Complete) {
                    return Ok(None);
                }

                let status =
                    AdminStatus(self.dma.read32(slot_word(chip, U32_ADMCMD_CQ_STATUS_OFFSET))?);
                if status.is_ok() {
                    self.admin_data_from_device(chip, cmd)?;
                } else {
                    tracing::error!("admin error {status} for sub op {sub_op} on chip {chip}");
                }
                Ok(Some(status))
            });

        let reset = self.admin_reset_slot(chip);

        let status = match outcome? {
            PollOutcome::Ready(status) => status,
            PollOutcome::TimedOut(elapsed) => {
                tracing::error!(
                    "admin timeout after {elapsed:?} device status {last_status} sub op {sub_op} chip {chip}"
                );
                AdminStatus::TIMEOUT_FAIL
            }
        };
        reset?;

        Ok(status)
    }

    /// Mark the slot of `chip` idle and flush it, abandoning any command left in it.
    pub fn admin_reset_slot(&self, chip: u32) -> Result<(), PciError> {
        Self::check_chip(chip)?;

        let reset = self
            .dma
            .write32(slot_word(chip, U32_ADMCMD_STATUS_OFFSET), SlotStatus::Idle as u32);
        self.admin_page_sync_for_device();
        reset
    }

    /// Post a remote command to the firmware of `chip`.
    pub fn remote_command(
        &self,
        chip: u32,
        command: u32,
        param: u32,
        param2: u32,
    ) -> Result<(), PciError> {
        Self::check_chip(chip)?;

        let slot = RMTCMD_VIRTUAL_OFFSET + chip as usize * RMTCMD_SIZE;
        self.dma.write32(slot + RMTCMD_PARAM, param)?;
        self.dma.write32(slot + RMTCMD_PARAM2, param2)?;
        self.dma.write32(slot + RMTCMD_COMMAND, command)?;
        self.dma.sync_for_device(RMTCMD_VIRTUAL_OFFSET, RMTCMD_PAGE_SIZE);

        tracing::debug!("remote command 0x{command:08x}({param:#x}, {param2:#x}) to chip {chip}");
        Ok(())
    }

    /// Copy a model image into the data area of the DMA buffer, ahead of the slots.
    pub fn stage_dfp(&self, image: &[u8]) -> Result<(), PciError> {
        if image.len() > ADMCMD_VIRTUAL_OFFSET {
            return Err(PciError::ImageTooLarge {
                size: image.len(),
                capacity: ADMCMD_VIRTUAL_OFFSET,
            });
        }

        for (page, chunk) in image.chunks(ADMCMD_PAGE_SIZE).enumerate() {
            let base = page * ADMCMD_PAGE_SIZE;
            for (index, bytes) in chunk.chunks(4).enumerate() {
                let mut word = [0u8; 4];
                word[..bytes.len()].copy_from_slice(bytes);
                self.dma.write32(base + index * 4, u32::from_le_bytes(word))?;
            }
            self.dma.sync_for_device(base, chunk.len());
        }

        Ok(())
    }
}
