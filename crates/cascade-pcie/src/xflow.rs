// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

//! Register access to the chips behind the PCIe endpoint.
//!
//! Every chip exposes an xflow window: a config part holding a base-address and a control
//! register, and a virtual-buffer part that forwards loads and stores to
//! `base address + offset` inside the chip. The control register selects whether the
//! window talks to the MPU or to the external buffer.
//!
//! On four-BAR boards only chip 0 is mapped, the other chips are reached by pointing chip 0's
//! window at the root-port view of their xflow registers. On legacy 1 MiB boards nothing is
//! mapped and the firmware performs the access on our behalf through an SRAM mailbox.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use cascade_core::{poll_until, PollOutcome, MAX_SUPPORT_CHIP_NUM};

use crate::{
    bar::{BarLayout, Bars},
    error::PciError,
};

pub const XFLOW_CHIP_STRIDE: u32 = 0x40_0000;
pub const XFLOW_CONFIG_OFFSET: u32 = 0x3F_F000;
pub const XFLOW_BASE_ADDRESS_REGISTER: u32 = 0x0;
pub const XFLOW_CONTROL_REGISTER: u32 = 0x4;
/// Root-port view of the xflow windows, used for proxied access through chip 0.
pub const RP_XFLOW_ADDR: u32 = 0x2000_0000;

pub const CHIP_SRAM_BASE: u32 = 0x4000_0000;
pub const CHIP_SRAM_DATA_SRAM_OFFSET: u32 = 0x4_0000;
pub const CHIP_SRAM_MAX_SIZE: u32 = 0x10_0000;

pub const EXTINFO_CMD_BASE: u32 = 0x4004_6E00;
pub const EXTINFO_DATA_BASE: u32 = 0x4004_6E04;
pub const EXTCMD_COMPLETE: u32 = 0;
pub const EXTCMD_XFLOW_WRITE_REG: u8 = 1;
pub const EXTCMD_XFLOW_READ_REG: u8 = 2;

const DEVICE_GONE: u32 = 0xffff_ffff;

pub const fn xflow_offset(chip: u32, config: bool) -> u32 {
    chip * XFLOW_CHIP_STRIDE + if config { XFLOW_CONFIG_OFFSET } else { 0 }
}

pub use cascade_core::AccessTarget;

/// Command word posted to the firmware mailbox on legacy boards.
#[bitfield_struct::bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct MailboxCommand {
    pub command: u8,
    pub chip: u8,
    #[bits(1)]
    pub indirect: bool,
    #[bits(15)]
    __: u16,
}

pub struct Xflow {
    bars: Bars,
    mailbox_timeout: Duration,
    detached: AtomicBool,
}

/// Routing installed for one register access; dropping it puts every window it touched back
/// into MPU mode.
struct ProxyRoute<'a> {
    xflow: &'a Xflow,
    chip: u32,
    target: AccessTarget,
}

impl Drop for ProxyRoute<'_> {
    fn drop(&mut self) {
        if self.target == AccessTarget::Buffer {
            if let Err(err) = self.xflow.set_access_mode(self.chip, AccessTarget::Mpu) {
                tracing::warn!("Failed to restore chip {} to mpu access: {err}", self.chip);
            }
        }

        if self.xflow.bars.layout == BarLayout::FourBar && self.chip > 0 {
            if let Err(err) = self.xflow.set_access_mode(0, AccessTarget::Mpu) {
                tracing::warn!("Failed to restore chip 0 proxy window to mpu access: {err}");
            }
        }
    }
}

impl Xflow {
    pub fn new(bars: Bars, mailbox_timeout: Duration) -> Self {
        Self {
            bars,
            mailbox_timeout,
            detached: AtomicBool::new(false),
        }
    }

    pub fn layout(&self) -> BarLayout {
        self.bars.layout
    }

    pub fn bars(&self) -> &Bars {
        &self.bars
    }

    /// Mark the device as removed, every later access is rejected.
    pub fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }

    pub fn is_attached(&self) -> bool {
        !self.detached.load(Ordering::SeqCst)
    }

    fn not_ready(chip: u32, reason: impl Into<String>) -> PciError {
        let reason = reason.into();
        tracing::error!("xflow check for chip {chip} failed: {reason}");
        PciError::NotReady { chip, reason }
    }

    fn basic_check(&self, chip: u32) -> Result<(), PciError> {
        if !self.is_attached() {
            return Err(Self::not_ready(chip, "no opened device"));
        }

        let layout = self.bars.layout;
        if self.bars.conf().is_none() {
            return Err(Self::not_ready(
                chip,
                format!("config bar {} is not mapped", layout.conf_bar()),
            ));
        }
        if self.bars.vbuf().is_none() {
            return Err(Self::not_ready(
                chip,
                format!("virtual buffer bar {} is not mapped", layout.vbuf_bar()),
            ));
        }
        if chip >= MAX_SUPPORT_CHIP_NUM || chip >= layout.max_chips() {
            return Err(Self::not_ready(chip, format!("invalid chip for {layout:?}")));
        }
        if layout == BarLayout::FourBar && self.bars.get(4).is_none() {
            return Err(Self::not_ready(chip, "bar 4 is not mapped"));
        }

        Ok(())
    }

    fn is_direct(&self, chip: u32) -> bool {
        chip == 0 || self.bars.layout != BarLayout::FourBar
    }

    fn conf_write(&self, chip: u32, register: u32, value: u32) -> Result<(), PciError> {
        let window = self
            .bars
            .conf()
            .ok_or_else(|| Self::not_ready(chip, "config bar is not mapped"))?;
        let addr = (xflow_offset(chip, true) + register) as usize;
        let offset = addr
            .checked_sub(self.bars.conf_offset)
            .ok_or(PciError::OutOfRange {
                offset: addr,
                len: window.len(),
            })?;
        window.write32(offset, value)
    }

    fn vbuf_offset(&self, chip: u32, offset: u32, len: usize) -> Result<usize, PciError> {
        let addr = (xflow_offset(chip, false) + offset) as usize;
        addr.checked_sub(self.bars.vbuf_offset)
            .ok_or(PciError::OutOfRange { offset: addr, len })
    }

    fn vbuf_write(&self, chip: u32, offset: u32, value: u32) -> Result<(), PciError> {
        let window = self
            .bars
            .vbuf()
            .ok_or_else(|| Self::not_ready(chip, "virtual buffer bar is not mapped"))?;
        window.write32(self.vbuf_offset(chip, offset, window.len())?, value)
    }

    fn vbuf_read(&self, chip: u32, offset: u32) -> Result<u32, PciError> {
        let window = self
            .bars
            .vbuf()
            .ok_or_else(|| Self::not_ready(chip, "virtual buffer bar is not mapped"))?;
        window.read32(self.vbuf_offset(chip, offset, window.len())?)
    }

    /// Point chip 0's window at `target` in the root-port view.
    fn proxy_through_chip0(&self, target: u32) -> Result<(), PciError> {
        self.conf_write(0, XFLOW_CONTROL_REGISTER, 1)?;
        self.conf_write(0, XFLOW_BASE_ADDRESS_REGISTER, RP_XFLOW_ADDR + target)
    }

    fn set_access_mode(&self, chip: u32, target: AccessTarget) -> Result<(), PciError> {
        self.basic_check(chip)?;

        if self.is_direct(chip) {
            self.conf_write(chip, XFLOW_CONTROL_REGISTER, target.control_value())
        } else {
            self.proxy_through_chip0(xflow_offset(chip, true) + XFLOW_CONTROL_REGISTER)?;
            self.vbuf_write(0, 0, target.control_value())
        }
    }

    fn set_base_address(&self, chip: u32, base: u32) -> Result<(), PciError> {
        self.basic_check(chip)?;

        if self.is_direct(chip) {
            self.conf_write(chip, XFLOW_BASE_ADDRESS_REGISTER, base)
        } else {
            self.proxy_through_chip0(xflow_offset(chip, true) + XFLOW_BASE_ADDRESS_REGISTER)?;
            self.vbuf_write(0, 0, base)
        }
    }

    fn write_virtual_buffer(&self, chip: u32, offset: u32, value: u32) -> Result<(), PciError> {
        self.basic_check(chip)?;

        if self.is_direct(chip) {
            self.vbuf_write(chip, offset, value)
        } else {
            self.proxy_through_chip0(xflow_offset(chip, false))?;
            self.vbuf_write(0, offset, value)
        }
    }

    fn read_virtual_buffer(&self, chip: u32, offset: u32) -> Result<u32, PciError> {
        self.basic_check(chip)?;

        if self.is_direct(chip) {
            self.vbuf_read(chip, offset)
        } else {
            self.proxy_through_chip0(xflow_offset(chip, false))?;
            self.vbuf_read(0, offset)
        }
    }

    pub fn write(
        &self,
        chip: u32,
        base: u32,
        offset: u32,
        value: u32,
        target: AccessTarget,
    ) -> Result<(), PciError> {
        self.basic_check(chip)?;

        if self.bars.layout == BarLayout::Sram1Mb {
            return self
                .mailbox(chip, base + offset, Some(value), target)
                .map(|_| ());
        }

        let _route = ProxyRoute {
            xflow: self,
            chip,
            target,
        };
        self.set_access_mode(chip, target)?;
        self.set_base_address(chip, base)?;
        self.write_virtual_buffer(chip, offset, value)
    }

    pub fn read(
        &self,
        chip: u32,
        base: u32,
        offset: u32,
        target: AccessTarget,
    ) -> Result<u32, PciError> {
        self.basic_check(chip)?;

        if self.bars.layout == BarLayout::Sram1Mb {
            return self.mailbox(chip, base + offset, None, target);
        }

        let _route = ProxyRoute {
            xflow: self,
            chip,
            target,
        };
        self.set_access_mode(chip, target)?;
        self.set_base_address(chip, base)?;
        self.read_virtual_buffer(chip, offset)
    }

    fn sram_offset(addr: u32) -> Result<usize, PciError> {
        if addr < CHIP_SRAM_BASE + CHIP_SRAM_DATA_SRAM_OFFSET
            || addr >= CHIP_SRAM_BASE + CHIP_SRAM_MAX_SIZE
        {
            tracing::error!("Invalid sram address 0x{addr:08x}");
            return Err(PciError::InvalidSramAddress { addr });
        }
        Ok((addr - CHIP_SRAM_BASE) as usize)
    }

    pub fn sram_read(&self, addr: u32) -> Result<u32, PciError> {
        let offset = Self::sram_offset(addr)?;
        let window = self
            .bars
            .sram()
            .ok_or_else(|| Self::not_ready(0, "sram bar is not mapped"))?;
        window.read32(offset)
    }

    pub fn sram_write(&self, addr: u32, value: u32) -> Result<(), PciError> {
        let offset = Self::sram_offset(addr)?;
        let window = self
            .bars
            .sram()
            .ok_or_else(|| Self::not_ready(0, "sram bar is not mapped"))?;
        window.write32(offset, value)
    }

    fn mailbox_wait(&self, phase: &'static str) -> Result<(), PciError> {
        let outcome = poll_until(self.mailbox_timeout, || {
            match self.sram_read(EXTINFO_CMD_BASE)? {
                EXTCMD_COMPLETE => Ok(Some(())),
                DEVICE_GONE => Err(PciError::DeviceGone),
                _ => Ok(None),
            }
        })?;

        match outcome {
            PollOutcome::Ready(()) => Ok(()),
            PollOutcome::TimedOut(elapsed) => {
                tracing::error!("xflow mailbox {phase} timed out after {elapsed:?}");
                Err(PciError::Timeout {
                    what: phase,
                    timeout: self.mailbox_timeout,
                })
            }
        }
    }

    fn mailbox(
        &self,
        chip: u32,
        addr: u32,
        value: Option<u32>,
        target: AccessTarget,
    ) -> Result<u32, PciError> {
        let result = (|| {
            self.mailbox_wait("mailbox idle wait")?;

            self.sram_write(EXTINFO_DATA_BASE, addr)?;
            if let Some(value) = value {
                self.sram_write(EXTINFO_DATA_BASE + 4, value)?;
            }

            let command = MailboxCommand::new()
                .with_command(if value.is_some() {
                    EXTCMD_XFLOW_WRITE_REG
                } else {
                    EXTCMD_XFLOW_READ_REG
                })
                .with_chip(chip as u8)
                .with_indirect(target == AccessTarget::Buffer);
            self.sram_write(EXTINFO_CMD_BASE, command.into())?;

            self.mailbox_wait("mailbox completion wait")?;

            if value.is_some() {
                Ok(0)
            } else {
                self.sram_read(EXTINFO_DATA_BASE + 4)
            }
        })();

        if let Err(PciError::DeviceGone) = &result {
            tracing::debug!("mailbox access to chip {chip} aborted, device is gone");
        }

        result
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use super::*;
    use crate::window::MemoryWindow;

    fn conf(chip: u32, register: u32) -> usize {
        (xflow_offset(chip, true) + register) as usize
    }

    fn vbuf(chip: u32, offset: u32) -> usize {
        (xflow_offset(chip, false) + offset) as usize
    }

    struct Board {
        xflow: Xflow,
        conf: Arc<MemoryWindow>,
        vbuf: Arc<MemoryWindow>,
    }

    fn board(layout: BarLayout) -> Board {
        let conf = Arc::new(MemoryWindow::new(64 << 20));
        let vbuf = Arc::new(MemoryWindow::new(64 << 20));
        let mut bars = Bars::new(layout)
            .with_window(0, vbuf.clone())
            .with_window(2, conf.clone());
        if layout != BarLayout::Sram1Mb {
            bars = bars.with_window(4, Arc::new(MemoryWindow::new(0x1000)));
        }
        if layout == BarLayout::FourBar {
            bars = bars.with_window(5, Arc::new(MemoryWindow::new(1 << 20)));
        }

        Board {
            xflow: Xflow::new(bars, Duration::from_secs(1)),
            conf,
            vbuf,
        }
    }

    #[test]
    fn direct_buffer_write() {
        let board = board(BarLayout::ThreeBar);
        board
            .xflow
            .write(1, 0x3000_0000, 0x40, 0xabcd, AccessTarget::Buffer)
            .unwrap();

        assert_eq!(
            board.conf.writes(),
            vec![
                (conf(1, XFLOW_CONTROL_REGISTER), 1),
                (conf(1, XFLOW_BASE_ADDRESS_REGISTER), 0x3000_0000),
                (conf(1, XFLOW_CONTROL_REGISTER), 0),
            ]
        );
        assert_eq!(board.vbuf.writes(), vec![(vbuf(1, 0x40), 0xabcd)]);
    }

    #[test]
    fn direct_mpu_read() {
        let board = board(BarLayout::FourBar);
        board.vbuf.poke(vbuf(0, 0x10), 0x55);

        let value = board.xflow.read(0, 0x1000, 0x10, AccessTarget::Mpu).unwrap();
        assert_eq!(value, 0x55);
        assert_eq!(
            board.conf.writes(),
            vec![
                (conf(0, XFLOW_CONTROL_REGISTER), 0),
                (conf(0, XFLOW_BASE_ADDRESS_REGISTER), 0x1000),
            ]
        );
    }

    #[test]
    fn indirect_write_goes_through_chip0() {
        let board = board(BarLayout::FourBar);
        board
            .xflow
            .write(2, 0x3000_0000, 0x8, 0x77, AccessTarget::Buffer)
            .unwrap();

        let chip0_base = conf(0, XFLOW_BASE_ADDRESS_REGISTER);
        let chip0_control = conf(0, XFLOW_CONTROL_REGISTER);
        assert_eq!(
            board.conf.writes(),
            vec![
                (chip0_control, 1),
                (chip0_base, RP_XFLOW_ADDR + xflow_offset(2, true) + XFLOW_CONTROL_REGISTER),
                (chip0_control, 1),
                (chip0_base, RP_XFLOW_ADDR + xflow_offset(2, true)),
                (chip0_control, 1),
                (chip0_base, RP_XFLOW_ADDR + xflow_offset(2, false)),
                // restore chip 2 to mpu, then chip 0
                (chip0_control, 1),
                (chip0_base, RP_XFLOW_ADDR + xflow_offset(2, true) + XFLOW_CONTROL_REGISTER),
                (chip0_control, 0),
            ]
        );
        assert_eq!(
            board.vbuf.writes(),
            vec![(0, 1), (0, 0x3000_0000), (8, 0x77), (0, 0)]
        );
    }

    #[test]
    fn routing_restored_after_indirect_access() {
        let board = board(BarLayout::FourBar);
        board
            .xflow
            .write(3, 0x3000_0000, 0x20, 1, AccessTarget::Buffer)
            .unwrap();
        assert_eq!(board.conf.peek(conf(0, XFLOW_CONTROL_REGISTER)), 0);

        board.vbuf.poke(vbuf(0, 0x20), 0x99);
        board.conf.clear_writes();
        let value = board.xflow.read(0, 0x2000, 0x20, AccessTarget::Mpu).unwrap();
        assert_eq!(value, 0x99);
        assert_eq!(board.conf.peek(conf(0, XFLOW_BASE_ADDRESS_REGISTER)), 0x2000);
    }

    #[test]
    fn routing_restored_after_failed_access() {
        let board = board(BarLayout::FourBar);
        board.vbuf.fail_at(0x30);

        let result = board
            .xflow
            .write(1, 0x3000_0000, 0x30, 1, AccessTarget::Buffer);
        assert!(result.is_err());

        let writes = board.conf.writes();
        assert_eq!(writes.last(), Some(&(conf(0, XFLOW_CONTROL_REGISTER), 0)));
        assert_eq!(board.vbuf.writes().last(), Some(&(0, 0)));
    }

    #[test]
    fn rejected_before_any_access() {
        let board = board(BarLayout::ThreeBar);
        assert!(matches!(
            board.xflow.write(4, 0, 0, 0, AccessTarget::Mpu),
            Err(PciError::NotReady { chip: 4, .. })
        ));
        assert!(matches!(
            board.xflow.read(MAX_SUPPORT_CHIP_NUM, 0, 0, AccessTarget::Mpu),
            Err(PciError::NotReady { .. })
        ));

        board.xflow.detach();
        assert!(board.xflow.read(0, 0, 0, AccessTarget::Mpu).is_err());
        assert!(board.conf.writes().is_empty());
        assert!(board.vbuf.writes().is_empty());

        let vbuf = Arc::new(MemoryWindow::new(0x1000));
        let conf = Arc::new(MemoryWindow::new(0x1000));
        let no_msix = Xflow::new(
            Bars::new(BarLayout::FourBar)
                .with_window(0, vbuf.clone())
                .with_window(2, conf.clone()),
            Duration::from_secs(1),
        );
        assert!(no_msix.write(0, 0, 0, 0, AccessTarget::Mpu).is_err());
        assert!(conf.writes().is_empty());
    }

    #[test]
    fn sram_range() {
        let board = board(BarLayout::FourBar);
        assert!(board.xflow.sram_write(CHIP_SRAM_BASE, 1).is_err());
        assert!(board
            .xflow
            .sram_read(CHIP_SRAM_BASE + CHIP_SRAM_MAX_SIZE)
            .is_err());
        board.xflow.sram_write(0x4008_0000, 5).unwrap();
        assert_eq!(board.xflow.sram_read(0x4008_0000).unwrap(), 5);
    }

    fn legacy_board() -> (Xflow, Arc<MemoryWindow>) {
        let sram = Arc::new(MemoryWindow::new(CHIP_SRAM_MAX_SIZE as usize));
        let xflow = Xflow::new(
            Bars::new(BarLayout::Sram1Mb).with_window(0, sram.clone()),
            Duration::from_millis(200),
        );
        (xflow, sram)
    }

    #[test]
    fn legacy_mailbox_read() {
        let (xflow, sram) = legacy_board();
        let cmd = (EXTINFO_CMD_BASE - CHIP_SRAM_BASE) as usize;
        let data = (EXTINFO_DATA_BASE - CHIP_SRAM_BASE) as usize;

        let stop = Arc::new(AtomicBool::new(false));
        let firmware = {
            let sram = sram.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                let mut seen = Vec::new();
                while !stop.load(Ordering::SeqCst) {
                    let word = sram.peek(cmd);
                    if word != EXTCMD_COMPLETE {
                        let command = MailboxCommand::from(word);
                        seen.push((command, sram.peek(data)));
                        sram.poke(data + 4, 0x1234);
                        sram.poke(cmd, EXTCMD_COMPLETE);
                    }
                    std::thread::sleep(Duration::from_micros(100));
                }
                seen
            })
        };

        let value = xflow.read(3, 0x3000_0000, 0x10, AccessTarget::Buffer).unwrap();
        stop.store(true, Ordering::SeqCst);
        let seen = firmware.join().unwrap();

        assert_eq!(value, 0x1234);
        assert_eq!(seen.len(), 1);
        let (command, addr) = seen[0];
        assert_eq!(command.command(), EXTCMD_XFLOW_READ_REG);
        assert_eq!(command.chip(), 3);
        assert!(command.indirect());
        assert_eq!(addr, 0x3000_0010);
    }

    #[test]
    fn legacy_mailbox_hot_unplug() {
        let (xflow, sram) = legacy_board();
        sram.poke((EXTINFO_CMD_BASE - CHIP_SRAM_BASE) as usize, 0xffff_ffff);

        let start = std::time::Instant::now();
        let result = xflow.write(0, 0x1000, 0, 1, AccessTarget::Mpu);
        assert!(matches!(result, Err(PciError::DeviceGone)));
        assert!(start.elapsed() < Duration::from_millis(200));
        assert!(sram.writes().is_empty());
    }

    #[test]
    fn legacy_mailbox_timeout() {
        let (xflow, sram) = legacy_board();
        sram.poke((EXTINFO_CMD_BASE - CHIP_SRAM_BASE) as usize, 5);

        let result = xflow.read(0, 0x1000, 0, AccessTarget::Mpu);
        assert!(matches!(result, Err(PciError::Timeout { .. })));
        assert!(sram.writes().is_empty());
    }
}
