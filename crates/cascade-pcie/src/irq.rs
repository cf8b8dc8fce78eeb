// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use cascade_core::{poll_until, PollOutcome, MAX_SUPPORT_CHIP_NUM};

use crate::{error::PciError, PcieDevice};

/// One firmware acknowledge vector plus an egress and ingress vector per chip.
pub const MAX_IRQ_VECTORS: u32 = 1 + 2 * MAX_SUPPORT_CHIP_NUM;

pub const LEGACY_MSG_ADDR: u32 = 0x4004_6F84;
const LEGACY_CLEAR_MSG: u32 = 0;
const LEGACY_MSG_CLR_INTA: u32 = 0x8000_0000;
const LEGACY_MSG_INT_CLRED: u32 = 0x4000_0000;

/// The event an interrupt vector signals.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IrqRoute {
    FirmwareAck,
    Egress { chip: u32 },
    Ingress { chip: u32 },
}

impl IrqRoute {
    pub fn from_vector(vector: u32) -> Option<Self> {
        match vector {
            0 => Some(IrqRoute::FirmwareAck),
            v if v >= MAX_IRQ_VECTORS => None,
            v if v % 2 == 1 => Some(IrqRoute::Egress { chip: (v - 1) >> 1 }),
            v => Some(IrqRoute::Ingress { chip: (v - 1) >> 1 }),
        }
    }

    pub fn vector(&self) -> u32 {
        match self {
            IrqRoute::FirmwareAck => 0,
            IrqRoute::Egress { chip } => 1 + chip * 2,
            IrqRoute::Ingress { chip } => 2 + chip * 2,
        }
    }

    pub fn chip(&self) -> Option<u32> {
        match self {
            IrqRoute::FirmwareAck => None,
            IrqRoute::Egress { chip } | IrqRoute::Ingress { chip } => Some(*chip),
        }
    }

    pub fn describe(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for IrqRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrqRoute::FirmwareAck => write!(f, "Firmware MSI-X Acknowledge Notification"),
            IrqRoute::Egress { chip } => write!(f, "chip {chip:02} Egress Dcore Done Notification"),
            IrqRoute::Ingress { chip } => {
                write!(f, "chip {chip:02} Ingress Dcore Done Notification")
            }
        }
    }
}

impl PcieDevice {
    /// Service a shared legacy interrupt.
    ///
    /// Returns `None` when the interrupt was not raised by this device.
    pub fn legacy_event(&self) -> Result<Option<IrqRoute>, PciError> {
        let event = self.xflow.sram_read(LEGACY_MSG_ADDR)?;
        if event == LEGACY_CLEAR_MSG {
            return Ok(None);
        }

        self.xflow.sram_write(LEGACY_MSG_ADDR, LEGACY_MSG_CLR_INTA)?;
        let cleared = poll_until(self.timeouts.irq_ack, || {
            Ok::<_, PciError>(
                (self.xflow.sram_read(LEGACY_MSG_ADDR)? == LEGACY_MSG_INT_CLRED).then_some(()),
            )
        })?;
        if let PollOutcome::TimedOut(elapsed) = cleared {
            tracing::error!("firmware did not clear the legacy interrupt within {elapsed:?}");
        }
        self.xflow.sram_write(LEGACY_MSG_ADDR, LEGACY_CLEAR_MSG)?;

        let vector = event >> 8;
        let route = IrqRoute::from_vector(vector);
        if route.is_none() {
            tracing::warn!("legacy interrupt carried unknown vector {vector}");
        }
        Ok(route)
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        bar::{BarLayout, Bars},
        dma::HostDma,
        window::MemoryWindow,
        xflow::CHIP_SRAM_BASE,
        PcieTimeouts,
    };

    #[test]
    fn vector_routing() {
        assert_eq!(IrqRoute::from_vector(0), Some(IrqRoute::FirmwareAck));
        assert_eq!(IrqRoute::from_vector(1), Some(IrqRoute::Egress { chip: 0 }));
        assert_eq!(IrqRoute::from_vector(2), Some(IrqRoute::Ingress { chip: 0 }));
        assert_eq!(IrqRoute::from_vector(7), Some(IrqRoute::Egress { chip: 3 }));
        assert_eq!(IrqRoute::from_vector(32), Some(IrqRoute::Ingress { chip: 15 }));
        assert_eq!(IrqRoute::from_vector(33), None);

        for vector in 0..MAX_IRQ_VECTORS {
            assert_eq!(IrqRoute::from_vector(vector).unwrap().vector(), vector);
        }

        assert_eq!(
            IrqRoute::Egress { chip: 3 }.describe(),
            "chip 03 Egress Dcore Done Notification"
        );
    }

    fn legacy_device() -> (PcieDevice, Arc<MemoryWindow>) {
        let sram = Arc::new(MemoryWindow::new(1 << 20));
        let device = PcieDevice::from_parts(
            0,
            Bars::new(BarLayout::Sram1Mb).with_window(0, sram.clone()),
            Arc::new(HostDma::new(0x1000)),
            None,
            PcieTimeouts {
                irq_ack: Duration::from_millis(50),
                ..Default::default()
            },
        );
        (device, sram)
    }

    #[test]
    fn legacy_spurious() {
        let (device, sram) = legacy_device();
        assert_eq!(device.legacy_event().unwrap(), None);
        assert!(sram.writes().is_empty());
    }

    #[test]
    fn legacy_ack_handshake() {
        let (device, sram) = legacy_device();
        let msg = (LEGACY_MSG_ADDR - CHIP_SRAM_BASE) as usize;
        sram.poke(msg, 5 << 8);

        let firmware = {
            let sram = sram.clone();
            std::thread::spawn(move || loop {
                if sram.peek(msg) == LEGACY_MSG_CLR_INTA {
                    sram.poke(msg, LEGACY_MSG_INT_CLRED);
                    return;
                }
                std::thread::sleep(Duration::from_micros(50));
            })
        };

        let route = device.legacy_event().unwrap();
        firmware.join().unwrap();

        assert_eq!(route, Some(IrqRoute::Egress { chip: 2 }));
        assert_eq!(
            sram.writes(),
            vec![(msg, LEGACY_MSG_CLR_INTA), (msg, LEGACY_CLEAR_MSG)]
        );
    }

    #[test]
    fn legacy_ack_timeout_still_clears() {
        let (device, sram) = legacy_device();
        let msg = (LEGACY_MSG_ADDR - CHIP_SRAM_BASE) as usize;
        sram.poke(msg, 2 << 8);

        let route = device.legacy_event().unwrap();
        assert_eq!(route, Some(IrqRoute::Ingress { chip: 0 }));
        assert_eq!(sram.peek(msg), LEGACY_CLEAR_MSG);
    }
}
