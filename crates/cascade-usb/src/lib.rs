// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

use std::{sync::Arc, time::Duration};

mod admin;
pub mod completion;
mod data;
mod debug;
mod error;
mod fwcfg;
pub mod host;
mod transfer;
pub mod urb;

pub use completion::{Completion, WaitOutcome};
pub use data::UsbDataPath;
pub use error::UsbError;
pub use host::{Reply, ScriptedHost, UsbHost};
#[cfg(feature = "usb")]
pub use host::RusbHost;
pub use urb::{Urb, UrbRequest, UrbResult};

pub const MEMX_VENDOR_ID: u16 = 0x0559;

pub const MEMX_OUT_EP: u8 = 0x01;
pub const MEMX_IN_EP: u8 = 0x81;
pub const MEMX_FW_OUT_EP: u8 = 0x02;
pub const MEMX_FW_IN_EP: u8 = 0x82;

pub const MAX_OPS_SIZE: usize = 64 * 1024;
pub const MAX_READ_SIZE: usize = 128 * 1024;
pub const MAX_MPUOUT_SIZE: usize = 54000;

pub const FWCFG_ID_CLR: u32 = 0x0095_2700;
pub const FWCFG_ID_FW: u32 = 0x0095_2701;
pub const FWCFG_ID_DFP: u32 = 0x0095_2702;
pub const FWCFG_ID_MPU_GROUP: u32 = 0x0095_270E;
pub const FWCFG_ID_GET_FEATURE: u32 = 0x0095_2710;
pub const FWCFG_ID_SET_FEATURE: u32 = 0x0095_2711;
pub const FWCFG_ID_ADM_COMMAND: u32 = 0x0095_2712;

pub const DBGFS_ID_RDADDR: u32 = 0x006d_6581;
pub const DBGFS_ID_MEMXCMD: u32 = 0x006d_6583;

/// Where the firmware leaves the reply of an i2c transaction.
pub const I2C_READBACK_ADDR: u32 = 0x400F_D200;

#[derive(Clone, Copy, Debug)]
pub struct UsbTimeouts {
    /// Each leg of an admin command, download or configuration transfer.
    pub admin: Duration,
    /// Each chunk on the data endpoints.
    pub data: Duration,
    /// The config id header that opens an admin command.
    pub header: Duration,
    pub debug_write: Duration,
    pub debug_read: Duration,
}

impl Default for UsbTimeouts {
    fn default() -> Self {
        Self {
            admin: Duration::from_secs(30),
            data: Duration::from_secs(30),
            header: Duration::from_secs(1),
            debug_write: Duration::from_secs(1),
            debug_read: Duration::from_millis(500),
        }
    }
}

pub struct UsbDevice {
    pub id: usize,

    host: Arc<dyn UsbHost>,
    fw_out: Arc<Urb>,
    fw_in: Arc<Urb>,
    data_path: UsbDataPath,

    pub timeouts: UsbTimeouts,
}

impl UsbDevice {
    pub fn new(id: usize, host: Arc<dyn UsbHost>, timeouts: UsbTimeouts) -> Self {
        Self {
            id,
            data_path: UsbDataPath::new(Arc::clone(&host), timeouts.data),
            host,
            fw_out: Arc::new(Urb::new(MEMX_FW_OUT_EP)),
            fw_in: Arc::new(Urb::new(MEMX_FW_IN_EP)),
            timeouts,
        }
    }

    #[cfg(feature = "usb")]
    pub fn open(id: usize, timeouts: UsbTimeouts) -> Result<Self, UsbError> {
        let host = RusbHost::open(id, timeouts.admin.max(timeouts.data))?;
        Ok(Self::new(id, Arc::new(host), timeouts))
    }

    #[cfg(feature = "usb")]
    pub fn scan() -> Vec<usize> {
        match RusbHost::scan() {
            Ok(devices) => (0..devices.len()).collect(),
            Err(err) => {
                tracing::debug!("When scanning the usb bus hit error: {err}");
                Vec::new()
            }
        }
    }

    /// Handle on the data endpoints, usable while an admin command is in flight.
    pub fn data_path(&self) -> UsbDataPath {
        self.data_path.clone()
    }

    pub(crate) fn send_fw(&self, data: &[u8], timeout: Duration) -> Result<usize, UsbError> {
        transfer::send(self.host.as_ref(), &self.fw_out, data, timeout)
    }

    pub(crate) fn receive_fw(&self, length: usize, timeout: Duration) -> Result<Vec<u8>, UsbError> {
        transfer::receive(self.host.as_ref(), &self.fw_in, length, timeout)
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::sync::Arc;

    use crate::{ScriptedHost, UrbRequest, UsbDevice, UsbTimeouts};

    pub fn device(
        handler: impl Fn(&UrbRequest) -> crate::Reply + Send + Sync + 'static,
    ) -> (UsbDevice, Arc<ScriptedHost>) {
        let host = Arc::new(ScriptedHost::new(handler));
        let device = UsbDevice::new(0, host.clone(), UsbTimeouts::default());
        (device, host)
    }

    pub fn words(bytes: &[u8]) -> Vec<u32> {
        bytes
            .chunks(4)
            .map(|c| {
                let mut word = [0u8; 4];
                word[..c.len()].copy_from_slice(c);
                u32::from_le_bytes(word)
            })
            .collect()
    }
}
