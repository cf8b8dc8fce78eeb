// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

use cascade_core::{command::TRANSPORT_CMD_SIZE, TransportCmd, MAX_SUPPORT_CHIP_NUM};

use crate::{
    error::UsbError,
    transfer::{header, le_word},
    UsbDevice, DBGFS_ID_MEMXCMD, DBGFS_ID_RDADDR, I2C_READBACK_ADDR, MAX_OPS_SIZE,
};

/// SRAM block where the firmware keeps per-chip MPU utilization.
pub const MPUUTIL_BASE: u32 = 0x4004_6D00;

impl UsbDevice {
    /// Read `length` bytes of chip 0 memory through the debug channel.
    pub fn read_chip0(&self, addr: u32, length: usize) -> Result<Vec<u8>, UsbError> {
        self.send_fw(
            &header(&[DBGFS_ID_RDADDR, 0, addr, length as u32]),
            self.timeouts.debug_write,
        )?;

        let data = self.receive_fw(length, self.timeouts.debug_read)?;
        if data.len() != length {
            return Err(UsbError::ShortRead {
                expected: length,
                actual: data.len(),
            });
        }
        Ok(data)
    }

    /// Post a remote command to the firmware of `chip`.
    pub fn remote_command(
        &self,
        chip: u32,
        command: u32,
        param: u32,
        param2: u32,
    ) -> Result<(), UsbError> {
        self.send_fw(
            &header(&[DBGFS_ID_MEMXCMD, chip, command, param, param2]),
            self.timeouts.debug_write,
        )?;
        self.receive_fw(MAX_OPS_SIZE, self.timeouts.debug_read)?;

        tracing::debug!("remote command 0x{command:08x}({param:#x}, {param2:#x}) to chip {chip}");
        Ok(())
    }

    /// Utilization of every chip, one word each.
    pub fn mpu_utilization(&self) -> Result<Vec<u32>, UsbError> {
        let bytes = self.read_chip0(MPUUTIL_BASE, MAX_SUPPORT_CHIP_NUM as usize * 4)?;
        Ok((0..MAX_SUPPORT_CHIP_NUM as usize)
            .filter_map(|index| le_word(&bytes, index))
            .collect())
    }

    /// Replace `cmd` with the record the firmware left for an i2c transaction. The first four
    /// parameter words of that record are mirrored into `data[3..7]`.
    pub fn i2c_readback(&self, cmd: &mut TransportCmd) -> Result<(), UsbError> {
        let bytes = self.read_chip0(I2C_READBACK_ADDR, TRANSPORT_CMD_SIZE)?;
        *cmd = TransportCmd::from_bytes(&bytes).map_err(|_| UsbError::ShortRead {
            expected: TRANSPORT_CMD_SIZE,
            actual: bytes.len(),
        })?;
        let params = cmd.sq.params;
        cmd.cq.data[3..7].copy_from_slice(&params[0..4]);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use cascade_core::{FeatureId, Opcode, TransportCmd};

    use super::*;
    use crate::{
        host::Reply,
        test_util::{device, words},
        MEMX_FW_IN_EP,
    };

    #[test]
    fn read_chip0_header() {
        let (device, host) = device(|request| {
            if request.endpoint == MEMX_FW_IN_EP {
                Reply::received(vec![0xAB; request.length])
            } else {
                Reply::sent(request)
            }
        });

        let data = device.read_chip0(0x4004_6D00, 8).unwrap();
        assert_eq!(data, vec![0xAB; 8]);

        let requests = host.requests();
        assert_eq!(
            words(&requests[0].data),
            vec![DBGFS_ID_RDADDR, 0, 0x4004_6D00, 8]
        );
        assert_eq!(requests[1].length, 8);
    }

    #[test]
    fn read_chip0_short() {
        let (device, _host) = device(|request| {
            if request.endpoint == MEMX_FW_IN_EP {
                Reply::received(vec![0; 3])
            } else {
                Reply::sent(request)
            }
        });

        assert!(matches!(
            device.read_chip0(0x4004_6D00, 8),
            Err(UsbError::ShortRead {
                expected: 8,
                actual: 3
            })
        ));
    }

    #[test]
    fn mpu_utilization_words() {
        let (device, _host) = device(|request| {
            if request.endpoint == MEMX_FW_IN_EP {
                let words: Vec<u32> = (0..16).map(|i| i * 10).collect();
                Reply::received(bytemuck::cast_slice::<u32, u8>(&words).to_vec())
            } else {
                Reply::sent(request)
            }
        });

        let util = device.mpu_utilization().unwrap();
        assert_eq!(util.len(), 16);
        assert_eq!(util[3], 30);
    }

    #[test]
    fn i2c_readback_mirrors_the_device_record() {
        let (device, host) = device(|request| {
            if request.endpoint == MEMX_FW_IN_EP {
                let mut reply = TransportCmd::feature(Opcode::SetFeature, FeatureId::I2cTransceive)
                    .with_params(&[0xD0, 0xD1, 0xD2, 0xD3]);
                reply.cq.data[0] = 0x55;
                Reply::received(reply.as_bytes().to_vec())
            } else {
                Reply::sent(request)
            }
        });

        let mut cmd = TransportCmd::feature(Opcode::SetFeature, FeatureId::I2cTransceive)
            .with_params(&[1, 2, 3, 4, 5]);
        device.i2c_readback(&mut cmd).unwrap();

        assert_eq!(cmd.cq.data[0], 0x55);
        assert_eq!(&cmd.cq.data[3..7], &[0xD0, 0xD1, 0xD2, 0xD3]);
        assert_eq!(&cmd.sq.params[0..4], &[0xD0, 0xD1, 0xD2, 0xD3]);
        assert_eq!(
            words(&host.requests()[0].data),
            vec![DBGFS_ID_RDADDR, 0, I2C_READBACK_ADDR, TRANSPORT_CMD_SIZE as u32]
        );
    }

    #[test]
    fn remote_command_header() {
        let (device, host) = device(|request| {
            if request.endpoint == MEMX_FW_IN_EP {
                Reply::received(vec![0; 4])
            } else {
                Reply::sent(request)
            }
        });

        device.remote_command(2, 0x6d65_6d74, 1, 0).unwrap();
        assert_eq!(
            words(&host.requests()[0].data),
            vec![DBGFS_ID_MEMXCMD, 2, 0x6d65_6d74, 1, 0]
        );
    }
}
