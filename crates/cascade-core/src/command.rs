// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

//! The admin command record shared by every transport.
//!
//! A [`TransportCmd`] is copied verbatim between host and device, so the layout here is the
//! wire layout. The submission half is filled by the caller, the completion half is only
//! meaningful once a terminal status has been observed.

use std::fmt;

use bytemuck::{Pod, Zeroable};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use thiserror::Error;

/// Number of 32-bit words in the submission half of a command.
pub const SQ_WORDS: usize = 16;
/// Number of 32-bit result words in the completion half of a command.
pub const CQ_DATA_LEN: usize = 16;
/// Size of the full command record on the wire.
pub const TRANSPORT_CMD_SIZE: usize = std::mem::size_of::<TransportCmd>();

/// Number of per-chip descriptors packed into a parallel DFP download command.
pub const MAX_DFP_DESCRIPTORS: usize = 4;
/// Descriptor type that additionally requests the weight-memory reset bit.
const DFP_TYPE_WEIGHT_MEMORY: u8 = 0x38;
const DFP_WEIGHT_MEMORY_RESET: u32 = 0x0080_0000;

/// Remote command asking the firmware to enable (param 1) or disable (param 0) thermal throttling.
pub const RMTCMD_THERMAL_THROTTLE: u32 = 0x6d65_6d74;
/// Remote command writing `param2` to register `param`.
pub const RMTCMD_REGISTER_WRITE: u32 = 0x6d65_6d77;
/// Remote command asking the firmware to burn the image staged in data sram to qspi flash.
pub const RMTCMD_FLASH_UPDATE: u32 = 0x6d65_6d51;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Command record must be {TRANSPORT_CMD_SIZE} bytes but got {0}")]
    WrongSize(usize),
}

#[derive(FromPrimitive, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    SetFeature = 0x09,
    GetFeature = 0x0A,
    DownloadDfp = 0x11,
    SelfTest = 0x14,
    DevIoCtrl = 0x1F,
}

impl Opcode {
    pub fn from_u16(value: u16) -> Option<Self> {
        FromPrimitive::from_u16(value)
    }
}

#[derive(FromPrimitive, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum FeatureId {
    Info = 0x01,
    Throughput = 0x02,
    InterfaceInfo = 0x03,
    PowerManagement = 0x04,
    Frequency = 0x05,
    Gpio = 0x06,
    HwInfo = 0x07,
    MpuUtilization = 0x08,
    I2cTransceive = 0x09,
}

impl FeatureId {
    pub fn from_u16(value: u16) -> Option<Self> {
        FromPrimitive::from_u16(value)
    }
}

/// Status word reported in the completion half of a command.
///
/// Values the driver does not know about are kept as-is so they can be passed back to the
/// caller untouched.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AdminStatus(pub u32);

impl AdminStatus {
    pub const NO_ERROR: AdminStatus = AdminStatus(0);
    pub const PARAMETER_FAIL: AdminStatus = AdminStatus(1);
    pub const TIMEOUT_FAIL: AdminStatus = AdminStatus(2);
    pub const UNKNOWN_FAIL: AdminStatus = AdminStatus(3);

    pub fn is_ok(&self) -> bool {
        *self == Self::NO_ERROR
    }
}

impl fmt::Debug for AdminStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NO_ERROR => write!(f, "NoError"),
            Self::PARAMETER_FAIL => write!(f, "ParameterFail"),
            Self::TIMEOUT_FAIL => write!(f, "TimeoutFail"),
            Self::UNKNOWN_FAIL => write!(f, "UnknownFail"),
            Self(other) => write!(f, "DeviceStatus(0x{other:x})"),
        }
    }
}

impl fmt::Display for AdminStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Handshake value of a PCIe admin slot.
#[derive(FromPrimitive, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum SlotStatus {
    Idle = 0,
    Receive = 1,
    Complete = 2,
}

impl SlotStatus {
    pub fn from_u32(value: u32) -> Option<Self> {
        FromPrimitive::from_u32(value)
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SubmissionEntry {
    pub op_code: u16,
    pub cmd_len: u16,
    pub sub_op_code: u16,
    pub req_len: u16,
    pub attr: u32,
    /// Chip selector.
    pub cdw2: u32,
    /// cdw3..=cdw14
    pub params: [u32; 12],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CompletionEntry {
    pub status: u32,
    pub data: [u32; CQ_DATA_LEN],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct TransportCmd {
    pub sq: SubmissionEntry,
    pub cq: CompletionEntry,
}

/// Packed per-chip descriptor word of a parallel DFP download.
#[bitfield_struct::bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct DfpDescriptorWord {
    pub chip: u8,
    pub des_type: u8,
    pub cdw6: u8,
    pub attr: u8,
}

impl TransportCmd {
    pub fn new(op: Opcode, sub_op: u16) -> Self {
        let mut cmd = Self::zeroed();
        cmd.sq.op_code = op as u16;
        cmd.sq.sub_op_code = sub_op;
        cmd.sq.cmd_len = TRANSPORT_CMD_SIZE as u16;
        cmd
    }

    pub fn feature(op: Opcode, feature: FeatureId) -> Self {
        Self::new(op, feature as u16)
    }

    pub fn with_chip(mut self, chip: u32) -> Self {
        self.sq.cdw2 = chip;
        self
    }

    /// Fill cdw3 onwards.
    pub fn with_params(mut self, params: &[u32]) -> Self {
        for (dst, src) in self.sq.params.iter_mut().zip(params) {
            *dst = *src;
        }
        self
    }

    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_u16(self.sq.op_code)
    }

    pub fn feature_id(&self) -> Option<FeatureId> {
        FeatureId::from_u16(self.sq.sub_op_code)
    }

    pub fn chip(&self) -> u32 {
        self.sq.cdw2
    }

    pub fn status(&self) -> AdminStatus {
        AdminStatus(self.cq.status)
    }

    pub fn set_status(&mut self, status: AdminStatus) {
        self.cq.status = status.0;
    }

    /// The submission half as raw words.
    pub fn sq_words(&self) -> &[u32; SQ_WORDS] {
        bytemuck::cast_ref(&self.sq)
    }

    pub fn sq_words_mut(&mut self) -> &mut [u32; SQ_WORDS] {
        bytemuck::cast_mut(&mut self.sq)
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    pub fn as_words(&self) -> &[u32] {
        bytemuck::cast_slice(std::slice::from_ref(self))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CommandError> {
        if bytes.len() != TRANSPORT_CMD_SIZE {
            return Err(CommandError::WrongSize(bytes.len()));
        }
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    pub fn from_words(words: &[u32]) -> Result<Self, CommandError> {
        Self::from_bytes(bytemuck::cast_slice(words))
    }

    /// Builds the single-chip command described by descriptor `index` of a parallel DFP
    /// download, or `None` when that descriptor is absent.
    pub fn dfp_chip_command(&self, index: usize) -> Option<TransportCmd> {
        if index >= MAX_DFP_DESCRIPTORS {
            return None;
        }

        let words = self.sq_words();
        let base = 4 + index * 3;
        let packed = words[base];
        if packed == 0 {
            return None;
        }
        let descriptor = DfpDescriptorWord::from(packed);

        let mut cmd = TransportCmd::zeroed();
        cmd.sq.op_code = self.sq.op_code;
        cmd.sq.cmd_len = self.sq.cmd_len;
        cmd.sq.sub_op_code = self.sq.sub_op_code;
        cmd.sq.req_len = self.sq.req_len;
        cmd.sq.attr = descriptor.attr() as u32;
        cmd.sq.cdw2 = descriptor.chip() as u32;

        let mut cdw3 = (descriptor.des_type() as u32) << 24;
        if descriptor.des_type() == DFP_TYPE_WEIGHT_MEMORY {
            cdw3 |= DFP_WEIGHT_MEMORY_RESET;
        }
        cmd.sq.params[0] = cdw3;
        cmd.sq.params[1] = words[base + 1];
        cmd.sq.params[2] = words[base + 2];
        cmd.sq.params[3] = descriptor.cdw6() as u32;

        Some(cmd)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn record_layout() {
        assert_eq!(std::mem::size_of::<SubmissionEntry>(), 64);
        assert_eq!(std::mem::size_of::<CompletionEntry>(), 68);
        assert_eq!(TRANSPORT_CMD_SIZE, 132);

        let cmd = TransportCmd::feature(Opcode::GetFeature, FeatureId::Frequency)
            .with_chip(3)
            .with_params(&[0xaa, 0xbb]);
        let words = cmd.sq_words();
        assert_eq!(words[0], (132 << 16) | 0x0A);
        assert_eq!(words[1], 0x05);
        assert_eq!(words[3], 3);
        assert_eq!(words[4], 0xaa);
        assert_eq!(words[5], 0xbb);
    }

    #[test]
    fn bytes_are_verbatim() {
        let mut cmd = TransportCmd::feature(Opcode::SetFeature, FeatureId::Gpio).with_chip(1);
        cmd.cq.data[15] = 0xdead_beef;
        let copy = TransportCmd::from_bytes(cmd.as_bytes()).unwrap();
        assert_eq!(copy, cmd);

        assert!(matches!(
            TransportCmd::from_bytes(&[0u8; 12]),
            Err(CommandError::WrongSize(12))
        ));
    }

    #[test]
    fn unknown_status_is_preserved() {
        let status = AdminStatus(0x77);
        assert!(!status.is_ok());
        assert_eq!(format!("{status:?}"), "DeviceStatus(0x77)");
        assert_eq!(format!("{:?}", AdminStatus::TIMEOUT_FAIL), "TimeoutFail");
    }

    #[test]
    fn dfp_descriptor_expansion() {
        let mut parent = TransportCmd::new(Opcode::DownloadDfp, 0x3);
        parent.sq.req_len = 0x40;
        {
            let words = parent.sq_words_mut();
            words[4] = DfpDescriptorWord::new()
                .with_chip(2)
                .with_des_type(0x38)
                .with_cdw6(0x11)
                .with_attr(0x5)
                .into();
            words[5] = 0x1000;
            words[6] = 0x2000;
            words[13] = DfpDescriptorWord::new().with_chip(1).with_des_type(0x10).into();
        }

        let first = parent.dfp_chip_command(0).unwrap();
        assert_eq!(first.sq.op_code, Opcode::DownloadDfp as u16);
        assert_eq!(first.sq.sub_op_code, 0x3);
        assert_eq!(first.sq.req_len, 0x40);
        assert_eq!(first.chip(), 2);
        assert_eq!(first.sq.attr, 5);
        assert_eq!(first.sq.params[0], 0x3880_0000);
        assert_eq!(first.sq.params[1], 0x1000);
        assert_eq!(first.sq.params[2], 0x2000);
        assert_eq!(first.sq.params[3], 0x11);

        assert!(parent.dfp_chip_command(1).is_none());
        assert!(parent.dfp_chip_command(2).is_none());

        let last = parent.dfp_chip_command(3).unwrap();
        assert_eq!(last.chip(), 1);
        assert_eq!(last.sq.params[0], 0x1000_0000);

        assert!(parent.dfp_chip_command(4).is_none());
    }
}
