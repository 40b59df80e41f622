use crate::error::CommandError;
use byteorder::{ByteOrder, LittleEndian};
use std::time::Duration;
use strum::{Display, EnumIter};

pub const STATUS_LENGTH: usize = 6;

#[derive(Copy, Clone, Debug, Display, EnumIter, PartialEq, Eq)]
pub enum DfuState {
    AppIdle,
    AppDetach,
    DfuIdle,
    DfuDnloadSync,
    DfuDnBusy,
    DfuDnloadIdle,
    DfuManifestSync,
    DfuManifest,
    DfuManifestWaitReset,
    DfuUploadIdle,
    DfuError,
}

impl DfuState {
    // Anything the device reports that we don't recognise is treated as an error state.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => DfuState::AppIdle,
            1 => DfuState::AppDetach,
            2 => DfuState::DfuIdle,
            3 => DfuState::DfuDnloadSync,
            4 => DfuState::DfuDnBusy,
            5 => DfuState::DfuDnloadIdle,
            6 => DfuState::DfuManifestSync,
            7 => DfuState::DfuManifest,
            8 => DfuState::DfuManifestWaitReset,
            9 => DfuState::DfuUploadIdle,
            _ => DfuState::DfuError,
        }
    }

    pub fn code(&self) -> u8 {
        *self as u8
    }
}

pub fn describe_status(code: u8) -> &'static str {
    match code {
        0x00 => "No error.",
        0x01 => "File is not targeted for this device.",
        0x02 => "File fails vendor specific verification.",
        0x03 => "Device is unable to write memory.",
        0x04 => "Memory erase failed.",
        0x05 => "Memory erase check failed.",
        0x06 => "Program memory function failed.",
        0x07 => "Programmed memory failed verification.",
        0x08 => "Address out of range.",
        0x09 => "Received DNLOAD with wLength=0 but device expects more.",
        0x0A => "Firmware is corrupt. Cannot return to runtime.",
        0x0B => "Vendor specific error string.",
        0x0C => "Unexpected USB reset detected.",
        0x0D => "Unexpected power on reset detected.",
        0x0E => "Unknown error.",
        0x0F => "Unexpected request stalled.",
        _ => "Unknown DFU status",
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DfuStatus {
    pub status: u8,
    pub poll_timeout_ms: u32,
    pub state: DfuState,
    pub string_index: u8,
    pub description: &'static str,
}

impl DfuStatus {
    /// Parses a GETSTATUS response: status, a 24 bit poll timeout, state, string index.
    pub fn parse(data: &[u8]) -> Result<Self, CommandError> {
        if data.len() < STATUS_LENGTH {
            return Err(CommandError::MalformedResponse {
                expected: STATUS_LENGTH,
                received: data.len(),
            });
        }

        Ok(Self {
            status: data[0],
            poll_timeout_ms: LittleEndian::read_u24(&data[1..4]),
            state: DfuState::from_code(data[4]),
            string_index: data[5],
            description: describe_status(data[0]),
        })
    }

    pub fn is_ok(&self) -> bool {
        self.status == 0
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms as u64)
    }

    pub(crate) fn check(&self) -> Result<(), CommandError> {
        if self.is_ok() {
            return Ok(());
        }
        Err(CommandError::DfuStatus {
            code: self.status,
            description: self.description,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use strum::IntoEnumIterator;

    #[test]
    fn parses_status() {
        let status = DfuStatus::parse(&[0x00, 0x10, 0x27, 0x01, 0x05, 0x00]).unwrap();
        assert!(status.is_ok());
        assert_eq!(status.poll_timeout_ms, 0x012710);
        assert_eq!(status.state, DfuState::DfuDnloadIdle);
        assert_eq!(status.description, "No error.");
    }

    #[test]
    fn unknown_state_is_error() {
        let status = DfuStatus::parse(&[0x00, 0, 0, 0, 0x42, 0]).unwrap();
        assert_eq!(status.state, DfuState::DfuError);
    }

    #[test]
    fn failing_status() {
        let status = DfuStatus::parse(&[0x08, 0, 0, 0, 10, 0]).unwrap();
        assert!(!status.is_ok());
        assert_matches!(
            status.check(),
            Err(CommandError::DfuStatus {
                code: 8,
                description: "Address out of range."
            })
        );
        assert_eq!(describe_status(0x10), "Unknown DFU status");
    }

    #[test]
    fn short_status() {
        assert_matches!(
            DfuStatus::parse(&[0, 0, 0]),
            Err(CommandError::MalformedResponse {
                expected: 6,
                received: 3
            })
        );
    }

    #[test]
    fn state_codes_round_trip() {
        for state in DfuState::iter() {
            assert_eq!(DfuState::from_code(state.code()), state);
        }
    }
}
