//! Bootloader response decoding.
//!
//! Every response starts with an echo of the command header, followed by a
//! command-specific tail. All multi-byte fields are little-endian.

use byteorder::{LittleEndian, ReadBytesExt};
use std::fmt;
use std::io::Cursor;

use super::command::Opcode;
use super::constants::*;
use super::header::{CodecError, PacketHeader};

/// Device capabilities reported by `GET_VERSION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BootVersionInfo {
    pub version: u16,
    /// Reported by the bootloader but not used by the host.
    pub max_packet_size: u16,
    /// Reported by the bootloader but not used by the host.
    pub ack_packet_size: u16,
    pub device_id: u16,
    /// Bytes erased per erase row.
    pub erase_row_size: u8,
    /// Maximum bytes per write command.
    pub write_latch_size: u8,
    pub user_id: [u8; 4],
}

impl fmt::Display for BootVersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bootloader 0x{:04X}, device 0x{:04X}, erase row {} B, write latch {} B",
            self.version, self.device_id, self.erase_row_size, self.write_latch_size
        )
    }
}

/// Status byte of write/erase responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootStatus {
    Success,
    Failure,
}

impl BootStatus {
    pub fn from_u8(value: u8) -> Result<Self, CodecError> {
        match value {
            STATUS_SUCCESS => Ok(BootStatus::Success),
            STATUS_FAILED => Ok(BootStatus::Failure),
            other => Err(CodecError::UnknownStatus(other)),
        }
    }

    pub fn is_success(self) -> bool {
        self == BootStatus::Success
    }
}

/// Decoded response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootResponse {
    Version(BootVersionInfo),
    Status(BootStatus),
    Checksum(u16),
    /// `RESET` is not answered.
    None,
}

fn check_size(data: &[u8], expected: usize) -> Result<(), CodecError> {
    if data.len() < expected {
        return Err(CodecError::BufferTooSmall {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

/// Decode a `GET_VERSION` response.
pub fn decode_version(data: &[u8]) -> Result<(PacketHeader, BootVersionInfo), CodecError> {
    check_size(data, VERSION_RESPONSE_SIZE)?;
    let header = PacketHeader::from_bytes(data)?;
    let mut cursor = Cursor::new(&data[PacketHeader::SIZE..]);

    let version = cursor.read_u16::<LittleEndian>()?;
    let max_packet_size = cursor.read_u16::<LittleEndian>()?;
    let ack_packet_size = cursor.read_u16::<LittleEndian>()?;
    let device_id = cursor.read_u16::<LittleEndian>()?;
    let _reserved = cursor.read_u16::<LittleEndian>()?;
    let erase_row_size = cursor.read_u8()?;
    let write_latch_size = cursor.read_u8()?;
    let mut user_id = [0u8; 4];
    for id in user_id.iter_mut() {
        *id = cursor.read_u8()?;
    }

    Ok((
        header,
        BootVersionInfo {
            version,
            max_packet_size,
            ack_packet_size,
            device_id,
            erase_row_size,
            write_latch_size,
            user_id,
        },
    ))
}

/// Decode a write/erase status response.
pub fn decode_status(data: &[u8]) -> Result<(PacketHeader, BootStatus), CodecError> {
    check_size(data, STATUS_RESPONSE_SIZE)?;
    let header = PacketHeader::from_bytes(data)?;
    let status = BootStatus::from_u8(data[PacketHeader::SIZE])?;
    Ok((header, status))
}

/// Decode a `CHECKSUM` response.
pub fn decode_checksum(data: &[u8]) -> Result<(PacketHeader, u16), CodecError> {
    check_size(data, CHECKSUM_RESPONSE_SIZE)?;
    let header = PacketHeader::from_bytes(data)?;
    let mut cursor = Cursor::new(&data[PacketHeader::SIZE..]);
    Ok((header, cursor.read_u16::<LittleEndian>()?))
}

/// Decode the response to a command with the given opcode.
pub fn decode(
    opcode: Opcode,
    data: &[u8],
) -> Result<(Option<PacketHeader>, BootResponse), CodecError> {
    match opcode {
        Opcode::GetVersion => {
            let (header, info) = decode_version(data)?;
            Ok((Some(header), BootResponse::Version(info)))
        }
        Opcode::Write | Opcode::Erase => {
            let (header, status) = decode_status(data)?;
            Ok((Some(header), BootResponse::Status(status)))
        }
        Opcode::Checksum => {
            let (header, checksum) = decode_checksum(data)?;
            Ok((Some(header), BootResponse::Checksum(checksum)))
        }
        Opcode::Reset => Ok((None, BootResponse::None)),
    }
}
