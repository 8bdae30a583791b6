//! Packet header shared by every bootloader command and response.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use thiserror::Error;

use super::constants::{BOOTLOADER_MAGIC, HEADER_SIZE};

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Invalid {field}: {value} exceeds maximum {max}")]
    InvalidLength {
        field: &'static str,
        value: usize,
        max: usize,
    },
    #[error("Buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("Invalid magic: expected 0x{expected:02X}, got 0x{actual:02X}")]
    InvalidMagic { expected: u8, actual: u8 },
    #[error("Unknown command opcode 0x{0:02X}")]
    UnknownCommand(u8),
    #[error("Unknown status byte 0x{0:02X}")]
    UnknownStatus(u8),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Bootloader packet header (10 bytes).
///
/// ```text
/// +-------+---------+--------+------+------+-----------+
/// | magic | command | length | key1 | key2 | address   |
/// | u8    | u8      | u16 LE | u8   | u8   | u32 LE    |
/// +-------+---------+--------+------+------+-----------+
/// ```
///
/// Responses echo the header of the command they answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketHeader {
    pub magic: u8,
    pub command: u8,
    pub length: u16,
    pub key_one: u8,
    pub key_two: u8,
    pub address: u32,
}

impl PacketHeader {
    pub const SIZE: usize = HEADER_SIZE;

    pub fn new(command: u8, length: u16, key_one: u8, key_two: u8, address: u32) -> Self {
        Self {
            magic: BOOTLOADER_MAGIC,
            command,
            length,
            key_one,
            key_two,
            address,
        }
    }

    /// Append the wire form of this header to `buf`.
    pub fn write_to(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        buf.write_u8(self.magic)?;
        buf.write_u8(self.command)?;
        buf.write_u16::<LittleEndian>(self.length)?;
        buf.write_u8(self.key_one)?;
        buf.write_u8(self.key_two)?;
        buf.write_u32::<LittleEndian>(self.address)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    /// Parse a header from the start of `data`. The magic byte is checked;
    /// the remaining fields are taken as-is.
    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < Self::SIZE {
            return Err(CodecError::BufferTooSmall {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        let mut cursor = Cursor::new(data);
        let header = Self {
            magic: cursor.read_u8()?,
            command: cursor.read_u8()?,
            length: cursor.read_u16::<LittleEndian>()?,
            key_one: cursor.read_u8()?,
            key_two: cursor.read_u8()?,
            address: cursor.read_u32::<LittleEndian>()?,
        };
        if header.magic != BOOTLOADER_MAGIC {
            return Err(CodecError::InvalidMagic {
                expected: BOOTLOADER_MAGIC,
                actual: header.magic,
            });
        }
        Ok(header)
    }
}
