//! Bootloader command packets.

use std::fmt;

use super::constants::*;
use super::header::{CodecError, PacketHeader};

/// Command opcode as carried in the second header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    GetVersion,
    Write,
    Erase,
    Checksum,
    Reset,
}

impl Opcode {
    pub const fn to_u8(self) -> u8 {
        match self {
            Opcode::GetVersion => CMD_GET_VERSION,
            Opcode::Write => CMD_WRITE,
            Opcode::Erase => CMD_ERASE,
            Opcode::Checksum => CMD_CHECKSUM,
            Opcode::Reset => CMD_RESET,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self, CodecError> {
        match value {
            CMD_GET_VERSION => Ok(Opcode::GetVersion),
            CMD_WRITE => Ok(Opcode::Write),
            CMD_ERASE => Ok(Opcode::Erase),
            CMD_CHECKSUM => Ok(Opcode::Checksum),
            CMD_RESET => Ok(Opcode::Reset),
            other => Err(CodecError::UnknownCommand(other)),
        }
    }

    /// Number of bytes the bootloader sends back for this command.
    pub const fn response_len(self) -> usize {
        match self {
            Opcode::GetVersion => VERSION_RESPONSE_SIZE,
            Opcode::Write | Opcode::Erase => STATUS_RESPONSE_SIZE,
            Opcode::Checksum => CHECKSUM_RESPONSE_SIZE,
            Opcode::Reset => 0,
        }
    }

    /// Whether the command must carry the key pair.
    pub const fn is_keyed(self) -> bool {
        matches!(self, Opcode::Write | Opcode::Erase)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::GetVersion => write!(f, "GET_VERSION"),
            Opcode::Write => write!(f, "WRITE"),
            Opcode::Erase => write!(f, "ERASE"),
            Opcode::Checksum => write!(f, "CHECKSUM"),
            Opcode::Reset => write!(f, "RESET"),
        }
    }
}

/// A command to the bootloader.
///
/// `Erase::block_count` is the raw wire value: `0` means 256 rows. Use
/// [`BootCommand::erase_blocks`] to build one from a row count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootCommand {
    GetVersion,
    Write { address: u32, data: Vec<u8> },
    Erase { address: u32, block_count: u16 },
    Checksum { address: u32, length: u16 },
    Reset,
}

impl BootCommand {
    /// Erase `blocks` rows starting at `address` (1..=256).
    pub fn erase_blocks(address: u32, blocks: u32) -> Result<Self, CodecError> {
        if blocks == 0 || blocks > MAX_ERASE_BLOCKS {
            return Err(CodecError::InvalidLength {
                field: "erase block count",
                value: blocks as usize,
                max: MAX_ERASE_BLOCKS as usize,
            });
        }
        let block_count = if blocks == MAX_ERASE_BLOCKS {
            0
        } else {
            blocks as u16
        };
        Ok(BootCommand::Erase {
            address,
            block_count,
        })
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            BootCommand::GetVersion => Opcode::GetVersion,
            BootCommand::Write { .. } => Opcode::Write,
            BootCommand::Erase { .. } => Opcode::Erase,
            BootCommand::Checksum { .. } => Opcode::Checksum,
            BootCommand::Reset => Opcode::Reset,
        }
    }

    pub fn address(&self) -> u32 {
        match self {
            BootCommand::Write { address, .. }
            | BootCommand::Erase { address, .. }
            | BootCommand::Checksum { address, .. } => *address,
            BootCommand::GetVersion | BootCommand::Reset => 0,
        }
    }

    pub fn response_len(&self) -> usize {
        self.opcode().response_len()
    }

    /// Build the header, rejecting any length that does not fit the field.
    pub fn header(&self) -> Result<PacketHeader, CodecError> {
        let opcode = self.opcode();
        let length = match self {
            BootCommand::Write { data, .. } => check_length("write length", data.len())?,
            BootCommand::Erase { block_count, .. } => {
                check_length("erase block count", *block_count as usize)?
            }
            BootCommand::Checksum { length, .. } => {
                check_length("checksum length", *length as usize)?
            }
            BootCommand::GetVersion | BootCommand::Reset => 0,
        };
        let (key_one, key_two) = if opcode.is_keyed() {
            (BOOTLOADER_KEY_ONE, BOOTLOADER_KEY_TWO)
        } else {
            (0, 0)
        };
        Ok(PacketHeader::new(
            opcode.to_u8(),
            length,
            key_one,
            key_two,
            self.address(),
        ))
    }

    /// Serialize header and payload.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let header = self.header()?;
        let payload: &[u8] = match self {
            BootCommand::Write { data, .. } => data,
            _ => &[],
        };
        let mut buf = Vec::with_capacity(PacketHeader::SIZE + payload.len());
        header.write_to(&mut buf)?;
        buf.extend_from_slice(payload);
        Ok(buf)
    }
}

fn check_length(field: &'static str, value: usize) -> Result<u16, CodecError> {
    if value > BOOTLOADER_MAX_LENGTH as usize {
        return Err(CodecError::InvalidLength {
            field,
            value,
            max: BOOTLOADER_MAX_LENGTH as usize,
        });
    }
    Ok(value as u16)
}
