//! Session-level errors.

use std::fmt;

use thiserror::Error;

use crate::client::ProtocolError;
use crate::payload::ParseError;

/// The device answered, but reported a failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Erase of {blocks} rows at 0x{address:06X} failed")]
    EraseFailed { address: u32, blocks: u32 },

    #[error("Write of {length} bytes at 0x{address:06X} failed")]
    WriteFailed { address: u32, length: usize },

    #[error("Checksum mismatch at 0x{address:06X}: expected 0x{expected:04X}, got 0x{got:04X}")]
    ChecksumMismatch { address: u32, expected: u16, got: u16 },
}

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("Invalid HEX file: {0}")]
    Format(#[from] ParseError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
}

/// Flat classification of every failure the updater can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Malformed,
    LengthMismatch,
    BadChecksum,
    UnknownType,
    DataAfterEof,
    MissingEof,
    /// The HEX file could not be read.
    FileIo,
    ProtocolTimeout,
    ProtocolIo,
    InvalidLength,
    UnexpectedResponse,
    EraseFailed,
    WriteFailed,
    ChecksumMismatch,
}

impl ErrorKind {
    pub fn is_format(self) -> bool {
        matches!(
            self,
            ErrorKind::Malformed
                | ErrorKind::LengthMismatch
                | ErrorKind::BadChecksum
                | ErrorKind::UnknownType
                | ErrorKind::DataAfterEof
                | ErrorKind::MissingEof
                | ErrorKind::FileIo
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl ParseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ParseError::Malformed { .. } => ErrorKind::Malformed,
            ParseError::LengthMismatch { .. } => ErrorKind::LengthMismatch,
            ParseError::BadChecksum { .. } => ErrorKind::BadChecksum,
            ParseError::UnknownType { .. } => ErrorKind::UnknownType,
            ParseError::DataAfterEof { .. } => ErrorKind::DataAfterEof,
            ParseError::MissingEof => ErrorKind::MissingEof,
            ParseError::Io(_) => ErrorKind::FileIo,
        }
    }
}

impl ProtocolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::Timeout { .. } => ErrorKind::ProtocolTimeout,
            ProtocolError::Io(_) | ProtocolError::ShortRead { .. } => ErrorKind::ProtocolIo,
            ProtocolError::InvalidLength { .. } => ErrorKind::InvalidLength,
            ProtocolError::UnexpectedEcho { .. }
            | ProtocolError::UnexpectedResponse(_)
            | ProtocolError::Codec(_) => ErrorKind::UnexpectedResponse,
        }
    }
}

impl DeviceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeviceError::EraseFailed { .. } => ErrorKind::EraseFailed,
            DeviceError::WriteFailed { .. } => ErrorKind::WriteFailed,
            DeviceError::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
        }
    }
}

impl UpdateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UpdateError::Format(e) => e.kind(),
            UpdateError::Protocol(e) => e.kind(),
            UpdateError::Device(e) => e.kind(),
        }
    }

    /// Flash address involved in the failure, if any.
    pub fn address(&self) -> Option<u32> {
        match self {
            UpdateError::Device(
                DeviceError::EraseFailed { address, .. }
                | DeviceError::WriteFailed { address, .. }
                | DeviceError::ChecksumMismatch { address, .. },
            ) => Some(*address),
            UpdateError::Protocol(ProtocolError::UnexpectedEcho { sent_address, .. }) => {
                Some(*sent_address)
            }
            _ => None,
        }
    }
}
