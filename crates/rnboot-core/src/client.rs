//! Bootloader request/response client.
//!
//! One command goes out, one fixed-size response comes back. There is no
//! pipelining and no retry at this level.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace};

use crate::protocol::{
    BootCommand, BootResponse, BootStatus, BootVersionInfo, CodecError, PacketHeader, decode,
};
use crate::transport::{ByteStream, TransportError};

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("No response within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("I/O error: {0}")]
    Io(TransportError),

    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    #[error("Invalid {field}: {value} exceeds maximum {max}")]
    InvalidLength {
        field: &'static str,
        value: usize,
        max: usize,
    },

    #[error(
        "Response does not match request: sent 0x{sent_command:02X}@0x{sent_address:06X}, \
         echoed 0x{echo_command:02X}@0x{echo_address:06X}"
    )]
    UnexpectedEcho {
        sent_command: u8,
        sent_address: u32,
        echo_command: u8,
        echo_address: u32,
    },

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Codec error: {0}")]
    Codec(CodecError),
}

impl From<TransportError> for ProtocolError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout { timeout_ms } => ProtocolError::Timeout { timeout_ms },
            other => ProtocolError::Io(other),
        }
    }
}

impl From<CodecError> for ProtocolError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::InvalidLength { field, value, max } => {
                ProtocolError::InvalidLength { field, value, max }
            }
            other => ProtocolError::Codec(other),
        }
    }
}

/// Talks the binary bootloader protocol over a byte stream it owns.
pub struct BootloaderClient<T: ByteStream> {
    stream: T,
    response_timeout: Option<Duration>,
    verify_echo: bool,
}

impl<T: ByteStream> BootloaderClient<T> {
    /// Client that waits indefinitely for responses and checks echoes.
    pub fn new(stream: T) -> Self {
        Self {
            stream,
            response_timeout: None,
            verify_echo: true,
        }
    }

    /// Per-read response timeout. `None` waits forever.
    pub fn with_response_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Whether to check that each response echoes the request's opcode and
    /// address.
    pub fn with_echo_check(mut self, verify: bool) -> Self {
        self.verify_echo = verify;
        self
    }

    pub fn stream_mut(&mut self) -> &mut T {
        &mut self.stream
    }

    pub fn into_inner(self) -> T {
        self.stream
    }

    /// Send one command and decode its response.
    pub fn execute(&mut self, command: &BootCommand) -> Result<BootResponse, ProtocolError> {
        let packet = command.encode()?;
        trace!(opcode = %command.opcode(), len = packet.len(), "Sending command");
        self.stream.write_all(&packet)?;

        let expected = command.response_len();
        if expected == 0 {
            return Ok(BootResponse::None);
        }

        let buf = self.read_response(expected)?;
        let (echo, response) = decode(command.opcode(), &buf)?;
        if let Some(echo) = echo {
            self.check_echo(command, &echo)?;
        }
        debug!(opcode = %command.opcode(), response = ?response, "Command complete");
        Ok(response)
    }

    fn read_response(&mut self, expected: usize) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = vec![0u8; expected];
        let mut filled = 0;
        while filled < expected {
            match self
                .stream
                .read_timeout(&mut buf[filled..], self.response_timeout)
            {
                Ok(0) => {
                    return Err(ProtocolError::ShortRead {
                        expected,
                        actual: filled,
                    });
                }
                Ok(n) => filled += n,
                Err(TransportError::Timeout { .. }) if filled > 0 => {
                    return Err(ProtocolError::ShortRead {
                        expected,
                        actual: filled,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(buf)
    }

    fn check_echo(&self, command: &BootCommand, echo: &PacketHeader) -> Result<(), ProtocolError> {
        if !self.verify_echo {
            return Ok(());
        }
        let sent_command = command.opcode().to_u8();
        let sent_address = command.address();
        if echo.command != sent_command || echo.address != sent_address {
            return Err(ProtocolError::UnexpectedEcho {
                sent_command,
                sent_address,
                echo_command: echo.command,
                echo_address: echo.address,
            });
        }
        Ok(())
    }

    pub fn get_version_info(&mut self) -> Result<BootVersionInfo, ProtocolError> {
        match self.execute(&BootCommand::GetVersion)? {
            BootResponse::Version(info) => Ok(info),
            other => Err(unexpected(other)),
        }
    }

    /// Erase `blocks` rows (1..=256) starting at `address`.
    pub fn erase(&mut self, address: u32, blocks: u32) -> Result<BootStatus, ProtocolError> {
        let command = BootCommand::erase_blocks(address, blocks)?;
        self.expect_status(&command)
    }

    pub fn write(&mut self, address: u32, data: &[u8]) -> Result<BootStatus, ProtocolError> {
        let command = BootCommand::Write {
            address,
            data: data.to_vec(),
        };
        self.expect_status(&command)
    }

    /// Device-computed checksum over `[address, address + length)`.
    pub fn checksum(&mut self, address: u32, length: u16) -> Result<u16, ProtocolError> {
        match self.execute(&BootCommand::Checksum { address, length })? {
            BootResponse::Checksum(sum) => Ok(sum),
            other => Err(unexpected(other)),
        }
    }

    /// Leave the bootloader. The device does not answer.
    pub fn reset(&mut self) -> Result<(), ProtocolError> {
        self.execute(&BootCommand::Reset).map(|_| ())
    }

    fn expect_status(&mut self, command: &BootCommand) -> Result<BootStatus, ProtocolError> {
        match self.execute(command)? {
            BootResponse::Status(status) => Ok(status),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: BootResponse) -> ProtocolError {
    ProtocolError::UnexpectedResponse(format!("{:?}", response))
}
