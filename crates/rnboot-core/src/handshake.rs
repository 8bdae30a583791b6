//! Text-mode commands understood by the module firmware.
//!
//! Before the bootloader runs, the RN2483 answers ASCII commands terminated
//! by CR LF. Only two are needed here: reading the firmware version and
//! erasing the application so the bootloader takes over on the next boot.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::client::ProtocolError;
use crate::protocol::{MAX_TEXT_RESPONSE, TEXT_CMD_ERASE_FW, TEXT_CMD_GET_VERSION};
use crate::transport::{ByteStream, TransportError};

/// Line-oriented console over a byte stream.
pub struct TextConsole<T: ByteStream> {
    stream: T,
}

impl<T: ByteStream> TextConsole<T> {
    pub fn new(stream: T) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> T {
        self.stream
    }

    /// Ask the firmware for its version string. The whole reply must arrive
    /// within `timeout`; `None` waits indefinitely.
    pub fn get_version(&mut self, timeout: Option<Duration>) -> Result<String, ProtocolError> {
        self.stream.clear_input()?;
        self.stream.write_all(TEXT_CMD_GET_VERSION.as_bytes())?;
        let version = self.read_line(timeout)?;
        info!(version = %version, "Module firmware version");
        Ok(version)
    }

    /// Erase the application firmware. The module reboots into its
    /// bootloader and sends nothing back.
    pub fn erase_firmware(&mut self) -> Result<(), ProtocolError> {
        debug!("Sending firmware erase command");
        self.stream.write_all(TEXT_CMD_ERASE_FW.as_bytes())?;
        Ok(())
    }

    /// Read up to a newline, with CR LF stripped.
    fn read_line(&mut self, timeout: Option<Duration>) -> Result<String, ProtocolError> {
        let timeout_ms = timeout.map_or(0, |t| t.as_millis() as u64);
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut line = Vec::with_capacity(MAX_TEXT_RESPONSE);
        let mut byte = [0u8; 1];
        loop {
            let remaining = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Err(ProtocolError::Timeout { timeout_ms });
                    }
                    Some(left)
                }
                None => None,
            };
            let n = self
                .stream
                .read_timeout(&mut byte, remaining)
                .map_err(|e| match e {
                    TransportError::Timeout { .. } => ProtocolError::Timeout { timeout_ms },
                    other => other.into(),
                })?;
            if n == 0 {
                return Err(ProtocolError::ShortRead {
                    expected: line.len() + 1,
                    actual: line.len(),
                });
            }
            if byte[0] == b'\n' {
                break;
            }
            if line.len() == MAX_TEXT_RESPONSE {
                return Err(ProtocolError::UnexpectedResponse(format!(
                    "text response longer than {} bytes",
                    MAX_TEXT_RESPONSE
                )));
            }
            line.push(byte[0]);
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }
}
