//! serialport-based transport implementation.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info, instrument};

use super::traits::{ByteStream, TransportError};

/// Port timeout used while waiting without a deadline. Reads are retried
/// until data arrives.
const BLOCKING_POLL: Duration = Duration::from_secs(1);

/// Serial port transport, 8N1 without flow control.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    path: String,
    port_timeout: Duration,
}

impl SerialTransport {
    /// Open `path` at `baud_rate`.
    #[instrument(level = "info")]
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, TransportError> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(BLOCKING_POLL)
            .open()
            .map_err(|e| TransportError::OpenFailed {
                port: path.to_string(),
                message: e.to_string(),
            })?;

        info!(port = %path, baud = baud_rate, "Opened serial port");

        Ok(Self {
            port,
            path: path.to_string(),
            port_timeout: BLOCKING_POLL,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn baud_rate(&self) -> Result<u32, TransportError> {
        self.port
            .baud_rate()
            .map_err(|e| TransportError::ReadFailed(e.to_string()))
    }

    fn set_port_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        if self.port_timeout != timeout {
            self.port
                .set_timeout(timeout)
                .map_err(|e| TransportError::ReadFailed(e.to_string()))?;
            self.port_timeout = timeout;
        }
        Ok(())
    }
}

impl ByteStream for SerialTransport {
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let n = self
            .port
            .write(data)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        self.port
            .flush()
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        Ok(n)
    }

    fn read_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, TransportError> {
        self.set_port_timeout(timeout.unwrap_or(BLOCKING_POLL))?;
        loop {
            match self.port.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::TimedOut => match timeout {
                    Some(t) => {
                        return Err(TransportError::Timeout {
                            timeout_ms: t.as_millis() as u64,
                        });
                    }
                    None => continue,
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        debug!(port = %self.path, "Clearing input buffer");
        self.port
            .clear(ClearBuffer::Input)
            .map_err(|e| TransportError::ReadFailed(e.to_string()))
    }
}
