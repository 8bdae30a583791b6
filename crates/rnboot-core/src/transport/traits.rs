//! Byte-stream transport abstraction.
//!
//! Defines the `ByteStream` trait the bootloader client talks through,
//! allowing different implementations (serial port, mock, simulator).

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to open {port}: {message}")]
    OpenFailed { port: String, message: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Stream closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn timeout_ms(timeout: Option<Duration>) -> u64 {
    timeout.map(|t| t.as_millis() as u64).unwrap_or(0)
}

/// Duplex byte channel to the module.
///
/// This trait enables:
/// - Production implementation over a serial port
/// - Mock and simulated devices for testing
pub trait ByteStream: Send {
    /// Write some bytes, returning how many were accepted.
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Read whatever is available into `buf`, waiting at most `timeout`.
    /// `None` blocks until data arrives. Returns `Timeout` if nothing
    /// arrived in time and `Ok(0)` only when the stream has closed.
    fn read_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, TransportError>;

    /// Write the whole buffer, looping over partial writes.
    fn write_all(&mut self, mut data: &[u8]) -> Result<(), TransportError> {
        while !data.is_empty() {
            match self.write(data)? {
                0 => return Err(TransportError::Closed),
                n => data = &data[n..],
            }
        }
        Ok(())
    }

    /// Fill `buf` completely. The timeout applies to each underlying read.
    fn read_exact_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<(), TransportError> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read_timeout(&mut buf[filled..], timeout) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => filled += n,
                Err(TransportError::Timeout { .. }) => {
                    return Err(TransportError::Timeout {
                        timeout_ms: timeout_ms(timeout),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Discard any pending input.
    fn clear_input(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

impl<T: ByteStream + ?Sized> ByteStream for &mut T {
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        (**self).write(data)
    }

    fn read_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, TransportError> {
        (**self).read_timeout(buf, timeout)
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        (**self).clear_input()
    }
}

impl<T: ByteStream + ?Sized> ByteStream for Box<T> {
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        (**self).write(data)
    }

    fn read_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, TransportError> {
        (**self).read_timeout(buf, timeout)
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        (**self).clear_input()
    }
}
