//! Mock byte-stream transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::traits::{ByteStream, TransportError};

/// Mock transport for unit testing protocol exchanges.
///
/// Reads are served from a queue of scripted responses. A read drains the
/// front response (possibly across several calls when `buf` is short) and
/// times out once the queue is empty. Handles are cheap clones sharing the
/// same queue and write log, so a test can keep one while the client owns
/// another.
#[derive(Clone)]
pub struct MockTransport {
    /// Queued responses to return on read.
    response_queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
    /// Captured writes.
    write_log: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Whether the stream is "open".
    connected: Arc<Mutex<bool>>,
    /// Maximum bytes accepted per write call, to exercise partial writes.
    max_write: Option<usize>,
    /// Number of write calls that succeed before writes start failing.
    write_limit: Option<usize>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            response_queue: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            connected: Arc::new(Mutex::new(true)),
            max_write: None,
            write_limit: None,
        }
    }

    /// Accept at most `n` bytes per write call.
    pub fn with_max_write(mut self, n: usize) -> Self {
        self.max_write = Some(n);
        self
    }

    /// Fail every write call after the first `n`.
    pub fn with_write_limit(mut self, n: usize) -> Self {
        self.write_limit = Some(n);
        self
    }

    /// Queue a response to be returned on subsequent reads.
    pub fn queue_response(&self, bytes: &[u8]) {
        self.response_queue
            .lock()
            .unwrap()
            .push_back(bytes.to_vec());
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.write_log.lock().unwrap().clone()
    }

    /// All written bytes concatenated.
    pub fn written_bytes(&self) -> Vec<u8> {
        self.write_log.lock().unwrap().concat()
    }

    pub fn clear_writes(&self) {
        self.write_log.lock().unwrap().clear();
    }

    /// Number of responses not yet consumed.
    pub fn pending_responses(&self) -> usize {
        self.response_queue.lock().unwrap().len()
    }

    /// Simulate the other end closing the stream.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.lock().unwrap()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteStream for MockTransport {
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::WriteFailed("stream closed".into()));
        }
        let mut log = self.write_log.lock().unwrap();
        if self.write_limit.is_some_and(|limit| log.len() >= limit) {
            return Err(TransportError::WriteFailed("write limit reached".into()));
        }
        let n = self.max_write.map_or(data.len(), |max| max.min(data.len()));
        log.push(data[..n].to_vec());
        Ok(n)
    }

    fn read_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, TransportError> {
        if !self.is_connected() {
            return Ok(0);
        }
        let mut queue = self.response_queue.lock().unwrap();
        let Some(front) = queue.front_mut() else {
            return Err(TransportError::Timeout {
                timeout_ms: timeout.map(|t| t.as_millis() as u64).unwrap_or(0),
            });
        };
        let n = buf.len().min(front.len());
        buf[..n].copy_from_slice(&front[..n]);
        front.drain(..n);
        if front.is_empty() {
            queue.pop_front();
        }
        Ok(n)
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        self.response_queue.lock().unwrap().clear();
        Ok(())
    }
}
