//! Scripted transport for deterministic protocol tests.
//!
//! [`MockTransport`] answers each write with a pre-loaded response,
//! so handshake, framing and checksum handling can be tested without a
//! radio attached.
//!
//! ```
//! use radiomem::{MockTransport, Transport};
//!
//! let mut mock = MockTransport::new();
//! mock.expect(b"PROGRAM", &[0x06]);
//! mock.write(b"PROGRAM").unwrap();
//! assert_eq!(mock.read_exact(1).unwrap(), vec![0x06]);
//! ```

use crate::transport::{Result, Transport, TransportError};
use std::collections::VecDeque;
use std::io;

#[derive(Debug, Clone)]
struct Expectation {
    request: Vec<u8>,
    response: Vec<u8>,
}

/// Expectations are consumed in order: every `write()` must match the next
/// one exactly, and its response becomes readable. Reads past the end of
/// the queued bytes behave like a timeout and return 0.
#[derive(Debug)]
pub struct MockTransport {
    expectations: VecDeque<Expectation>,
    rx: VecDeque<u8>,
    connected: bool,
    echo: bool,
    strict: bool,
    sent_log: Vec<Vec<u8>>,
    baud_log: Vec<u32>,
}

impl MockTransport {
    pub fn new() -> Self {
        MockTransport {
            expectations: VecDeque::new(),
            rx: VecDeque::new(),
            connected: true,
            echo: false,
            strict: true,
            sent_log: Vec::new(),
            baud_log: Vec::new(),
        }
    }

    /// When `request` is written, make `response` readable.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// Make bytes readable without waiting for a write.
    pub fn queue_rx(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes);
    }

    /// Loop every written byte back before its response, like a
    /// single-wire programming cable.
    pub fn set_echo(&mut self, echo: bool) {
        self.echo = echo;
    }

    /// With `strict` off, writes that run past the script are accepted and
    /// only logged.
    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    /// While disconnected every call fails with [`TransportError::Closed`].
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Every `write()` payload, in order.
    pub fn sent_data(&self) -> &[Vec<u8>] {
        &self.sent_log
    }

    /// Number of writes equal to `frame`.
    pub fn count_sent(&self, frame: &[u8]) -> usize {
        self.sent_log.iter().filter(|s| s.as_slice() == frame).count()
    }

    /// Baud rates requested through `set_baud_rate`, in order.
    pub fn baud_rates(&self) -> &[u32] {
        &self.baud_log
    }

    pub fn remaining_expectations(&self) -> usize {
        self.expectations.len()
    }

    /// Bytes queued but not yet read.
    pub fn pending_rx(&self) -> usize {
        self.rx.len()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(TransportError::Closed);
        }
        self.sent_log.push(data.to_vec());
        if self.echo {
            self.rx.extend(data);
        }
        match self.expectations.pop_front() {
            Some(expectation) if expectation.request == data => {
                self.rx.extend(expectation.response);
                Ok(())
            }
            Some(expectation) => Err(TransportError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "unexpected write: expected {:02X?}, got {:02X?}",
                    expectation.request, data
                ),
            ))),
            None if self.strict => Err(TransportError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("no more expectations for write {:02X?}", data),
            ))),
            None => Ok(()),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.connected {
            return Err(TransportError::Closed);
        }
        let n = buf.len().min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        if !self.connected {
            return Err(TransportError::Closed);
        }
        self.baud_log.push(baud);
        Ok(())
    }

    fn discard_input(&mut self) -> Result<()> {
        self.rx.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_matching_write() {
        let mut mock = MockTransport::new();
        mock.expect(&[0x52, 0x00, 0x10], &[0x57, 0x00, 0x10, 0xAA]);
        mock.write(&[0x52, 0x00, 0x10]).unwrap();
        assert_eq!(mock.read_exact(4).unwrap(), vec![0x57, 0x00, 0x10, 0xAA]);
        assert_eq!(mock.remaining_expectations(), 0);
    }

    #[test]
    fn rejects_unexpected_write() {
        let mut mock = MockTransport::new();
        mock.expect(&[1], &[2]);
        assert!(mock.write(&[9]).is_err());
        assert_eq!(mock.sent_data(), &[vec![9]]);
    }

    #[test]
    fn short_read_is_reported() {
        let mut mock = MockTransport::new();
        mock.queue_rx(&[1, 2]);
        match mock.read_exact(4) {
            Err(TransportError::ShortRead { expected, received }) => {
                assert_eq!((expected, received), (4, 2));
            }
            other => panic!("expected short read, got {:?}", other),
        }
    }

    #[test]
    fn echo_precedes_response() {
        let mut mock = MockTransport::new();
        mock.set_echo(true);
        mock.expect(b"AB", b"Z");
        mock.write(b"AB").unwrap();
        assert_eq!(mock.read_exact(3).unwrap(), b"ABZ".to_vec());
    }

    #[test]
    fn disconnected_mock_fails() {
        let mut mock = MockTransport::new();
        mock.set_connected(false);
        assert!(matches!(mock.write(&[0]), Err(TransportError::Closed)));
        let mut buf = [0u8; 1];
        assert!(matches!(mock.read(&mut buf), Err(TransportError::Closed)));
    }
}
