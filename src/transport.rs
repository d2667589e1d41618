//! Byte link to the radio.
//!
//! The clone engine never opens ports itself; it drives whatever
//! [`Transport`] it is handed. With the `serial` feature a
//! [`SerialTransport`] over the `serialport` crate is available.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("short read: expected {expected} bytes, received {received}")]
    ShortRead { expected: usize, received: usize },
    #[error("transport closed")]
    Closed,
    #[cfg(feature = "serial")]
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Half-duplex byte stream with a per-read timeout.
pub trait Transport {
    /// Write all of `data`.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Read up to `buf.len()` bytes; returns 0 when the read timeout elapses
    /// with nothing received.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Switch the link speed. Links without a baud rate ignore this.
    fn set_baud_rate(&mut self, _baud: u32) -> Result<()> {
        Ok(())
    }

    /// Drop any pending input (line noise after a speed change).
    fn discard_input(&mut self) -> Result<()> {
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Read exactly `n` bytes, or fail with [`TransportError::ShortRead`]
    /// once a read times out.
    fn read_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        let mut received = 0;
        while received < n {
            match self.read(&mut buf[received..])? {
                0 => {
                    return Err(TransportError::ShortRead {
                        expected: n,
                        received,
                    })
                }
                k => received += k,
            }
        }
        Ok(buf)
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        (**self).set_baud_rate(baud)
    }

    fn discard_input(&mut self) -> Result<()> {
        (**self).discard_input()
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        (**self).set_baud_rate(baud)
    }

    fn discard_input(&mut self) -> Result<()> {
        (**self).discard_input()
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

#[cfg(feature = "serial")]
pub use serial::SerialTransport;

#[cfg(feature = "serial")]
mod serial {
    use super::*;
    use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
    use std::io::{Read, Write};
    use std::time::Duration;

    /// Serial port link (8N1, no flow control).
    pub struct SerialTransport {
        port: Box<dyn SerialPort>,
    }

    impl SerialTransport {
        pub fn open(device: &str, baud: u32, timeout: Duration) -> Result<Self> {
            let port = serialport::new(device, baud)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .flow_control(FlowControl::None)
                .timeout(timeout)
                .open()?;
            log::info!("Opened serial port {} at {} baud", device, baud);
            Ok(SerialTransport { port })
        }

        pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
            self.port.set_timeout(timeout)?;
            Ok(())
        }
    }

    impl Transport for SerialTransport {
        fn write(&mut self, data: &[u8]) -> Result<()> {
            self.port.write_all(data)?;
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            match self.port.read(buf) {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
                Err(e) => Err(e.into()),
            }
        }

        fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
            self.port.set_baud_rate(baud)?;
            Ok(())
        }

        fn discard_input(&mut self) -> Result<()> {
            self.port.clear(ClearBuffer::Input)?;
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            self.port.flush()?;
            Ok(())
        }
    }
}
