//! Byte-transport abstraction
//!
//! The client core is transport agnostic: it drives any byte stream that
//! supports deadline-bounded reads and writes. TCP, TLS, UART or an
//! in-memory mock all plug in through the [`Transport`] trait.

/// A blocking byte transport with per-call deadlines.
///
/// The connection must already be established before the client is asked to
/// speak MQTT over it; connecting and closing the underlying stream are the
/// caller's responsibility.
pub trait Transport {
    /// Associated error type
    type Error: core::fmt::Debug;

    /// Read up to `buf.len()` bytes, blocking for at most `timeout_ms`.
    ///
    /// Returns the number of bytes actually read, which may be less than
    /// requested. `Ok(0)` means the deadline passed with no data; `Err`
    /// means the transport itself failed.
    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, Self::Error>;

    /// Write up to `buf.len()` bytes, blocking for at most `timeout_ms`.
    ///
    /// Returns the number of bytes actually written. `Ok(0)` means the
    /// deadline passed before anything could be sent.
    fn write(&mut self, buf: &[u8], timeout_ms: u32) -> Result<usize, Self::Error>;
}

#[cfg(feature = "std")]
mod tcp {
    use super::Transport;
    use crate::error::Error;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::time::Duration;

    /// A [`Transport`] over a `std` TCP stream.
    ///
    /// Per-call deadlines are mapped onto the stream's read/write timeouts;
    /// a timed-out operation reports `Ok(0)` rather than an error, as the
    /// [`Transport`] contract requires.
    #[derive(Debug)]
    pub struct TcpTransport {
        stream: TcpStream,
    }

    impl TcpTransport {
        /// Connect to `remote` (a `host:port` address).
        ///
        /// Establishing the stream is the caller's concern, so failures
        /// here surface as plain I/O errors rather than client errors.
        pub fn connect(remote: &str) -> std::io::Result<Self> {
            Ok(Self {
                stream: TcpStream::connect(remote)?,
            })
        }

        /// Wrap an already-connected stream.
        pub fn new(stream: TcpStream) -> Self {
            Self { stream }
        }

        /// Access the underlying stream, e.g. to shut it down after a
        /// session failure.
        pub fn stream(&self) -> &TcpStream {
            &self.stream
        }
    }

    // A zero timeout would disable the stream timeout entirely, so clamp to
    // one millisecond.
    fn to_duration(timeout_ms: u32) -> Duration {
        Duration::from_millis(u64::from(timeout_ms.max(1)))
    }

    impl Transport for TcpTransport {
        type Error = Error;

        fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, Self::Error> {
            self.stream
                .set_read_timeout(Some(to_duration(timeout_ms)))
                .map_err(|_| Error::ReadError)?;
            match self.stream.read(buf) {
                Ok(n) => Ok(n),
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    Ok(0)
                }
                Err(_) => Err(Error::ReadError),
            }
        }

        fn write(&mut self, buf: &[u8], timeout_ms: u32) -> Result<usize, Self::Error> {
            self.stream
                .set_write_timeout(Some(to_duration(timeout_ms)))
                .map_err(|_| Error::WriteError)?;
            match self.stream.write(buf) {
                Ok(n) => Ok(n),
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    Ok(0)
                }
                Err(_) => Err(Error::WriteError),
            }
        }
    }
}

#[cfg(feature = "std")]
pub use tcp::TcpTransport;
