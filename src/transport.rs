//! The non-blocking I/O boundary.
//!
//! [`Transport`] stands in for the three callbacks the framing core is
//! driven through: `read`, `write`, and `writev`. It mirrors POSIX
//! semantics rather than `std::io::Read`/`Write` directly so that
//! `WouldBlock`/`Interrupted` are ordinary, cheap, non-allocating return
//! values instead of `io::Error`s threaded through a generic stream type —
//! the same shape the teacher's own generic `R: AsyncRead, W: AsyncWrite`
//! bounds serve for its async callers.

use crate::error::TransportError;

/// A non-blocking byte-oriented endpoint.
///
/// Implementors must never block; `Ok(0)` means orderly EOF (the peer shut
/// down its write side), matching the read(2)/write(2) convention the rest
/// of this crate's state machines are built on.
pub trait Transport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError>;

    /// Writes `bufs` in order, returning the total bytes written across
    /// however many of them were consumed. The default forwards to
    /// `write` one at a time and stops at the first short write; concrete
    /// transports (`TcpStream`) can override this with a real
    /// `writev(2)`/`write_vectored` to avoid the extra syscalls.
    fn writev(&mut self, bufs: &[&[u8]]) -> Result<usize, TransportError> {
        let mut total = 0;
        for buf in bufs {
            if buf.is_empty() {
                continue;
            }
            let n = self.write(buf)?;
            total += n;
            if n < buf.len() {
                break;
            }
        }
        Ok(total)
    }
}

/// A `std::net::TcpStream` adapter, used only by `demos/echo_server.rs`.
/// The stream must already be in non-blocking mode.
pub struct TcpTransport(pub std::net::TcpStream);

impl Transport for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        use std::io::Read;
        Ok(self.0.read(buf)?)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        use std::io::Write;
        Ok(self.0.write(buf)?)
    }

    fn writev(&mut self, bufs: &[&[u8]]) -> Result<usize, TransportError> {
        use std::io::{IoSlice, Write};
        let slices: Vec<IoSlice> = bufs.iter().map(|b| IoSlice::new(b)).collect();
        Ok(self.0.write_vectored(&slices)?)
    }
}

#[cfg(test)]
pub(crate) mod test_double {
    use super::*;
    use std::collections::VecDeque;

    /// An in-memory transport that can be told to return `WouldBlock` after
    /// a fixed number of bytes, to exercise partial-I/O resumption without a
    /// real socket.
    #[derive(Default)]
    pub struct MemTransport {
        pub inbound: VecDeque<u8>,
        pub outbound: Vec<u8>,
        pub read_chunk: Option<usize>,
        pub write_chunk: Option<usize>,
        /// When `inbound` runs dry, return `Ok(0)` (transport EOF) instead
        /// of `Err(WouldBlock)`.
        pub eof: bool,
        /// Number of times `writev` has been called, so a test can assert a
        /// header and payload went out together in one combined call.
        pub writev_calls: usize,
    }

    impl MemTransport {
        pub fn with_inbound(bytes: &[u8]) -> Self {
            Self {
                inbound: bytes.iter().copied().collect(),
                ..Default::default()
            }
        }
    }

    impl Transport for MemTransport {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
            if self.inbound.is_empty() {
                if self.eof {
                    return Ok(0);
                }
                return Err(TransportError::WouldBlock);
            }
            let cap = self.read_chunk.unwrap_or(buf.len()).min(buf.len());
            let n = cap.min(self.inbound.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.inbound.pop_front().unwrap();
            }
            Ok(n)
        }

        fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
            let n = self.write_chunk.unwrap_or(buf.len()).min(buf.len());
            self.outbound.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn writev(&mut self, bufs: &[&[u8]]) -> Result<usize, TransportError> {
            self.writev_calls += 1;
            let mut total = 0;
            for buf in bufs {
                if buf.is_empty() {
                    continue;
                }
                let n = self.write(buf)?;
                total += n;
                if n < buf.len() {
                    break;
                }
            }
            Ok(total)
        }
    }
}
