//! The read/write state machine driven directly by a [`Transport`].
//!
//! Both directions are resumable: a `WouldBlock` from the transport leaves
//! `WebSocketStream` in a state that picks back up exactly where it left
//! off on the next call, rather than losing partially-read header bytes or
//! partially-written payload bytes.
//!
//! Both directions are byte-buffer based rather than whole-message based:
//! `read` delivers up to the caller's buffer length of the *current*
//! frame's payload per call, so a frame's payload is never required to sit
//! in memory all at once; `write`/`writev` hand the header and payload to
//! the transport as a single combined `Transport::writev` call instead of
//! two separate ones.

use bytes::BytesMut;

use crate::config::WebSocketConfig;
use crate::error::Error;
use crate::frame::{fill_out_header, Frame, OpCode};
use crate::transport::Transport;

/// What's left to flush on the write side. Only one outgoing item is ever
/// in flight at a time — `write_message` refuses a new one until the
/// current one reaches `Idle`.
enum WriteState {
    Idle,
    /// Header and payload are sent together through `Transport::writev` —
    /// `header_pos`/`payload_pos` track how far a short write got into
    /// each half independently, since a single `writev` call can stop
    /// partway through either one.
    Sending {
        header: [u8; 10],
        header_len: usize,
        header_pos: usize,
        payload: BytesMut,
        payload_pos: usize,
    },
    SendingClose {
        frame: [u8; 2],
        pos: usize,
    },
}

pub struct WebSocketStream<T: Transport> {
    transport: T,
    frame: Frame,
    write_state: WriteState,
    config: WebSocketConfig,
    closed: bool,
}

impl<T: Transport> WebSocketStream<T> {
    pub fn new(transport: T, config: WebSocketConfig) -> Self {
        Self {
            transport,
            frame: Frame::new(),
            write_state: WriteState::Idle,
            config,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Reads up to `buf.len()` bytes of the current frame's payload into
    /// `buf`, returning how many were delivered. A frame whose payload is
    /// larger than `buf` is drained across however many calls it takes —
    /// the full payload is never buffered in memory at once.
    ///
    /// Returns `Ok(0)` on a peer Close frame or on transport EOF
    /// (`Transport::read` returning `0`) — both are an orderly read-side
    /// close, not an error; `Error::BrokenPipe` is reserved for writing to
    /// a transport that's already known to be closed. A retryable
    /// transport error (`WouldBlock`/`Interrupted`) surfaces as the
    /// matching `Error` variant so the caller can retry later.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if self.closed {
            return Ok(0);
        }

        loop {
            if !self.frame.frame_ready && !self.read_header()? {
                return Err(Error::WouldBlock);
            }
            if self.closed {
                return Ok(0);
            }

            let remaining = (self.frame.expected_len - self.frame.relayed) as usize;
            if remaining == 0 {
                let opcode = self.frame.opcode;
                self.frame.reset();
                match opcode {
                    OpCode::Close => {
                        self.closed = true;
                        self.queue_close_ack()?;
                        return Ok(0);
                    }
                    other => {
                        if other != OpCode::Binary {
                            log::warn!("discarding frame with unsupported opcode {:?}", other);
                        }
                        continue;
                    }
                }
            }

            if buf.is_empty() {
                return Ok(0);
            }

            if self.frame.opcode.is_control() {
                // Ping/Pong payload: drain and discard, never handed to the
                // caller (PING/PONG generation and handling is out of scope).
                let chunk_len = remaining.min(self.config.discard_drain_chunk);
                let mut scratch = vec![0u8; chunk_len];
                match self.transport.read(&mut scratch) {
                    Ok(0) => {
                        self.closed = true;
                        return Ok(0);
                    }
                    Ok(n) => {
                        self.frame.apply_mask(&mut scratch[..n]);
                        continue;
                    }
                    Err(e) if e.is_retryable() => return Err(Error::from(e)),
                    Err(e) => return Err(Error::from(e)),
                }
            }

            let take = remaining.min(buf.len());
            return match self.transport.read(&mut buf[..take]) {
                Ok(0) => {
                    self.closed = true;
                    Ok(0)
                }
                Ok(n) => {
                    self.frame.apply_mask(&mut buf[..n]);
                    Ok(n)
                }
                Err(e) => Err(Error::from(e)),
            };
        }
    }

    /// Feeds whatever header bytes the transport has right now. Returns
    /// `Ok(true)` once the header is fully parsed (or the transport hit
    /// EOF, in which case `self.closed` is set), `Ok(false)` if the
    /// transport has nothing more right now.
    fn read_header(&mut self) -> Result<bool, Error> {
        let needed = self.frame.bytes_needed();
        let mut header_buf = [0u8; 14];
        match self.transport.read(&mut header_buf[..needed]) {
            Ok(0) => {
                self.closed = true;
                Ok(true)
            }
            Ok(n) => {
                self.frame.feed_header(&header_buf[..n]);
                if self.frame.bytes_needed() == 0 {
                    self.frame.parse_header()?;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Err(e) if e.is_retryable() => Err(Error::from(e)),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn queue_close_ack(&mut self) -> Result<(), Error> {
        if matches!(self.write_state, WriteState::Idle) {
            self.write_state = WriteState::SendingClose {
                frame: [0x88, 0x00],
                pos: 0,
            };
        }
        Ok(())
    }

    /// Enqueues the concatenation of `iov` as a single final, unmasked
    /// binary frame. `flush` sends the header and this payload together
    /// through one `Transport::writev` call rather than two separate
    /// transport writes. Fails if a previous message hasn't finished
    /// flushing yet.
    pub fn writev(&mut self, iov: &[&[u8]]) -> Result<(), Error> {
        if !matches!(self.write_state, WriteState::Idle) {
            return Err(Error::Protocol("previous write still in flight"));
        }
        let total_len: usize = iov.iter().map(|b| b.len()).sum();
        let (header, header_len) = fill_out_header(total_len as u64);
        let mut payload = BytesMut::with_capacity(total_len);
        for b in iov {
            payload.extend_from_slice(b);
        }
        self.write_state = WriteState::Sending {
            header,
            header_len,
            header_pos: 0,
            payload,
            payload_pos: 0,
        };
        Ok(())
    }

    /// Enqueues `payload` as a single final, unmasked binary frame.
    /// Equivalent to `writev(&[payload])`.
    pub fn write_message(&mut self, payload: &[u8]) -> Result<(), Error> {
        self.writev(&[payload])
    }

    /// Drives the write state machine. Returns `true` once fully flushed
    /// (state is back to `Idle`), `false` if blocked with more to send.
    ///
    /// Each iteration takes ownership of the current state (leaving
    /// `Idle` behind) so the transport call below never overlaps with a
    /// live borrow of `self.write_state` — the state is always written
    /// back explicitly before the next loop turn or return.
    pub fn flush(&mut self) -> Result<bool, Error> {
        loop {
            let state = std::mem::replace(&mut self.write_state, WriteState::Idle);
            match state {
                WriteState::Idle => return Ok(true),
                WriteState::Sending {
                    header,
                    header_len,
                    header_pos,
                    payload,
                    payload_pos,
                } => {
                    if header_pos == header_len && payload_pos == payload.len() {
                        return Ok(true);
                    }
                    let header_slice = &header[header_pos..header_len];
                    let payload_slice = &payload[payload_pos..];
                    match self.transport.writev(&[header_slice, payload_slice]) {
                        Ok(0) => return Err(Error::BrokenPipe),
                        Ok(mut n) => {
                            let mut new_header_pos = header_pos;
                            let mut new_payload_pos = payload_pos;
                            let header_remaining = header_slice.len();
                            if n <= header_remaining {
                                new_header_pos += n;
                                n = 0;
                            } else {
                                new_header_pos = header_len;
                                n -= header_remaining;
                            }
                            new_payload_pos += n;
                            self.write_state = WriteState::Sending {
                                header,
                                header_len,
                                header_pos: new_header_pos,
                                payload,
                                payload_pos: new_payload_pos,
                            };
                        }
                        Err(e) if e.is_retryable() => {
                            self.write_state = WriteState::Sending {
                                header,
                                header_len,
                                header_pos,
                                payload,
                                payload_pos,
                            };
                            return Ok(false);
                        }
                        Err(e) => return Err(Error::from(e)),
                    }
                }
                WriteState::SendingClose { frame, pos } => {
                    if pos == frame.len() {
                        return Ok(true);
                    }
                    match self.transport.write(&frame[pos..]) {
                        Ok(0) => return Err(Error::BrokenPipe),
                        Ok(n) => {
                            self.write_state = WriteState::SendingClose { frame, pos: pos + n };
                        }
                        Err(e) if e.is_retryable() => {
                            self.write_state = WriteState::SendingClose { frame, pos };
                            return Ok(false);
                        }
                        Err(e) => return Err(Error::from(e)),
                    }
                }
            }
        }
    }

    /// Queues an unsolicited Close frame and starts flushing it.
    pub fn close(&mut self) -> Result<(), Error> {
        self.queue_close_ack()
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_double::MemTransport;

    #[test]
    fn reads_a_complete_unfragmented_binary_frame() {
        let bytes = [0x82u8, 0x03, b'h', b'i', b'!'];
        let transport = MemTransport::with_inbound(&bytes);
        let mut stream = WebSocketStream::new(transport, WebSocketConfig::default());
        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hi!");
    }

    #[test]
    fn reads_a_frame_delivered_in_multiple_short_reads() {
        let bytes = [0x82u8, 0x05, b'h', b'e', b'l', b'l', b'o'];
        let mut transport = MemTransport::with_inbound(&bytes);
        transport.read_chunk = Some(2);
        let mut stream = WebSocketStream::new(transport, WebSocketConfig::default());
        let mut result = Vec::new();
        let mut buf = [0u8; 16];
        while result.len() < 5 {
            match stream.read(&mut buf) {
                Ok(n) => result.extend_from_slice(&buf[..n]),
                Err(Error::WouldBlock) => continue,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(result, b"hello");
    }

    #[test]
    fn read_delivers_at_most_the_callers_buffer_len() {
        let bytes = [0x82u8, 0x05, b'h', b'e', b'l', b'l', b'o'];
        let transport = MemTransport::with_inbound(&bytes);
        let mut stream = WebSocketStream::new(transport, WebSocketConfig::default());
        let mut buf = [0u8; 2];
        let n = stream.read(&mut buf).unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buf[..n], b"he");
        let n = stream.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ll");
        let n = stream.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"o");
    }

    #[test]
    fn close_frame_marks_stream_closed_and_queues_ack() {
        let bytes = [0x88u8, 0x00];
        let transport = MemTransport::with_inbound(&bytes);
        let mut stream = WebSocketStream::new(transport, WebSocketConfig::default());
        let mut buf = [0u8; 16];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
        assert!(stream.is_closed());
        assert!(stream.flush().unwrap());
        assert_eq!(&stream.transport.outbound, &[0x88, 0x00]);
    }

    #[test]
    fn transport_eof_on_read_is_a_clean_close_not_an_error() {
        let mut transport = MemTransport::default();
        transport.eof = true;
        let mut stream = WebSocketStream::new(transport, WebSocketConfig::default());
        let mut buf = [0u8; 16];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
        assert!(stream.is_closed());
    }

    #[test]
    fn write_message_resumes_across_short_writes() {
        let transport = MemTransport::default();
        let mut stream = WebSocketStream::new(transport, WebSocketConfig::default());
        stream.transport.write_chunk = Some(1);
        stream.write_message(b"hello").unwrap();
        while !stream.flush().unwrap() {}
        assert_eq!(stream.transport.outbound, vec![0x82, 0x05, b'h', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn flush_sends_header_and_payload_in_a_single_writev_call() {
        let transport = MemTransport::default();
        let mut stream = WebSocketStream::new(transport, WebSocketConfig::default());
        stream.write_message(b"hello").unwrap();
        assert!(stream.flush().unwrap());
        assert_eq!(stream.transport.writev_calls, 1);
        assert_eq!(stream.transport.outbound, vec![0x82, 0x05, b'h', b'e', b'l', b'l', b'o']);
    }
}
