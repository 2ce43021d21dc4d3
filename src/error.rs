//! Crate-wide error types.
//!
//! `TransportError` is what the caller-supplied read/write/writev callbacks
//! report back to the framing layer; it carries no heap allocation so it can
//! be constructed on a hot path. `Error` is the crate's own result type for
//! everything above the transport boundary.

use std::io;

use thiserror::Error;

/// What a [`crate::transport::Transport`] callback can report.
///
/// Mirrors POSIX I/O semantics: a short read/write is not an error, `0`
/// signals orderly EOF through the ordinary `Ok(0)` path, and only
/// non-positive returns with a distinguishable cause show up here.
#[derive(Debug)]
pub enum TransportError {
    /// Retryable: the transport has no more bytes/buffer space right now.
    WouldBlock,
    /// Retryable: the underlying call was interrupted before doing any work.
    Interrupted,
    /// Anything else is fatal for the stream.
    Io(io::Error),
}

impl TransportError {
    pub(crate) fn is_retryable(&self) -> bool {
        matches!(self, TransportError::WouldBlock | TransportError::Interrupted)
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock => TransportError::WouldBlock,
            io::ErrorKind::Interrupted => TransportError::Interrupted,
            _ => TransportError::Io(err),
        }
    }
}

/// Errors surfaced while validating an HTTP Upgrade request.
#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("request does not start with GET")]
    NotAGetRequest,

    #[error("HTTP request was not fully received in the single handshake read")]
    IncompleteRequest,

    #[error("request is missing the Sec-WebSocket-Protocol: binary header")]
    MissingBinaryProtocol,

    #[error("request is missing the Sec-WebSocket-Key header")]
    MissingSecWebSocketKey,

    #[error("request headers were not terminated by a blank line")]
    MissingTerminator,

    #[error("failed to parse HTTP request: {0}")]
    HttpParse(#[from] httparse::Error),

    #[error("transport error during handshake: {0}")]
    Io(#[from] io::Error),
}

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("would block")]
    WouldBlock,

    #[error("interrupted")]
    Interrupted,

    #[error("stream is closed (broken pipe)")]
    BrokenPipe,

    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::WouldBlock => Error::WouldBlock,
            TransportError::Interrupted => Error::Interrupted,
            TransportError::Io(e) => Error::Io(e),
        }
    }
}

impl Error {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::WouldBlock | Error::Interrupted)
    }
}
