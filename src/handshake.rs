//! HTTP Upgrade handshake validation.
//!
//! The server performs exactly one additional, fixed-size read beyond
//! whatever the caller already buffered, parses it as an HTTP request with
//! `httparse` (already in the teacher's dependency table), and either
//! rejects it or computes `Sec-WebSocket-Accept` and writes the literal 101
//! response.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};

use crate::config::WebSocketConfig;
use crate::error::{Error, HandshakeError};
use crate::transport::Transport;

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const MAX_HEADERS: usize = 32;

const RESPONSE_PREFIX: &str = "HTTP/1.1 101 Switching Protocols\r\n\
Connection: Upgrade\r\n\
Upgrade: websocket\r\n\
Sec-WebSocket-Accept: ";
const RESPONSE_SUFFIX: &str = "\r\n\r\n";

/// Reads and validates the HTTP Upgrade request from `transport`, then
/// writes the 101 response. Performs a single fixed-size read into
/// `config.handshake_buffer_len` bytes of scratch space; a request that
/// doesn't fit or arrive in one read is rejected rather than retried, per
/// the spec's "single additional read" handshake model.
pub fn accept_handshake<T: Transport>(
    transport: &mut T,
    config: &WebSocketConfig,
) -> Result<(), Error> {
    let mut buf = vec![0u8; config.handshake_buffer_len];
    let n = loop {
        match transport.read(&mut buf) {
            Ok(n) => break n,
            Err(e) if e.is_retryable() => continue,
            Err(e) => return Err(Error::from(e)),
        }
    };
    if n == 0 {
        return Err(Error::Handshake(HandshakeError::IncompleteRequest));
    }

    let accept_key = validate_and_compute_accept(&buf[..n])?;

    let mut response = String::with_capacity(
        RESPONSE_PREFIX.len() + accept_key.len() + RESPONSE_SUFFIX.len(),
    );
    response.push_str(RESPONSE_PREFIX);
    response.push_str(&accept_key);
    response.push_str(RESPONSE_SUFFIX);

    let bytes = response.into_bytes();
    let mut written = 0;
    while written < bytes.len() {
        match transport.write(&bytes[written..]) {
            Ok(n) => written += n,
            Err(e) if e.is_retryable() => continue,
            Err(e) => return Err(Error::from(e)),
        }
    }

    log::debug!("handshake accepted");
    Ok(())
}

fn validate_and_compute_accept(request: &[u8]) -> Result<String, HandshakeError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    let status = req.parse(request)?;
    if status.is_partial() {
        return Err(HandshakeError::IncompleteRequest);
    }

    if req.method != Some("GET") {
        return Err(HandshakeError::NotAGetRequest);
    }

    let header_value = |name: &str| -> Option<&str> {
        req.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .and_then(|h| std::str::from_utf8(h.value).ok())
            .map(str::trim)
    };

    let first_protocol_is_binary = header_value("Sec-WebSocket-Protocol")
        .and_then(|v| v.split(|c: char| c == ',' || c.is_whitespace()).find(|s| !s.is_empty()))
        .map(|first| first.eq_ignore_ascii_case("binary"))
        .unwrap_or(false);
    if !first_protocol_is_binary {
        return Err(HandshakeError::MissingBinaryProtocol);
    }

    let key = header_value("Sec-WebSocket-Key").ok_or(HandshakeError::MissingSecWebSocketKey)?;

    Ok(compute_accept_key(key))
}

fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    BASE64_STANDARD.encode(hasher.finalize())
}
