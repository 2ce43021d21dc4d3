//! Exercises the handshake end to end through the public `Transport`
//! trait, the way a real (non-blocking) socket would be driven.

use std::collections::VecDeque;

use wsframe::config::WebSocketConfig;
use wsframe::error::TransportError;
use wsframe::handshake::accept_handshake;
use wsframe::transport::Transport;

#[derive(Default)]
struct MockSocket {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
}

impl Transport for MockSocket {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.inbound.is_empty() {
            return Err(TransportError::WouldBlock);
        }
        let n = buf.len().min(self.inbound.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.inbound.pop_front().unwrap();
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        self.outbound.extend_from_slice(buf);
        Ok(buf.len())
    }
}

#[test]
fn valid_upgrade_request_gets_a_101_response_with_the_correct_accept_key() {
    let request = b"GET /chat HTTP/1.1\r\n\
Host: example.com\r\n\
Upgrade: websocket\r\n\
Connection: Upgrade\r\n\
Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
Sec-WebSocket-Protocol: binary\r\n\
Sec-WebSocket-Version: 13\r\n\
\r\n";
    let mut socket = MockSocket {
        inbound: request.iter().copied().collect(),
        outbound: Vec::new(),
    };

    accept_handshake(&mut socket, &WebSocketConfig::default()).expect("handshake should succeed");

    let response = String::from_utf8(socket.outbound).unwrap();
    assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
}

#[test]
fn request_without_binary_protocol_header_is_rejected() {
    let request = b"GET / HTTP/1.1\r\n\
Host: example.com\r\n\
Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
\r\n";
    let mut socket = MockSocket {
        inbound: request.iter().copied().collect(),
        outbound: Vec::new(),
    };

    let result = accept_handshake(&mut socket, &WebSocketConfig::default());
    assert!(result.is_err());
    assert!(socket.outbound.is_empty());
}
