//! A runnable demo wiring a real `TcpStream` through the handshake and
//! `WebSocketStream` read/write state machine. Echoes every binary
//! message back to its sender. Not part of the public API surface —
//! `cargo run --bin echo_server -- <port>`.

use std::net::TcpListener;
use std::time::Duration;

use wsframe::config::WebSocketConfig;
use wsframe::error::Error;
use wsframe::handshake::accept_handshake;
use wsframe::stream::WebSocketStream;
use wsframe::transport::TcpTransport;

fn main() {
    env_logger::init();

    let port: u16 = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(9001);

    let listener = TcpListener::bind(("0.0.0.0", port)).expect("bind");
    log::info!("echo server listening on port {}", port);

    for incoming in listener.incoming() {
        let stream = match incoming {
            Ok(s) => s,
            Err(e) => {
                log::warn!("accept failed: {}", e);
                continue;
            }
        };
        stream.set_nonblocking(true).expect("set_nonblocking");
        std::thread::spawn(move || handle_connection(stream));
    }
}

fn handle_connection(stream: std::net::TcpStream) {
    let config = WebSocketConfig::default();
    let mut transport = TcpTransport(stream);

    if let Err(e) = accept_handshake(&mut transport, &config) {
        log::warn!("handshake failed: {}", e);
        return;
    }

    let mut ws = WebSocketStream::new(transport, config);
    let mut buf = vec![0u8; 4096];

    loop {
        match ws.read(&mut buf) {
            Ok(0) => {
                while !ws.flush().unwrap_or(true) {
                    std::thread::sleep(Duration::from_millis(5));
                }
                break;
            }
            Ok(n) => {
                if let Err(e) = ws.write_message(&buf[..n]) {
                    log::debug!("write failed: {}", e);
                    break;
                }
                while !ws.flush().unwrap_or(true) {
                    std::thread::sleep(Duration::from_millis(5));
                }
            }
            Err(Error::WouldBlock) | Err(Error::Interrupted) => {
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(e) => {
                log::debug!("connection closed: {}", e);
                break;
            }
        }
    }
}
