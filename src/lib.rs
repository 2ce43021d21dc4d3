//! Server-side WebSocket framing (RFC 6455) driven directly by
//! caller-supplied non-blocking I/O, plus a multi-client channel fan-out
//! core for broadcasting to every client subscribed to a logical channel.
//!
//! The framing layer (`frame`, `transport`, `handshake`, `stream`) has no
//! notion of channels or clients; it just turns bytes into frames and
//! frames into bytes over a [`transport::Transport`]. The channel layer
//! (`caps`, `pipe`, `channel_client`, `channel`, `client`, `quiesce`)
//! fans a payload out to every client subscribed to a channel and tracks
//! each client's migration lifecycle, independent of how any one
//! client's bytes actually get framed.

pub mod caps;
pub mod channel;
pub mod channel_client;
pub mod client;
pub mod config;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod pipe;
pub mod quiesce;
pub mod stream;
pub mod transport;

pub use channel::Channel;
pub use channel_client::ChannelClient;
pub use client::Client;
pub use error::Error;
pub use stream::WebSocketStream;
