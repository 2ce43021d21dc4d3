//! Tunables for the framing and channel layers.

/// Handshake/framing tunables, plain data with sensible defaults — the
/// shape of the teacher's own `WebSocketConfig`, generalized to this
/// crate's synchronous design.
#[derive(Debug, Clone, Copy)]
pub struct WebSocketConfig {
    /// Size of the single extra read performed during the handshake.
    pub handshake_buffer_len: usize,
    /// Chunk size used to drain and discard a frame's remaining payload
    /// when its opcode isn't recognized by the caller.
    pub discard_drain_chunk: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig {
            handshake_buffer_len: 4 * 1024,
            discard_drain_chunk: 128,
        }
    }
}

/// Tunables for channel registry / broadcast behavior.
#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    /// Poll interval used by `wait_all_sent` while draining outgoing
    /// buffers before a migration or teardown.
    pub quiesce_poll_interval: std::time::Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            quiesce_poll_interval: std::time::Duration::from_millis(10),
        }
    }
}
