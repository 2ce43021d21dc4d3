//! Draining outgoing buffers before a migration or teardown.

use std::time::{Duration, Instant};

use crate::channel::Channel;
use crate::config::ChannelConfig;

/// Blocks (polling, not spinning — sleeps `config.quiesce_poll_interval`
/// between attempts) until `channel` has nothing left queued or in
/// flight, or `deadline` elapses. Returns `true` if the channel drained
/// in time.
pub fn wait_all_sent(channel: &Channel, deadline: Duration, config: &ChannelConfig) -> bool {
    let start = Instant::now();
    loop {
        channel.send();
        match channel.push() {
            Ok(true) if channel.no_item_being_sent() => return true,
            Ok(_) => {}
            Err(e) => {
                log::warn!("channel {}: error while quiescing: {}", channel.id, e);
                return false;
            }
        }
        if start.elapsed() >= deadline {
            return false;
        }
        std::thread::sleep(config.quiesce_poll_interval);
    }
}
