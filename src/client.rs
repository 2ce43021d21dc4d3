//! The per-participant aggregate: every channel a client has joined, plus
//! the migration state machine that coordinates handing that client off
//! to a new server.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use crate::channel_client::ChannelClient;

/// Collaborator the `Client` calls back into when migration completes or
/// the client is destroyed — the seam a concrete server implementation
/// hangs its own bookkeeping off, standing in for the direct function
/// calls the source makes into its server module.
pub trait ServerDispatch: Send + Sync {
    fn on_migrate_complete(&self, client_id: u64);
    fn on_client_destroyed(&self, client_id: u64);
}

pub struct Client {
    pub id: u64,
    channels: Mutex<Vec<Arc<ChannelClient>>>,
    migration_seamless: AtomicBool,
    /// Set for the duration of a non-seamless ("target") migration —
    /// `semi_seamless_migrate_complete` refuses to run unless this is
    /// `true`, so it can't be called outside the window the migration
    /// protocol actually opens for it.
    during_target_migrate: AtomicBool,
    /// Number of channels still mid-seamless-migration. Goes negative
    /// only as a bug, which is why `seamless_migration_done_for_channel`
    /// asserts rather than saturating.
    seamless_pending: AtomicI64,
    destroyed: AtomicBool,
}

impl Client {
    pub fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            channels: Mutex::new(Vec::new()),
            migration_seamless: AtomicBool::new(false),
            during_target_migrate: AtomicBool::new(false),
            seamless_pending: AtomicI64::new(0),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn add_channel(&self, channel_client: Arc<ChannelClient>) {
        self.channels.lock().unwrap().push(channel_client);
    }

    pub fn get_channel(&self, channel_type: u32, channel_id: u64) -> Option<Arc<ChannelClient>> {
        self.channels
            .lock()
            .unwrap()
            .iter()
            .find(|cc| cc.channel().channel_type == channel_type && cc.channel().id == channel_id)
            .cloned()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.lock().unwrap().len()
    }

    pub fn set_migration_seamless(&self, seamless: bool) {
        self.migration_seamless.store(seamless, Ordering::Release);
        if seamless {
            let n = self.channels.lock().unwrap().len() as i64;
            self.seamless_pending.store(n, Ordering::Release);
        } else {
            self.during_target_migrate.store(true, Ordering::Release);
        }
    }

    pub fn is_migration_seamless(&self) -> bool {
        self.migration_seamless.load(Ordering::Acquire)
    }

    /// Marks the non-seamless ("target") migration path complete: checks
    /// that such a migration is actually in progress, notifies every
    /// connected channel-client, and signals `dispatch`. Calling this
    /// outside a target migration, or while a seamless migration is in
    /// progress, is a program error — the two paths are mutually
    /// exclusive, so it asserts instead of returning an `Error` the
    /// caller might paper over.
    pub fn semi_seamless_migrate_complete(&self, dispatch: &dyn ServerDispatch) {
        assert!(
            self.during_target_migrate.load(Ordering::Acquire),
            "semi-seamless completion called while no target migration is in progress"
        );
        assert!(
            !self.is_migration_seamless(),
            "semi-seamless completion called while a seamless migration is in progress"
        );
        for cc in self.channels.lock().unwrap().iter() {
            cc.channel().invoke_migrate(cc);
        }
        self.during_target_migrate.store(false, Ordering::Release);
        dispatch.on_migrate_complete(self.id);
    }

    /// Call once per channel as that channel's seamless migration
    /// finishes. Returns `true` exactly once, when the last pending
    /// channel completes — the caller uses that edge to fire the overall
    /// migration-complete signal.
    pub fn seamless_migration_done_for_channel(&self) -> bool {
        let remaining = self.seamless_pending.fetch_sub(1, Ordering::AcqRel) - 1;
        assert!(
            remaining >= 0,
            "seamless_migration_done_for_channel called more times than there are channels"
        );
        remaining == 0
    }

    /// For each connected channel-client, invokes that channel's `migrate`
    /// callback — logging and proceeding rather than panicking if called
    /// off the channel's owning thread, same as any other cross-thread
    /// channel access. Distinct from `semi_seamless_migrate_complete`:
    /// this just fans the migrate notification out per channel and
    /// doesn't touch the seamless/semi-seamless completion bookkeeping.
    pub fn migrate(&self) {
        for cc in self.channels.lock().unwrap().iter() {
            cc.check_thread();
            cc.channel().invoke_migrate(cc);
        }
    }

    /// Tears the client down. Asserts no `ChannelClient` outlives this
    /// call with another owner still holding it — a ref-leak-at-free is a
    /// fatal bug, per the documented "program assertion — fatal" policy,
    /// not a recoverable error.
    pub fn destroy(&self, dispatch: &dyn ServerDispatch) {
        let mut channels = self.channels.lock().unwrap();
        for cc in channels.drain(..) {
            assert_eq!(
                Arc::strong_count(&cc),
                1,
                "ref-leak-at-free: channel client {} still has external owners",
                cc.id
            );
            cc.channel().remove(cc.id);
        }
        self.destroyed.store(true, Ordering::Release);
        dispatch.on_client_destroyed(self.id);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::channel_client::FramedTransport;
    use crate::error::Error;
    use std::sync::atomic::AtomicU64;

    struct NullTransport;
    impl FramedTransport for NullTransport {
        fn write_message(&mut self, _payload: &[u8]) -> Result<(), Error> {
            Ok(())
        }
        fn flush(&mut self) -> Result<bool, Error> {
            Ok(true)
        }
    }

    #[derive(Default)]
    struct RecordingDispatch {
        migrate_completions: AtomicU64,
        destructions: AtomicU64,
    }

    impl ServerDispatch for RecordingDispatch {
        fn on_migrate_complete(&self, _client_id: u64) {
            self.migrate_completions.fetch_add(1, Ordering::Relaxed);
        }
        fn on_client_destroyed(&self, _client_id: u64) {
            self.destructions.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn seamless_migration_completes_on_last_channel() {
        let client = Client::new(1);
        let channel = Arc::new(Channel::new(0, 1));
        let cc1 = ChannelClient::new(1, channel.clone(), Box::new(NullTransport));
        let cc2 = ChannelClient::new(2, channel, Box::new(NullTransport));
        client.add_channel(cc1);
        client.add_channel(cc2);
        client.set_migration_seamless(true);

        assert!(!client.seamless_migration_done_for_channel());
        assert!(client.seamless_migration_done_for_channel());
    }

    #[test]
    fn migrate_invokes_each_connected_channels_migrate_callback() {
        let client = Client::new(1);
        let channel = Arc::new(Channel::new(0, 1));
        let cc = ChannelClient::new(1, channel.clone(), Box::new(NullTransport));
        channel.add(&cc);
        client.add_channel(cc);

        let migrated = Arc::new(AtomicU64::new(0));
        let counter = migrated.clone();
        channel.set_callbacks(crate::channel::ChannelCallbacks {
            migrate: Some(Box::new(move |_cc| {
                counter.fetch_add(1, Ordering::Relaxed);
            })),
            ..Default::default()
        });

        client.migrate();
        assert_eq!(migrated.load(Ordering::Relaxed), 1);
    }

    #[test]
    #[should_panic(expected = "semi-seamless completion called while no target migration")]
    fn semi_seamless_complete_panics_outside_a_target_migration() {
        let client = Client::new(1);
        let dispatch = RecordingDispatch::default();
        client.semi_seamless_migrate_complete(&dispatch);
    }

    #[test]
    #[should_panic(expected = "semi-seamless completion called while a seamless migration")]
    fn semi_seamless_complete_panics_during_seamless_migration() {
        let client = Client::new(1);
        client.set_migration_seamless(false);
        client.set_migration_seamless(true);
        let dispatch = RecordingDispatch::default();
        client.semi_seamless_migrate_complete(&dispatch);
    }

    #[test]
    fn semi_seamless_complete_notifies_channels_and_dispatch() {
        let client = Client::new(1);
        let channel = Arc::new(Channel::new(0, 1));
        let cc = ChannelClient::new(1, channel.clone(), Box::new(NullTransport));
        channel.add(&cc);
        client.add_channel(cc);
        client.set_migration_seamless(false);

        let migrated = Arc::new(AtomicU64::new(0));
        let counter = migrated.clone();
        channel.set_callbacks(crate::channel::ChannelCallbacks {
            migrate: Some(Box::new(move |_cc| {
                counter.fetch_add(1, Ordering::Relaxed);
            })),
            ..Default::default()
        });

        let dispatch = RecordingDispatch::default();
        client.semi_seamless_migrate_complete(&dispatch);

        assert_eq!(migrated.load(Ordering::Relaxed), 1);
        assert_eq!(dispatch.migrate_completions.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn destroy_removes_client_from_its_channels() {
        let client = Client::new(1);
        let channel = Arc::new(Channel::new(0, 7));
        let cc = ChannelClient::new(1, channel.clone(), Box::new(NullTransport));
        channel.add(&cc);
        client.add_channel(cc);

        let dispatch = RecordingDispatch::default();
        client.destroy(&dispatch);

        assert_eq!(channel.client_count(), 0);
        assert!(client.is_destroyed());
        assert_eq!(dispatch.destructions.load(Ordering::Relaxed), 1);
    }
}
