//! The channel registry: the set of clients subscribed to one logical
//! channel, and the fan-out/broadcast operations driven across them.
//!
//! Membership is held as `Weak<ChannelClient>` — the channel never owns
//! its clients, only observes them; the owning `Client` aggregate (via its
//! `Arc<ChannelClient>`) is what keeps a membership alive. This is the
//! other half of the cycle break described in `channel_client.rs`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, ThreadId};

use crate::caps::CapSet;
use crate::channel_client::ChannelClient;
use crate::error::Error;
use crate::pipe::{PipeItem, PushPosition};

/// A single client-facing callback, invoked with the `ChannelClient` it
/// concerns. Boxed closures stand in for the source's callback-plus-opaque-
/// data-pointer pair: a Rust closure already carries whatever state the
/// data pointer would have pointed at.
type ClientCallback = Box<dyn Fn(&Arc<ChannelClient>) + Send + Sync>;

/// The four lifecycle callbacks a channel owner can hang off a `Channel`:
/// fired as a client joins, leaves, or migrates off this channel.
#[derive(Default)]
pub struct ChannelCallbacks {
    pub connect: Option<ClientCallback>,
    pub disconnect: Option<ClientCallback>,
    pub migrate: Option<ClientCallback>,
}

pub struct Channel {
    pub id: u64,
    /// Identifies what kind of channel this is (display, inputs, etc);
    /// together with `id` this is the `(type, id)` address clients look
    /// channels up by.
    pub channel_type: u32,
    owning_thread: Mutex<ThreadId>,
    /// This channel's own locally-advertised capabilities — what *this*
    /// channel offers, as two bitsets (common and channel-specific).
    /// Distinct from `test_remote_cap`/`test_remote_common_cap`, which
    /// report what connected *clients* have advertised.
    local_common_caps: Mutex<CapSet>,
    local_caps: Mutex<CapSet>,
    clients: Mutex<Vec<Weak<ChannelClient>>>,
    outgoing_window: AtomicU64,
    callbacks: Mutex<ChannelCallbacks>,
}

impl Channel {
    pub fn new(channel_type: u32, id: u64) -> Self {
        Self {
            id,
            channel_type,
            owning_thread: Mutex::new(thread::current().id()),
            local_common_caps: Mutex::new(CapSet::new()),
            local_caps: Mutex::new(CapSet::new()),
            clients: Mutex::new(Vec::new()),
            outgoing_window: AtomicU64::new(0),
            callbacks: Mutex::new(ChannelCallbacks::default()),
        }
    }

    pub fn set_callbacks(&self, callbacks: ChannelCallbacks) {
        *self.callbacks.lock().unwrap() = callbacks;
    }

    pub fn check_thread(&self) {
        let current = thread::current().id();
        let owner = *self.owning_thread.lock().unwrap();
        if current != owner {
            log::warn!("channel {} accessed off its owning thread", self.id);
        }
    }

    pub fn add(&self, client: &Arc<ChannelClient>) {
        self.check_thread();
        self.clients.lock().unwrap().push(Arc::downgrade(client));
        log::debug!("channel {}: client {} added", self.id, client.id);
        if let Some(cb) = &self.callbacks.lock().unwrap().connect {
            cb(client);
        }
    }

    pub fn remove(&self, client_id: u64) {
        self.check_thread();
        let mut clients = self.clients.lock().unwrap();
        let mut removed = None;
        clients.retain(|weak| match weak.upgrade() {
            Some(c) if c.id == client_id => {
                removed = Some(c);
                false
            }
            Some(_) => true,
            None => false,
        });
        drop(clients);

        if let Some(client) = removed {
            client.notify_disconnect();
            if let Some(cb) = &self.callbacks.lock().unwrap().disconnect {
                cb(&client);
            }
        }
        log::debug!("channel {}: client {} removed", self.id, client_id);
    }

    /// Invokes the channel's `migrate` callback for `client`, logging (not
    /// panicking) if called off this channel's owning thread — migration
    /// is one of the documented cases where that happens routinely.
    pub fn invoke_migrate(&self, client: &Arc<ChannelClient>) {
        self.check_thread();
        if let Some(cb) = &self.callbacks.lock().unwrap().migrate {
            cb(client);
        }
    }

    /// Live, upgraded clients; dead weak references are pruned as a side
    /// effect of iterating.
    fn live_clients(&self) -> Vec<Arc<ChannelClient>> {
        let mut clients = self.clients.lock().unwrap();
        clients.retain(|weak| weak.strong_count() > 0);
        clients.iter().filter_map(Weak::upgrade).collect()
    }

    pub fn set_common_cap(&self, bit: u32) {
        self.local_common_caps.lock().unwrap().set(bit);
    }

    pub fn set_cap(&self, bit: u32) {
        self.local_caps.lock().unwrap().set(bit);
    }

    /// Whether every currently-connected client advertises the common
    /// capability `bit` — ANDed across clients exactly like
    /// `test_remote_cap` does for the channel-specific bit. `local_common_caps`
    /// records what this channel itself advertises and plays no part in
    /// this check.
    pub fn test_remote_common_cap(&self, bit: u32) -> bool {
        self.live_clients().iter().all(|c| c.test_common_cap(bit))
    }

    /// Whether every currently-connected client supports `bit`. An empty
    /// channel reads as `true` (Rust's `Iterator::all` on an empty
    /// iterator) — the chosen resolution for the spec's vacuous-truth
    /// open question.
    pub fn test_remote_cap(&self, bit: u32) -> bool {
        self.live_clients().iter().all(|c| c.test_cap(bit))
    }

    pub fn apply<F: Fn(&Arc<ChannelClient>)>(&self, f: F) {
        for client in self.live_clients() {
            f(&client);
        }
    }

    /// Queues the same payload to every connected client's pipe.
    pub fn apply_data(&self, msg_type: u32, data: &[u8]) {
        for client in self.live_clients() {
            client.push(PipeItem::new(msg_type, data.to_vec()), PushPosition::Tail);
        }
    }

    pub fn pipes_add_type(&self, msg_type: u32, data: &[u8]) {
        for client in self.live_clients() {
            client.pipes_add_type(PipeItem::new(msg_type, data.to_vec()));
        }
    }

    pub fn pipes_add_empty_msg(&self, msg_type: u32) {
        for client in self.live_clients() {
            client.pipes_add_empty_msg(msg_type);
        }
    }

    /// Invokes `creator` once per connected client with a monotonically
    /// increasing index starting at 0, pushing every non-`None` result at
    /// `position`. Returns the number of items actually pushed — unlike
    /// `apply_data`/`pipes_add_type`, which fan the same payload out to
    /// every client, this lets `creator` build a per-client item (or skip
    /// a client entirely) from shared `data`.
    pub fn pipes_new_add<D, F>(&self, creator: F, data: &D, position: PushPosition) -> u32
    where
        F: Fn(&Arc<ChannelClient>, &D, u32) -> Option<PipeItem>,
    {
        let mut count = 0;
        for (index, client) in self.live_clients().iter().enumerate() {
            if let Some(item) = creator(client, data, index as u32) {
                client.push(item, position);
                count += 1;
            }
        }
        count
    }

    pub fn max_pipe_size(&self) -> usize {
        self.live_clients().iter().map(|c| c.pipe_size()).max().unwrap_or(0)
    }

    pub fn min_pipe_size(&self) -> usize {
        self.live_clients().iter().map(|c| c.pipe_size()).min().unwrap_or(0)
    }

    pub fn sum_pipes_size(&self) -> usize {
        self.live_clients().iter().map(|c| c.pipe_size()).sum()
    }

    pub fn first_socket(&self) -> Option<Arc<ChannelClient>> {
        self.live_clients().into_iter().next()
    }

    pub fn all_blocked(&self) -> bool {
        let clients = self.live_clients();
        !clients.is_empty() && clients.iter().all(|c| c.is_blocked())
    }

    pub fn any_blocked(&self) -> bool {
        self.live_clients().iter().any(|c| c.is_blocked())
    }

    pub fn no_item_being_sent(&self) -> bool {
        self.live_clients().iter().all(|c| c.no_item_being_sent())
    }

    pub fn init_outgoing_window(&self, window: u64) {
        self.outgoing_window.store(window, Ordering::Release);
    }

    pub fn outgoing_window(&self) -> u64 {
        self.outgoing_window.load(Ordering::Acquire)
    }

    /// Serializes each client's queued pipe items into its write buffer.
    pub fn send(&self) {
        for client in self.live_clients() {
            client.send();
        }
    }

    /// Flushes each client's write buffer to its transport. Returns `true`
    /// once every client has nothing left to flush.
    pub fn push(&self) -> Result<bool, Error> {
        let mut all_flushed = true;
        for client in self.live_clients() {
            if !client.push_out()? {
                all_flushed = false;
            }
        }
        Ok(all_flushed)
    }

    pub fn client_count(&self) -> usize {
        self.live_clients().len()
    }
}
