//! The per-client outgoing item queue and the handler collaborator trait.

use std::collections::VecDeque;

use crate::channel_client::ChannelClient;
use crate::error::Error;

/// One item queued for delivery to a single client. `Empty` stands in for
/// a marker pushed by `pipes_add_empty_msg` (used to track a position in
/// the queue without a real payload).
#[derive(Debug, Clone)]
pub enum PipeItemPayload {
    Data(Vec<u8>),
    Empty,
}

#[derive(Debug, Clone)]
pub struct PipeItem {
    /// Application-defined message type, opaque to the channel layer.
    pub msg_type: u32,
    pub payload: PipeItemPayload,
}

impl PipeItem {
    pub fn new(msg_type: u32, payload: Vec<u8>) -> Self {
        Self {
            msg_type,
            payload: PipeItemPayload::Data(payload),
        }
    }

    pub fn empty(msg_type: u32) -> Self {
        Self {
            msg_type,
            payload: PipeItemPayload::Empty,
        }
    }

    pub fn size(&self) -> usize {
        match &self.payload {
            PipeItemPayload::Data(d) => d.len(),
            PipeItemPayload::Empty => 0,
        }
    }
}

/// Per-client event vtable — the safe-Rust replacement for the handler
/// struct of function pointers the source server dispatches socket and
/// message events through. A caller supplies one per `ChannelClient` so
/// the channel layer can fan messages out without knowing the concrete
/// message format any particular channel type uses.
pub trait ChannelClientHandler: Send {
    /// Called once the client's socket is attached to its channel, before
    /// any messages are dispatched to it.
    fn config_socket(&mut self, channel_client: &ChannelClient) -> Result<(), Error>;

    /// Called as the client's socket is about to be torn down.
    fn on_disconnect(&mut self, channel_client: &ChannelClient);

    /// Allocates a scratch buffer for an inbound message of `size` bytes.
    fn alloc_recv_buf(&mut self, size: usize) -> Vec<u8> {
        vec![0u8; size]
    }

    /// Returns a buffer previously handed out by `alloc_recv_buf`.
    fn release_recv_buf(&mut self, _buf: Vec<u8>) {}

    /// Dispatches a raw inbound payload that `parser` declined to split.
    fn handle_message(&mut self, channel_client: &ChannelClient, data: &[u8]) -> Result<(), Error>;

    /// Dispatches a payload `parser` already split into `(msg_type, data)`.
    fn handle_parsed(
        &mut self,
        channel_client: &ChannelClient,
        msg_type: u32,
        data: &[u8],
    ) -> Result<(), Error>;

    /// Serializes one queued outbound item into wire bytes. An `Err`
    /// drops the item (logged, not fatal to the rest of the pipe).
    fn send_item(&mut self, channel_client: &ChannelClient, item: &PipeItem) -> Result<Vec<u8>, Error>;

    /// Splits a raw inbound payload into `(msg_type, data)` for channels
    /// that use typed messages. The default declines to split, routing
    /// every payload to `handle_message` instead of `handle_parsed`.
    fn parser(&mut self, _raw: &[u8]) -> Option<(u32, Vec<u8>)> {
        None
    }

    /// Dispatches payload carried over from the server this client
    /// migrated from.
    fn handle_migrate_data(&mut self, channel_client: &ChannelClient, data: &[u8]) -> Result<(), Error>;
}

/// Where a new pipe item goes relative to the existing queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushPosition {
    Head,
    Tail,
    /// Insert immediately after the item at this queue index.
    After(usize),
}

/// A FIFO of outgoing items for one client, plus the bookkeeping
/// `pipes_new_add`/`pipes_add_type` need.
#[derive(Debug, Default)]
pub struct PipeQueue {
    items: VecDeque<PipeItem>,
}

impl PipeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total_size(&self) -> usize {
        self.items.iter().map(PipeItem::size).sum()
    }

    pub fn push(&mut self, item: PipeItem, position: PushPosition) {
        match position {
            PushPosition::Head => self.items.push_front(item),
            PushPosition::Tail => self.items.push_back(item),
            PushPosition::After(idx) => {
                let idx = idx.min(self.items.len());
                self.items.insert(idx, item);
            }
        }
    }

    /// Adds `item` at the tail unless the queue already contains an item
    /// of the same `msg_type` with no newer one after it — the
    /// `pipes_add_type` coalescing rule: don't queue a duplicate
    /// notification when an equivalent one is already pending.
    pub fn add_type(&mut self, item: PipeItem) {
        if self.items.iter().any(|i| i.msg_type == item.msg_type) {
            return;
        }
        self.items.push_back(item);
    }

    pub fn add_empty_msg(&mut self, msg_type: u32) {
        self.items.push_back(PipeItem::empty(msg_type));
    }

    pub fn pop_front(&mut self) -> Option<PipeItem> {
        self.items.pop_front()
    }

    pub fn front(&self) -> Option<&PipeItem> {
        self.items.front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_head_and_tail_order_items() {
        let mut q = PipeQueue::new();
        q.push(PipeItem::new(1, vec![1]), PushPosition::Tail);
        q.push(PipeItem::new(2, vec![2]), PushPosition::Head);
        assert_eq!(q.front().unwrap().msg_type, 2);
    }

    #[test]
    fn add_type_skips_duplicate_pending_type() {
        let mut q = PipeQueue::new();
        q.add_type(PipeItem::new(5, vec![]));
        q.add_type(PipeItem::new(5, vec![1, 2, 3]));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn total_size_sums_data_items_only() {
        let mut q = PipeQueue::new();
        q.push(PipeItem::new(1, vec![0; 10]), PushPosition::Tail);
        q.add_empty_msg(2);
        assert_eq!(q.total_size(), 10);
    }
}
