//! # Pub/Sub Registry
//!
//! Purpose: channel subscriptions and fan-out, grounded in
//! `tinydb_pubsub.c`'s `Subscribe`/`Unsubscribe`/`Unsubscribe_All`/
//! `Publish`. A channel disappears once its last subscriber leaves.
//!
//! Where the source hands a raw socket fd to a worker thread for a
//! blocking `write()`, this registry hands the worker pool an
//! `UnboundedSender<String>` into the subscriber's own connection task —
//! the send is still dispatched off the event loop (via the worker
//! pool), but delivery onto the socket happens on the tokio task that
//! already owns that `TcpStream`, never by a second task reaching across
//! to someone else's fd.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;

pub type ConnectionId = u64;
pub type MessageSender = UnboundedSender<String>;

struct Subscriber {
    id: ConnectionId,
    sender: MessageSender,
}

pub struct PubSubRegistry {
    channels: Mutex<HashMap<String, Vec<Subscriber>>>,
}

impl PubSubRegistry {
    pub fn new() -> Self {
        PubSubRegistry {
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self, channel: &str, id: ConnectionId, sender: MessageSender) {
        let mut channels = self.channels.lock();
        channels
            .entry(channel.to_string())
            .or_default()
            .push(Subscriber { id, sender });
    }

    pub fn unsubscribe(&self, channel: &str, id: ConnectionId) {
        let mut channels = self.channels.lock();
        if let Some(subs) = channels.get_mut(channel) {
            subs.retain(|s| s.id != id);
            if subs.is_empty() {
                channels.remove(channel);
            }
        }
    }

    pub fn unsubscribe_all(&self, id: ConnectionId) {
        let mut channels = self.channels.lock();
        channels.retain(|_, subs| {
            subs.retain(|s| s.id != id);
            !subs.is_empty()
        });
    }

    /// Returns every subscriber's sender for `channel`, paired with the
    /// message to deliver. Callers enqueue one send task per entry on the
    /// worker pool rather than writing here directly.
    pub fn fan_out(&self, channel: &str, message: &str) -> Vec<(MessageSender, String)> {
        let channels = self.channels.lock();
        match channels.get(channel) {
            Some(subs) => subs
                .iter()
                .map(|s| (s.sender.clone(), message.to_string()))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn channel_exists(&self, channel: &str) -> bool {
        self.channels.lock().contains_key(channel)
    }
}

impl Default for PubSubRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub const HOOK_CHANNEL_PREFIX: &str = "@hook";

pub fn is_hook_channel(channel: &str) -> bool {
    channel.starts_with(HOOK_CHANNEL_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_then_fan_out_reaches_subscriber() {
        let registry = PubSubRegistry::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        registry.subscribe("ch", 1, tx);

        let sends = registry.fan_out("ch", "hi");
        assert_eq!(sends.len(), 1);
        sends[0].0.send(sends[0].1.clone()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), "hi");
    }

    #[test]
    fn unsubscribe_removes_empty_channel() {
        let registry = PubSubRegistry::new();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        registry.subscribe("ch", 1, tx);
        registry.unsubscribe("ch", 1);
        assert!(!registry.channel_exists("ch"));
    }

    #[test]
    fn unsubscribe_all_cleans_every_channel_on_disconnect() {
        let registry = PubSubRegistry::new();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        registry.subscribe("a", 1, tx.clone());
        registry.subscribe("b", 1, tx);
        registry.unsubscribe_all(1);
        assert!(!registry.channel_exists("a"));
        assert!(!registry.channel_exists("b"));
    }

    #[test]
    fn hook_prefix_is_detected() {
        assert!(is_hook_channel("@hook-orders"));
        assert!(!is_hook_channel("orders"));
    }
}
