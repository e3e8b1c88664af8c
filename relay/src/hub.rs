//! Named broadcast channels.
//!
//! Each channel is one `tokio::sync::broadcast` sender shared by every
//! connection subscribed to it. A channel exists while it has members.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::ws::Utf8Bytes;
use tokio::sync::broadcast;

/// One serialized relay frame and the connection that produced it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub sender: u32,
    pub text: Utf8Bytes,
}

struct ChannelEntry {
    tx: broadcast::Sender<Frame>,
    members: usize,
}

/// A connection's membership in one channel.
pub struct Subscription {
    pub conn_id: u32,
    pub channel: String,
    pub tx: broadcast::Sender<Frame>,
    pub rx: broadcast::Receiver<Frame>,
}

#[derive(Clone)]
pub struct ChannelHub {
    channels: Arc<Mutex<HashMap<String, ChannelEntry>>>,
    next_conn_id: Arc<AtomicU32>,
    capacity: usize,
}

impl ChannelHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            next_conn_id: Arc::new(AtomicU32::new(1)),
            capacity,
        }
    }

    /// Subscribe a new connection to `channel`, creating it if needed.
    pub fn join(&self, channel: &str) -> Subscription {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let mut channels = self.lock();
        let entry = channels
            .entry(channel.to_string())
            .or_insert_with(|| ChannelEntry {
                tx: broadcast::channel(self.capacity).0,
                members: 0,
            });
        entry.members += 1;
        tracing::debug!(channel, conn_id, members = entry.members, "Joined channel");

        Subscription {
            conn_id,
            channel: channel.to_string(),
            tx: entry.tx.clone(),
            rx: entry.tx.subscribe(),
        }
    }

    /// Drop one membership; the channel goes away with its last member.
    pub fn leave(&self, channel: &str) {
        let mut channels = self.lock();
        let emptied = match channels.get_mut(channel) {
            Some(entry) => {
                entry.members = entry.members.saturating_sub(1);
                entry.members == 0
            }
            None => false,
        };
        if emptied {
            channels.remove(channel);
            tracing::debug!(channel, "Channel closed");
        }
    }

    pub fn channel_count(&self) -> usize {
        self.lock().len()
    }

    pub fn member_count(&self, channel: &str) -> usize {
        self.lock().get(channel).map(|e| e.members).unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ChannelEntry>> {
        // A poisoned map is still structurally valid
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_ids_are_unique() {
        let hub = ChannelHub::new(8);
        let a = hub.join("room");
        let b = hub.join("room");
        let c = hub.join("other");
        assert_ne!(a.conn_id, b.conn_id);
        assert_ne!(b.conn_id, c.conn_id);
    }

    #[test]
    fn channel_removed_with_last_member() {
        let hub = ChannelHub::new(8);
        let _a = hub.join("room");
        let _b = hub.join("room");
        assert_eq!(hub.member_count("room"), 2);

        hub.leave("room");
        assert_eq!(hub.channel_count(), 1);
        hub.leave("room");
        assert_eq!(hub.channel_count(), 0);
        assert_eq!(hub.member_count("room"), 0);
    }

    #[tokio::test]
    async fn frames_reach_every_member_of_the_channel_only() {
        let hub = ChannelHub::new(8);
        let a = hub.join("room");
        let mut b = hub.join("room");
        let mut other = hub.join("elsewhere");

        a.tx.send(Frame {
            sender: a.conn_id,
            text: Utf8Bytes::from("hello".to_string()),
        })
        .unwrap();

        let frame = b.rx.recv().await.unwrap();
        assert_eq!(frame.sender, a.conn_id);
        assert_eq!(frame.text.as_str(), "hello");
        assert!(other.rx.try_recv().is_err());
    }
}
