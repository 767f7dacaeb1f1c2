//! Event Bus
//!
//! One broadcast channel per user, created lazily on first subscribe or
//! publish and dropped again once the last subscriber is gone.

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;

/// Events pushed to a user's live connections
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UserEvent {
    /// A receipt kind of a sale reached its public URL
    ReceiptResolved {
        order_id: u64,
        kind: String,
        url: String,
    },
    /// A withdrawal was confirmed paid
    WithdrawalPaid { task_id: String, paid_at: u64 },
}

/// Process-local per-user publish/subscribe
pub struct EventBus {
    channels: DashMap<String, broadcast::Sender<UserEvent>>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus; `capacity` bounds the per-user backlog for slow readers
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity,
        }
    }

    /// Subscribe to a user's events
    pub fn subscribe(&self, user_id: &str) -> broadcast::Receiver<UserEvent> {
        self.channels
            .entry(user_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Publish an event to a user's subscribers, best-effort.
    ///
    /// No subscribers is a no-op; the channel is removed so idle users do not
    /// accumulate senders.
    pub fn publish(&self, user_id: &str, event: UserEvent) {
        let delivered = match self.channels.get(user_id) {
            Some(sender) => sender.send(event).is_ok(),
            None => return,
        };

        if !delivered {
            self.channels
                .remove_if(user_id, |_, sender| sender.receiver_count() == 0);
        }
    }

    /// Number of users with an open channel
    pub fn active_users(&self) -> usize {
        self.channels.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
