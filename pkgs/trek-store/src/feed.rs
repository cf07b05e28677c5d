//! In-process change feed
//!
//! Every write the store commits is published here, to the subscribers of the
//! conversation it touched. Delivery is at most once and only while subscribed;
//! nothing is replayed for late subscribers.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use trek_chat::{FeedEvent, Subscription};

struct Subscriber {
    conversation_id: String,
    sender: mpsc::UnboundedSender<FeedEvent>,
}

/// Fan-out of committed changes to per-conversation subscribers
#[derive(Default)]
pub struct ChangeHub {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, Subscriber>>,
}

impl ChangeHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, conversation_id: &str) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (sender, events) = mpsc::unbounded_channel();
        self.subscribers.lock().insert(
            id,
            Subscriber {
                conversation_id: conversation_id.to_string(),
                sender,
            },
        );
        debug!(conversation_id, subscription_id = id, "Feed subscriber added");
        Subscription {
            id,
            conversation_id: conversation_id.to_string(),
            events,
        }
    }

    /// Drop a subscriber. Unknown identifiers are ignored.
    pub fn unsubscribe(&self, subscription_id: u64) -> bool {
        self.subscribers.lock().remove(&subscription_id).is_some()
    }

    /// Deliver `event` to the subscribers of `conversation_id` and return how
    /// many received it. Subscribers whose receiver is gone are pruned.
    pub fn publish(&self, conversation_id: &str, event: FeedEvent) -> usize {
        let mut subscribers = self.subscribers.lock();
        let mut delivered = 0;
        subscribers.retain(|_, s| {
            if s.conversation_id != conversation_id {
                return true;
            }
            if s.sender.send(event.clone()).is_ok() {
                delivered += 1;
                true
            } else {
                false
            }
        });
        trace!(conversation_id, delivered, "Change published");
        delivered
    }

    /// Report `reason` to every subscriber and drop them all
    pub fn close_all(&self, reason: &str) {
        let subscribers: Vec<Subscriber> = self.subscribers.lock().drain().map(|(_, s)| s).collect();
        for subscriber in subscribers {
            let _ = subscriber.sender.send(FeedEvent::Error(reason.to_string()));
        }
    }

    pub fn subscriber_count(&self, conversation_id: &str) -> usize {
        self.subscribers
            .lock()
            .values()
            .filter(|s| s.conversation_id == conversation_id)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use trek_chat::{Message, Reactions};

    fn message(conversation_id: &str) -> Message {
        Message {
            id: "m1".to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: "alice".to_string(),
            content: "hi".to_string(),
            created_at: Utc::now(),
            edited_at: None,
            is_deleted: false,
            reply_to: None,
            reactions: Reactions::new(),
            sender: None,
            pending: false,
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_only_matching_conversation() {
        let hub = ChangeHub::new();
        let mut a = hub.subscribe("a");
        let mut b = hub.subscribe("b");

        assert_eq!(hub.publish("a", FeedEvent::Inserted(message("a"))), 1);

        assert!(matches!(a.events.recv().await, Some(FeedEvent::Inserted(_))));
        assert!(b.events.try_recv().is_err());
    }

    #[test]
    fn test_dropped_receivers_are_pruned() {
        let hub = ChangeHub::new();
        let subscription = hub.subscribe("a");
        drop(subscription);

        assert_eq!(hub.publish("a", FeedEvent::Inserted(message("a"))), 0);
        assert_eq!(hub.subscriber_count("a"), 0);
    }

    #[tokio::test]
    async fn test_close_all_reports_error() {
        let hub = ChangeHub::new();
        let mut a = hub.subscribe("a");

        hub.close_all("store closed");

        assert!(matches!(a.events.recv().await, Some(FeedEvent::Error(_))));
        assert!(a.events.recv().await.is_none());
        assert!(!hub.unsubscribe(a.id));
    }
}
