//! Realtime ingestion
//!
//! Keeps exactly one change feed subscription, for the conversation the
//! message store has active, and folds its events into the store.
//!
//! # State machine
//!
//! ```text
//! Unsubscribed -> Subscribing -> Subscribed -> Unsubscribed
//! ```
//!
//! The previous subscription is fully torn down before the next one is
//! requested. A feed error drops back to `Unsubscribed`; there is no automatic
//! resubscription or backfill of events missed while disconnected.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::backend::{ChangeFeed, FeedEvent, Subscription};
use crate::directory::ConversationDirectory;
use crate::message_store::MessageStore;
use crate::models::Message;
use crate::profiles::ProfileCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribing,
    Subscribed,
}

struct ActiveSubscription {
    id: u64,
    conversation_id: String,
    pump: JoinHandle<()>,
}

struct Link {
    state: SubscriptionState,
    active: Option<ActiveSubscription>,
}

/// Everything the event pump needs to fold events
#[derive(Clone)]
struct Folder {
    store: Arc<MessageStore>,
    profiles: Arc<ProfileCache>,
    directory: Arc<ConversationDirectory>,
}

impl Folder {
    fn fold(&self, conversation_id: &str, event: FeedEvent) -> Option<JoinHandle<()>> {
        match event {
            FeedEvent::Inserted(message) => self.fold_insert(conversation_id, message),
            FeedEvent::Updated(message) => {
                self.fold_update(conversation_id, message);
                None
            }
            FeedEvent::Error(reason) => {
                warn!(conversation_id, %reason, "Change feed reported an error");
                None
            }
        }
    }

    fn fold_insert(&self, conversation_id: &str, message: Message) -> Option<JoinHandle<()>> {
        if message.conversation_id != conversation_id {
            warn!(
                conversation_id,
                event_conversation = %message.conversation_id,
                "Dropping insert for another conversation"
            );
            return None;
        }

        let sender_id = message.sender_id.clone();
        let created_at = message.created_at;
        let message = Message {
            sender: None,
            pending: false,
            ..message
        };
        let outcome = self.store.reconcile(message)?;
        debug!(
            replaced_pending = ?outcome.replaced_pending,
            inserted = outcome.inserted,
            "Insert event folded"
        );
        if !outcome.inserted {
            return None;
        }
        self.directory.touch(conversation_id, created_at);

        let store = self.store.clone();
        let profiles = self.profiles.clone();
        let conversation_id = conversation_id.to_string();
        Some(tokio::spawn(async move {
            if let Some(profile) = profiles.resolve(&sender_id).await {
                store.attach_profile(&conversation_id, &profile);
            }
        }))
    }

    fn fold_update(&self, conversation_id: &str, message: Message) {
        if message.conversation_id != conversation_id {
            return;
        }
        let id = message.id.clone();
        let applied = self
            .store
            .update(conversation_id, &id, |local| {
                if !local.pending {
                    local.absorb(message);
                }
            })
            .is_some();
        debug!(message_id = %id, applied, "Update event folded");
    }
}

/// Owner of the change feed subscription
pub struct RealtimeIngestion {
    feed: Arc<dyn ChangeFeed>,
    folder: Folder,
    link: Arc<Mutex<Link>>,
    switching: tokio::sync::Mutex<()>,
}

impl RealtimeIngestion {
    pub fn new(
        feed: Arc<dyn ChangeFeed>,
        store: Arc<MessageStore>,
        profiles: Arc<ProfileCache>,
        directory: Arc<ConversationDirectory>,
    ) -> Self {
        Self {
            feed,
            folder: Folder {
                store,
                profiles,
                directory,
            },
            link: Arc::new(Mutex::new(Link {
                state: SubscriptionState::Unsubscribed,
                active: None,
            })),
            switching: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.link.lock().state
    }

    /// Conversation of the live subscription, if any
    pub fn subscribed_conversation(&self) -> Option<String> {
        self.link
            .lock()
            .active
            .as_ref()
            .map(|a| a.conversation_id.clone())
    }

    /// Fold one event for `conversation_id` as if it arrived on the feed.
    ///
    /// Returns the handle of the sender profile resolution spawned for an
    /// inserted message.
    pub fn ingest(&self, conversation_id: &str, event: FeedEvent) -> Option<JoinHandle<()>> {
        self.folder.fold(conversation_id, event)
    }

    /// Bring the subscription in line with the store's active conversation.
    ///
    /// Calls are serialized, and each one re-reads the active conversation, so
    /// overlapping conversation switches converge on the last one.
    #[instrument(skip(self))]
    pub async fn sync(&self) {
        let _switching = self.switching.lock().await;
        let target = self.folder.store.active_conversation_id();

        if let (Some(current), Some(target)) = (self.subscribed_conversation(), target.as_deref()) {
            if current == target {
                return;
            }
        }

        self.teardown().await;

        let Some(conversation_id) = target else {
            return;
        };

        self.link.lock().state = SubscriptionState::Subscribing;
        let subscription = match self.feed.subscribe(&conversation_id).await {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(error = %e, %conversation_id, "Failed to subscribe to change feed");
                self.link.lock().state = SubscriptionState::Unsubscribed;
                return;
            }
        };

        if self.folder.store.active_conversation_id().as_deref() != Some(conversation_id.as_str()) {
            debug!(%conversation_id, "Conversation changed while subscribing");
            self.link.lock().state = SubscriptionState::Unsubscribed;
            if let Err(e) = self.feed.unsubscribe(subscription.id).await {
                warn!(error = %e, "Failed to drop unused subscription");
            }
            return;
        }

        let id = subscription.id;
        // Held across the spawn so the pump never observes a half-registered link
        let mut link = self.link.lock();
        let pump = self.spawn_pump(subscription);
        link.state = SubscriptionState::Subscribed;
        link.active = Some(ActiveSubscription {
            id,
            conversation_id: conversation_id.clone(),
            pump,
        });
        info!(%conversation_id, subscription_id = id, "Subscribed to change feed");
    }

    /// Tear down the live subscription, if any
    pub async fn teardown(&self) {
        let active = {
            let mut link = self.link.lock();
            link.state = SubscriptionState::Unsubscribed;
            link.active.take()
        };
        let Some(active) = active else {
            return;
        };

        active.pump.abort();
        if let Err(e) = self.feed.unsubscribe(active.id).await {
            warn!(error = %e, subscription_id = active.id, "Failed to unsubscribe");
        }
        info!(
            conversation_id = %active.conversation_id,
            subscription_id = active.id,
            "Unsubscribed from change feed"
        );
    }

    fn spawn_pump(&self, subscription: Subscription) -> JoinHandle<()> {
        let folder = self.folder.clone();
        let link = self.link.clone();
        let feed = self.feed.clone();
        let Subscription {
            id,
            conversation_id,
            mut events,
        } = subscription;

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let failed = matches!(event, FeedEvent::Error(_));
                folder.fold(&conversation_id, event);
                if failed {
                    break;
                }
            }

            let dropped = {
                let mut link = link.lock();
                if link.active.as_ref().is_some_and(|a| a.id == id) {
                    link.active = None;
                    link.state = SubscriptionState::Unsubscribed;
                    true
                } else {
                    false
                }
            };
            if dropped {
                warn!(%conversation_id, subscription_id = id, "Change feed closed");
                if let Err(e) = feed.unsubscribe(id).await {
                    debug!(error = %e, "Unsubscribe after feed close failed");
                }
            }
        })
    }
}
