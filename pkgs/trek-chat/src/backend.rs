//! Collaborator interfaces.
//!
//! The core never talks to a concrete data store. Each component receives the
//! collaborators it needs at construction as `Arc<dyn ...>` so tests can swap in
//! doubles:
//!
//! - [`ProfileService`]: session identity and batched profile lookup
//! - [`ChatBackend`]: conversation, participant and message rows
//! - [`ChangeFeed`]: per-conversation push notifications for message rows
//! - [`Confirm`]: interactive yes/no prompt used before destructive actions

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::error::BackendError;
use crate::models::{
    ConversationRecord, Message, MessagePatch, NewConversation, NewMessage, ParticipantRecord,
    ProfileSummary,
};

/// Identity and profile collaborator
#[async_trait]
pub trait ProfileService: Send + Sync {
    /// Identifier of the signed-in user, or `None` without a session
    async fn current_user_id(&self) -> Result<Option<String>, BackendError>;

    /// Batched profile lookup. Unknown identifiers are simply absent from the result.
    async fn fetch_profiles(&self, user_ids: &[String])
        -> Result<Vec<ProfileSummary>, BackendError>;
}

/// Persistent conversation/message store
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Membership rows of one user
    async fn list_memberships(&self, user_id: &str) -> Result<Vec<ParticipantRecord>, BackendError>;

    async fn fetch_conversations(
        &self,
        ids: &[String],
    ) -> Result<Vec<ConversationRecord>, BackendError>;

    /// All membership rows of the given conversations
    async fn fetch_participants(
        &self,
        conversation_ids: &[String],
    ) -> Result<Vec<ParticipantRecord>, BackendError>;

    /// Up to `limit` messages, newest first, optionally strictly older than `before`
    async fn fetch_messages(
        &self,
        conversation_id: &str,
        limit: usize,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, BackendError>;

    /// Insert a message row and return the stored copy with its server identifier
    async fn insert_message(&self, message: NewMessage) -> Result<Message, BackendError>;

    async fn update_message(&self, message_id: &str, patch: MessagePatch)
        -> Result<(), BackendError>;

    /// Insert a conversation together with its participant rows
    async fn create_conversation(
        &self,
        conversation: NewConversation,
        participant_ids: &[String],
    ) -> Result<ConversationRecord, BackendError>;

    async fn delete_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<(), BackendError>;
}

/// Notification delivered on a change feed subscription
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// A message row was inserted
    Inserted(Message),
    /// A message row was updated (edit, soft delete, reactions)
    Updated(Message),
    /// The channel broke; no more events will arrive
    Error(String),
}

/// Open change feed subscription for one conversation
#[derive(Debug)]
pub struct Subscription {
    pub id: u64,
    pub conversation_id: String,
    pub events: mpsc::UnboundedReceiver<FeedEvent>,
}

/// Realtime change feed
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, conversation_id: &str) -> Result<Subscription, BackendError>;

    async fn unsubscribe(&self, subscription_id: u64) -> Result<(), BackendError>;
}

/// Interactive confirmation step
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, prompt: &str) -> bool;
}

#[async_trait]
impl<F> Confirm for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    async fn confirm(&self, prompt: &str) -> bool {
        (self)(prompt)
    }
}
