//! Optimistic send pipeline
//!
//! # Flow
//!
//! 1. Reject blank drafts, otherwise clear the draft at once
//! 2. Build a pending message with a temporary identifier and the sender's own profile
//! 3. Show it in the message store and clear the reply target
//! 4. Submit the row to the backend
//! 5. On failure remove the pending entry and tell the user (no retry)
//! 6. On success do nothing: the change feed echo replaces the pending entry
//!
//! The echo can arrive before step 4 returns. Realtime ingestion matches on
//! sender, content and the pending flag, so the order does not matter.

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, instrument};
use uuid::Uuid;

use crate::backend::ChatBackend;
use crate::error::{ChatError, Result};
use crate::events::{EventSink, UserAction};
use crate::message_store::MessageStore;
use crate::models::{Message, NewMessage, Reactions};
use crate::profiles::ProfileCache;

/// Text input state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Composer {
    pub draft: String,
    pub replying_to: Option<String>,
}

pub struct SendPipeline {
    backend: Arc<dyn ChatBackend>,
    store: Arc<MessageStore>,
    profiles: Arc<ProfileCache>,
    events: EventSink,
    temp_id_prefix: String,
    composer: Mutex<Composer>,
}

impl SendPipeline {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        store: Arc<MessageStore>,
        profiles: Arc<ProfileCache>,
        events: EventSink,
        temp_id_prefix: String,
    ) -> Self {
        Self {
            backend,
            store,
            profiles,
            events,
            temp_id_prefix,
            composer: Mutex::new(Composer::default()),
        }
    }

    pub fn composer(&self) -> Composer {
        self.composer.lock().clone()
    }

    pub fn set_draft(&self, text: impl Into<String>) {
        self.composer.lock().draft = text.into();
    }

    pub fn reply_to(&self, message_id: impl Into<String>) {
        self.composer.lock().replying_to = Some(message_id.into());
    }

    pub fn cancel_reply(&self) {
        self.composer.lock().replying_to = None;
    }

    /// Drop draft and reply target, e.g. when the conversation changes
    pub fn reset(&self) {
        *self.composer.lock() = Composer::default();
    }

    /// Send the current draft as `sender_id` into the active conversation.
    ///
    /// Returns the temporary identifier of the pending message.
    #[instrument(skip(self))]
    pub async fn send(&self, sender_id: &str) -> Result<String> {
        let conversation_id = self
            .store
            .active_conversation_id()
            .ok_or(ChatError::NoActiveConversation)?;

        let (content, reply_to) = {
            let mut composer = self.composer.lock();
            let content = composer.draft.trim().to_string();
            if content.is_empty() {
                return Err(ChatError::EmptyContent);
            }
            composer.draft.clear();
            (content, composer.replying_to.clone())
        };

        let sender = match self.profiles.cached(sender_id) {
            Some(profile) => Some(profile),
            None => self.profiles.resolve(sender_id).await,
        };
        let temp_id = format!("{}{}", self.temp_id_prefix, Uuid::new_v4());
        let pending = Message {
            id: temp_id.clone(),
            conversation_id: conversation_id.clone(),
            sender_id: sender_id.to_string(),
            content: content.clone(),
            created_at: Utc::now(),
            edited_at: None,
            is_deleted: false,
            reply_to: reply_to.clone(),
            reactions: Reactions::new(),
            sender,
            pending: true,
        };
        if !self.store.push_pending(pending) {
            debug!(%conversation_id, "Conversation changed before the message was shown");
            return Err(ChatError::NoActiveConversation);
        }
        self.cancel_reply();
        debug!(%temp_id, "Pending message shown");

        let submitted = self
            .backend
            .insert_message(NewMessage {
                conversation_id: conversation_id.clone(),
                sender_id: sender_id.to_string(),
                content,
                reply_to,
            })
            .await;

        match submitted {
            Ok(stored) => {
                debug!(%temp_id, message_id = %stored.id, "Message accepted, awaiting echo");
                Ok(temp_id)
            }
            Err(e) => {
                error!(error = %e, %temp_id, "Failed to send message");
                self.store.remove(&conversation_id, &temp_id);
                let e = ChatError::from(e);
                self.events.action_failed(UserAction::Send, &e);
                Err(e)
            }
        }
    }
}
