//! Soft delete, edit and reaction toggling.
//!
//! Each change is applied to the message store first and then persisted. A
//! failed persist is logged and reported to the user, but the local change is
//! not rolled back.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, instrument};

use crate::backend::{ChatBackend, Confirm};
use crate::error::{ChatError, Result};
use crate::events::{EventSink, UserAction};
use crate::message_store::MessageStore;
use crate::models::{toggled_reactions, Message, MessagePatch, Reactions};

pub struct MessageMutations {
    backend: Arc<dyn ChatBackend>,
    store: Arc<MessageStore>,
    events: EventSink,
    delete_prompt: String,
}

impl MessageMutations {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        store: Arc<MessageStore>,
        events: EventSink,
        delete_prompt: String,
    ) -> Self {
        Self {
            backend,
            store,
            events,
            delete_prompt,
        }
    }

    /// Soft delete one of `user_id`'s messages after confirmation
    #[instrument(skip(self, confirm))]
    pub async fn delete_message(
        &self,
        user_id: &str,
        message_id: &str,
        confirm: &dyn Confirm,
    ) -> Result<()> {
        let (conversation_id, message) = self.owned_message(user_id, message_id)?;
        if message.is_deleted {
            return Ok(());
        }
        if !confirm.confirm(&self.delete_prompt).await {
            debug!("Delete cancelled");
            return Err(ChatError::NotConfirmed);
        }

        self.store
            .update(&conversation_id, message_id, Message::soft_delete);
        self.persist(UserAction::Delete, message_id, MessagePatch::soft_delete())
            .await
    }

    /// Replace the content of one of `user_id`'s messages
    #[instrument(skip(self, content))]
    pub async fn edit_message(&self, user_id: &str, message_id: &str, content: &str) -> Result<()> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::EmptyContent);
        }
        let (conversation_id, message) = self.owned_message(user_id, message_id)?;
        if message.is_deleted {
            return Err(ChatError::MessageDeleted(message_id.to_string()));
        }
        if message.content == content {
            return Ok(());
        }

        let patch = MessagePatch::edit(content.to_string(), Utc::now());
        self.store
            .update(&conversation_id, message_id, |m| patch.apply_to(m));
        self.persist(UserAction::Edit, message_id, patch).await
    }

    /// Add or remove `user_id`'s `emoji` reaction and return the new reaction map
    #[instrument(skip(self))]
    pub async fn toggle_reaction(
        &self,
        user_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<Reactions> {
        let (conversation_id, message) = self.active_message(message_id)?;
        if message.pending {
            return Err(ChatError::MessagePending(message_id.to_string()));
        }
        if message.is_deleted {
            return Err(ChatError::MessageDeleted(message_id.to_string()));
        }

        let reactions = self
            .store
            .update(&conversation_id, message_id, |m| {
                m.reactions = toggled_reactions(&m.reactions, emoji, user_id);
                m.reactions.clone()
            })
            .ok_or_else(|| ChatError::MessageNotFound(message_id.to_string()))?;

        self.persist(
            UserAction::React,
            message_id,
            MessagePatch::reactions(reactions.clone()),
        )
        .await?;
        Ok(reactions)
    }

    fn active_message(&self, message_id: &str) -> Result<(String, Message)> {
        let conversation_id = self
            .store
            .active_conversation_id()
            .ok_or(ChatError::NoActiveConversation)?;
        let message = self
            .store
            .message(message_id)
            .ok_or_else(|| ChatError::MessageNotFound(message_id.to_string()))?;
        Ok((conversation_id, message))
    }

    /// Active-conversation message that `user_id` sent and the backend has confirmed
    fn owned_message(&self, user_id: &str, message_id: &str) -> Result<(String, Message)> {
        let (conversation_id, message) = self.active_message(message_id)?;
        if message.pending {
            return Err(ChatError::MessagePending(message_id.to_string()));
        }
        if message.sender_id != user_id {
            return Err(ChatError::NotSender(message_id.to_string()));
        }
        Ok((conversation_id, message))
    }

    async fn persist(&self, action: UserAction, message_id: &str, patch: MessagePatch) -> Result<()> {
        if let Err(e) = self.backend.update_message(message_id, patch).await {
            error!(error = %e, ?action, message_id, "Failed to persist message change");
            let e = ChatError::from(e);
            self.events.action_failed(action, &e);
            return Err(e);
        }
        Ok(())
    }
}
