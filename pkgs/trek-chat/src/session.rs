//! Chat session - wires the components together
//!
//! ```text
//! load_conversations -> select_conversation -> (latest page + subscription)
//!     -> send / mutate / load_older -> message store -> ChatEvent::MessagesChanged
//! ```

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use crate::backend::{ChangeFeed, ChatBackend, Confirm, ProfileService};
use crate::config::ChatConfig;
use crate::directory::ConversationDirectory;
use crate::error::{ChatError, Result};
use crate::events::{ChatEvent, EventSink};
use crate::message_store::{MessageStore, PageOutcome};
use crate::models::{Conversation, Message, Reactions};
use crate::mutations::MessageMutations;
use crate::profiles::ProfileCache;
use crate::realtime::{RealtimeIngestion, SubscriptionState};
use crate::send::{Composer, SendPipeline};

pub struct ChatSession {
    config: ChatConfig,
    events: EventSink,
    profiles: Arc<ProfileCache>,
    directory: Arc<ConversationDirectory>,
    store: Arc<MessageStore>,
    realtime: RealtimeIngestion,
    sender: SendPipeline,
    mutations: MessageMutations,
}

impl ChatSession {
    /// Build a session over the given collaborators.
    ///
    /// Returns the session and the receiving end of its event channel.
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        feed: Arc<dyn ChangeFeed>,
        profile_service: Arc<dyn ProfileService>,
        config: ChatConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ChatEvent>) {
        let (events, receiver) = EventSink::channel();
        let profiles = Arc::new(ProfileCache::new(profile_service));
        let directory = Arc::new(ConversationDirectory::new(
            backend.clone(),
            profiles.clone(),
            events.clone(),
        ));
        let store = Arc::new(MessageStore::new(
            backend.clone(),
            profiles.clone(),
            events.clone(),
        ));
        let realtime =
            RealtimeIngestion::new(feed, store.clone(), profiles.clone(), directory.clone());
        let sender = SendPipeline::new(
            backend.clone(),
            store.clone(),
            profiles.clone(),
            events.clone(),
            config.temp_id_prefix.clone(),
        );
        let mutations =
            MessageMutations::new(backend, store.clone(), events.clone(), config.delete_prompt.clone());

        let session = Self {
            config,
            events,
            profiles,
            directory,
            store,
            realtime,
            sender,
            mutations,
        };
        (session, receiver)
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn directory(&self) -> &ConversationDirectory {
        &self.directory
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn realtime(&self) -> &RealtimeIngestion {
        &self.realtime
    }

    pub fn profiles(&self) -> &ProfileCache {
        &self.profiles
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.directory.conversations()
    }

    pub fn active_conversation(&self) -> Option<Conversation> {
        self.directory.active()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.store.messages()
    }

    pub fn subscription_state(&self) -> SubscriptionState {
        self.realtime.state()
    }

    pub fn composer(&self) -> Composer {
        self.sender.composer()
    }

    pub fn set_draft(&self, text: impl Into<String>) {
        self.sender.set_draft(text);
    }

    pub fn reply_to(&self, message_id: impl Into<String>) {
        self.sender.reply_to(message_id);
    }

    pub fn cancel_reply(&self) {
        self.sender.cancel_reply();
    }

    /// Label for messages and participants with no resolved profile
    pub fn display_name<'a>(&'a self, message: &'a Message) -> &'a str {
        message.sender_name(&self.config.unknown_sender_label)
    }

    /// Signed-in user, or `NotAuthenticated` after asking the user to sign in
    pub async fn require_user(&self) -> Result<String> {
        match self.profiles.current_user_id().await {
            Some(user_id) => Ok(user_id),
            None => {
                self.events.emit(ChatEvent::SignInRequired);
                Err(ChatError::NotAuthenticated)
            }
        }
    }

    /// Load the signed-in user's conversations
    pub async fn load_conversations(&self) -> Result<Vec<Conversation>> {
        let user_id = self.require_user().await?;
        Ok(self.directory.load_conversations(&user_id).await)
    }

    /// Make `conversation_id` active: reset the store, move the subscription,
    /// then load the latest page.
    #[instrument(skip(self))]
    pub async fn select_conversation(&self, conversation_id: &str) -> Result<PageOutcome> {
        self.require_user().await?;
        let conversation = self.directory.open_conversation_by_id(conversation_id).await?;
        Ok(self.activate(&conversation.id).await)
    }

    /// Open (or create) the direct conversation with `other_user_id` and make it active
    #[instrument(skip(self))]
    pub async fn open_direct_conversation(&self, other_user_id: &str) -> Result<Conversation> {
        let user_id = self.require_user().await?;
        let conversation = self
            .directory
            .open_or_create_direct_conversation(&user_id, other_user_id)
            .await?;
        self.activate(&conversation.id).await;
        Ok(conversation)
    }

    /// Leave the active conversation
    pub async fn leave_active_conversation(&self) -> Result<()> {
        let user_id = self.require_user().await?;
        let conversation_id = self
            .store
            .active_conversation_id()
            .ok_or(ChatError::NoActiveConversation)?;
        self.directory
            .leave_conversation(&user_id, &conversation_id)
            .await?;
        self.deactivate().await;
        Ok(())
    }

    /// Load the page before the oldest loaded message.
    ///
    /// The view calls this when scrolled near the top and uses the
    /// `prepended` count of the result to keep its scroll anchor.
    pub async fn load_older(&self) -> PageOutcome {
        let Some(conversation_id) = self.store.active_conversation_id() else {
            return PageOutcome::Skipped;
        };
        let Some(cursor) = self.store.cursor() else {
            return PageOutcome::Skipped;
        };
        self.store
            .load_older_page(&conversation_id, cursor, self.config.effective_page_size())
            .await
    }

    /// Send the current draft
    pub async fn send(&self) -> Result<String> {
        let user_id = self.require_user().await?;
        self.sender.send(&user_id).await
    }

    /// Replace the draft with `text` and send it
    pub async fn send_text(&self, text: &str) -> Result<String> {
        self.sender.set_draft(text);
        self.send().await
    }

    pub async fn delete_message(&self, message_id: &str, confirm: &dyn Confirm) -> Result<()> {
        let user_id = self.require_user().await?;
        self.mutations
            .delete_message(&user_id, message_id, confirm)
            .await
    }

    pub async fn edit_message(&self, message_id: &str, content: &str) -> Result<()> {
        let user_id = self.require_user().await?;
        self.mutations
            .edit_message(&user_id, message_id, content)
            .await
    }

    pub async fn toggle_reaction(&self, message_id: &str, emoji: &str) -> Result<Reactions> {
        let user_id = self.require_user().await?;
        self.mutations
            .toggle_reaction(&user_id, message_id, emoji)
            .await
    }

    /// Drop the active conversation and its subscription
    pub async fn close(&self) {
        self.deactivate().await;
        info!("Chat session closed");
    }

    async fn activate(&self, conversation_id: &str) -> PageOutcome {
        if self.store.active_conversation_id().as_deref() != Some(conversation_id) {
            self.store.activate(Some(conversation_id));
            self.sender.reset();
        }
        self.directory.select(conversation_id);
        self.events.emit(ChatEvent::ConversationSelected {
            conversation_id: conversation_id.to_string(),
        });

        self.realtime.sync().await;
        let outcome = self
            .store
            .load_latest_page(conversation_id, self.config.effective_page_size())
            .await;
        debug!(conversation_id, ?outcome, "Conversation activated");
        outcome
    }

    async fn deactivate(&self) {
        self.store.activate(None);
        self.sender.reset();
        self.directory.clear_selection();
        self.realtime.sync().await;
    }
}
