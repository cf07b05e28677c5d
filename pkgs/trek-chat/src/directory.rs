//! Conversation directory
//!
//! Loads the conversations a user belongs to, resolves every participant's
//! identity in one batched profile lookup, and tracks which conversation is
//! selected. Group conversations are provisioned by trip enrollment outside this
//! crate; the directory only creates direct conversations.

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::backend::ChatBackend;
use crate::error::{BackendError, ChatError, Result};
use crate::events::{ChatEvent, EventSink, UserAction};
use crate::models::{
    Conversation, ConversationRecord, NewConversation, Participant, ParticipantRecord,
};
use crate::profiles::ProfileCache;

#[derive(Debug, Default)]
struct DirectoryState {
    conversations: Vec<Conversation>,
    active: Option<String>,
}

pub struct ConversationDirectory {
    backend: Arc<dyn ChatBackend>,
    profiles: Arc<ProfileCache>,
    events: EventSink,
    state: Mutex<DirectoryState>,
}

impl ConversationDirectory {
    pub fn new(backend: Arc<dyn ChatBackend>, profiles: Arc<ProfileCache>, events: EventSink) -> Self {
        Self {
            backend,
            profiles,
            events,
            state: Mutex::new(DirectoryState::default()),
        }
    }

    /// Loaded conversations, most recent first
    pub fn conversations(&self) -> Vec<Conversation> {
        self.state.lock().conversations.clone()
    }

    pub fn conversation(&self, conversation_id: &str) -> Option<Conversation> {
        self.state
            .lock()
            .conversations
            .iter()
            .find(|c| c.id == conversation_id)
            .cloned()
    }

    pub fn active_id(&self) -> Option<String> {
        self.state.lock().active.clone()
    }

    pub fn active(&self) -> Option<Conversation> {
        let state = self.state.lock();
        let active = state.active.as_deref()?;
        state.conversations.iter().find(|c| c.id == active).cloned()
    }

    /// Select a loaded conversation. False if it is not in the directory.
    pub fn select(&self, conversation_id: &str) -> bool {
        let mut state = self.state.lock();
        if state.conversations.iter().any(|c| c.id == conversation_id) {
            state.active = Some(conversation_id.to_string());
            true
        } else {
            false
        }
    }

    pub fn clear_selection(&self) {
        self.state.lock().active = None;
    }

    /// Record activity in a conversation and re-sort by recency
    pub fn touch(&self, conversation_id: &str, at: chrono::DateTime<chrono::Utc>) {
        let mut state = self.state.lock();
        let Some(conversation) = state
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        else {
            return;
        };
        if conversation.last_message_at.map_or(true, |last| last < at) {
            conversation.last_message_at = Some(at);
            sort_by_recency(&mut state.conversations);
        }
    }

    /// Load every conversation `user_id` participates in.
    ///
    /// Backend failures are logged and yield an empty directory, except for
    /// the active conversation, which stays listed while it is open.
    #[instrument(skip(self))]
    pub async fn load_conversations(&self, user_id: &str) -> Vec<Conversation> {
        let fetched = self.fetch_for_user(user_id).await;

        let conversations = {
            let mut state = self.state.lock();
            let conversations = match fetched {
                Ok(conversations) => {
                    let keep_active = state
                        .active
                        .as_deref()
                        .is_some_and(|id| conversations.iter().any(|c| c.id == id));
                    if !keep_active {
                        state.active = None;
                    }
                    conversations
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load conversations");
                    let active = state.active.clone();
                    state
                        .conversations
                        .iter()
                        .filter(|c| active.as_deref() == Some(c.id.as_str()))
                        .cloned()
                        .collect()
                }
            };
            state.conversations = conversations.clone();
            conversations
        };

        info!(count = conversations.len(), "Conversations loaded");
        self.events.emit(ChatEvent::ConversationsLoaded {
            count: conversations.len(),
        });
        conversations
    }

    /// Select a conversation, fetching it on demand when it is not loaded yet
    #[instrument(skip(self))]
    pub async fn open_conversation_by_id(&self, conversation_id: &str) -> Result<Conversation> {
        if self.select(conversation_id) {
            if let Some(conversation) = self.conversation(conversation_id) {
                return Ok(conversation);
            }
        }

        let result = self.fetch_one(conversation_id).await;
        let conversation = match result {
            Ok(conversation) => conversation,
            Err(e) => {
                error!(error = %e, "Failed to open conversation");
                self.events.action_failed(UserAction::OpenConversation, &e);
                return Err(e);
            }
        };

        self.insert_front(conversation.clone());
        self.select(conversation_id);
        debug!("Conversation fetched on demand");
        Ok(conversation)
    }

    /// Select the direct conversation between `user_id` and `other_user_id`,
    /// creating it when none exists.
    ///
    /// Two users opening each other at the same moment can still both miss the
    /// lookup and create two conversations; the backend's uniqueness rules decide
    /// whether that is possible. When duplicates exist the oldest one is reused.
    #[instrument(skip(self))]
    pub async fn open_or_create_direct_conversation(
        &self,
        user_id: &str,
        other_user_id: &str,
    ) -> Result<Conversation> {
        let existing = match self.find_direct(user_id, other_user_id).await {
            Ok(existing) => existing,
            Err(e) => {
                error!(error = %e, "Failed to look up direct conversation");
                let e = ChatError::from(e);
                self.events.action_failed(UserAction::CreateConversation, &e);
                return Err(e);
            }
        };

        if let Some(conversation_id) = existing {
            debug!(%conversation_id, "Reusing direct conversation");
            return self.open_conversation_by_id(&conversation_id).await;
        }

        let members: Vec<String> = [user_id, other_user_id]
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect();
        let record = match self
            .backend
            .create_conversation(NewConversation::default(), &members)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                error!(error = %e, "Failed to create direct conversation");
                let e = ChatError::from(e);
                self.events.action_failed(UserAction::CreateConversation, &e);
                return Err(e);
            }
        };

        let profiles = self
            .profiles
            .resolve_many(members.iter().map(String::as_str))
            .await;
        let participants = members
            .iter()
            .map(|id| Participant {
                user_id: id.clone(),
                profile: profiles.get(id).cloned(),
            })
            .collect();
        let conversation = Conversation::from_record(record, participants);

        info!(conversation_id = %conversation.id, "Direct conversation created");
        self.insert_front(conversation.clone());
        self.select(&conversation.id);
        Ok(conversation)
    }

    /// Remove `user_id` from a conversation and drop it from the directory
    #[instrument(skip(self))]
    pub async fn leave_conversation(&self, user_id: &str, conversation_id: &str) -> Result<()> {
        if let Err(e) = self
            .backend
            .delete_participant(conversation_id, user_id)
            .await
        {
            error!(error = %e, "Failed to leave conversation");
            let e = ChatError::from(e);
            self.events.action_failed(UserAction::Leave, &e);
            return Err(e);
        }

        let mut state = self.state.lock();
        state.conversations.retain(|c| c.id != conversation_id);
        if state.active.as_deref() == Some(conversation_id) {
            state.active = None;
        }
        info!("Left conversation");
        Ok(())
    }

    async fn fetch_for_user(&self, user_id: &str) -> std::result::Result<Vec<Conversation>, BackendError> {
        let memberships = self.backend.list_memberships(user_id).await?;
        let ids: Vec<String> = memberships
            .into_iter()
            .map(|m| m.conversation_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let records = self.backend.fetch_conversations(&ids).await?;
        let participants = self.backend.fetch_participants(&ids).await?;
        let mut conversations = self.assemble(records, participants).await;
        sort_by_recency(&mut conversations);
        Ok(conversations)
    }

    async fn fetch_one(&self, conversation_id: &str) -> Result<Conversation> {
        let ids = [conversation_id.to_string()];
        let record = self
            .backend
            .fetch_conversations(&ids)
            .await?
            .into_iter()
            .find(|r| r.id == conversation_id)
            .ok_or_else(|| ChatError::ConversationNotFound(conversation_id.to_string()))?;
        let participants = match self.backend.fetch_participants(&ids).await {
            Ok(participants) => participants,
            Err(e) => {
                warn!(error = %e, "Failed to load participants");
                Vec::new()
            }
        };

        self.assemble(vec![record], participants)
            .await
            .pop()
            .ok_or_else(|| ChatError::ConversationNotFound(conversation_id.to_string()))
    }

    /// Build conversations with one profile lookup for all distinct participants
    async fn assemble(
        &self,
        records: Vec<ConversationRecord>,
        participants: Vec<ParticipantRecord>,
    ) -> Vec<Conversation> {
        let user_ids: BTreeSet<&str> = participants.iter().map(|p| p.user_id.as_str()).collect();
        let profiles = self.profiles.resolve_many(user_ids).await;

        let mut members: HashMap<&str, Vec<Participant>> = HashMap::new();
        for p in &participants {
            members
                .entry(p.conversation_id.as_str())
                .or_default()
                .push(Participant {
                    user_id: p.user_id.clone(),
                    profile: profiles.get(&p.user_id).cloned(),
                });
        }

        records
            .into_iter()
            .map(|record| {
                let list = members.remove(record.id.as_str()).unwrap_or_default();
                Conversation::from_record(record, list)
            })
            .collect()
    }

    async fn find_direct(
        &self,
        user_id: &str,
        other_user_id: &str,
    ) -> std::result::Result<Option<String>, BackendError> {
        let mine: BTreeSet<String> = self
            .backend
            .list_memberships(user_id)
            .await?
            .into_iter()
            .map(|m| m.conversation_id)
            .collect();
        let shared: Vec<String> = self
            .backend
            .list_memberships(other_user_id)
            .await?
            .into_iter()
            .map(|m| m.conversation_id)
            .filter(|id| mine.contains(id))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if shared.is_empty() {
            return Ok(None);
        }

        let mut direct: Vec<ConversationRecord> = self
            .backend
            .fetch_conversations(&shared)
            .await?
            .into_iter()
            .filter(|r| r.batch_id.is_none())
            .collect();
        if direct.is_empty() {
            return Ok(None);
        }
        let direct_ids: Vec<String> = direct.iter().map(|r| r.id.clone()).collect();
        let participants = self.backend.fetch_participants(&direct_ids).await?;

        let pair: BTreeSet<&str> = [user_id, other_user_id].into_iter().collect();
        direct.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(direct
            .into_iter()
            .find(|record| {
                let members: BTreeSet<&str> = participants
                    .iter()
                    .filter(|p| p.conversation_id == record.id)
                    .map(|p| p.user_id.as_str())
                    .collect();
                members == pair
            })
            .map(|record| record.id))
    }

    fn insert_front(&self, conversation: Conversation) {
        let mut state = self.state.lock();
        state.conversations.retain(|c| c.id != conversation.id);
        state.conversations.insert(0, conversation);
    }
}

fn sort_by_recency(conversations: &mut [Conversation]) {
    conversations.sort_by(|a, b| b.recency().cmp(&a.recency()));
}
