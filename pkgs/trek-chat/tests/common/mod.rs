// Copyright 2024 Gigi Team.
//
// In-memory collaborators for trek-chat integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use trek_chat::{
    BackendError, ChangeFeed, ChatBackend, ChatConfig, ChatEvent, ChatSession, ConversationRecord,
    FeedEvent, Message, MessagePatch, NewConversation, NewMessage, ParticipantRecord,
    ProfileService, ProfileSummary, Reactions, Subscription,
};

#[derive(Default)]
struct Inner {
    current_user: Option<String>,
    conversations: Vec<ConversationRecord>,
    participants: Vec<ParticipantRecord>,
    messages: Vec<Message>,
    profiles: HashMap<String, ProfileSummary>,
    subscribers: HashMap<u64, (String, mpsc::UnboundedSender<FeedEvent>)>,
    next_subscription: u64,
    next_id: u64,
    clock: Option<DateTime<Utc>>,
}

impl Inner {
    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let next = match self.clock {
            Some(last) if last >= now => last + Duration::milliseconds(1),
            _ => now,
        };
        self.clock = Some(next);
        next
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn publish(&self, conversation_id: &str, event: FeedEvent) {
        for (conv, tx) in self.subscribers.values() {
            if conv == conversation_id {
                let _ = tx.send(event.clone());
            }
        }
    }
}

/// Backend, change feed and profile service in one in-memory double
#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    pub fail_profiles: AtomicBool,
    pub fail_subscribe: AtomicBool,
    /// Publish inserts and updates to subscribers, like a real change feed
    pub auto_echo: AtomicBool,
    pub fetch_calls: AtomicUsize,
    profile_calls: Mutex<Vec<Vec<String>>>,
    unsubscribed: Mutex<Vec<u64>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    profile_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        let backend = Self::default();
        backend.auto_echo.store(true, Ordering::SeqCst);
        Arc::new(backend)
    }

    pub fn signed_in(user_id: &str) -> Arc<Self> {
        let backend = Self::new();
        backend.set_user(Some(user_id));
        backend
    }

    pub fn set_user(&self, user_id: Option<&str>) {
        self.inner.lock().current_user = user_id.map(str::to_string);
    }

    pub fn add_profile(&self, user_id: &str, display_name: &str) {
        self.inner.lock().profiles.insert(
            user_id.to_string(),
            ProfileSummary {
                user_id: user_id.to_string(),
                display_name: display_name.to_string(),
                avatar_url: Some(format!("https://cdn.example/{user_id}.png")),
            },
        );
    }

    pub fn add_conversation(&self, id: &str, batch_id: Option<&str>, members: &[&str]) {
        let mut inner = self.inner.lock();
        let created_at = inner.tick();
        inner.conversations.push(ConversationRecord {
            id: id.to_string(),
            name: batch_id.map(|b| format!("Batch {b}")),
            batch_id: batch_id.map(str::to_string),
            created_at,
            last_message_at: None,
        });
        for member in members {
            inner.participants.push(ParticipantRecord {
                conversation_id: id.to_string(),
                user_id: member.to_string(),
            });
        }
    }

    /// Store `count` messages from `sender_id`, oldest first
    pub fn seed_messages(&self, conversation_id: &str, sender_id: &str, count: usize) -> Vec<Message> {
        (0..count)
            .map(|i| self.store_row(conversation_id, sender_id, &format!("message {i}")))
            .collect()
    }

    /// Store a row without publishing it
    pub fn store_row(&self, conversation_id: &str, sender_id: &str, content: &str) -> Message {
        let mut inner = self.inner.lock();
        let message = Message {
            id: inner.next_id("msg"),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            created_at: inner.tick(),
            edited_at: None,
            is_deleted: false,
            reply_to: None,
            reactions: Reactions::new(),
            sender: None,
            pending: false,
        };
        inner.messages.push(message.clone());
        message
    }

    /// Store a row written by someone else and publish it on the feed
    pub fn push_remote(&self, conversation_id: &str, sender_id: &str, content: &str) -> Message {
        let message = self.store_row(conversation_id, sender_id, content);
        self.publish(conversation_id, FeedEvent::Inserted(message.clone()));
        message
    }

    pub fn publish(&self, conversation_id: &str, event: FeedEvent) {
        self.inner.lock().publish(conversation_id, event);
    }

    pub fn stored_message(&self, message_id: &str) -> Option<Message> {
        self.inner
            .lock()
            .messages
            .iter()
            .find(|m| m.id == message_id)
            .cloned()
    }

    pub fn stored_messages(&self, conversation_id: &str) -> Vec<Message> {
        self.inner
            .lock()
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    pub fn conversation_count(&self) -> usize {
        self.inner.lock().conversations.len()
    }

    pub fn members(&self, conversation_id: &str) -> Vec<String> {
        self.inner
            .lock()
            .participants
            .iter()
            .filter(|p| p.conversation_id == conversation_id)
            .map(|p| p.user_id.clone())
            .collect()
    }

    pub fn subscriber_count(&self, conversation_id: &str) -> usize {
        self.inner
            .lock()
            .subscribers
            .values()
            .filter(|(conv, _)| conv == conversation_id)
            .count()
    }

    pub fn unsubscribed(&self) -> Vec<u64> {
        self.unsubscribed.lock().clone()
    }

    pub fn profile_calls(&self) -> Vec<Vec<String>> {
        self.profile_calls.lock().clone()
    }

    /// Make message fetches for `conversation_id` wait for [`release_fetch`]
    pub fn hold_fetches(&self, conversation_id: &str) {
        self.gates
            .lock()
            .insert(conversation_id.to_string(), Arc::new(Semaphore::new(0)));
    }

    pub fn release_fetch(&self, conversation_id: &str) {
        if let Some(gate) = self.gates.lock().get(conversation_id) {
            gate.add_permits(1);
        }
    }

    /// Make profile lookups wait for [`release_profiles`]
    pub fn hold_profiles(&self) {
        *self.profile_gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_profiles(&self) {
        if let Some(gate) = self.profile_gate.lock().take() {
            gate.add_permits(Semaphore::MAX_PERMITS);
        }
    }

    fn check(&self, flag: &AtomicBool) -> Result<(), BackendError> {
        if flag.load(Ordering::SeqCst) {
            Err(BackendError::Request("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ChatBackend for MemoryBackend {
    async fn list_memberships(&self, user_id: &str) -> Result<Vec<ParticipantRecord>, BackendError> {
        self.check(&self.fail_reads)?;
        Ok(self
            .inner
            .lock()
            .participants
            .iter()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn fetch_conversations(
        &self,
        ids: &[String],
    ) -> Result<Vec<ConversationRecord>, BackendError> {
        self.check(&self.fail_reads)?;
        Ok(self
            .inner
            .lock()
            .conversations
            .iter()
            .filter(|c| ids.contains(&c.id))
            .cloned()
            .collect())
    }

    async fn fetch_participants(
        &self,
        conversation_ids: &[String],
    ) -> Result<Vec<ParticipantRecord>, BackendError> {
        self.check(&self.fail_reads)?;
        Ok(self
            .inner
            .lock()
            .participants
            .iter()
            .filter(|p| conversation_ids.contains(&p.conversation_id))
            .cloned()
            .collect())
    }

    async fn fetch_messages(
        &self,
        conversation_id: &str,
        limit: usize,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, BackendError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gates.lock().get(conversation_id).cloned();
        if let Some(gate) = gate {
            gate.acquire()
                .await
                .map_err(|e| BackendError::Request(e.to_string()))?
                .forget();
        }
        self.check(&self.fail_reads)?;

        let mut rows: Vec<Message> = self
            .inner
            .lock()
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .filter(|m| before.map_or(true, |b| m.created_at < b))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, BackendError> {
        self.check(&self.fail_writes)?;
        let mut inner = self.inner.lock();
        let stored = Message {
            id: inner.next_id("msg"),
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content,
            created_at: inner.tick(),
            edited_at: None,
            is_deleted: false,
            reply_to: message.reply_to,
            reactions: Reactions::new(),
            sender: None,
            pending: false,
        };
        inner.messages.push(stored.clone());
        if self.auto_echo.load(Ordering::SeqCst) {
            inner.publish(&stored.conversation_id, FeedEvent::Inserted(stored.clone()));
        }
        Ok(stored)
    }

    async fn update_message(
        &self,
        message_id: &str,
        patch: MessagePatch,
    ) -> Result<(), BackendError> {
        self.check(&self.fail_writes)?;
        let mut inner = self.inner.lock();
        let message = inner
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| BackendError::NotFound(message_id.to_string()))?;
        patch.apply_to(message);
        let updated = message.clone();
        if self.auto_echo.load(Ordering::SeqCst) {
            inner.publish(&updated.conversation_id, FeedEvent::Updated(updated.clone()));
        }
        Ok(())
    }

    async fn create_conversation(
        &self,
        conversation: NewConversation,
        participant_ids: &[String],
    ) -> Result<ConversationRecord, BackendError> {
        self.check(&self.fail_writes)?;
        let mut inner = self.inner.lock();
        let record = ConversationRecord {
            id: inner.next_id("conv"),
            name: conversation.name,
            batch_id: conversation.batch_id,
            created_at: inner.tick(),
            last_message_at: None,
        };
        inner.conversations.push(record.clone());
        for user_id in participant_ids {
            inner.participants.push(ParticipantRecord {
                conversation_id: record.id.clone(),
                user_id: user_id.clone(),
            });
        }
        Ok(record)
    }

    async fn delete_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<(), BackendError> {
        self.check(&self.fail_writes)?;
        self.inner
            .lock()
            .participants
            .retain(|p| !(p.conversation_id == conversation_id && p.user_id == user_id));
        Ok(())
    }
}

#[async_trait]
impl ChangeFeed for MemoryBackend {
    async fn subscribe(&self, conversation_id: &str) -> Result<Subscription, BackendError> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(BackendError::Subscription("injected failure".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        inner.next_subscription += 1;
        let id = inner.next_subscription;
        inner
            .subscribers
            .insert(id, (conversation_id.to_string(), tx));
        Ok(Subscription {
            id,
            conversation_id: conversation_id.to_string(),
            events: rx,
        })
    }

    async fn unsubscribe(&self, subscription_id: u64) -> Result<(), BackendError> {
        self.inner.lock().subscribers.remove(&subscription_id);
        self.unsubscribed.lock().push(subscription_id);
        Ok(())
    }
}

#[async_trait]
impl ProfileService for MemoryBackend {
    async fn current_user_id(&self) -> Result<Option<String>, BackendError> {
        Ok(self.inner.lock().current_user.clone())
    }

    async fn fetch_profiles(
        &self,
        user_ids: &[String],
    ) -> Result<Vec<ProfileSummary>, BackendError> {
        self.profile_calls.lock().push(user_ids.to_vec());
        let gate = self.profile_gate.lock().clone();
        if let Some(gate) = gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| BackendError::Request(e.to_string()))?;
        }
        self.check(&self.fail_profiles)?;
        let inner = self.inner.lock();
        Ok(user_ids
            .iter()
            .filter_map(|id| inner.profiles.get(id).cloned())
            .collect())
    }
}

pub fn session(backend: &Arc<MemoryBackend>) -> (ChatSession, mpsc::UnboundedReceiver<ChatEvent>) {
    session_with(backend, ChatConfig::default())
}

pub fn session_with(
    backend: &Arc<MemoryBackend>,
    config: ChatConfig,
) -> (ChatSession, mpsc::UnboundedReceiver<ChatEvent>) {
    ChatSession::new(backend.clone(), backend.clone(), backend.clone(), config)
}

pub fn page_size(page_size: usize) -> ChatConfig {
    ChatConfig {
        page_size,
        ..Default::default()
    }
}

/// Poll `check` while letting spawned tasks run
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    check()
}

pub fn drain(events: &mut mpsc::UnboundedReceiver<ChatEvent>) -> Vec<ChatEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

pub fn assert_ordered(messages: &[Message]) {
    for pair in messages.windows(2) {
        assert!(
            pair[0].created_at <= pair[1].created_at,
            "messages out of order: {} after {}",
            pair[1].id,
            pair[0].id
        );
    }
}

pub fn assert_unique(messages: &[Message]) {
    let mut seen = std::collections::HashSet::new();
    for message in messages {
        assert!(seen.insert(&message.id), "duplicate message {}", message.id);
    }
}
