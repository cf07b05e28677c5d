//! In-memory message list of the active conversation.
//!
//! Every change to the rendered list goes through a [`Timeline`] method. The
//! list is kept non-decreasing by `created_at`; equal timestamps keep arrival
//! order. Authoritative identifiers are unique within the list.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

use crate::models::{Message, ProfileSummary};

/// Result of folding an authoritative message into the list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    /// Temporary identifier of the pending entry that was replaced
    pub replaced_pending: Option<String>,
    /// False when the message was already present
    pub inserted: bool,
}

#[derive(Debug, Clone)]
pub struct Timeline {
    conversation_id: Option<String>,
    generation: u64,
    messages: Vec<Message>,
    cursor: Option<DateTime<Utc>>,
    has_more: bool,
    loading_older: bool,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Timeline {
    pub fn new() -> Self {
        Self {
            conversation_id: None,
            generation: 0,
            messages: Vec::new(),
            cursor: None,
            has_more: true,
            loading_older: false,
        }
    }

    /// Drop everything and start over for `conversation_id`.
    ///
    /// Returns the new generation; responses captured under an older generation
    /// are stale.
    pub fn reset(&mut self, conversation_id: Option<String>) -> u64 {
        self.conversation_id = conversation_id;
        self.generation += 1;
        self.messages.clear();
        self.cursor = None;
        self.has_more = true;
        self.loading_older = false;
        self.generation
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.conversation_id.as_deref() == Some(conversation_id)
    }

    pub fn is_current(&self, conversation_id: &str, generation: u64) -> bool {
        self.generation == generation && self.is_active(conversation_id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Timestamp of the oldest loaded page entry
    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        self.cursor
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_loading_older(&self) -> bool {
        self.loading_older
    }

    pub fn get(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == message_id)
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.get(message_id).is_some()
    }

    /// Claim the older-page slot. False if a load is in flight or history is exhausted.
    pub fn begin_older_load(&mut self) -> bool {
        if self.loading_older || !self.has_more {
            return false;
        }
        self.loading_older = true;
        true
    }

    pub fn finish_older_load(&mut self) {
        self.loading_older = false;
    }

    /// Install the latest page.
    ///
    /// `page` is newest first, as returned by the backend. Entries that arrived
    /// while the page was in flight (realtime inserts, pending sends) are kept,
    /// and so are older pages already merged: the cursor never moves forward
    /// while those are held.
    pub fn replace_with_latest(&mut self, page: Vec<Message>, page_size: usize) {
        let page_has_more = page.len() >= page_size;

        let mut ascending = page;
        ascending.reverse();
        let page_oldest = ascending.first().map(|m| m.created_at);
        match (self.cursor, page_oldest) {
            (Some(held), Some(oldest)) if held < oldest => {}
            (Some(_), None) => {}
            _ => {
                self.cursor = page_oldest;
                self.has_more = page_has_more;
            }
        }

        let page_ids: HashSet<String> = ascending.iter().map(|m| m.id.clone()).collect();
        let arrived: Vec<Message> = self
            .messages
            .drain(..)
            .filter(|m| !page_ids.contains(&m.id))
            .collect();

        self.messages = dedup_by_id(ascending);
        for message in arrived {
            self.insert_ordered(message);
        }
    }

    /// Merge an older page in front of the list and return how many entries were added.
    ///
    /// `page` is newest first. Entries already present are skipped; the relative
    /// order of entries already loaded never changes.
    pub fn prepend_older(&mut self, page: Vec<Message>, page_size: usize) -> usize {
        self.has_more = page.len() >= page_size;

        // a page of entries that are all held still moves the boundary back
        if let Some(oldest) = page.iter().map(|m| m.created_at).min() {
            self.cursor = Some(match self.cursor {
                Some(current) => current.min(oldest),
                None => oldest,
            });
        }

        let mut older: Vec<Message> = dedup_by_id(page.into_iter().rev().collect());
        older.retain(|m| !self.contains(&m.id));
        let prepended = older.len();

        older.append(&mut self.messages);
        self.messages = older;
        // stable: equal timestamps keep their relative order
        if !self.is_sorted() {
            self.messages.sort_by_key(|m| m.created_at);
        }
        prepended
    }

    /// Insert after every entry with an equal or earlier timestamp.
    ///
    /// Returns false if an entry with the same identifier exists.
    pub fn insert_ordered(&mut self, message: Message) -> bool {
        if self.contains(&message.id) {
            return false;
        }
        let at = self
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        self.messages.insert(at, message);
        true
    }

    /// Fold an authoritative message delivered by the change feed.
    ///
    /// Removes the first pending entry with the same sender and content, then
    /// inserts the message unless its identifier is already present.
    pub fn reconcile(&mut self, message: Message) -> Reconciled {
        let replaced_pending = self
            .messages
            .iter()
            .position(|m| {
                m.pending && m.sender_id == message.sender_id && m.content == message.content
            })
            .map(|at| self.messages.remove(at).id);

        let inserted = self.insert_ordered(message);
        Reconciled {
            replaced_pending,
            inserted,
        }
    }

    pub fn remove(&mut self, message_id: &str) -> Option<Message> {
        let at = self.messages.iter().position(|m| m.id == message_id)?;
        Some(self.messages.remove(at))
    }

    /// Mutate one entry in place
    pub fn update<R>(&mut self, message_id: &str, f: impl FnOnce(&mut Message) -> R) -> Option<R> {
        self.messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .map(f)
    }

    /// Fill in the sender profile on every entry by `profile.user_id` that lacks one
    pub fn attach_profile(&mut self, profile: &ProfileSummary) -> usize {
        let mut patched = 0;
        for message in self
            .messages
            .iter_mut()
            .filter(|m| m.sender_id == profile.user_id && m.sender.is_none())
        {
            message.sender = Some(profile.clone());
            patched += 1;
        }
        patched
    }

    pub fn attach_profiles(&mut self, profiles: &HashMap<String, ProfileSummary>) {
        for message in self.messages.iter_mut().filter(|m| m.sender.is_none()) {
            if let Some(profile) = profiles.get(&message.sender_id) {
                message.sender = Some(profile.clone());
            }
        }
    }

    fn is_sorted(&self) -> bool {
        self.messages
            .windows(2)
            .all(|w| w[0].created_at <= w[1].created_at)
    }
}

fn dedup_by_id(messages: Vec<Message>) -> Vec<Message> {
    let mut seen = HashSet::with_capacity(messages.len());
    messages
        .into_iter()
        .filter(|m| seen.insert(m.id.clone()))
        .collect()
}
