//! Conversation, participant and message types shared by the core and its backends

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Emoji -> identifiers of the users who reacted with it.
///
/// Never holds an empty reactor set; see [`toggled_reactions`].
pub type Reactions = BTreeMap<String, BTreeSet<String>>;

/// Display identity of a user, as returned by the profile service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileSummary {
    pub user_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// Conversation row as stored by the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationRecord {
    pub id: String,
    pub name: Option<String>,
    /// Trip batch this group conversation belongs to; `None` for direct chats
    pub batch_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Membership row linking a user to a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ParticipantRecord {
    pub conversation_id: String,
    pub user_id: String,
}

/// Fields of a conversation to be created
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NewConversation {
    pub name: Option<String>,
    pub batch_id: Option<String>,
}

/// Conversation member with resolved identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Participant {
    pub user_id: String,
    pub profile: Option<ProfileSummary>,
}

impl Participant {
    pub fn display_name<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.profile
            .as_ref()
            .map(|p| p.display_name.as_str())
            .unwrap_or(fallback)
    }
}

/// Conversation as presented by the directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub name: Option<String>,
    pub batch_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub participants: Vec<Participant>,
}

impl Conversation {
    pub fn from_record(record: ConversationRecord, participants: Vec<Participant>) -> Self {
        Self {
            id: record.id,
            name: record.name,
            batch_id: record.batch_id,
            created_at: record.created_at,
            last_message_at: record.last_message_at,
            participants,
        }
    }

    /// Direct chats are the ones not provisioned for a trip batch
    pub fn is_direct(&self) -> bool {
        self.batch_id.is_none()
    }

    /// Timestamp used for directory ordering, newest first
    pub fn recency(&self) -> DateTime<Utc> {
        self.last_message_at.unwrap_or(self.created_at)
    }

    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p.user_id == user_id)
    }

    /// Title for list rendering.
    ///
    /// Uses the stored name, otherwise the other members' names as seen by
    /// `viewer_id`.
    pub fn title(&self, viewer_id: &str, fallback: &str) -> String {
        if let Some(name) = self.name.as_ref().filter(|n| !n.trim().is_empty()) {
            return name.clone();
        }
        let others: Vec<&str> = self
            .participants
            .iter()
            .filter(|p| p.user_id != viewer_id)
            .map(|p| p.display_name(fallback))
            .collect();
        if others.is_empty() {
            fallback.to_string()
        } else {
            others.join(", ")
        }
    }
}

/// A chat message.
///
/// `sender` and `pending` are local-only: the backend never stores them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub reply_to: Option<String>,
    #[serde(default)]
    pub reactions: Reactions,
    #[serde(skip)]
    pub sender: Option<ProfileSummary>,
    #[serde(skip)]
    pub pending: bool,
}

impl Message {
    pub fn sender_name<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.sender
            .as_ref()
            .map(|p| p.display_name.as_str())
            .unwrap_or(fallback)
    }

    /// Mark as deleted and drop the content. There is no way back.
    pub fn soft_delete(&mut self) {
        self.is_deleted = true;
        self.content.clear();
    }

    /// Fold a newer authoritative copy of this message into the local one.
    ///
    /// Keeps the resolved sender profile and never resurrects a deleted message.
    pub fn absorb(&mut self, update: Message) {
        let sender = self.sender.take().or(update.sender);
        let was_deleted = self.is_deleted;
        self.content = update.content;
        self.edited_at = update.edited_at;
        self.is_deleted = update.is_deleted;
        self.reply_to = update.reply_to;
        self.reactions = update.reactions;
        self.sender = sender;
        if was_deleted || self.is_deleted {
            self.soft_delete();
        }
    }
}

/// Message row to be inserted by the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewMessage {
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub reply_to: Option<String>,
}

/// Partial update of a message row. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub edited_at: Option<DateTime<Utc>>,
    pub is_deleted: Option<bool>,
    pub reactions: Option<Reactions>,
}

impl MessagePatch {
    pub fn soft_delete() -> Self {
        Self {
            content: Some(String::new()),
            is_deleted: Some(true),
            ..Default::default()
        }
    }

    pub fn edit(content: String, edited_at: DateTime<Utc>) -> Self {
        Self {
            content: Some(content),
            edited_at: Some(edited_at),
            ..Default::default()
        }
    }

    pub fn reactions(reactions: Reactions) -> Self {
        Self {
            reactions: Some(reactions),
            ..Default::default()
        }
    }

    /// Apply to a message in place
    pub fn apply_to(&self, message: &mut Message) {
        if let Some(content) = &self.content {
            message.content = content.clone();
        }
        if let Some(edited_at) = self.edited_at {
            message.edited_at = Some(edited_at);
        }
        if let Some(reactions) = &self.reactions {
            message.reactions = reactions.clone();
        }
        if self.is_deleted == Some(true) || message.is_deleted {
            message.soft_delete();
        }
    }
}

/// Return `reactions` with `user_id` toggled under `emoji`.
///
/// Adds the user if absent, removes them if present, and drops the emoji key
/// once nobody reacts with it.
pub fn toggled_reactions(reactions: &Reactions, emoji: &str, user_id: &str) -> Reactions {
    let mut next = reactions.clone();
    let reactors = next.entry(emoji.to_string()).or_default();
    if !reactors.remove(user_id) {
        reactors.insert(user_id.to_string());
    }
    if reactors.is_empty() {
        next.remove(emoji);
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(content: &str) -> Message {
        Message {
            id: "m1".to_string(),
            conversation_id: "c1".to_string(),
            sender_id: "alice".to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
            edited_at: None,
            is_deleted: false,
            reply_to: None,
            reactions: Reactions::new(),
            sender: None,
            pending: false,
        }
    }

    #[test]
    fn test_toggle_twice_restores_original() {
        let mut original = Reactions::new();
        original.insert(
            "👍".to_string(),
            BTreeSet::from(["bob".to_string()]),
        );

        let once = toggled_reactions(&original, "👍", "alice");
        assert_eq!(once["👍"].len(), 2);

        let twice = toggled_reactions(&once, "👍", "alice");
        assert_eq!(twice, original);
    }

    #[test]
    fn test_toggle_drops_empty_emoji_key() {
        let added = toggled_reactions(&Reactions::new(), "🔥", "alice");
        assert!(added.contains_key("🔥"));

        let removed = toggled_reactions(&added, "🔥", "alice");
        assert!(removed.is_empty());
    }

    #[test]
    fn test_absorb_never_undeletes() {
        let mut local = message("");
        local.soft_delete();

        let mut remote = message("resurrected");
        remote.is_deleted = false;
        local.absorb(remote);

        assert!(local.is_deleted);
        assert!(local.content.is_empty());
    }

    #[test]
    fn test_patch_soft_delete_clears_content() {
        let mut msg = message("secret");
        MessagePatch::soft_delete().apply_to(&mut msg);
        assert!(msg.is_deleted);
        assert!(msg.content.is_empty());
    }

    #[test]
    fn test_conversation_title_falls_back_to_members() {
        let conv = Conversation {
            id: "c1".to_string(),
            name: None,
            batch_id: None,
            created_at: Utc::now(),
            last_message_at: None,
            participants: vec![
                Participant {
                    user_id: "alice".to_string(),
                    profile: None,
                },
                Participant {
                    user_id: "bob".to_string(),
                    profile: Some(ProfileSummary {
                        user_id: "bob".to_string(),
                        display_name: "Bob".to_string(),
                        avatar_url: None,
                    }),
                },
            ],
        };
        assert_eq!(conv.title("alice", "Unknown"), "Bob");
        assert_eq!(conv.title("bob", "Unknown"), "Unknown");
    }
}
