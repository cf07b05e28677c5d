//! Trek Chat - group chat and messaging core
//!
//! This crate holds the messaging logic of the trekking platform: trip-batch
//! group chats and direct chats between users. It is backend-agnostic; the data
//! store, profile service and realtime feed are injected as trait objects (see
//! [`backend`]).
//!
//! # Architecture
//!
//! - **ConversationDirectory**: conversations of the signed-in user, participant
//!   identities, selection, direct-chat creation
//! - **MessageStore**: ordered, de-duplicated, paginated message list of the
//!   active conversation; the only writer of rendered message state
//! - **SendPipeline**: optimistic sends with pending entries
//! - **RealtimeIngestion**: one change feed subscription, folded into the store
//!   and reconciled against pending sends
//! - **MessageMutations**: soft delete, edit, reaction toggling
//! - **ChatSession**: owns all of the above and drives the control flow
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use trek_chat::{ChatConfig, ChatSession};
//!
//! let (session, mut events) = ChatSession::new(backend, feed, profiles, ChatConfig::default());
//! let conversations = session.load_conversations().await?;
//! session.select_conversation(&conversations[0].id).await?;
//! session.send_text("See you at base camp").await?;
//! ```

pub mod backend;
pub mod config;
pub mod directory;
pub mod error;
pub mod events;
pub mod message_store;
pub mod models;
pub mod mutations;
pub mod profiles;
pub mod realtime;
pub mod send;
pub mod session;
pub mod timeline;

pub use backend::{ChangeFeed, ChatBackend, Confirm, FeedEvent, ProfileService, Subscription};
pub use config::ChatConfig;
pub use directory::ConversationDirectory;
pub use error::{BackendError, ChatError, ErrorClass, Result};
pub use events::{ChatEvent, EventSink, UserAction};
pub use message_store::{MessageStore, PageOutcome};
pub use models::{
    toggled_reactions, Conversation, ConversationRecord, Message, MessagePatch, NewConversation,
    NewMessage, Participant, ParticipantRecord, ProfileSummary, Reactions,
};
pub use mutations::MessageMutations;
pub use profiles::ProfileCache;
pub use realtime::{RealtimeIngestion, SubscriptionState};
pub use send::{Composer, SendPipeline};
pub use session::ChatSession;
pub use timeline::{Reconciled, Timeline};
