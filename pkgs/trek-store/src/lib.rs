//! Trek Store - SQLite storage for trek-chat
//!
//! This crate provides the concrete collaborators a [`trek_chat::ChatSession`]
//! runs against: a Sea-ORM backed message and conversation store, the profile
//! service with the signed-in user, and an in-process change feed.
//!
//! # Database Schema
//!
//! - `conversations`: trip-batch group chats (`batch_id` set) and direct chats
//! - `participants`: conversation memberships
//! - `messages`: message rows; reactions are a JSON map of emoji to user ids
//! - `profiles`: display names and avatars
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use trek_chat::{ChatConfig, ChatSession};
//! use trek_store::{SqliteChatStore, StoreConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = SqliteChatStore::open(&StoreConfig::new("trek-chat.db")).await?;
//! let store = Arc::new(store.for_user("alice"));
//! let (session, _events) =
//!     ChatSession::new(store.clone(), store.clone(), store, ChatConfig::default());
//! session.load_conversations().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod entities;
pub mod feed;
pub mod migration;
pub mod store;

pub use config::StoreConfig;
pub use feed::ChangeHub;
pub use store::SqliteChatStore;
