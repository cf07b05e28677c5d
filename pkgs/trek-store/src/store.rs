//! SQLite chat store - backend, profile service and change feed in one

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Database, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use sea_orm_migration::MigratorTrait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use trek_chat::{
    BackendError, ChangeFeed, ChatBackend, ConversationRecord, FeedEvent, Message, MessagePatch,
    NewConversation, NewMessage, ParticipantRecord, ProfileService, ProfileSummary, Subscription,
};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::entities::{conversations, messages, participants, profiles};
use crate::feed::ChangeHub;

fn request(e: DbErr) -> BackendError {
    BackendError::Request(e.to_string())
}

/// Persistent store behind a chat session.
///
/// Clones share the database, the change feed and the clock. Each handle made
/// with [`SqliteChatStore::for_user`] has its own signed-in user, so several
/// sessions can run against one database.
#[derive(Clone)]
pub struct SqliteChatStore {
    db: DatabaseConnection,
    hub: Arc<ChangeHub>,
    clock: Arc<Mutex<i64>>,
    session: Arc<RwLock<Option<String>>>,
}

impl SqliteChatStore {
    /// Open (or create) the database and run migrations
    pub async fn open(config: &StoreConfig) -> Result<Self> {
        let db_url = config.database_url()?;
        let db: DatabaseConnection = Database::connect(db_url.as_str())
            .await
            .context("Failed to connect to database")?;

        crate::migration::Migrator::up(&db, None)
            .await
            .context("Failed to run migrations")?;

        info!("Chat store initialized at {}", config.db_path.display());
        Ok(Self::with_connection(db))
    }

    /// Wrap an existing, migrated connection
    pub fn with_connection(db: DatabaseConnection) -> Self {
        Self {
            db,
            hub: Arc::new(ChangeHub::new()),
            clock: Arc::new(Mutex::new(0)),
            session: Arc::new(RwLock::new(None)),
        }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn hub(&self) -> &ChangeHub {
        &self.hub
    }

    /// Handle on the same store with `user_id` signed in
    pub fn for_user(&self, user_id: &str) -> Self {
        Self {
            session: Arc::new(RwLock::new(Some(user_id.to_string()))),
            ..self.clone()
        }
    }

    pub fn sign_in(&self, user_id: &str) {
        *self.session.write() = Some(user_id.to_string());
        info!(user_id, "Signed in");
    }

    pub fn sign_out(&self) {
        *self.session.write() = None;
        info!("Signed out");
    }

    pub fn session_user(&self) -> Option<String> {
        self.session.read().clone()
    }

    /// Create or replace the profile of `user_id`
    pub async fn upsert_profile(
        &self,
        user_id: &str,
        display_name: &str,
        avatar_url: Option<&str>,
    ) -> Result<ProfileSummary, BackendError> {
        let row = profiles::ActiveModel {
            user_id: Set(user_id.to_string()),
            display_name: Set(display_name.to_string()),
            avatar_url: Set(avatar_url.map(str::to_string)),
            updated_at: Set(Utc::now().timestamp_micros()),
        };
        profiles::Entity::insert(row)
            .on_conflict(
                OnConflict::column(profiles::Column::UserId)
                    .update_columns([
                        profiles::Column::DisplayName,
                        profiles::Column::AvatarUrl,
                        profiles::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await
            .map_err(request)?;

        debug!(user_id, display_name, "Profile saved");
        Ok(ProfileSummary {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            avatar_url: avatar_url.map(str::to_string),
        })
    }

    /// Create the group conversation of a trip batch with its enrolled members
    pub async fn provision_group(
        &self,
        batch_id: &str,
        name: &str,
        member_ids: &[String],
    ) -> Result<ConversationRecord, BackendError> {
        let conversation = NewConversation {
            name: Some(name.to_string()),
            batch_id: Some(batch_id.to_string()),
        };
        self.create_conversation(conversation, member_ids).await
    }

    /// Add `user_id` to a conversation. Existing memberships are left alone.
    pub async fn add_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<(), BackendError> {
        let row = participants::ActiveModel {
            conversation_id: Set(conversation_id.to_string()),
            user_id: Set(user_id.to_string()),
            joined_at: Set(Utc::now().timestamp_micros()),
        };
        participants::Entity::insert(row)
            .on_conflict(
                OnConflict::columns([
                    participants::Column::ConversationId,
                    participants::Column::UserId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await
            .map_err(request)?;
        Ok(())
    }

    /// Strictly increasing timestamp, so rows never tie within a conversation
    fn next_timestamp(&self) -> i64 {
        let mut last = self.clock.lock();
        let now = Utc::now().timestamp_micros().max(*last + 1);
        *last = now;
        now
    }

    async fn is_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<bool, BackendError> {
        let row = participants::Entity::find()
            .filter(participants::Column::ConversationId.eq(conversation_id))
            .filter(participants::Column::UserId.eq(user_id))
            .one(&self.db)
            .await
            .map_err(request)?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl ChatBackend for SqliteChatStore {
    async fn list_memberships(&self, user_id: &str) -> Result<Vec<ParticipantRecord>, BackendError> {
        let rows = participants::Entity::find()
            .filter(participants::Column::UserId.eq(user_id))
            .all(&self.db)
            .await
            .map_err(request)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn fetch_conversations(
        &self,
        ids: &[String],
    ) -> Result<Vec<ConversationRecord>, BackendError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = conversations::Entity::find()
            .filter(conversations::Column::Id.is_in(ids.iter().cloned()))
            .all(&self.db)
            .await
            .map_err(request)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn fetch_participants(
        &self,
        conversation_ids: &[String],
    ) -> Result<Vec<ParticipantRecord>, BackendError> {
        if conversation_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = participants::Entity::find()
            .filter(participants::Column::ConversationId.is_in(conversation_ids.iter().cloned()))
            .order_by_asc(participants::Column::JoinedAt)
            .all(&self.db)
            .await
            .map_err(request)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn fetch_messages(
        &self,
        conversation_id: &str,
        limit: usize,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, BackendError> {
        let mut query =
            messages::Entity::find().filter(messages::Column::ConversationId.eq(conversation_id));
        if let Some(before) = before {
            query = query.filter(messages::Column::CreatedAt.lt(before.timestamp_micros()));
        }
        let rows = query
            .order_by_desc(messages::Column::CreatedAt)
            .limit(limit as u64)
            .all(&self.db)
            .await
            .map_err(request)?;

        debug!(count = rows.len(), "Messages fetched");
        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self, message), fields(conversation_id = %message.conversation_id))]
    async fn insert_message(&self, message: NewMessage) -> Result<Message, BackendError> {
        if !self
            .is_participant(&message.conversation_id, &message.sender_id)
            .await?
        {
            return Err(BackendError::NotFound(message.conversation_id));
        }

        let created_at = self.next_timestamp();
        let row = messages::Model {
            id: Uuid::new_v4().to_string(),
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content,
            created_at,
            edited_at: None,
            is_deleted: false,
            reply_to: message.reply_to,
            reactions_json: "{}".to_string(),
        };
        let active: messages::ActiveModel = row.clone().into();
        messages::Entity::insert(active)
            .exec_without_returning(&self.db)
            .await
            .map_err(request)?;

        conversations::Entity::update_many()
            .col_expr(conversations::Column::LastMessageAt, Expr::value(created_at))
            .filter(conversations::Column::Id.eq(row.conversation_id.as_str()))
            .exec(&self.db)
            .await
            .map_err(request)?;

        let stored = Message::from(row);
        info!(message_id = %stored.id, "Message stored");
        self.hub
            .publish(&stored.conversation_id, FeedEvent::Inserted(stored.clone()));
        Ok(stored)
    }

    #[instrument(skip(self, patch))]
    async fn update_message(
        &self,
        message_id: &str,
        patch: MessagePatch,
    ) -> Result<(), BackendError> {
        let model = messages::Entity::find_by_id(message_id.to_string())
            .one(&self.db)
            .await
            .map_err(request)?
            .ok_or_else(|| BackendError::NotFound(message_id.to_string()))?;

        let mut message = Message::from(model.clone());
        patch.apply_to(&mut message);
        let reactions_json = serde_json::to_string(&message.reactions)
            .map_err(|e| BackendError::Request(e.to_string()))?;

        let mut active: messages::ActiveModel = model.into();
        active.content = Set(message.content.clone());
        active.edited_at = Set(message.edited_at.map(|t| t.timestamp_micros()));
        active.is_deleted = Set(message.is_deleted);
        active.reactions_json = Set(reactions_json);
        active.update(&self.db).await.map_err(request)?;

        debug!(is_deleted = message.is_deleted, "Message updated");
        let conversation_id = message.conversation_id.clone();
        self.hub
            .publish(&conversation_id, FeedEvent::Updated(message));
        Ok(())
    }

    #[instrument(skip(self))]
    async fn create_conversation(
        &self,
        conversation: NewConversation,
        participant_ids: &[String],
    ) -> Result<ConversationRecord, BackendError> {
        let now = Utc::now().timestamp_micros();
        let row = conversations::Model {
            id: Uuid::new_v4().to_string(),
            name: conversation.name,
            batch_id: conversation.batch_id,
            created_at: now,
            last_message_at: None,
        };
        let active: conversations::ActiveModel = row.clone().into();
        conversations::Entity::insert(active)
            .exec_without_returning(&self.db)
            .await
            .map_err(request)?;

        let members: BTreeSet<&String> = participant_ids.iter().collect();
        if !members.is_empty() {
            let rows = members.into_iter().map(|user_id| participants::ActiveModel {
                conversation_id: Set(row.id.clone()),
                user_id: Set(user_id.clone()),
                joined_at: Set(now),
            });
            participants::Entity::insert_many(rows)
                .exec_without_returning(&self.db)
                .await
                .map_err(request)?;
        }

        info!(conversation_id = %row.id, "Conversation created");
        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn delete_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<(), BackendError> {
        let result = participants::Entity::delete_many()
            .filter(participants::Column::ConversationId.eq(conversation_id))
            .filter(participants::Column::UserId.eq(user_id))
            .exec(&self.db)
            .await
            .map_err(request)?;
        if result.rows_affected == 0 {
            return Err(BackendError::NotFound(format!(
                "{user_id} in {conversation_id}"
            )));
        }
        info!("Participant removed");
        Ok(())
    }
}

#[async_trait]
impl ChangeFeed for SqliteChatStore {
    async fn subscribe(&self, conversation_id: &str) -> Result<Subscription, BackendError> {
        Ok(self.hub.subscribe(conversation_id))
    }

    async fn unsubscribe(&self, subscription_id: u64) -> Result<(), BackendError> {
        if !self.hub.unsubscribe(subscription_id) {
            debug!(subscription_id, "Unsubscribe for unknown subscription");
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileService for SqliteChatStore {
    async fn current_user_id(&self) -> Result<Option<String>, BackendError> {
        Ok(self.session_user())
    }

    async fn fetch_profiles(
        &self,
        user_ids: &[String],
    ) -> Result<Vec<ProfileSummary>, BackendError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = profiles::Entity::find()
            .filter(profiles::Column::UserId.is_in(user_ids.iter().cloned()))
            .all(&self.db)
            .await
            .map_err(request)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
