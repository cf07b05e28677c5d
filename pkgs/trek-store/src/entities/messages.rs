//! Message entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;
use trek_chat::{Message, Reactions};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "messages")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub created_at: i64,
    pub edited_at: Option<i64>,
    pub is_deleted: bool,
    pub reply_to: Option<String>,
    pub reactions_json: String, // emoji -> user ids, as JSON
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::conversations::Entity",
        from = "Column::ConversationId",
        to = "super::conversations::Column::Id"
    )]
    Conversation,
}

impl Related<super::conversations::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Conversation.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for Message {
    fn from(model: Model) -> Self {
        let reactions: Reactions = match serde_json::from_str(&model.reactions_json) {
            Ok(reactions) => reactions,
            Err(e) => {
                warn!(message_id = %model.id, error = %e, "Unreadable reactions column");
                Reactions::new()
            }
        };
        Self {
            id: model.id,
            conversation_id: model.conversation_id,
            sender_id: model.sender_id,
            content: model.content,
            created_at: super::to_datetime(model.created_at),
            edited_at: model.edited_at.map(super::to_datetime),
            is_deleted: model.is_deleted,
            reply_to: model.reply_to,
            reactions,
            sender: None,
            pending: false,
        }
    }
}
