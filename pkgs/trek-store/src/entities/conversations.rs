//! Conversation entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use trek_chat::ConversationRecord;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "conversations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: Option<String>,
    pub batch_id: Option<String>, // None for direct chats
    pub created_at: i64,
    pub last_message_at: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::participants::Entity")]
    Participants,
    #[sea_orm(has_many = "super::messages::Entity")]
    Messages,
}

impl Related<super::participants::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Participants.def()
    }
}

impl Related<super::messages::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Messages.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for ConversationRecord {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            batch_id: model.batch_id,
            created_at: super::to_datetime(model.created_at),
            last_message_at: model.last_message_at.map(super::to_datetime),
        }
    }
}
