//! Profile entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use trek_chat::ProfileSummary;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "profiles")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for ProfileSummary {
    fn from(model: Model) -> Self {
        Self {
            user_id: model.user_id,
            display_name: model.display_name,
            avatar_url: model.avatar_url,
        }
    }
}
