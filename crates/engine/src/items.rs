//! Linked institutions.
//!
//! An `Item` is one connection to a financial institution through the
//! aggregator. It owns the access credential used for every sync call and is
//! soft-disabled (never deleted) when the user disconnects it.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::Serialize;
use uuid::Uuid;

/// Item snapshot exposed to callers. The access credential is deliberately
/// not part of it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Item {
    pub id: Uuid,
    pub user_id: Uuid,
    pub external_id: String,
    pub institution_name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    #[sea_orm(unique)]
    pub external_id: String,
    pub access_token: String,
    pub institution_name: String,
    pub is_active: bool,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::accounts::Entity")]
    Accounts,
    #[sea_orm(has_one = "super::sync_cursors::Entity")]
    SyncCursor,
}

impl Related<super::accounts::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Accounts.def()
    }
}

impl Related<super::sync_cursors::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SyncCursor.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for Item {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            external_id: model.external_id,
            institution_name: model.institution_name,
            is_active: model.is_active,
            created_at: model.created_at,
        }
    }
}
