//! Per-item sync progress.
//!
//! One row per item, created lazily on the first sync attempt. The `cursor`
//! is the resumption point for the aggregator feed: an empty cursor means the
//! item was never synced. Only the sync engine writes these rows, and it only
//! moves the cursor forward after a page has been fully applied.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::Serialize;
use uuid::Uuid;

/// Sync state of an item, as shown to the user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub item_id: Uuid,
    pub cursor: String,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: i32,
}

impl SyncStatus {
    /// `true` if no page was ever applied for the item.
    pub fn never_synced(&self) -> bool {
        self.cursor.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_cursors")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub item_id: Uuid,
    pub cursor: String,
    pub last_sync_at: Option<DateTimeUtc>,
    pub last_error: Option<String>,
    pub consecutive_failures: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::items::Entity",
        from = "Column::ItemId",
        to = "super::items::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Item,
}

impl Related<super::items::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Item.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for SyncStatus {
    fn from(model: Model) -> Self {
        Self {
            item_id: model.item_id,
            cursor: model.cursor,
            last_sync_at: model.last_sync_at,
            last_error: model.last_error,
            consecutive_failures: model.consecutive_failures,
        }
    }
}
