//! Transaction rows mirrored from the aggregator feed.
//!
//! The external id is the natural key: "added" events upsert on it,
//! "modified" events overwrite the mutable fields and "removed" events delete
//! the row.

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::{Category, EngineError, MoneyCents};

/// A settled or pending card/bank transaction.
///
/// `amount` follows the aggregator sign convention: positive is money leaving
/// the account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Transaction {
    pub id: Uuid,
    pub account_id: Uuid,
    pub external_id: String,
    pub amount: MoneyCents,
    pub date: NaiveDate,
    pub name: String,
    pub merchant_name: Option<String>,
    pub category: Category,
    pub source_categories: Vec<String>,
    pub pending: bool,
    pub payment_channel: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Pending and transfer transactions never trigger rules.
    pub fn is_rule_eligible(&self) -> bool {
        !self.pending && !self.category.is_transfer()
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub account_id: Uuid,
    #[sea_orm(unique)]
    pub external_id: String,
    pub amount: i64,
    pub date: Date,
    pub name: String,
    pub merchant_name: Option<String>,
    pub category: String,
    pub source_categories: Json,
    pub pending: bool,
    pub payment_channel: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::accounts::Entity",
        from = "Column::AccountId",
        to = "super::accounts::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Account,
}

impl Related<super::accounts::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Account.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for Transaction {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        // Hints are informational; a malformed blob must not hide the row.
        let source_categories =
            serde_json::from_value(model.source_categories).unwrap_or_default();
        Ok(Self {
            id: model.id,
            account_id: model.account_id,
            external_id: model.external_id,
            amount: MoneyCents::new(model.amount),
            date: model.date,
            name: model.name,
            merchant_name: model.merchant_name,
            category: Category::try_from(model.category.as_str())?,
            source_categories,
            pending: model.pending,
            payment_channel: model.payment_channel,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}
