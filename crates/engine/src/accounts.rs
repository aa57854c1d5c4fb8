//! The module contains the `Account` struct and its type mapping.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineError, MoneyCents};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Checking,
    Savings,
    Credit,
    Other,
}

impl AccountType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Checking => "checking",
            Self::Savings => "savings",
            Self::Credit => "credit",
            Self::Other => "other",
        }
    }

    /// Maps the aggregator's `(type, subtype)` pair.
    ///
    /// Depository accounts are told apart by subtype, any credit product is
    /// `Credit`, everything else (loans, investments) is `Other`.
    pub fn from_aggregator(kind: &str, subtype: Option<&str>) -> Self {
        match (kind, subtype) {
            (_, Some("checking")) => Self::Checking,
            (_, Some("savings")) => Self::Savings,
            ("credit", _) => Self::Credit,
            _ => Self::Other,
        }
    }
}

impl TryFrom<&str> for AccountType {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "checking" => Ok(Self::Checking),
            "savings" => Ok(Self::Savings),
            "credit" => Ok(Self::Credit),
            "other" => Ok(Self::Other),
            other => Err(EngineError::KeyNotFound(format!(
                "invalid account type: {other}"
            ))),
        }
    }
}

/// A bank account reached through an item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Account {
    pub id: Uuid,
    pub item_id: Uuid,
    pub user_id: Uuid,
    pub external_id: String,
    pub name: String,
    pub account_type: AccountType,
    pub subtype: Option<String>,
    pub mask: Option<String>,
    pub current_balance: MoneyCents,
    pub available_balance: Option<MoneyCents>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "accounts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub item_id: Uuid,
    pub user_id: Uuid,
    #[sea_orm(unique)]
    pub external_id: String,
    pub name: String,
    pub account_type: String,
    pub subtype: Option<String>,
    pub mask: Option<String>,
    pub current_balance: i64,
    pub available_balance: Option<i64>,
    pub is_active: bool,
    pub created_at: DateTimeUtc,
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
    #[sea_orm(has_many = "super::transactions::Entity")]
    Transactions,
}

impl Related<super::items::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Item.def()
    }
}

impl Related<super::transactions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Transactions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for Account {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            item_id: model.item_id,
            user_id: model.user_id,
            external_id: model.external_id,
            name: model.name,
            account_type: AccountType::try_from(model.account_type.as_str())?,
            subtype: model.subtype,
            mask: model.mask,
            current_balance: MoneyCents::new(model.current_balance),
            available_balance: model.available_balance.map(MoneyCents::new),
            is_active: model.is_active,
            created_at: model.created_at,
        })
    }
}
