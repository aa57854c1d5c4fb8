//! Virtual-ledger transfers.
//!
//! A transfer records money conceptually moved from the spending account to
//! the rule's savings account. Nothing is moved at the aggregator; rows start
//! as `Suggested`.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineError, MoneyCents};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Suggested,
    Approved,
    Executed,
    Cancelled,
    Failed,
}

impl TransferStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Suggested => "suggested",
            Self::Approved => "approved",
            Self::Executed => "executed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl TryFrom<&str> for TransferStatus {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "suggested" => Ok(Self::Suggested),
            "approved" => Ok(Self::Approved),
            "executed" => Ok(Self::Executed),
            "cancelled" => Ok(Self::Cancelled),
            "failed" => Ok(Self::Failed),
            other => Err(EngineError::KeyNotFound(format!(
                "invalid transfer status: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SavingsTransfer {
    pub id: Uuid,
    pub rule_execution_id: Uuid,
    pub user_id: Uuid,
    pub source_account_id: Uuid,
    pub target_account_id: Uuid,
    pub amount: MoneyCents,
    pub status: TransferStatus,
    pub external_transfer_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "savings_transfers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub rule_execution_id: Uuid,
    pub user_id: Uuid,
    pub source_account_id: Uuid,
    pub target_account_id: Uuid,
    pub amount_cents: i64,
    pub status: String,
    pub external_transfer_id: Option<String>,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::rule_executions::Entity",
        from = "Column::RuleExecutionId",
        to = "super::rule_executions::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    RuleExecution,
}

impl Related<super::rule_executions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RuleExecution.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for SavingsTransfer {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            rule_execution_id: model.rule_execution_id,
            user_id: model.user_id,
            source_account_id: model.source_account_id,
            target_account_id: model.target_account_id,
            amount: MoneyCents::new(model.amount_cents),
            status: TransferStatus::try_from(model.status.as_str())?,
            external_transfer_id: model.external_transfer_id,
            created_at: model.created_at,
        })
    }
}
