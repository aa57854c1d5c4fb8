//! Rule executions.
//!
//! One row per `(rule_id, transaction_id)` match. The pair is unique in the
//! database and the engine treats a violation as "already executed".

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineError, MoneyCents};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl TryFrom<&str> for ExecutionStatus {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(EngineError::KeyNotFound(format!(
                "invalid execution status: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RuleExecution {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub transaction_id: Uuid,
    pub user_id: Uuid,
    pub amount: MoneyCents,
    pub source_account_id: Uuid,
    pub target_account_id: Uuid,
    pub status: ExecutionStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "rule_executions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub rule_id: Uuid,
    pub transaction_id: Uuid,
    pub user_id: Uuid,
    pub amount_cents: i64,
    pub source_account_id: Uuid,
    pub target_account_id: Uuid,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: DateTimeUtc,
    pub completed_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::rules::Entity",
        from = "Column::RuleId",
        to = "super::rules::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    Rule,
    #[sea_orm(has_one = "super::savings_transfers::Entity")]
    SavingsTransfer,
}

impl Related<super::rules::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Rule.def()
    }
}

impl Related<super::savings_transfers::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SavingsTransfer.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for RuleExecution {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            rule_id: model.rule_id,
            transaction_id: model.transaction_id,
            user_id: model.user_id,
            amount: MoneyCents::new(model.amount_cents),
            source_account_id: model.source_account_id,
            target_account_id: model.target_account_id,
            status: ExecutionStatus::try_from(model.status.as_str())?,
            error_message: model.error_message,
            created_at: model.created_at,
            completed_at: model.completed_at,
        })
    }
}
