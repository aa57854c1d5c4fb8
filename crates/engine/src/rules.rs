//! Savings rules.
//!
//! A rule is a condition over a transaction (exact category, inclusive amount
//! range on the absolute value) and an action computing how much to move to
//! a savings account when it matches.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::{Category, EngineError, MoneyCents, Transaction};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RuleCondition {
    pub category: Category,
    pub min_amount: Option<MoneyCents>,
    pub max_amount: Option<MoneyCents>,
}

impl RuleCondition {
    /// Both bounds are inclusive and apply to the absolute amount, so refunds
    /// in a category match the same way purchases do.
    pub fn matches(&self, transaction: &Transaction) -> bool {
        if transaction.category != self.category {
            return false;
        }
        let amount = transaction.amount.abs();
        self.min_amount.is_none_or(|min| amount >= min)
            && self.max_amount.is_none_or(|max| amount <= max)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleAction {
    /// Save `factor` times the absolute transaction amount.
    Multiply { factor: f64 },
    /// Save a fixed dollar amount per match.
    Fixed { dollars: f64 },
}

impl RuleAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Multiply { .. } => "multiply",
            Self::Fixed { .. } => "fixed",
        }
    }

    pub fn value(self) -> f64 {
        match self {
            Self::Multiply { factor } => factor,
            Self::Fixed { dollars } => dollars,
        }
    }

    pub fn from_parts(action_type: &str, value: f64) -> Result<Self, EngineError> {
        match action_type {
            "multiply" => Ok(Self::Multiply { factor: value }),
            "fixed" => Ok(Self::Fixed { dollars: value }),
            other => Err(EngineError::InvalidRule(format!(
                "unknown action type: {other}"
            ))),
        }
    }

    /// Amount to move for a transaction of `amount`.
    ///
    /// ```rust
    /// use engine::{MoneyCents, RuleAction};
    ///
    /// let spend = MoneyCents::new(2000);
    /// assert_eq!(RuleAction::Multiply { factor: 1.5 }.savings_for(spend).cents(), 3000);
    /// assert_eq!(RuleAction::Fixed { dollars: 5.0 }.savings_for(spend).cents(), 500);
    /// ```
    pub fn savings_for(self, amount: MoneyCents) -> MoneyCents {
        match self {
            Self::Multiply { factor } => amount.abs().scaled(factor),
            Self::Fixed { dollars } => MoneyCents::from_dollars(dollars),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Rule {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub condition: RuleCondition,
    pub action: RuleAction,
    pub target_account_id: Uuid,
    pub is_active: bool,
    pub priority: i32,
    pub execution_count: i64,
    pub total_saved: MoneyCents,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "rules")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub category: String,
    pub min_amount_cents: Option<i64>,
    pub max_amount_cents: Option<i64>,
    pub action_type: String,
    pub action_value: f64,
    pub target_account_id: Uuid,
    pub is_active: bool,
    pub priority: i32,
    pub execution_count: i64,
    pub total_saved_cents: i64,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::accounts::Entity",
        from = "Column::TargetAccountId",
        to = "super::accounts::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    TargetAccount,
    #[sea_orm(has_many = "super::rule_executions::Entity")]
    Executions,
}

impl Related<super::accounts::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TargetAccount.def()
    }
}

impl Related<super::rule_executions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Executions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<&Model> for RuleCondition {
    type Error = EngineError;

    fn try_from(model: &Model) -> Result<Self, Self::Error> {
        Ok(Self {
            category: Category::try_from(model.category.as_str())?,
            min_amount: model.min_amount_cents.map(MoneyCents::new),
            max_amount: model.max_amount_cents.map(MoneyCents::new),
        })
    }
}

impl TryFrom<&Model> for RuleAction {
    type Error = EngineError;

    fn try_from(model: &Model) -> Result<Self, Self::Error> {
        Self::from_parts(&model.action_type, model.action_value)
    }
}

impl TryFrom<Model> for Rule {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let condition = RuleCondition::try_from(&model)?;
        let action = RuleAction::try_from(&model)?;
        Ok(Self {
            id: model.id,
            user_id: model.user_id,
            name: model.name,
            condition,
            action,
            target_account_id: model.target_account_id,
            is_active: model.is_active,
            priority: model.priority,
            execution_count: model.execution_count,
            total_saved: MoneyCents::new(model.total_saved_cents),
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}
