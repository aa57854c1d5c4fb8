use chrono::Utc;
use sea_orm::{
    ActiveValue, QueryFilter, QueryOrder, QuerySelect, SqlErr, TransactionTrait, prelude::*,
    sea_query::Expr,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    AccountType, EngineError, MoneyCents, NewRule, ResultEngine, Rule, RuleAction, RuleCondition,
    RuleExecution, SavingsTransfer, Transaction, accounts,
    notifier::Notification,
    rule_executions::{self, ExecutionStatus},
    rules,
    savings_transfers::{self, TransferStatus},
};

use super::{Engine, with_tx};

/// Result of executing one matched rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Executed {
        execution_id: Uuid,
        amount: MoneyCents,
    },
    /// The `(rule, transaction)` pair already has an execution.
    AlreadyExecuted,
}

/// Summary of one `process_transaction` call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RuleEvaluation {
    pub matched: usize,
    pub executed: usize,
    pub duplicates: usize,
    pub failed: usize,
}

impl Engine {
    /// Evaluates the owner's active rules against a transaction and executes
    /// every match, in `priority`, then creation, order.
    ///
    /// Pending and transfer transactions are ignored. A rule that fails to
    /// execute is logged and counted in [`RuleEvaluation::failed`]; the other
    /// rules still run. Only failing to load the account or the rules is an
    /// error.
    pub async fn process_transaction(
        &self,
        transaction: &Transaction,
    ) -> ResultEngine<RuleEvaluation> {
        let mut evaluation = RuleEvaluation::default();
        if !transaction.is_rule_eligible() {
            debug!(
                transaction = %transaction.external_id,
                pending = transaction.pending,
                category = %transaction.category,
                "transaction not eligible for rules"
            );
            return Ok(evaluation);
        }

        let account = accounts::Entity::find_by_id(transaction.account_id)
            .one(&self.database)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("account not exists".to_string()))?;

        let candidates = rules::Entity::find()
            .filter(rules::Column::UserId.eq(account.user_id))
            .filter(rules::Column::IsActive.eq(true))
            .order_by_asc(rules::Column::Priority)
            .order_by_asc(rules::Column::CreatedAt)
            .order_by_asc(rules::Column::Id)
            .all(&self.database)
            .await?;

        for rule in candidates {
            let condition = match RuleCondition::try_from(&rule) {
                Ok(condition) => condition,
                Err(err) => {
                    error!(rule_id = %rule.id, error = %err, "unreadable rule condition");
                    evaluation.failed += 1;
                    continue;
                }
            };
            if !condition.matches(transaction) {
                continue;
            }
            evaluation.matched += 1;

            match self.execute_rule(&rule, transaction, &account).await {
                Ok(ExecutionOutcome::Executed { amount, .. }) => {
                    evaluation.executed += 1;
                    info!(
                        rule = %rule.name,
                        transaction = %transaction.external_id,
                        amount_cents = amount.cents(),
                        "rule executed"
                    );
                    self.notify_savings(account.user_id, &rule.name, amount)
                        .await;
                }
                Ok(ExecutionOutcome::AlreadyExecuted) => {
                    evaluation.duplicates += 1;
                    debug!(
                        rule_id = %rule.id,
                        transaction = %transaction.external_id,
                        "rule already executed for transaction"
                    );
                }
                Err(err) => {
                    evaluation.failed += 1;
                    error!(
                        rule_id = %rule.id,
                        transaction = %transaction.external_id,
                        error = %err,
                        "rule execution failed"
                    );
                }
            }
        }

        Ok(evaluation)
    }

    /// Records the execution, its savings transfer and the rule statistics in
    /// one database transaction.
    async fn execute_rule(
        &self,
        rule: &rules::Model,
        transaction: &Transaction,
        source: &accounts::Model,
    ) -> ResultEngine<ExecutionOutcome> {
        let action = RuleAction::try_from(rule)?;
        let amount = action.savings_for(transaction.amount);
        let now = Utc::now();

        with_tx!(self, |db_tx| {
            let existing = rule_executions::Entity::find()
                .filter(rule_executions::Column::RuleId.eq(rule.id))
                .filter(rule_executions::Column::TransactionId.eq(transaction.id))
                .one(&db_tx)
                .await?;
            if existing.is_some() {
                return Ok(ExecutionOutcome::AlreadyExecuted);
            }

            let execution_id = Uuid::new_v4();
            let execution = rule_executions::ActiveModel {
                id: ActiveValue::Set(execution_id),
                rule_id: ActiveValue::Set(rule.id),
                transaction_id: ActiveValue::Set(transaction.id),
                user_id: ActiveValue::Set(source.user_id),
                amount_cents: ActiveValue::Set(amount.cents()),
                source_account_id: ActiveValue::Set(source.id),
                target_account_id: ActiveValue::Set(rule.target_account_id),
                status: ActiveValue::Set(ExecutionStatus::Pending.as_str().to_string()),
                error_message: ActiveValue::Set(None),
                created_at: ActiveValue::Set(now),
                completed_at: ActiveValue::Set(None),
            };
            if let Err(err) = execution.insert(&db_tx).await {
                // A concurrent evaluation won the race for this pair.
                if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                    return Ok(ExecutionOutcome::AlreadyExecuted);
                }
                return Err(err.into());
            }

            savings_transfers::ActiveModel {
                id: ActiveValue::Set(Uuid::new_v4()),
                rule_execution_id: ActiveValue::Set(execution_id),
                user_id: ActiveValue::Set(source.user_id),
                source_account_id: ActiveValue::Set(source.id),
                target_account_id: ActiveValue::Set(rule.target_account_id),
                amount_cents: ActiveValue::Set(amount.cents()),
                status: ActiveValue::Set(TransferStatus::Suggested.as_str().to_string()),
                external_transfer_id: ActiveValue::Set(None),
                created_at: ActiveValue::Set(now),
            }
            .insert(&db_tx)
            .await?;

            let updated = rules::Entity::update_many()
                .col_expr(
                    rules::Column::ExecutionCount,
                    Expr::col(rules::Column::ExecutionCount).add(1),
                )
                .col_expr(
                    rules::Column::TotalSavedCents,
                    Expr::col(rules::Column::TotalSavedCents).add(amount.cents()),
                )
                .col_expr(rules::Column::UpdatedAt, Expr::value(now))
                .filter(rules::Column::Id.eq(rule.id))
                .exec(&db_tx)
                .await?;
            if updated.rows_affected != 1 {
                return Err(EngineError::KeyNotFound("rule not exists".to_string()));
            }

            rule_executions::ActiveModel {
                id: ActiveValue::Set(execution_id),
                status: ActiveValue::Set(ExecutionStatus::Completed.as_str().to_string()),
                completed_at: ActiveValue::Set(Some(Utc::now())),
                ..Default::default()
            }
            .update(&db_tx)
            .await?;

            Ok(ExecutionOutcome::Executed {
                execution_id,
                amount,
            })
        })
    }

    async fn notify_savings(&self, user_id: Uuid, rule_name: &str, amount: MoneyCents) {
        let notification = Notification {
            title: format!("{amount} moved to Savings"),
            body: format!("Rule: {rule_name}"),
        };
        let delivery = self.notifier.notify(user_id, &notification).await;
        if delivery.failures.is_empty() {
            debug!(user_id = %user_id, sent = delivery.sent, "savings notification sent");
        } else {
            warn!(
                user_id = %user_id,
                sent = delivery.sent,
                failed = delivery.failures.len(),
                first_error = %delivery.failures[0],
                "savings notification partly failed"
            );
        }
    }

    /// Creates an active rule.
    ///
    /// The target must be an active savings account of the same user.
    pub async fn create_rule(&self, cmd: NewRule) -> ResultEngine<Rule> {
        let name = cmd.validate()?;
        let now = Utc::now();
        with_tx!(self, |db_tx| {
            let target = accounts::Entity::find_by_id(cmd.target_account_id)
                .filter(accounts::Column::UserId.eq(cmd.user_id))
                .one(&db_tx)
                .await?
                .ok_or_else(|| EngineError::KeyNotFound("account not exists".to_string()))?;
            if !target.is_active {
                return Err(EngineError::InvalidRule(
                    "target account is disconnected".to_string(),
                ));
            }
            if AccountType::try_from(target.account_type.as_str())? != AccountType::Savings {
                return Err(EngineError::InvalidRule(
                    "target account must be a savings account".to_string(),
                ));
            }

            let model = rules::ActiveModel {
                id: ActiveValue::Set(Uuid::new_v4()),
                user_id: ActiveValue::Set(cmd.user_id),
                name: ActiveValue::Set(name),
                category: ActiveValue::Set(cmd.category.as_str().to_string()),
                min_amount_cents: ActiveValue::Set(cmd.min_amount.map(MoneyCents::cents)),
                max_amount_cents: ActiveValue::Set(cmd.max_amount.map(MoneyCents::cents)),
                action_type: ActiveValue::Set(cmd.action.as_str().to_string()),
                action_value: ActiveValue::Set(cmd.action.value()),
                target_account_id: ActiveValue::Set(target.id),
                is_active: ActiveValue::Set(true),
                priority: ActiveValue::Set(cmd.priority),
                execution_count: ActiveValue::Set(0),
                total_saved_cents: ActiveValue::Set(0),
                created_at: ActiveValue::Set(now),
                updated_at: ActiveValue::Set(now),
            }
            .insert(&db_tx)
            .await?;

            Rule::try_from(model)
        })
    }

    /// Enables or disables a rule. Rules are never deleted: executions keep
    /// referencing them.
    pub async fn set_rule_active(
        &self,
        user_id: Uuid,
        rule_id: Uuid,
        active: bool,
    ) -> ResultEngine<Rule> {
        with_tx!(self, |db_tx| {
            let model = rules::Entity::find_by_id(rule_id)
                .filter(rules::Column::UserId.eq(user_id))
                .one(&db_tx)
                .await?
                .ok_or_else(|| EngineError::KeyNotFound("rule not exists".to_string()))?;
            let mut active_model: rules::ActiveModel = model.into();
            active_model.is_active = ActiveValue::Set(active);
            active_model.updated_at = ActiveValue::Set(Utc::now());
            let model = active_model.update(&db_tx).await?;
            Rule::try_from(model)
        })
    }

    /// All rules of a user, in evaluation order.
    pub async fn rules(&self, user_id: Uuid) -> ResultEngine<Vec<Rule>> {
        rules::Entity::find()
            .filter(rules::Column::UserId.eq(user_id))
            .order_by_asc(rules::Column::Priority)
            .order_by_asc(rules::Column::CreatedAt)
            .order_by_asc(rules::Column::Id)
            .all(&self.database)
            .await?
            .into_iter()
            .map(Rule::try_from)
            .collect()
    }

    /// Most recent executions first.
    pub async fn rule_executions(
        &self,
        user_id: Uuid,
        limit: u64,
    ) -> ResultEngine<Vec<RuleExecution>> {
        rule_executions::Entity::find()
            .filter(rule_executions::Column::UserId.eq(user_id))
            .order_by_desc(rule_executions::Column::CreatedAt)
            .order_by_desc(rule_executions::Column::Id)
            .limit(limit)
            .all(&self.database)
            .await?
            .into_iter()
            .map(RuleExecution::try_from)
            .collect()
    }

    pub async fn savings_transfers(&self, user_id: Uuid) -> ResultEngine<Vec<SavingsTransfer>> {
        savings_transfers::Entity::find()
            .filter(savings_transfers::Column::UserId.eq(user_id))
            .order_by_desc(savings_transfers::Column::CreatedAt)
            .all(&self.database)
            .await?
            .into_iter()
            .map(SavingsTransfer::try_from)
            .collect()
    }
}
