//! Transaction sync and savings-rule pipeline.
//!
//! The [`Engine`] pulls transactions from a bank-data [`Aggregator`] page by
//! page, categorizes them through the [`Categorizer`], stores them, and runs
//! each settled transaction through the owner's savings [`Rule`]s. Every
//! `(rule, transaction)` pair executes at most once. The [`SyncWorker`]
//! drives the engine in the background.

pub use accounts::{Account, AccountType};
pub use aggregator::{
    Aggregator, AggregatorAccount, AggregatorError, AggregatorTransaction, SandboxAggregator,
    TokenExchange, TransactionSyncPage,
};
pub use categories::Category;
pub use categorizer::{
    CategorizationRequest, CategorizationResponse, Categorizer, CategorizerConfig,
    CategorizerError, Classifier, ClassifierError, Confidence, MAX_WORKERS,
};
pub use commands::NewRule;
pub use error::{EngineError, SyncError};
pub use items::Item;
pub use money::MoneyCents;
pub use notifier::{Delivery, LogNotifier, Notification, Notifier, NotifierError};
pub use ops::{
    BackgroundSync, Engine, EngineBuilder, ExecutionOutcome, LinkedItem, RuleEvaluation,
};
pub use rule_executions::{ExecutionStatus, RuleExecution};
pub use rules::{Rule, RuleAction, RuleCondition};
pub use savings_transfers::{SavingsTransfer, TransferStatus};
pub use sync_cursors::SyncStatus;
pub use transactions::Transaction;
pub use worker::{CycleReport, SyncWorker, SyncWorkerConfig};

mod accounts;
mod aggregator;
mod categories;
mod categorizer;
mod commands;
mod error;
mod items;
mod money;
mod notifier;
mod ops;
mod rule_executions;
mod rules;
mod savings_transfers;
mod sync_cursors;
mod transactions;
mod worker;

type ResultEngine<T> = Result<T, EngineError>;
