//! The module contains the errors the engine can throw.
//!
//! The errors are:
//!
//! - [`KeyNotFound`] thrown when an item, account, rule or cursor is missing.
//! - [`InactiveItem`] thrown when a sync is requested for a disconnected item.
//! - [`InvalidRule`] thrown when a rule cannot be created or executed.
//! - [`Aggregator`] thrown when the bank-data aggregator call fails.
//! - [`Cancelled`] thrown when the caller cancelled the operation.
//!
//!  [`KeyNotFound`]: EngineError::KeyNotFound
//!  [`InactiveItem`]: EngineError::InactiveItem
//!  [`InvalidRule`]: EngineError::InvalidRule
//!  [`Aggregator`]: EngineError::Aggregator
//!  [`Cancelled`]: EngineError::Cancelled
use sea_orm::DbErr;
use thiserror::Error;

use crate::aggregator::AggregatorError;

/// Engine custom errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("\"{0}\" key not found!")]
    KeyNotFound(String),
    #[error("item {0} is not active")]
    InactiveItem(String),
    #[error("\"{0}\" already present!")]
    ExistingKey(String),
    #[error("Invalid rule: {0}")]
    InvalidRule(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("aggregator: {0}")]
    Aggregator(#[from] AggregatorError),
    #[error("operation cancelled")]
    Cancelled,
    #[error("background task failed: {0}")]
    TaskFailed(String),
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl EngineError {
    /// `true` when the failure came from the caller cancelling, not from the
    /// item itself.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl PartialEq for EngineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::KeyNotFound(a), Self::KeyNotFound(b)) => a == b,
            (Self::InactiveItem(a), Self::InactiveItem(b)) => a == b,
            (Self::ExistingKey(a), Self::ExistingKey(b)) => a == b,
            (Self::InvalidRule(a), Self::InvalidRule(b)) => a == b,
            (Self::InvalidAmount(a), Self::InvalidAmount(b)) => a == b,
            (Self::InvalidConfig(a), Self::InvalidConfig(b)) => a == b,
            (Self::Aggregator(a), Self::Aggregator(b)) => a.to_string() == b.to_string(),
            (Self::Cancelled, Self::Cancelled) => true,
            (Self::TaskFailed(a), Self::TaskFailed(b)) => a == b,
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}

/// A sync that stopped early. `synced` counts the transactions applied
/// before the failure.
#[derive(Error, Debug, PartialEq)]
#[error("sync stopped after {synced} transactions: {source}")]
pub struct SyncError {
    pub synced: usize,
    #[source]
    pub source: EngineError,
}

impl SyncError {
    pub fn is_cancelled(&self) -> bool {
        self.source.is_cancelled()
    }
}

impl From<EngineError> for SyncError {
    fn from(source: EngineError) -> Self {
        Self { synced: 0, source }
    }
}
