//! Bank-data aggregator seam.
//!
//! The engine never talks to a bank directly. Everything it knows about
//! accounts and transactions arrives through an [`Aggregator`], paged by an
//! opaque cursor.

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::MoneyCents;

mod sandbox;

pub use sandbox::SandboxAggregator;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregatorError {
    #[error("invalid credential: {0}")]
    InvalidCredential(String),
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
    #[error("request failed: {0}")]
    Request(String),
}

/// Result of exchanging the public token handed out by the link flow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenExchange {
    pub access_token: String,
    pub item_external_id: String,
    pub institution_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregatorAccount {
    pub external_id: String,
    pub name: String,
    /// Raw aggregator type, e.g. `depository` or `credit`.
    pub kind: String,
    pub subtype: Option<String>,
    pub mask: Option<String>,
    pub balance_current: MoneyCents,
    pub balance_available: Option<MoneyCents>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregatorTransaction {
    pub external_id: String,
    pub external_account_id: String,
    /// Positive is a debit, negative a credit.
    pub amount: MoneyCents,
    pub date: NaiveDate,
    pub name: String,
    pub merchant_name: Option<String>,
    pub source_categories: Vec<String>,
    pub pending: bool,
    pub payment_channel: Option<String>,
}

/// One page of the incremental transaction feed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransactionSyncPage {
    pub added: Vec<AggregatorTransaction>,
    pub modified: Vec<AggregatorTransaction>,
    /// External ids of removed transactions.
    pub removed: Vec<String>,
    pub next_cursor: String,
    pub has_more: bool,
}

#[async_trait]
pub trait Aggregator: Send + Sync {
    async fn exchange_public_token(&self, public_token: &str)
    -> Result<TokenExchange, AggregatorError>;

    async fn get_accounts(
        &self,
        access_token: &str,
    ) -> Result<Vec<AggregatorAccount>, AggregatorError>;

    /// Returns the page following `cursor`. An empty cursor starts from the
    /// beginning of the feed.
    async fn sync_transactions(
        &self,
        access_token: &str,
        cursor: &str,
    ) -> Result<TransactionSyncPage, AggregatorError>;

    /// Asks the aggregator to look for new transactions at the institution.
    async fn refresh_transactions(&self, access_token: &str) -> Result<(), AggregatorError>;
}
