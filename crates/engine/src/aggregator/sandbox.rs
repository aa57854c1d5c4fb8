use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use chrono::{Days, Utc};
use tracing::info;

use super::{
    Aggregator, AggregatorAccount, AggregatorError, AggregatorTransaction, TokenExchange,
    TransactionSyncPage,
};
use crate::MoneyCents;

const PAGE_SIZE: usize = 25;

/// Merchants cycled through by `refresh_transactions`:
/// (name, hints, cents, channel).
const GENERATED: [(&str, &[&str], i64, &str); 5] = [
    ("Blue Bottle Coffee", &["Food and Drink", "Coffee Shop"], 650, "in store"),
    ("Whole Foods", &["Food and Drink", "Groceries"], 8_412, "in store"),
    ("Uber", &["Transportation", "Ride Share"], 1_875, "online"),
    ("Spotify", &["Service", "Music"], 1_099, "online"),
    ("AMC Theatres", &["Recreation", "Movie Theater"], 2_400, "in store"),
];

/// In-memory aggregator for local runs.
///
/// Every exchanged public token becomes a new item with a checking and a
/// savings account and a seeded page of transactions. The feed only grows
/// when [`Aggregator::refresh_transactions`] is called. Cursors are offsets
/// into the per-item feed.
#[derive(Debug, Default)]
pub struct SandboxAggregator {
    state: Mutex<SandboxState>,
}

#[derive(Debug, Default)]
struct SandboxState {
    next_item: u32,
    feeds: HashMap<String, SandboxItem>,
}

#[derive(Debug)]
struct SandboxItem {
    prefix: String,
    feed: Vec<AggregatorTransaction>,
    generated: usize,
}

impl SandboxItem {
    fn new(prefix: String) -> Self {
        let checking = format!("{prefix}-checking");
        let today = Utc::now().date_naive();
        let seed = |n: usize, name: &str, hints: &[&str], cents: i64, channel: &str| {
            AggregatorTransaction {
                external_id: format!("{prefix}-tx-{n}"),
                external_account_id: checking.clone(),
                amount: MoneyCents::new(cents),
                date: today.checked_sub_days(Days::new(n as u64)).unwrap_or(today),
                name: name.to_string(),
                merchant_name: Some(name.to_string()),
                source_categories: hints.iter().map(ToString::to_string).collect(),
                pending: false,
                payment_channel: Some(channel.to_string()),
            }
        };
        let feed = vec![
            seed(
                1,
                "Starbucks",
                &["Food and Drink", "Restaurants", "Coffee Shop"],
                2_500,
                "in store",
            ),
            seed(2, "Amazon", &["Shops", "Digital Purchase"], 5_000, "online"),
            seed(3, "Payroll", &["Transfer", "Payroll"], -250_000, "other"),
        ];
        Self {
            prefix,
            feed,
            generated: 0,
        }
    }

    fn accounts(&self) -> Vec<AggregatorAccount> {
        vec![
            AggregatorAccount {
                external_id: format!("{}-checking", self.prefix),
                name: "Sandbox Checking".to_string(),
                kind: "depository".to_string(),
                subtype: Some("checking".to_string()),
                mask: Some("0000".to_string()),
                balance_current: MoneyCents::new(200_000),
                balance_available: Some(MoneyCents::new(150_000)),
            },
            AggregatorAccount {
                external_id: format!("{}-savings", self.prefix),
                name: "Sandbox Savings".to_string(),
                kind: "depository".to_string(),
                subtype: Some("savings".to_string()),
                mask: Some("1111".to_string()),
                balance_current: MoneyCents::new(500_000),
                balance_available: None,
            },
        ]
    }

    fn generate(&mut self) {
        let (name, hints, cents, channel) = GENERATED[self.generated % GENERATED.len()];
        self.generated += 1;
        let n = self.feed.len() + 1;
        self.feed.push(AggregatorTransaction {
            external_id: format!("{}-tx-{n}", self.prefix),
            external_account_id: format!("{}-checking", self.prefix),
            amount: MoneyCents::new(cents),
            date: Utc::now().date_naive(),
            name: name.to_string(),
            merchant_name: Some(name.to_string()),
            source_categories: hints.iter().map(ToString::to_string).collect(),
            pending: false,
            payment_channel: Some(channel.to_string()),
        });
    }
}

impl SandboxAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_item<T>(
        &self,
        access_token: &str,
        f: impl FnOnce(&mut SandboxItem) -> Result<T, AggregatorError>,
    ) -> Result<T, AggregatorError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let item = state
            .feeds
            .get_mut(access_token)
            .ok_or_else(|| AggregatorError::InvalidCredential("unknown access token".into()))?;
        f(item)
    }
}

#[async_trait]
impl Aggregator for SandboxAggregator {
    async fn exchange_public_token(
        &self,
        public_token: &str,
    ) -> Result<TokenExchange, AggregatorError> {
        if public_token.trim().is_empty() {
            return Err(AggregatorError::InvalidCredential(
                "empty public token".into(),
            ));
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.next_item += 1;
        let prefix = format!("sandbox-item-{}", state.next_item);
        let access_token = format!("access-{prefix}");
        state
            .feeds
            .insert(access_token.clone(), SandboxItem::new(prefix.clone()));
        info!(item = %prefix, "sandbox item created");
        Ok(TokenExchange {
            access_token,
            item_external_id: prefix,
            institution_name: "Sandbox Bank".to_string(),
        })
    }

    async fn get_accounts(
        &self,
        access_token: &str,
    ) -> Result<Vec<AggregatorAccount>, AggregatorError> {
        self.with_item(access_token, |item| Ok(item.accounts()))
    }

    async fn sync_transactions(
        &self,
        access_token: &str,
        cursor: &str,
    ) -> Result<TransactionSyncPage, AggregatorError> {
        self.with_item(access_token, |item| {
            let start = if cursor.is_empty() {
                0
            } else {
                cursor
                    .parse::<usize>()
                    .ok()
                    .filter(|offset| *offset <= item.feed.len())
                    .ok_or_else(|| AggregatorError::InvalidCursor(cursor.to_string()))?
            };
            let end = (start + PAGE_SIZE).min(item.feed.len());
            Ok(TransactionSyncPage {
                added: item.feed[start..end].to_vec(),
                modified: Vec::new(),
                removed: Vec::new(),
                next_cursor: end.to_string(),
                has_more: end < item.feed.len(),
            })
        })
    }

    async fn refresh_transactions(&self, access_token: &str) -> Result<(), AggregatorError> {
        self.with_item(access_token, |item| {
            item.generate();
            Ok(())
        })
    }
}
