#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::NaiveDate;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement};
use uuid::Uuid;

use engine::{
    Account, AccountType, Aggregator, AggregatorAccount, AggregatorError, AggregatorTransaction,
    CategorizationRequest, CategorizationResponse, Categorizer, CategorizerConfig, Category,
    Classifier, ClassifierError, Confidence, Delivery, Engine, MoneyCents, Notification, Notifier,
    NotifierError, TokenExchange, TransactionSyncPage,
};
use migration::MigratorTrait;

/// Aggregator replaying queued pages. Public token `x` links item `item-x`
/// with accounts `x-checking` and `x-savings`.
#[derive(Default)]
pub struct ScriptedAggregator {
    pages: Mutex<VecDeque<Result<TransactionSyncPage, AggregatorError>>>,
    cursors: Mutex<Vec<String>>,
    balances: Mutex<HashMap<String, i64>>,
    refreshes: AtomicUsize,
    /// Returned once the queue is empty; `None` means an empty last page.
    exhausted: Mutex<Option<AggregatorError>>,
}

impl ScriptedAggregator {
    pub fn push_page(&self, page: TransactionSyncPage) {
        self.pages.lock().unwrap().push_back(Ok(page));
    }

    pub fn push_error(&self, err: AggregatorError) {
        self.pages.lock().unwrap().push_back(Err(err));
    }

    /// Every call past the queue fails with `err`.
    pub fn fail_when_empty(&self, err: AggregatorError) {
        *self.exhausted.lock().unwrap() = Some(err);
    }

    pub fn set_balance(&self, external_id: &str, cents: i64) {
        self.balances
            .lock()
            .unwrap()
            .insert(external_id.to_string(), cents);
    }

    /// Cursors passed to `sync_transactions`, in call order.
    pub fn requested_cursors(&self) -> Vec<String> {
        self.cursors.lock().unwrap().clone()
    }

    pub fn sync_calls(&self) -> usize {
        self.cursors.lock().unwrap().len()
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Aggregator for ScriptedAggregator {
    async fn exchange_public_token(
        &self,
        public_token: &str,
    ) -> Result<TokenExchange, AggregatorError> {
        Ok(TokenExchange {
            access_token: format!("token-{public_token}"),
            item_external_id: format!("item-{public_token}"),
            institution_name: "Test Bank".to_string(),
        })
    }

    async fn get_accounts(
        &self,
        access_token: &str,
    ) -> Result<Vec<AggregatorAccount>, AggregatorError> {
        let prefix = access_token
            .strip_prefix("token-")
            .ok_or_else(|| AggregatorError::InvalidCredential(access_token.to_string()))?;
        let balances = self.balances.lock().unwrap();
        let account = |suffix: &str, default_cents: i64| {
            let external_id = format!("{prefix}-{suffix}");
            AggregatorAccount {
                name: format!("Test {suffix}"),
                kind: "depository".to_string(),
                subtype: Some(suffix.to_string()),
                mask: Some("4242".to_string()),
                balance_current: MoneyCents::new(
                    balances.get(&external_id).copied().unwrap_or(default_cents),
                ),
                balance_available: None,
                external_id,
            }
        };
        Ok(vec![account("checking", 100_000), account("savings", 50_000)])
    }

    async fn sync_transactions(
        &self,
        _access_token: &str,
        cursor: &str,
    ) -> Result<TransactionSyncPage, AggregatorError> {
        self.cursors.lock().unwrap().push(cursor.to_string());
        if let Some(next) = self.pages.lock().unwrap().pop_front() {
            return next;
        }
        if let Some(err) = self.exhausted.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(TransactionSyncPage {
            next_cursor: cursor.to_string(),
            ..TransactionSyncPage::default()
        })
    }

    async fn refresh_transactions(&self, _access_token: &str) -> Result<(), AggregatorError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Answers by merchant name; unknown merchants are invalid answers.
#[derive(Default)]
pub struct ScriptedClassifier {
    answers: HashMap<String, Category>,
    failing: Vec<String>,
    calls: AtomicUsize,
}

impl ScriptedClassifier {
    pub fn answer(mut self, merchant: &str, category: Category) -> Self {
        self.answers.insert(merchant.to_string(), category);
        self
    }

    pub fn failing(mut self, merchant: &str) -> Self {
        self.failing.push(merchant.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(
        &self,
        request: &CategorizationRequest,
    ) -> Result<CategorizationResponse, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let merchant = request.merchant_name.clone().unwrap_or_default();
        if self.failing.contains(&merchant) {
            return Err(ClassifierError::Request("model unavailable".to_string()));
        }
        match self.answers.get(&merchant) {
            Some(category) => Ok(CategorizationResponse {
                category: *category,
                confidence: Confidence::High,
                reasoning: format!("{merchant} is known"),
            }),
            None => Err(ClassifierError::InvalidResponse(merchant)),
        }
    }
}

/// Records every notification; after `fail_deliveries` each one is reported
/// as undeliverable.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(Uuid, Notification)>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(Uuid, Notification)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_deliveries(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, user_id: Uuid, notification: &Notification) -> Delivery {
        self.sent
            .lock()
            .unwrap()
            .push((user_id, notification.clone()));
        if self.failing.load(Ordering::SeqCst) {
            return Delivery {
                sent: 0,
                failures: vec![NotifierError::Delivery("device unreachable".to_string())],
            };
        }
        Delivery {
            sent: 1,
            failures: Vec::new(),
        }
    }
}

pub struct Harness {
    pub engine: Engine,
    pub db: DatabaseConnection,
    pub aggregator: Arc<ScriptedAggregator>,
    pub notifier: Arc<RecordingNotifier>,
}

pub async fn engine_with_db() -> Harness {
    engine_with_classifier(None).await
}

pub async fn engine_with_classifier(classifier: Option<Arc<dyn Classifier>>) -> Harness {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();

    let aggregator = Arc::new(ScriptedAggregator::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let mut categorizer = Categorizer::new(CategorizerConfig {
        workers: 4,
        max_retries: 1,
        retry_delay: Duration::from_millis(1),
    });
    if let Some(classifier) = classifier {
        categorizer = categorizer.with_classifier(classifier);
    }
    let engine = Engine::builder()
        .database(db.clone())
        .aggregator(aggregator.clone())
        .categorizer(categorizer)
        .notifier(notifier.clone())
        .build()
        .await
        .unwrap();

    Harness {
        engine,
        db,
        aggregator,
        notifier,
    }
}

pub struct LinkedFixture {
    pub user_id: Uuid,
    pub item_id: Uuid,
    pub checking: Account,
    pub savings: Account,
}

/// Links `public_token` for a new user and waits for the (empty) initial
/// sync, so later pages are only consumed by the test itself.
pub async fn link(harness: &Harness, public_token: &str) -> LinkedFixture {
    let user_id = Uuid::new_v4();
    let linked = harness
        .engine
        .link_item(user_id, public_token)
        .await
        .unwrap();
    linked.initial_sync.wait().await.unwrap();

    let pick = |kind: AccountType| {
        linked
            .accounts
            .iter()
            .find(|account| account.account_type == kind)
            .cloned()
            .unwrap()
    };
    LinkedFixture {
        user_id,
        item_id: linked.item.id,
        checking: pick(AccountType::Checking),
        savings: pick(AccountType::Savings),
    }
}

/// A settled purchase on `{token}-checking`.
pub fn purchase(
    token: &str,
    external_id: &str,
    merchant: &str,
    cents: i64,
    hints: &[&str],
) -> AggregatorTransaction {
    AggregatorTransaction {
        external_id: external_id.to_string(),
        external_account_id: format!("{token}-checking"),
        amount: MoneyCents::new(cents),
        date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
        name: merchant.to_uppercase(),
        merchant_name: Some(merchant.to_string()),
        source_categories: hints.iter().map(ToString::to_string).collect(),
        pending: false,
        payment_channel: Some("in store".to_string()),
    }
}

pub fn coffee(token: &str, external_id: &str, cents: i64) -> AggregatorTransaction {
    purchase(
        token,
        external_id,
        "Starbucks",
        cents,
        &["Food and Drink", "Coffee Shop"],
    )
}

pub fn page(
    added: Vec<AggregatorTransaction>,
    next_cursor: &str,
    has_more: bool,
) -> TransactionSyncPage {
    TransactionSyncPage {
        added,
        next_cursor: next_cursor.to_string(),
        has_more,
        ..TransactionSyncPage::default()
    }
}

pub async fn count_rows(db: &DatabaseConnection, table: &str) -> i64 {
    let backend = db.get_database_backend();
    let row = db
        .query_one(Statement::from_string(
            backend,
            format!("SELECT COUNT(*) AS n FROM {table}"),
        ))
        .await
        .unwrap()
        .unwrap();
    row.try_get("", "n").unwrap()
}
