use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use sea_orm::DatabaseConnection;
use uuid::Uuid;

use crate::{
    Aggregator, Categorizer, EngineError, ResultEngine,
    notifier::{LogNotifier, Notifier},
};

mod items;
mod rules;
mod sync;

pub use items::LinkedItem;
pub use rules::{ExecutionOutcome, RuleEvaluation};
pub use sync::BackgroundSync;

/// Run a block inside a DB transaction, committing on success and rolling back on error.
macro_rules! with_tx {
    ($self:expr, |$tx:ident| $body:expr) => {{
        let $tx = $self.database.begin().await?;
        let result: $crate::ResultEngine<_> = async { $body }.await;
        match result {
            Ok(value) => {
                $tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = $tx.rollback().await {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }};
}

pub(crate) use with_tx;

/// Serialises syncs of the same item inside this process.
#[derive(Debug, Default)]
struct ItemLocks {
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl ItemLocks {
    fn for_item(&self, item_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(item_id).or_default())
    }
}

/// The sync and rule pipeline.
///
/// Cheap to clone: clones share the database pool, the collaborators and the
/// per-item sync locks.
#[derive(Clone)]
pub struct Engine {
    database: DatabaseConnection,
    aggregator: Arc<dyn Aggregator>,
    categorizer: Categorizer,
    notifier: Arc<dyn Notifier>,
    item_locks: Arc<ItemLocks>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("database", &self.database)
            .field("categorizer", &self.categorizer)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Return a builder for `Engine`. Help to build the struct.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn categorizer(&self) -> &Categorizer {
        &self.categorizer
    }
}

/// The builder for `Engine`
#[derive(Default)]
pub struct EngineBuilder {
    database: DatabaseConnection,
    aggregator: Option<Arc<dyn Aggregator>>,
    categorizer: Categorizer,
    notifier: Option<Arc<dyn Notifier>>,
}

impl EngineBuilder {
    /// Pass the required database
    pub fn database(mut self, db: DatabaseConnection) -> EngineBuilder {
        self.database = db;
        self
    }

    /// Pass the required aggregator client
    pub fn aggregator(mut self, aggregator: Arc<dyn Aggregator>) -> EngineBuilder {
        self.aggregator = Some(aggregator);
        self
    }

    /// Defaults to a categorizer without classifier (keyword fallback only).
    pub fn categorizer(mut self, categorizer: Categorizer) -> EngineBuilder {
        self.categorizer = categorizer;
        self
    }

    /// Defaults to [`LogNotifier`].
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> EngineBuilder {
        self.notifier = Some(notifier);
        self
    }

    /// Construct `Engine`
    pub async fn build(self) -> ResultEngine<Engine> {
        let aggregator = self
            .aggregator
            .ok_or_else(|| EngineError::InvalidConfig("an aggregator is required".to_string()))?;
        Ok(Engine {
            database: self.database,
            aggregator,
            categorizer: self.categorizer,
            notifier: self.notifier.unwrap_or_else(|| Arc::new(LogNotifier)),
            item_locks: Arc::default(),
        })
    }
}
