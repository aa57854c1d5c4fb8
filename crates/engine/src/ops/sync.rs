//! Incremental transaction sync.
//!
//! Each page from the aggregator is categorized, written in one database
//! transaction, run through the rules, and only then does the item's cursor
//! move past it. A failure anywhere leaves the cursor on the last fully
//! applied page, so the next attempt resumes there.

use chrono::Utc;
use sea_orm::{
    ActiveValue, DatabaseTransaction, QueryFilter, QueryOrder, TransactionTrait, prelude::*,
    sea_query::Expr,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    Category, CategorizationRequest, CategorizationResponse, CategorizerError, EngineError,
    ResultEngine, SyncError, Transaction,
    aggregator::{AggregatorTransaction, TransactionSyncPage},
    accounts, items, sync_cursors, transactions,
};

use super::{Engine, with_tx};

/// A sync running on its own task, detached from whoever started it.
#[derive(Debug)]
pub struct BackgroundSync {
    item_id: Uuid,
    cancel: CancellationToken,
    handle: JoinHandle<Result<usize, SyncError>>,
}

impl BackgroundSync {
    pub fn item_id(&self) -> Uuid {
        self.item_id
    }

    /// Asks the sync to stop at the next page boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the sync to finish and returns its outcome.
    pub async fn wait(self) -> Result<usize, SyncError> {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(err) => Err(EngineError::TaskFailed(err.to_string()).into()),
        }
    }
}

/// Rows written while applying one page.
struct AppliedPage {
    added: usize,
    written: Vec<transactions::Model>,
}

impl Engine {
    /// Pulls every pending page of the item's feed.
    ///
    /// Returns the number of added transactions applied. On error the count
    /// applied before the failure is carried by [`SyncError`]. A cancelled
    /// sync does not count as an item failure.
    pub async fn sync_item_transactions(
        &self,
        item_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<usize, SyncError> {
        let lock = self.item_locks.for_item(item_id);
        let _guard = tokio::select! {
            guard = lock.lock() => guard,
            () = cancel.cancelled() => return Err(EngineError::Cancelled.into()),
        };

        let item = self.require_active_item(item_id).await?;
        let cursor = match self.load_or_create_cursor(item_id).await {
            Ok(cursor) => cursor,
            Err(source) => {
                warn!(item_id = %item_id, error = %source, "cannot load sync cursor");
                self.note_sync_failure(item_id, &source).await;
                return Err(source.into());
            }
        };

        let mut synced = 0;
        match self.sync_pages(&item, cursor, &mut synced, cancel).await {
            Ok(()) => {
                if let Err(err) = self.refresh_balances(&item).await {
                    warn!(item_id = %item_id, error = %err, "balance refresh failed");
                }
                self.record_sync_success(item_id)
                    .await
                    .map_err(|source| SyncError { synced, source })?;
                info!(item_id = %item_id, synced, "item synced");
                Ok(synced)
            }
            Err(source) if source.is_cancelled() => {
                info!(item_id = %item_id, synced, "item sync cancelled");
                Err(SyncError { synced, source })
            }
            Err(source) => {
                warn!(item_id = %item_id, synced, error = %source, "item sync failed");
                self.note_sync_failure(item_id, &source).await;
                Err(SyncError { synced, source })
            }
        }
    }

    /// Syncs every active item of a user, one after the other. A failing
    /// item is logged and skipped.
    pub async fn sync_all_user_items(
        &self,
        user_id: Uuid,
        cancel: &CancellationToken,
    ) -> ResultEngine<usize> {
        let user_items = items::Entity::find()
            .filter(items::Column::UserId.eq(user_id))
            .filter(items::Column::IsActive.eq(true))
            .order_by_asc(items::Column::CreatedAt)
            .all(&self.database)
            .await?;

        let mut total = 0;
        for item in user_items {
            match self.sync_item_transactions(item.id, cancel).await {
                Ok(synced) => total += synced,
                Err(err) if err.is_cancelled() => return Err(EngineError::Cancelled),
                Err(err) => {
                    error!(item_id = %item.id, error = %err, "skipping item");
                    total += err.synced;
                }
            }
        }
        Ok(total)
    }

    /// Starts a sync of `item_id` on its own task with its own cancellation
    /// token. The outcome is logged even if nobody waits for it.
    pub fn spawn_item_sync(&self, item_id: Uuid) -> BackgroundSync {
        let engine = self.clone();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let outcome = engine.sync_item_transactions(item_id, &token).await;
            match &outcome {
                Ok(synced) => info!(item_id = %item_id, synced, "background sync finished"),
                Err(err) => error!(item_id = %item_id, error = %err, "background sync failed"),
            }
            outcome
        });
        BackgroundSync {
            item_id,
            cancel,
            handle,
        }
    }

    async fn sync_pages(
        &self,
        item: &items::Model,
        mut cursor: String,
        synced: &mut usize,
        cancel: &CancellationToken,
    ) -> ResultEngine<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let page = self
                .aggregator
                .sync_transactions(&item.access_token, &cursor)
                .await?;

            let applied = self.apply_page(&page, cancel).await?;
            *synced += applied.added;
            self.run_rules(applied.written).await;

            self.advance_cursor(item.id, &page.next_cursor).await?;
            info!(
                item_id = %item.id,
                added = page.added.len(),
                modified = page.modified.len(),
                removed = page.removed.len(),
                has_more = page.has_more,
                "sync page applied"
            );
            if !page.has_more {
                return Ok(());
            }
            cursor = page.next_cursor;
        }
    }

    async fn apply_page(
        &self,
        page: &TransactionSyncPage,
        cancel: &CancellationToken,
    ) -> ResultEngine<AppliedPage> {
        let categories = self.categorize(page, cancel).await?;
        let (added_categories, modified_categories) = categories.split_at(page.added.len());
        let now = Utc::now();

        with_tx!(self, |db_tx| {
            let mut applied = AppliedPage {
                added: 0,
                written: Vec::new(),
            };
            for (incoming, category) in page.added.iter().zip(added_categories) {
                if let Some(model) = self
                    .upsert_transaction(&db_tx, incoming, *category, now)
                    .await?
                {
                    applied.added += 1;
                    applied.written.push(model);
                }
            }
            for (incoming, category) in page.modified.iter().zip(modified_categories) {
                if let Some(model) = self
                    .update_transaction(&db_tx, incoming, *category, now)
                    .await?
                {
                    applied.written.push(model);
                }
            }
            for external_id in &page.removed {
                let deleted = transactions::Entity::delete_many()
                    .filter(transactions::Column::ExternalId.eq(external_id.as_str()))
                    .exec(&db_tx)
                    .await?;
                debug!(transaction = %external_id, rows = deleted.rows_affected, "transaction removed");
            }
            Ok(applied)
        })
    }

    /// One category per added then modified transaction, falling back to the
    /// keyword mapping when the classifier gives up.
    async fn categorize(
        &self,
        page: &TransactionSyncPage,
        cancel: &CancellationToken,
    ) -> ResultEngine<Vec<Category>> {
        let changed: Vec<&AggregatorTransaction> =
            page.added.iter().chain(&page.modified).collect();
        let requests = changed
            .iter()
            .map(|incoming| CategorizationRequest {
                merchant_name: incoming.merchant_name.clone(),
                description: incoming.name.clone(),
                amount: incoming.amount,
                hints: incoming.source_categories.clone(),
            })
            .collect();

        let outcomes = self.categorizer.categorize_batch(requests, cancel).await;
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        Ok(changed
            .into_iter()
            .zip(outcomes)
            .map(|(incoming, outcome)| {
                let response = match outcome {
                    Ok(response) => response,
                    Err(CategorizerError::NotConfigured) => {
                        CategorizationResponse::fallback(&incoming.source_categories)
                    }
                    Err(err) => {
                        warn!(transaction = %incoming.external_id, error = %err, "categorization failed, using keyword fallback");
                        CategorizationResponse::fallback(&incoming.source_categories)
                    }
                };
                debug!(
                    transaction = %incoming.external_id,
                    category = %response.category,
                    confidence = ?response.confidence,
                    "transaction categorized"
                );
                response.category
            })
            .collect())
    }

    /// Runs the rules on freshly written, settled transactions. Failures stay
    /// with the transaction.
    async fn run_rules(&self, written: Vec<transactions::Model>) {
        for model in written {
            let external_id = model.external_id.clone();
            let transaction = match Transaction::try_from(model) {
                Ok(transaction) => transaction,
                Err(err) => {
                    error!(transaction = %external_id, error = %err, "unreadable transaction");
                    continue;
                }
            };
            if transaction.pending {
                debug!(transaction = %external_id, "pending, rules deferred");
                continue;
            }
            if let Err(err) = self.process_transaction(&transaction).await {
                error!(transaction = %external_id, error = %err, "rule processing failed");
            }
        }
    }

    async fn account_by_external_id(
        &self,
        db_tx: &DatabaseTransaction,
        incoming: &AggregatorTransaction,
    ) -> ResultEngine<Option<accounts::Model>> {
        let account = accounts::Entity::find()
            .filter(accounts::Column::ExternalId.eq(incoming.external_account_id.as_str()))
            .one(db_tx)
            .await?;
        if account.is_none() {
            error!(
                account = %incoming.external_account_id,
                transaction = %incoming.external_id,
                "account not found for transaction"
            );
        }
        Ok(account)
    }

    async fn upsert_transaction(
        &self,
        db_tx: &DatabaseTransaction,
        incoming: &AggregatorTransaction,
        category: Category,
        now: DateTimeUtc,
    ) -> ResultEngine<Option<transactions::Model>> {
        let Some(account) = self.account_by_external_id(db_tx, incoming).await? else {
            return Ok(None);
        };
        let existing = transactions::Entity::find()
            .filter(transactions::Column::ExternalId.eq(incoming.external_id.as_str()))
            .one(db_tx)
            .await?;

        let model = match existing {
            Some(existing) => {
                let mut active: transactions::ActiveModel = existing.into();
                write_fields(&mut active, account.id, incoming, category, now);
                active.update(db_tx).await?
            }
            None => {
                let mut active = transactions::ActiveModel {
                    id: ActiveValue::Set(Uuid::new_v4()),
                    external_id: ActiveValue::Set(incoming.external_id.clone()),
                    created_at: ActiveValue::Set(now),
                    ..Default::default()
                };
                write_fields(&mut active, account.id, incoming, category, now);
                active.insert(db_tx).await?
            }
        };
        Ok(Some(model))
    }

    async fn update_transaction(
        &self,
        db_tx: &DatabaseTransaction,
        incoming: &AggregatorTransaction,
        category: Category,
        now: DateTimeUtc,
    ) -> ResultEngine<Option<transactions::Model>> {
        let Some(account) = self.account_by_external_id(db_tx, incoming).await? else {
            return Ok(None);
        };
        let Some(existing) = transactions::Entity::find()
            .filter(transactions::Column::ExternalId.eq(incoming.external_id.as_str()))
            .one(db_tx)
            .await?
        else {
            warn!(transaction = %incoming.external_id, "modified transaction is unknown, skipped");
            return Ok(None);
        };

        let mut active: transactions::ActiveModel = existing.into();
        write_fields(&mut active, account.id, incoming, category, now);
        Ok(Some(active.update(db_tx).await?))
    }

    async fn refresh_balances(&self, item: &items::Model) -> ResultEngine<()> {
        let remote = self.aggregator.get_accounts(&item.access_token).await?;
        for account in remote {
            let updated = accounts::Entity::update_many()
                .col_expr(
                    accounts::Column::CurrentBalance,
                    Expr::value(account.balance_current.cents()),
                )
                .col_expr(
                    accounts::Column::AvailableBalance,
                    Expr::value(account.balance_available.map(|b| b.cents())),
                )
                .filter(accounts::Column::ExternalId.eq(account.external_id.as_str()))
                .exec(&self.database)
                .await;
            match updated {
                Ok(_) => debug!(account = %account.external_id, "balance refreshed"),
                Err(err) => {
                    error!(account = %account.external_id, error = %err, "balance update failed");
                }
            }
        }
        Ok(())
    }

    pub(super) async fn require_active_item(&self, item_id: Uuid) -> ResultEngine<items::Model> {
        let item = items::Entity::find_by_id(item_id)
            .one(&self.database)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("item not exists".to_string()))?;
        if !item.is_active {
            return Err(EngineError::InactiveItem(item_id.to_string()));
        }
        Ok(item)
    }

    async fn load_or_create_cursor(&self, item_id: Uuid) -> ResultEngine<String> {
        if let Some(model) = sync_cursors::Entity::find_by_id(item_id)
            .one(&self.database)
            .await?
        {
            return Ok(model.cursor);
        }
        sync_cursors::ActiveModel {
            item_id: ActiveValue::Set(item_id),
            cursor: ActiveValue::Set(String::new()),
            last_sync_at: ActiveValue::Set(None),
            last_error: ActiveValue::Set(None),
            consecutive_failures: ActiveValue::Set(0),
        }
        .insert(&self.database)
        .await?;
        Ok(String::new())
    }

    async fn advance_cursor(&self, item_id: Uuid, cursor: &str) -> ResultEngine<()> {
        sync_cursors::Entity::update_many()
            .col_expr(sync_cursors::Column::Cursor, Expr::value(cursor))
            .filter(sync_cursors::Column::ItemId.eq(item_id))
            .exec(&self.database)
            .await?;
        Ok(())
    }

    async fn record_sync_success(&self, item_id: Uuid) -> ResultEngine<()> {
        sync_cursors::ActiveModel {
            item_id: ActiveValue::Set(item_id),
            last_sync_at: ActiveValue::Set(Some(Utc::now())),
            last_error: ActiveValue::Set(None),
            consecutive_failures: ActiveValue::Set(0),
            ..Default::default()
        }
        .update(&self.database)
        .await?;
        Ok(())
    }

    async fn note_sync_failure(&self, item_id: Uuid, source: &EngineError) {
        if let Err(err) = self.record_sync_failure(item_id, source).await {
            error!(item_id = %item_id, error = %err, "could not record sync failure");
        }
    }

    /// No-op when the item has no cursor row yet.
    async fn record_sync_failure(&self, item_id: Uuid, err: &EngineError) -> ResultEngine<()> {
        sync_cursors::Entity::update_many()
            .col_expr(
                sync_cursors::Column::ConsecutiveFailures,
                Expr::col(sync_cursors::Column::ConsecutiveFailures).add(1),
            )
            .col_expr(sync_cursors::Column::LastError, Expr::value(err.to_string()))
            .col_expr(sync_cursors::Column::LastSyncAt, Expr::value(Utc::now()))
            .filter(sync_cursors::Column::ItemId.eq(item_id))
            .exec(&self.database)
            .await?;
        Ok(())
    }
}

fn write_fields(
    active: &mut transactions::ActiveModel,
    account_id: Uuid,
    incoming: &AggregatorTransaction,
    category: Category,
    now: DateTimeUtc,
) {
    active.account_id = ActiveValue::Set(account_id);
    active.amount = ActiveValue::Set(incoming.amount.cents());
    active.date = ActiveValue::Set(incoming.date);
    active.name = ActiveValue::Set(incoming.name.clone());
    active.merchant_name = ActiveValue::Set(incoming.merchant_name.clone());
    active.category = ActiveValue::Set(category.as_str().to_string());
    active.source_categories = ActiveValue::Set(Json::from(incoming.source_categories.clone()));
    active.pending = ActiveValue::Set(incoming.pending);
    active.payment_channel = ActiveValue::Set(incoming.payment_channel.clone());
    active.updated_at = ActiveValue::Set(now);
}
