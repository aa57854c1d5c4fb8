use chrono::Utc;
use sea_orm::{ActiveValue, QueryFilter, QueryOrder, TransactionTrait, prelude::*, sea_query::Expr};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    Account, AccountType, EngineError, Item, ResultEngine, SyncStatus, Transaction, accounts,
    items, sync_cursors, transactions,
};

use super::{BackgroundSync, Engine, with_tx};

/// A freshly linked item and its accounts. The initial sync is already
/// running in the background.
#[derive(Debug)]
pub struct LinkedItem {
    pub item: Item,
    pub accounts: Vec<Account>,
    pub initial_sync: BackgroundSync,
}

impl Engine {
    /// Exchanges the public token from the link flow and stores the item with
    /// its accounts, then starts the first sync on its own task.
    pub async fn link_item(&self, user_id: Uuid, public_token: &str) -> ResultEngine<LinkedItem> {
        let exchange = self.aggregator.exchange_public_token(public_token).await?;
        let remote_accounts = self.aggregator.get_accounts(&exchange.access_token).await?;
        let now = Utc::now();

        let (item, linked_accounts) = with_tx!(self, |db_tx| {
            let exists = items::Entity::find()
                .filter(items::Column::ExternalId.eq(exchange.item_external_id.as_str()))
                .one(&db_tx)
                .await?
                .is_some();
            if exists {
                return Err(EngineError::ExistingKey(exchange.item_external_id.clone()));
            }

            let item = items::ActiveModel {
                id: ActiveValue::Set(Uuid::new_v4()),
                user_id: ActiveValue::Set(user_id),
                external_id: ActiveValue::Set(exchange.item_external_id.clone()),
                access_token: ActiveValue::Set(exchange.access_token.clone()),
                institution_name: ActiveValue::Set(exchange.institution_name.clone()),
                is_active: ActiveValue::Set(true),
                created_at: ActiveValue::Set(now),
            }
            .insert(&db_tx)
            .await?;

            let mut linked = Vec::with_capacity(remote_accounts.len());
            for remote in &remote_accounts {
                let account_type =
                    AccountType::from_aggregator(&remote.kind, remote.subtype.as_deref());
                let model = accounts::ActiveModel {
                    id: ActiveValue::Set(Uuid::new_v4()),
                    item_id: ActiveValue::Set(item.id),
                    user_id: ActiveValue::Set(user_id),
                    external_id: ActiveValue::Set(remote.external_id.clone()),
                    name: ActiveValue::Set(remote.name.clone()),
                    account_type: ActiveValue::Set(account_type.as_str().to_string()),
                    subtype: ActiveValue::Set(remote.subtype.clone()),
                    mask: ActiveValue::Set(remote.mask.clone()),
                    current_balance: ActiveValue::Set(remote.balance_current.cents()),
                    available_balance: ActiveValue::Set(
                        remote.balance_available.map(|b| b.cents()),
                    ),
                    is_active: ActiveValue::Set(true),
                    created_at: ActiveValue::Set(now),
                }
                .insert(&db_tx)
                .await?;
                linked.push(Account::try_from(model)?);
            }

            Ok((Item::from(item), linked))
        })?;

        info!(
            item_id = %item.id,
            institution = %item.institution_name,
            accounts = linked_accounts.len(),
            "item linked"
        );
        let initial_sync = self.spawn_item_sync(item.id);
        Ok(LinkedItem {
            item,
            accounts: linked_accounts,
            initial_sync,
        })
    }

    /// Asks the aggregator to look for new transactions on the user's item,
    /// then syncs it in the background.
    pub async fn refresh_item(&self, user_id: Uuid, item_id: Uuid) -> ResultEngine<BackgroundSync> {
        let item = self.require_active_item(item_id).await?;
        if item.user_id != user_id {
            return Err(EngineError::KeyNotFound("item not exists".to_string()));
        }
        self.aggregator
            .refresh_transactions(&item.access_token)
            .await?;
        debug!(item_id = %item_id, "item refresh requested");
        Ok(self.spawn_item_sync(item_id))
    }

    /// Soft-disables an item and all of its accounts.
    pub async fn deactivate_item(&self, user_id: Uuid, item_id: Uuid) -> ResultEngine<()> {
        with_tx!(self, |db_tx| {
            let item = items::Entity::find_by_id(item_id)
                .filter(items::Column::UserId.eq(user_id))
                .one(&db_tx)
                .await?
                .ok_or_else(|| EngineError::KeyNotFound("item not exists".to_string()))?;

            let mut active: items::ActiveModel = item.into();
            active.is_active = ActiveValue::Set(false);
            active.update(&db_tx).await?;

            accounts::Entity::update_many()
                .col_expr(accounts::Column::IsActive, Expr::value(false))
                .filter(accounts::Column::ItemId.eq(item_id))
                .exec(&db_tx)
                .await?;
            Ok(())
        })?;
        info!(item_id = %item_id, "item deactivated");
        Ok(())
    }

    /// Soft-disables one account. Its item keeps syncing.
    pub async fn disconnect_account(&self, user_id: Uuid, account_id: Uuid) -> ResultEngine<()> {
        with_tx!(self, |db_tx| {
            let account = accounts::Entity::find_by_id(account_id)
                .filter(accounts::Column::UserId.eq(user_id))
                .one(&db_tx)
                .await?
                .ok_or_else(|| EngineError::KeyNotFound("account not exists".to_string()))?;
            let mut active: accounts::ActiveModel = account.into();
            active.is_active = ActiveValue::Set(false);
            active.update(&db_tx).await?;
            Ok(())
        })
    }

    pub async fn accounts(&self, user_id: Uuid) -> ResultEngine<Vec<Account>> {
        accounts::Entity::find()
            .filter(accounts::Column::UserId.eq(user_id))
            .order_by_asc(accounts::Column::CreatedAt)
            .order_by_asc(accounts::Column::Name)
            .all(&self.database)
            .await?
            .into_iter()
            .map(Account::try_from)
            .collect()
    }

    /// Active items of every user, oldest first.
    pub async fn active_items(&self) -> ResultEngine<Vec<Item>> {
        Ok(items::Entity::find()
            .filter(items::Column::IsActive.eq(true))
            .order_by_asc(items::Column::CreatedAt)
            .all(&self.database)
            .await?
            .into_iter()
            .map(Item::from)
            .collect())
    }

    pub async fn user_items(&self, user_id: Uuid) -> ResultEngine<Vec<Item>> {
        Ok(items::Entity::find()
            .filter(items::Column::UserId.eq(user_id))
            .order_by_asc(items::Column::CreatedAt)
            .all(&self.database)
            .await?
            .into_iter()
            .map(Item::from)
            .collect())
    }

    /// Sync progress of an item. An item that never attempted a sync reports
    /// an empty cursor.
    pub async fn sync_status(&self, item_id: Uuid) -> ResultEngine<SyncStatus> {
        let status = sync_cursors::Entity::find_by_id(item_id)
            .one(&self.database)
            .await?;
        if let Some(status) = status {
            return Ok(status.into());
        }
        items::Entity::find_by_id(item_id)
            .one(&self.database)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("item not exists".to_string()))?;
        Ok(SyncStatus {
            item_id,
            cursor: String::new(),
            last_sync_at: None,
            last_error: None,
            consecutive_failures: 0,
        })
    }

    /// Looks a transaction up by the aggregator's id.
    pub async fn transaction(&self, external_id: &str) -> ResultEngine<Transaction> {
        let model = transactions::Entity::find()
            .filter(transactions::Column::ExternalId.eq(external_id))
            .one(&self.database)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("transaction not exists".to_string()))?;
        Transaction::try_from(model)
    }
}
