//! Initial schema migration - creates all tables from scratch.
//!
//! - `items`: linked institutions and their access credential
//! - `sync_cursors`: per-item sync progress
//! - `accounts`: bank accounts reached through an item
//! - `transactions`: the mirrored transaction feed
//! - `rules`: user savings rules
//! - `rule_executions`: one row per executed `(rule, transaction)` pair
//! - `savings_transfers`: virtual ledger, one row per execution

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

// ─────────────────────────────────────────────────────────────────────────────
// Table identifiers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Iden)]
enum Items {
    Table,
    Id,
    UserId,
    ExternalId,
    AccessToken,
    InstitutionName,
    IsActive,
    CreatedAt,
}

#[derive(Iden)]
enum SyncCursors {
    Table,
    ItemId,
    Cursor,
    LastSyncAt,
    LastError,
    ConsecutiveFailures,
}

#[derive(Iden)]
enum Accounts {
    Table,
    Id,
    ItemId,
    UserId,
    ExternalId,
    Name,
    AccountType,
    Subtype,
    Mask,
    CurrentBalance,
    AvailableBalance,
    IsActive,
    CreatedAt,
}

#[derive(Iden)]
enum Transactions {
    Table,
    Id,
    AccountId,
    ExternalId,
    Amount,
    Date,
    Name,
    MerchantName,
    Category,
    SourceCategories,
    Pending,
    PaymentChannel,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Rules {
    Table,
    Id,
    UserId,
    Name,
    Category,
    MinAmountCents,
    MaxAmountCents,
    ActionType,
    ActionValue,
    TargetAccountId,
    IsActive,
    Priority,
    ExecutionCount,
    TotalSavedCents,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum RuleExecutions {
    Table,
    Id,
    RuleId,
    TransactionId,
    UserId,
    AmountCents,
    SourceAccountId,
    TargetAccountId,
    Status,
    ErrorMessage,
    CreatedAt,
    CompletedAt,
}

#[derive(Iden)]
enum SavingsTransfers {
    Table,
    Id,
    RuleExecutionId,
    UserId,
    SourceAccountId,
    TargetAccountId,
    AmountCents,
    Status,
    ExternalTransferId,
    CreatedAt,
}

// ─────────────────────────────────────────────────────────────────────────────
// Migration implementation
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // ───────────────────────────────────────────────────────────────────
        // 1. Items
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Items::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Items::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Items::UserId).uuid().not_null())
                    .col(
                        ColumnDef::new(Items::ExternalId)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Items::AccessToken).string().not_null())
                    .col(ColumnDef::new(Items::InstitutionName).string().not_null())
                    .col(
                        ColumnDef::new(Items::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(Items::CreatedAt).timestamp().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-items-user_id")
                    .table(Items::Table)
                    .col(Items::UserId)
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 2. Sync cursors
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(SyncCursors::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncCursors::ItemId)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SyncCursors::Cursor)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(SyncCursors::LastSyncAt).timestamp())
                    .col(ColumnDef::new(SyncCursors::LastError).string())
                    .col(
                        ColumnDef::new(SyncCursors::ConsecutiveFailures)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-sync_cursors-item_id")
                            .from(SyncCursors::Table, SyncCursors::ItemId)
                            .to(Items::Table, Items::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 3. Accounts
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Accounts::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Accounts::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Accounts::ItemId).uuid().not_null())
                    .col(ColumnDef::new(Accounts::UserId).uuid().not_null())
                    .col(
                        ColumnDef::new(Accounts::ExternalId)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Accounts::Name).string().not_null())
                    .col(ColumnDef::new(Accounts::AccountType).string().not_null())
                    .col(ColumnDef::new(Accounts::Subtype).string())
                    .col(ColumnDef::new(Accounts::Mask).string())
                    .col(
                        ColumnDef::new(Accounts::CurrentBalance)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Accounts::AvailableBalance).big_integer())
                    .col(
                        ColumnDef::new(Accounts::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(Accounts::CreatedAt).timestamp().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-accounts-item_id")
                            .from(Accounts::Table, Accounts::ItemId)
                            .to(Items::Table, Items::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-accounts-user_id")
                    .table(Accounts::Table)
                    .col(Accounts::UserId)
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 4. Transactions
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Transactions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Transactions::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Transactions::AccountId).uuid().not_null())
                    .col(
                        ColumnDef::new(Transactions::ExternalId)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Transactions::Amount).big_integer().not_null())
                    .col(ColumnDef::new(Transactions::Date).date().not_null())
                    .col(ColumnDef::new(Transactions::Name).string().not_null())
                    .col(ColumnDef::new(Transactions::MerchantName).string())
                    .col(ColumnDef::new(Transactions::Category).string().not_null())
                    .col(ColumnDef::new(Transactions::SourceCategories).json().not_null())
                    .col(
                        ColumnDef::new(Transactions::Pending)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Transactions::PaymentChannel).string())
                    .col(
                        ColumnDef::new(Transactions::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Transactions::UpdatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-transactions-account_id")
                            .from(Transactions::Table, Transactions::AccountId)
                            .to(Accounts::Table, Accounts::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-transactions-account_id-date")
                    .table(Transactions::Table)
                    .col(Transactions::AccountId)
                    .col(Transactions::Date)
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 5. Rules
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Rules::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Rules::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Rules::UserId).uuid().not_null())
                    .col(ColumnDef::new(Rules::Name).string().not_null())
                    .col(ColumnDef::new(Rules::Category).string().not_null())
                    .col(ColumnDef::new(Rules::MinAmountCents).big_integer())
                    .col(ColumnDef::new(Rules::MaxAmountCents).big_integer())
                    .col(ColumnDef::new(Rules::ActionType).string().not_null())
                    .col(ColumnDef::new(Rules::ActionValue).double().not_null())
                    .col(ColumnDef::new(Rules::TargetAccountId).uuid().not_null())
                    .col(
                        ColumnDef::new(Rules::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Rules::Priority)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Rules::ExecutionCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Rules::TotalSavedCents)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Rules::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(Rules::UpdatedAt).timestamp().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-rules-target_account_id")
                            .from(Rules::Table, Rules::TargetAccountId)
                            .to(Accounts::Table, Accounts::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-rules-user_id-priority")
                    .table(Rules::Table)
                    .col(Rules::UserId)
                    .col(Rules::Priority)
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 6. Rule executions
        // ───────────────────────────────────────────────────────────────────
        // `transaction_id` has no foreign key: the ledger outlives transactions
        // removed from the feed.
        manager
            .create_table(
                Table::create()
                    .table(RuleExecutions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RuleExecutions::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(RuleExecutions::RuleId).uuid().not_null())
                    .col(
                        ColumnDef::new(RuleExecutions::TransactionId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(RuleExecutions::UserId).uuid().not_null())
                    .col(
                        ColumnDef::new(RuleExecutions::AmountCents)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RuleExecutions::SourceAccountId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RuleExecutions::TargetAccountId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(RuleExecutions::Status).string().not_null())
                    .col(ColumnDef::new(RuleExecutions::ErrorMessage).string())
                    .col(
                        ColumnDef::new(RuleExecutions::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .col(ColumnDef::new(RuleExecutions::CompletedAt).timestamp())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-rule_executions-rule_id")
                            .from(RuleExecutions::Table, RuleExecutions::RuleId)
                            .to(Rules::Table, Rules::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-rule_executions-rule_id-transaction_id-unique")
                    .table(RuleExecutions::Table)
                    .col(RuleExecutions::RuleId)
                    .col(RuleExecutions::TransactionId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-rule_executions-user_id-created_at")
                    .table(RuleExecutions::Table)
                    .col(RuleExecutions::UserId)
                    .col(RuleExecutions::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 7. Savings transfers
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(SavingsTransfers::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SavingsTransfers::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SavingsTransfers::RuleExecutionId)
                            .uuid()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(SavingsTransfers::UserId).uuid().not_null())
                    .col(
                        ColumnDef::new(SavingsTransfers::SourceAccountId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SavingsTransfers::TargetAccountId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SavingsTransfers::AmountCents)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(SavingsTransfers::Status).string().not_null())
                    .col(ColumnDef::new(SavingsTransfers::ExternalTransferId).string())
                    .col(
                        ColumnDef::new(SavingsTransfers::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-savings_transfers-rule_execution_id")
                            .from(SavingsTransfers::Table, SavingsTransfers::RuleExecutionId)
                            .to(RuleExecutions::Table, RuleExecutions::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-savings_transfers-user_id")
                    .table(SavingsTransfers::Table)
                    .col(SavingsTransfers::UserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Reverse creation order for the foreign keys.
        manager
            .drop_table(Table::drop().table(SavingsTransfers::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RuleExecutions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Rules::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Transactions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Accounts::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SyncCursors::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Items::Table).to_owned())
            .await?;
        Ok(())
    }
}
