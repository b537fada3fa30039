//! Initial schema.
//!
//! - `transactions`: ledger records, partitioned by owner and year
//! - `categories`: curated category documents (loosely typed JSON)
//! - `monthly_aggregates`: per-user, per-month income/expense totals
//! - `wallets`: running balance per user
//!
//! Monetary values are decimal text and timestamps are epoch milliseconds as
//! text, matching the records already in circulation.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(Iden)]
enum Transactions {
    Table,
    TransactionId,
    TransactionUserId,
    TransactionAmount,
    TransactionType,
    TransactionCategory,
    TransactionRemark,
    TransactionDate,
    TransactionTags,
    PartitionYear,
    OccurredAtMs,
}

#[derive(Iden)]
enum Categories {
    Table,
    Id,
    Document,
}

#[derive(Iden)]
enum MonthlyAggregates {
    Table,
    Id,
    UserId,
    Year,
    Month,
    Income,
    Expenses,
    UpdatedAt,
    Version,
}

#[derive(Iden)]
enum Wallets {
    Table,
    UserId,
    Balance,
    Income,
    Expenses,
    UpdatedAt,
    Version,
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Transactions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Transactions::TransactionId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Transactions::TransactionUserId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Transactions::TransactionAmount)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Transactions::TransactionType)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Transactions::TransactionCategory)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Transactions::TransactionRemark)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Transactions::TransactionDate)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Transactions::TransactionTags)
                            .text()
                            .not_null()
                            .default("[]"),
                    )
                    .col(
                        ColumnDef::new(Transactions::PartitionYear)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Transactions::OccurredAtMs)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-transactions-user-year-occurred")
                    .table(Transactions::Table)
                    .col(Transactions::TransactionUserId)
                    .col(Transactions::PartitionYear)
                    .col(Transactions::OccurredAtMs)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Categories::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Categories::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Categories::Document).text().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(MonthlyAggregates::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MonthlyAggregates::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(MonthlyAggregates::UserId).string().not_null())
                    .col(ColumnDef::new(MonthlyAggregates::Year).integer().not_null())
                    .col(ColumnDef::new(MonthlyAggregates::Month).string().not_null())
                    .col(ColumnDef::new(MonthlyAggregates::Income).string().not_null())
                    .col(
                        ColumnDef::new(MonthlyAggregates::Expenses)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MonthlyAggregates::UpdatedAt)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MonthlyAggregates::Version)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-monthly_aggregates-user-year")
                    .table(MonthlyAggregates::Table)
                    .col(MonthlyAggregates::UserId)
                    .col(MonthlyAggregates::Year)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Wallets::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Wallets::UserId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Wallets::Balance).string().not_null())
                    .col(ColumnDef::new(Wallets::Income).string().not_null())
                    .col(ColumnDef::new(Wallets::Expenses).string().not_null())
                    .col(ColumnDef::new(Wallets::UpdatedAt).string().not_null())
                    .col(ColumnDef::new(Wallets::Version).big_integer().not_null())
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Wallets::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(MonthlyAggregates::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Categories::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Transactions::Table).to_owned())
            .await?;
        Ok(())
    }
}
