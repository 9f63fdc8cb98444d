//! Migration to create the credit_ledger table.
//!
//! Append-only record of every balance mutation, written in the same
//! transaction as the balance update on `users`. A provider event can grant
//! credits at most once.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CreditLedger::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CreditLedger::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CreditLedger::UserId).uuid().not_null())
                    .col(ColumnDef::new(CreditLedger::Delta).big_integer().not_null())
                    .col(
                        ColumnDef::new(CreditLedger::BalanceAfter)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(CreditLedger::Reason).text().not_null())
                    .col(ColumnDef::new(CreditLedger::SourceProvider).text().not_null())
                    .col(ColumnDef::new(CreditLedger::SourceEventId).text().not_null())
                    .col(
                        ColumnDef::new(CreditLedger::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_credit_ledger_user_id")
                            .from(CreditLedger::Table, CreditLedger::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_credit_ledger_user_created")
                    .table(CreditLedger::Table)
                    .col(CreditLedger::UserId)
                    .col(CreditLedger::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_credit_ledger_source_event")
                    .table(CreditLedger::Table)
                    .col(CreditLedger::SourceProvider)
                    .col(CreditLedger::SourceEventId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CreditLedger::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CreditLedger {
    Table,
    Id,
    UserId,
    Delta,
    BalanceAfter,
    Reason,
    SourceProvider,
    SourceEventId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}
