//! Migration to create the idempotency_records table.
//!
//! The unique index on (key, resource, action) is what makes claiming a key
//! a single atomic insert.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(IdempotencyRecords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(IdempotencyRecords::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(IdempotencyRecords::Key).text().not_null())
                    .col(ColumnDef::new(IdempotencyRecords::Resource).text().not_null())
                    .col(ColumnDef::new(IdempotencyRecords::Action).text().not_null())
                    .col(
                        ColumnDef::new(IdempotencyRecords::Status)
                            .text()
                            .not_null()
                            .default("processing"),
                    )
                    .col(ColumnDef::new(IdempotencyRecords::Result).json_binary().null())
                    .col(ColumnDef::new(IdempotencyRecords::Error).text().null())
                    .col(ColumnDef::new(IdempotencyRecords::Metadata).json_binary().null())
                    .col(
                        ColumnDef::new(IdempotencyRecords::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(IdempotencyRecords::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(IdempotencyRecords::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_idempotency_records_key_resource_action")
                    .table(IdempotencyRecords::Table)
                    .col(IdempotencyRecords::Key)
                    .col(IdempotencyRecords::Resource)
                    .col(IdempotencyRecords::Action)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_idempotency_records_expires_at")
                    .table(IdempotencyRecords::Table)
                    .col(IdempotencyRecords::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(IdempotencyRecords::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum IdempotencyRecords {
    Table,
    Id,
    Key,
    Resource,
    Action,
    Status,
    Result,
    Error,
    Metadata,
    CreatedAt,
    UpdatedAt,
    ExpiresAt,
}
