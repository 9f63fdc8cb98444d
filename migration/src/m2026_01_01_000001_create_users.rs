//! Migration to create the users table.
//!
//! One authoritative row per account: plan, credit balance, subscription
//! status and the gateway identifiers used to resolve webhook payloads.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Users::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Users::Email).text().not_null())
                    .col(
                        ColumnDef::new(Users::Plan)
                            .text()
                            .not_null()
                            .default("free"),
                    )
                    .col(
                        ColumnDef::new(Users::CreditBalance)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Users::SubscriptionStatus)
                            .text()
                            .not_null()
                            .default("inactive"),
                    )
                    .col(ColumnDef::new(Users::StripeCustomerId).text().null())
                    .col(ColumnDef::new(Users::StripeSubscriptionId).text().null())
                    .col(ColumnDef::new(Users::SquareCustomerId).text().null())
                    .col(ColumnDef::new(Users::SquareSubscriptionId).text().null())
                    .col(ColumnDef::new(Users::LastPaymentError).text().null())
                    .col(
                        ColumnDef::new(Users::PaymentFailedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Users::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Users::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_users_email")
                    .table(Users::Table)
                    .col(Users::Email)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Customer and subscription lookups back the webhook resolution strategies
        for (name, column) in [
            ("idx_users_stripe_customer_id", Users::StripeCustomerId),
            ("idx_users_stripe_subscription_id", Users::StripeSubscriptionId),
            ("idx_users_square_customer_id", Users::SquareCustomerId),
            ("idx_users_square_subscription_id", Users::SquareSubscriptionId),
        ] {
            manager
                .create_index(
                    Index::create()
                        .name(name)
                        .table(Users::Table)
                        .col(column)
                        .to_owned(),
                )
                .await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
    Email,
    Plan,
    CreditBalance,
    SubscriptionStatus,
    StripeCustomerId,
    StripeSubscriptionId,
    SquareCustomerId,
    SquareSubscriptionId,
    LastPaymentError,
    PaymentFailedAt,
    CreatedAt,
    UpdatedAt,
}
