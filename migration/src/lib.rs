//! Database migrations for the creditsync service.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2026_01_01_000001_create_users;
mod m2026_01_01_000002_create_credit_ledger;
mod m2026_01_01_000003_create_idempotency_records;
mod m2026_01_01_000004_create_webhook_events;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_01_01_000001_create_users::Migration),
            Box::new(m2026_01_01_000002_create_credit_ledger::Migration),
            Box::new(m2026_01_01_000003_create_idempotency_records::Migration),
            Box::new(m2026_01_01_000004_create_webhook_events::Migration),
        ]
    }
}
