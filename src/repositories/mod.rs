//! # Repository Layer
//!
//! Repository implementations that encapsulate SeaORM operations for the
//! account ledger, idempotency records and the webhook event log.

use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use thiserror::Error;
use uuid::Uuid;

pub mod idempotency;
pub mod user;
pub mod webhook_event;

pub use idempotency::{ClaimOutcome, IdempotencyRepository};
pub use user::{CreditSource, Gateway, UserLookup, UserRepository};
pub use webhook_event::{WebhookEventFilter, WebhookEventRepository, WebhookEventState};

/// Errors surfaced by repositories that enforce domain rules on top of the database.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("user {0} not found")]
    UserNotFound(Uuid),
    #[error("user with email '{0}' already exists")]
    DuplicateEmail(String),
    #[error("credit grant must be positive, got {0}")]
    InvalidCreditAmount(i64),
}

pub(crate) fn to_db_time(value: DateTime<Utc>) -> DateTimeWithTimeZone {
    value.fixed_offset()
}
