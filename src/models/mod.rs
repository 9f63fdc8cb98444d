//! # Data Models
//!
//! SeaORM entities for the accounts, credit ledger, idempotency records and
//! the inbound webhook event log.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod credit_ledger;
pub mod idempotency_record;
pub mod user;
pub mod webhook_event;

pub use credit_ledger::Entity as CreditLedger;
pub use idempotency_record::Entity as IdempotencyRecord;
pub use user::Entity as User;
pub use webhook_event::Entity as WebhookEvent;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "creditsync".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
