//! WebhookEvent entity model
//!
//! Durable log of inbound provider events, unique per (provider, event_id).
//! Failed rows keep their payload and error so operators can replay them.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "webhook_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Provider slug (stripe, square, backend)
    pub provider: String,

    /// Provider-assigned event identifier
    pub event_id: String,

    pub event_type: String,

    /// Raw JSON payload as delivered
    #[sea_orm(column_type = "JsonBinary")]
    pub payload: JsonValue,

    pub processed: bool,

    pub processed_at: Option<DateTimeWithTimeZone>,

    /// Last handler error, cleared on success
    pub error: Option<String>,

    /// Number of dispatch attempts, including replays
    pub attempts: i32,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
    pub expires_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Operator-facing state derived from `processed` and `error`.
    pub fn state(&self) -> &'static str {
        match (self.processed, self.error.is_some()) {
            (true, _) => "processed",
            (false, true) => "failed",
            (false, false) => "pending",
        }
    }
}
