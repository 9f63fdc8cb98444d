//! IdempotencyRecord entity model
//!
//! One row per (key, resource, action) triple. A `processing` row blocks
//! concurrent duplicate execution; terminal rows carry the stored result or
//! error until `expires_at`.

use std::fmt;
use std::str::FromStr;

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "idempotency_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Composite key in the form `{resource}:{action}:{identifier}`
    pub key: String,

    pub resource: String,

    pub action: String,

    /// One of `processing`, `completed`, `failed`
    pub status: String,

    /// Result stored on completion and returned to later duplicates
    #[sea_orm(column_type = "JsonBinary")]
    pub result: Option<JsonValue>,

    pub error: Option<String>,

    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: Option<JsonValue>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
    pub expires_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Parsed status; unknown values are treated as `processing` so they block.
    pub fn status(&self) -> IdempotencyStatus {
        self.status.parse().unwrap_or(IdempotencyStatus::Processing)
    }
}

/// Lifecycle state of an idempotency record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    Processing,
    Completed,
    Failed,
}

impl IdempotencyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdempotencyStatus::Processing => "processing",
            IdempotencyStatus::Completed => "completed",
            IdempotencyStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for IdempotencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdempotencyStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "processing" => Ok(IdempotencyStatus::Processing),
            "completed" => Ok(IdempotencyStatus::Completed),
            "failed" => Ok(IdempotencyStatus::Failed),
            other => Err(format!("unknown idempotency status '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            IdempotencyStatus::Processing,
            IdempotencyStatus::Completed,
            IdempotencyStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<IdempotencyStatus>(), Ok(status));
        }
        assert!("done".parse::<IdempotencyStatus>().is_err());
    }
}
