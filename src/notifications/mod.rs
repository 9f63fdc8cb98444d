//! # Notification Fan-out
//!
//! Server-sent event delivery of task status to connected browsers: the wire
//! messages, the in-process connection hub and the per-IP connect limiter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;

pub mod hub;
pub mod rate_limit;

pub use hub::{ConnectionStream, HubSettings, NotificationHub, SweepReport};
pub use rate_limit::{ConnectRateLimiter, RateLimited};

/// Message pushed to SSE clients, serialized as `data: <json>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SseMessage {
    Connected {
        client_id: String,
        timestamp: DateTime<Utc>,
    },
    Ping {
        timestamp: DateTime<Utc>,
    },
    TaskCompleted(TaskNotification),
    TaskFailed(TaskNotification),
    TaskProgress(TaskNotification),
}

impl SseMessage {
    /// The `type` tag as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            SseMessage::Connected { .. } => "connected",
            SseMessage::Ping { .. } => "ping",
            SseMessage::TaskCompleted(_) => "task_completed",
            SseMessage::TaskFailed(_) => "task_failed",
            SseMessage::TaskProgress(_) => "task_progress",
        }
    }
}

/// Task status details reported by the image-generation backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TaskNotification {
    pub task_id: String,
    /// Percentage in 0..=100
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    pub timestamp: DateTime<Utc>,
}
