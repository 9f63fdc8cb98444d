//! # Webhook Event Repository
//!
//! Durable log of inbound provider events. Recording is insert-if-absent on
//! `(provider, event_id)`, so redeliveries resolve to the first recorded row.
//! Rows past `expires_at` are invisible to lookups and are replaced when the
//! same event arrives again.

use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
    Set, sea_query::Expr,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::debug;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::is_unique_violation;
use crate::models::webhook_event::{self, ActiveModel, Entity, Model};
use crate::repositories::to_db_time;

/// Operator-facing filter on processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventState {
    Pending,
    Processed,
    Failed,
}

/// Listing filter for the operator API.
#[derive(Debug, Clone, Default)]
pub struct WebhookEventFilter {
    pub state: Option<WebhookEventState>,
    pub provider: Option<String>,
    pub limit: u64,
}

/// Repository for webhook event log operations
pub struct WebhookEventRepository {
    db: Arc<DatabaseConnection>,
}

impl WebhookEventRepository {
    /// Create a new webhook event repository
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Record an inbound event, returning the stored row and whether it was newly created.
    pub async fn record_received(
        &self,
        provider: &str,
        event_id: &str,
        event_type: &str,
        payload: JsonValue,
        retention: Duration,
        now: DateTime<Utc>,
    ) -> Result<(Model, bool), DbErr> {
        let db_now = to_db_time(now);
        let model = Model {
            id: Uuid::new_v4(),
            provider: provider.to_string(),
            event_id: event_id.to_string(),
            event_type: event_type.to_string(),
            payload,
            processed: false,
            processed_at: None,
            error: None,
            attempts: 0,
            created_at: db_now,
            updated_at: db_now,
            expires_at: to_db_time(now + retention),
        };

        let active = ActiveModel {
            id: Set(model.id),
            provider: Set(model.provider.clone()),
            event_id: Set(model.event_id.clone()),
            event_type: Set(model.event_type.clone()),
            payload: Set(model.payload.clone()),
            processed: Set(false),
            processed_at: Set(None),
            error: Set(None),
            attempts: Set(0),
            created_at: Set(db_now),
            updated_at: Set(db_now),
            expires_at: Set(model.expires_at),
        };

        match Entity::insert(active.clone())
            .exec_without_returning(&*self.db)
            .await
        {
            Ok(_) => return Ok((model, true)),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err),
        }

        let existing = self.recorded(provider, event_id).await?;
        if existing.expires_at > db_now {
            debug!(provider, event_id, "Webhook event already recorded");
            return Ok((existing, false));
        }

        debug!(provider, event_id, "Replacing expired webhook event record");
        Entity::delete_by_id(existing.id).exec(&*self.db).await?;

        match Entity::insert(active).exec_without_returning(&*self.db).await {
            Ok(_) => Ok((model, true)),
            // Another delivery re-recorded it first
            Err(err) if is_unique_violation(&err) => {
                Ok((self.recorded(provider, event_id).await?, false))
            }
            Err(err) => Err(err),
        }
    }

    /// Row for `(provider, event_id)` regardless of expiry.
    async fn recorded(&self, provider: &str, event_id: &str) -> Result<Model, DbErr> {
        Entity::find()
            .filter(webhook_event::Column::Provider.eq(provider))
            .filter(webhook_event::Column::EventId.eq(event_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("webhook event {provider}/{event_id}")))
    }

    /// Live (unexpired) event by row id.
    pub async fn find_by_id(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(id)
            .filter(webhook_event::Column::ExpiresAt.gt(to_db_time(now)))
            .one(&*self.db)
            .await
    }

    /// Live (unexpired) event by provider and provider event id.
    pub async fn find_by_provider_event(
        &self,
        provider: &str,
        event_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(webhook_event::Column::Provider.eq(provider))
            .filter(webhook_event::Column::EventId.eq(event_id))
            .filter(webhook_event::Column::ExpiresAt.gt(to_db_time(now)))
            .one(&*self.db)
            .await
    }

    /// Count a dispatch attempt.
    pub async fn begin_attempt(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), DbErr> {
        Entity::update_many()
            .col_expr(
                webhook_event::Column::Attempts,
                Expr::col(webhook_event::Column::Attempts).add(1),
            )
            .col_expr(webhook_event::Column::UpdatedAt, Expr::value(to_db_time(now)))
            .filter(webhook_event::Column::Id.eq(id))
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    pub async fn mark_processed(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), DbErr> {
        let db_now = to_db_time(now);
        Entity::update_many()
            .col_expr(webhook_event::Column::Processed, Expr::value(true))
            .col_expr(webhook_event::Column::ProcessedAt, Expr::value(db_now))
            .col_expr(webhook_event::Column::Error, Expr::value(Option::<String>::None))
            .col_expr(webhook_event::Column::UpdatedAt, Expr::value(db_now))
            .filter(webhook_event::Column::Id.eq(id))
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, id: Uuid, error: &str, now: DateTime<Utc>) -> Result<(), DbErr> {
        Entity::update_many()
            .col_expr(webhook_event::Column::Processed, Expr::value(false))
            .col_expr(webhook_event::Column::Error, Expr::value(error))
            .col_expr(webhook_event::Column::UpdatedAt, Expr::value(to_db_time(now)))
            .filter(webhook_event::Column::Id.eq(id))
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    /// List live events, newest first.
    pub async fn list(
        &self,
        filter: &WebhookEventFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<Model>, DbErr> {
        let mut query =
            Entity::find().filter(webhook_event::Column::ExpiresAt.gt(to_db_time(now)));

        if let Some(provider) = filter.provider.as_deref() {
            query = query.filter(webhook_event::Column::Provider.eq(provider));
        }

        query = match filter.state {
            Some(WebhookEventState::Processed) => {
                query.filter(webhook_event::Column::Processed.eq(true))
            }
            Some(WebhookEventState::Failed) => query
                .filter(webhook_event::Column::Processed.eq(false))
                .filter(webhook_event::Column::Error.is_not_null()),
            Some(WebhookEventState::Pending) => query
                .filter(webhook_event::Column::Processed.eq(false))
                .filter(webhook_event::Column::Error.is_null()),
            None => query,
        };

        query
            .order_by_desc(webhook_event::Column::CreatedAt)
            .limit(filter.limit)
            .all(&*self.db)
            .await
    }

    /// Delete every event past its retention window.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, DbErr> {
        let result = Entity::delete_many()
            .filter(webhook_event::Column::ExpiresAt.lte(to_db_time(now)))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected)
    }
}
