//! # Idempotency Repository
//!
//! Persistence for idempotency records keyed by `(key, resource, action)`.
//!
//! Claiming a key is a single insert guarded by the unique index, so two
//! concurrent callers can never both run the protected operation. Failed
//! records are re-claimed through a conditional update so redelivery retries.

use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set, sea_query::Expr,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::error::is_unique_violation;
use crate::models::idempotency_record::{self, ActiveModel, Entity, IdempotencyStatus, Model};
use crate::repositories::to_db_time;

/// Result of attempting to claim an idempotency key.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The caller owns the key and must finish with `complete` or `fail`.
    Claimed(Model),
    /// Another caller holds a live `processing` record.
    InFlight,
    /// The operation already finished; the stored result is authoritative.
    Completed(Model),
}

/// Repository for idempotency record operations
pub struct IdempotencyRepository {
    db: Arc<DatabaseConnection>,
}

impl IdempotencyRepository {
    /// Create a new idempotency repository
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Build the composite key `{resource}:{action}:{identifier}`.
    pub fn compose_key(resource: &str, action: &str, identifier: &str) -> String {
        format!("{resource}:{action}:{identifier}")
    }

    /// Look up the record for a triple. Expired records are deleted and reported as absent.
    pub async fn check(
        &self,
        key: &str,
        resource: &str,
        action: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Model>, DbErr> {
        let Some(record) = self.find(key, resource, action).await? else {
            return Ok(None);
        };

        if record.expires_at <= to_db_time(now) {
            debug!(key, resource, action, "Dropping expired idempotency record");
            Entity::delete_by_id(record.id).exec(&*self.db).await?;
            return Ok(None);
        }

        Ok(Some(record))
    }

    /// Atomically claim a triple for processing.
    pub async fn start_processing(
        &self,
        key: &str,
        resource: &str,
        action: &str,
        ttl: Duration,
        metadata: Option<JsonValue>,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, DbErr> {
        let db_now = to_db_time(now);
        let expires_at = to_db_time(now + ttl);

        // Expired rows for this triple are treated as absent
        Entity::delete_many()
            .filter(idempotency_record::Column::Key.eq(key))
            .filter(idempotency_record::Column::Resource.eq(resource))
            .filter(idempotency_record::Column::Action.eq(action))
            .filter(idempotency_record::Column::ExpiresAt.lte(db_now))
            .exec(&*self.db)
            .await?;

        let record = Model {
            id: Uuid::new_v4(),
            key: key.to_string(),
            resource: resource.to_string(),
            action: action.to_string(),
            status: IdempotencyStatus::Processing.as_str().to_string(),
            result: None,
            error: None,
            metadata: metadata.clone(),
            created_at: db_now,
            updated_at: db_now,
            expires_at,
        };

        let active = ActiveModel {
            id: Set(record.id),
            key: Set(record.key.clone()),
            resource: Set(record.resource.clone()),
            action: Set(record.action.clone()),
            status: Set(record.status.clone()),
            result: Set(None),
            error: Set(None),
            metadata: Set(record.metadata.clone()),
            created_at: Set(db_now),
            updated_at: Set(db_now),
            expires_at: Set(expires_at),
        };

        match Entity::insert(active).exec_without_returning(&*self.db).await {
            Ok(_) => return Ok(ClaimOutcome::Claimed(record)),
            Err(err) if is_unique_violation(&err) => {
                debug!(key, resource, action, "Idempotency key already claimed");
            }
            Err(err) => return Err(err),
        }

        let Some(existing) = self.find(key, resource, action).await? else {
            // Lost a race with a purge or another claimant; report as busy so the caller retries later.
            return Ok(ClaimOutcome::InFlight);
        };

        match existing.status() {
            IdempotencyStatus::Processing => Ok(ClaimOutcome::InFlight),
            IdempotencyStatus::Completed => Ok(ClaimOutcome::Completed(existing)),
            IdempotencyStatus::Failed => {
                self.reclaim_failed(existing, ttl, metadata, now).await
            }
        }
    }

    async fn reclaim_failed(
        &self,
        existing: Model,
        ttl: Duration,
        metadata: Option<JsonValue>,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, DbErr> {
        let db_now = to_db_time(now);
        let expires_at = to_db_time(now + ttl);
        let metadata = metadata.or(existing.metadata.clone());

        let result = Entity::update_many()
            .col_expr(
                idempotency_record::Column::Status,
                Expr::value(IdempotencyStatus::Processing.as_str()),
            )
            .col_expr(idempotency_record::Column::Error, Expr::value(Option::<String>::None))
            .col_expr(idempotency_record::Column::Metadata, Expr::value(metadata.clone()))
            .col_expr(idempotency_record::Column::UpdatedAt, Expr::value(db_now))
            .col_expr(idempotency_record::Column::ExpiresAt, Expr::value(expires_at))
            .filter(idempotency_record::Column::Id.eq(existing.id))
            .filter(idempotency_record::Column::Status.eq(IdempotencyStatus::Failed.as_str()))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 1 {
            debug!(key = %existing.key, "Re-claimed failed idempotency record");
            return Ok(ClaimOutcome::Claimed(Model {
                status: IdempotencyStatus::Processing.as_str().to_string(),
                error: None,
                metadata,
                updated_at: db_now,
                expires_at,
                ..existing
            }));
        }

        // Someone else re-claimed or finished it between our read and update
        match self
            .find(&existing.key, &existing.resource, &existing.action)
            .await?
        {
            Some(current) if current.status() == IdempotencyStatus::Completed => {
                Ok(ClaimOutcome::Completed(current))
            }
            _ => Ok(ClaimOutcome::InFlight),
        }
    }

    /// Mark a claimed triple completed, storing the result returned to later duplicates.
    pub async fn complete(
        &self,
        key: &str,
        resource: &str,
        action: &str,
        result: JsonValue,
        now: DateTime<Utc>,
    ) -> Result<bool, DbErr> {
        self.finish(
            key,
            resource,
            action,
            IdempotencyStatus::Completed,
            Some(result),
            None,
            now,
        )
        .await
    }

    /// Mark a claimed triple failed so a later delivery may re-claim it.
    pub async fn fail(
        &self,
        key: &str,
        resource: &str,
        action: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DbErr> {
        self.finish(
            key,
            resource,
            action,
            IdempotencyStatus::Failed,
            None,
            Some(error.to_string()),
            now,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        key: &str,
        resource: &str,
        action: &str,
        status: IdempotencyStatus,
        result: Option<JsonValue>,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<bool, DbErr> {
        let updated = Entity::update_many()
            .col_expr(idempotency_record::Column::Status, Expr::value(status.as_str()))
            .col_expr(idempotency_record::Column::Result, Expr::value(result))
            .col_expr(idempotency_record::Column::Error, Expr::value(error))
            .col_expr(
                idempotency_record::Column::UpdatedAt,
                Expr::value(to_db_time(now)),
            )
            .filter(idempotency_record::Column::Key.eq(key))
            .filter(idempotency_record::Column::Resource.eq(resource))
            .filter(idempotency_record::Column::Action.eq(action))
            .filter(
                idempotency_record::Column::Status.eq(IdempotencyStatus::Processing.as_str()),
            )
            .exec(&*self.db)
            .await?;

        if updated.rows_affected == 0 {
            debug!(key, resource, action, %status, "No processing record to finish");
        }

        Ok(updated.rows_affected > 0)
    }

    /// Delete every record whose `expires_at` has passed.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, DbErr> {
        let result = Entity::delete_many()
            .filter(idempotency_record::Column::ExpiresAt.lte(to_db_time(now)))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected)
    }

    async fn find(&self, key: &str, resource: &str, action: &str) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(idempotency_record::Column::Key.eq(key))
            .filter(idempotency_record::Column::Resource.eq(resource))
            .filter(idempotency_record::Column::Action.eq(action))
            .one(&*self.db)
            .await
    }
}
