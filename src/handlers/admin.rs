//! # Operator API
//!
//! Bearer-protected endpoints for inspecting and replaying logged webhook
//! events, forcing a purge of expired records, and checking an account's
//! balance against its ledger.

use axum::{
    extract::{Path, Query, State, rejection::QueryRejection},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::OperatorAuth;
use crate::error::{ApiError, conflict, not_found, validation_error};
use crate::events::Provider;
use crate::maintenance::{PurgeReport, run_purge};
use crate::models::{credit_ledger, webhook_event};
use crate::processor::{ProcessError, ProcessOutcome};
use crate::repositories::{
    UserRepository, WebhookEventFilter, WebhookEventRepository, WebhookEventState,
    user::CreditReconciliation,
};
use crate::server::AppState;

const DEFAULT_LIST_LIMIT: u64 = 50;
const MAX_LIST_LIMIT: u64 = 500;
const LEDGER_PREVIEW_LIMIT: u64 = 20;

/// Query parameters for listing webhook events
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListWebhookEventsQuery {
    /// Filter by processing state
    pub status: Option<WebhookEventState>,
    /// Filter by provider slug
    #[param(example = "stripe")]
    pub provider: Option<String>,
    /// Maximum number of events (default 50, max 500)
    pub limit: Option<u64>,
}

/// Logged webhook event as shown to operators
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookEventView {
    pub id: Uuid,
    pub provider: String,
    pub event_id: String,
    pub event_type: String,
    /// pending, processed or failed
    pub status: String,
    pub attempts: i32,
    pub error: Option<String>,
    pub created_at: String,
    pub processed_at: Option<String>,
}

impl From<webhook_event::Model> for WebhookEventView {
    fn from(model: webhook_event::Model) -> Self {
        Self {
            status: model.state().to_string(),
            id: model.id,
            provider: model.provider,
            event_id: model.event_id,
            event_type: model.event_type,
            attempts: model.attempts,
            error: model.error,
            created_at: model.created_at.to_rfc3339(),
            processed_at: model.processed_at.map(|at| at.to_rfc3339()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookEventListResponse {
    pub events: Vec<WebhookEventView>,
}

/// Result of a replay request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReplayResponse {
    /// processed, duplicate, unsupported or failed
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Ledger entry as shown to operators
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LedgerEntryView {
    pub id: Uuid,
    pub delta: i64,
    pub balance_after: i64,
    pub reason: String,
    pub source_provider: String,
    pub source_event_id: String,
    pub created_at: String,
}

impl From<credit_ledger::Model> for LedgerEntryView {
    fn from(model: credit_ledger::Model) -> Self {
        Self {
            id: model.id,
            delta: model.delta,
            balance_after: model.balance_after,
            reason: model.reason,
            source_provider: model.source_provider,
            source_event_id: model.source_event_id,
            created_at: model.created_at.to_rfc3339(),
        }
    }
}

/// Account snapshot with ledger reconciliation
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserCreditsResponse {
    pub user_id: Uuid,
    pub email: String,
    pub plan: String,
    pub subscription_status: String,
    pub credit_balance: i64,
    pub last_payment_error: Option<String>,
    pub reconciliation: CreditReconciliation,
    /// Most recent ledger entries, newest first
    pub recent_ledger: Vec<LedgerEntryView>,
}

/// List logged webhook events
#[utoipa::path(
    get,
    path = "/admin/webhook-events",
    params(ListWebhookEventsQuery),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Logged events, newest first", body = WebhookEventListResponse),
        (status = 400, description = "Invalid filter", body = ApiError),
        (status = 401, description = "Missing or invalid operator token", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn list_webhook_events(
    _auth: OperatorAuth,
    State(state): State<AppState>,
    query: Result<Query<ListWebhookEventsQuery>, QueryRejection>,
) -> Result<Json<WebhookEventListResponse>, ApiError> {
    let Query(query) = query?;
    if let Some(provider) = query.provider.as_deref() {
        provider.parse::<Provider>().map_err(|_| {
            validation_error(
                "Invalid provider",
                json!({ "provider": "Must be one of stripe, square, backend" }),
            )
        })?;
    }

    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    if limit == 0 || limit > MAX_LIST_LIMIT {
        return Err(validation_error(
            "Invalid limit",
            json!({ "limit": format!("Must be between 1 and {MAX_LIST_LIMIT}") }),
        ));
    }

    let filter = WebhookEventFilter {
        state: query.status,
        provider: query.provider,
        limit,
    };
    let events = WebhookEventRepository::new(state.db.clone())
        .list(&filter, Utc::now())
        .await?
        .into_iter()
        .map(WebhookEventView::from)
        .collect();

    Ok(Json(WebhookEventListResponse { events }))
}

/// Replay a logged webhook event through the idempotent pipeline
#[utoipa::path(
    post,
    path = "/admin/webhook-events/{id}/replay",
    params(("id" = Uuid, Path, description = "Webhook event log id")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Replay finished; see outcome", body = ReplayResponse),
        (status = 401, description = "Missing or invalid operator token", body = ApiError),
        (status = 404, description = "Event not found", body = ApiError),
        (status = 409, description = "Event is being processed", body = ApiError),
        (status = 422, description = "Stored payload cannot be replayed", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn replay_webhook_event(
    _auth: OperatorAuth,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReplayResponse>, ApiError> {
    let response = match state.processor.replay(id, Utc::now()).await {
        Ok(ProcessOutcome::Processed { summary }) => ReplayResponse {
            outcome: "processed".to_string(),
            result: Some(summary),
            error: None,
        },
        Ok(ProcessOutcome::Duplicate { summary }) => ReplayResponse {
            outcome: "duplicate".to_string(),
            result: summary,
            error: None,
        },
        Ok(ProcessOutcome::Unsupported) => ReplayResponse {
            outcome: "unsupported".to_string(),
            result: None,
            error: None,
        },
        Err(ProcessError::Handler { message, .. }) => ReplayResponse {
            outcome: "failed".to_string(),
            result: None,
            error: Some(message),
        },
        Err(ProcessError::EventNotFound(id)) => {
            return Err(not_found(format!("Webhook event {id} not found")));
        }
        Err(ProcessError::InFlight { event_id }) => {
            return Err(conflict(format!("Event {event_id} is already being processed")));
        }
        Err(ProcessError::InvalidStoredEvent(err)) => {
            return Err(ApiError::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "UNPROCESSABLE_ENTITY",
                err.to_string(),
            ));
        }
        Err(ProcessError::Database(err)) => return Err(err.into()),
    };

    info!(webhook_event_id = %id, outcome = %response.outcome, "Operator replay finished");
    Ok(Json(response))
}

/// Purge expired idempotency records and webhook events now
#[utoipa::path(
    post,
    path = "/admin/maintenance/purge",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Rows removed", body = PurgeReport),
        (status = 401, description = "Missing or invalid operator token", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn purge_expired(
    _auth: OperatorAuth,
    State(state): State<AppState>,
) -> Result<Json<PurgeReport>, ApiError> {
    let report = run_purge(&state.db, Utc::now()).await?;
    info!(
        idempotency_records = report.idempotency_records,
        webhook_events = report.webhook_events,
        "Operator purge finished"
    );
    Ok(Json(report))
}

/// Account snapshot with balance/ledger reconciliation
#[utoipa::path(
    get,
    path = "/admin/users/{email}/credits",
    params(("email" = String, Path, description = "Account email")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Account snapshot", body = UserCreditsResponse),
        (status = 401, description = "Missing or invalid operator token", body = ApiError),
        (status = 404, description = "No account with this email", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn user_credits(
    _auth: OperatorAuth,
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Result<Json<UserCreditsResponse>, ApiError> {
    let users = UserRepository::new(state.db.clone());
    let user = users
        .find_by_email(&email)
        .await?
        .ok_or_else(|| not_found(format!("No account for {email}")))?;

    let reconciliation = users.reconcile(user.id).await?;
    let recent_ledger = users
        .ledger_entries(user.id, LEDGER_PREVIEW_LIMIT)
        .await?
        .into_iter()
        .map(LedgerEntryView::from)
        .collect();

    Ok(Json(UserCreditsResponse {
        user_id: user.id,
        email: user.email,
        plan: user.plan,
        subscription_status: user.subscription_status,
        credit_balance: user.credit_balance,
        last_payment_error: user.last_payment_error,
        reconciliation,
        recent_ledger,
    }))
}
