//! # Webhook Handlers
//!
//! Public `POST /webhooks/{provider}` endpoint. Responses use the
//! provider-facing `{"received": true}` / `{"error": "..."}` bodies rather
//! than problem+json, and the status code tells the provider whether to
//! redeliver.

use axum::{
    body::to_bytes,
    extract::{Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use utoipa::{IntoParams, ToSchema};

use crate::events::{Provider, WebhookEnvelope};
use crate::processor::{ProcessError, ProcessOutcome};
use crate::server::AppState;
use crate::webhook_verification::{VerificationError, verify_webhook_signature};

/// Path parameter for the provider slug
#[derive(Debug, Deserialize, IntoParams)]
pub struct ProviderPathParam {
    /// Provider slug: stripe, square or backend
    #[param(min_length = 1, example = "stripe")]
    pub provider: String,
}

/// Acknowledgement returned for processed, duplicate and unsupported events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<bool>,
}

impl WebhookAck {
    pub fn received() -> Self {
        Self {
            received: true,
            duplicate: None,
        }
    }

    pub fn duplicate() -> Self {
        Self {
            received: true,
            duplicate: Some(true),
        }
    }
}

/// Error body returned to providers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WebhookErrorBody {
    pub error: String,
}

fn reject(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(WebhookErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Receive a provider webhook
#[utoipa::path(
    post,
    path = "/webhooks/{provider}",
    params(ProviderPathParam),
    request_body(content = serde_json::Value, description = "Raw provider event payload"),
    responses(
        (status = 200, description = "Event processed, duplicate or unsupported", body = WebhookAck),
        (status = 400, description = "Malformed payload", body = WebhookErrorBody),
        (status = 401, description = "Missing or invalid signature", body = WebhookErrorBody),
        (status = 404, description = "Unknown provider", body = WebhookErrorBody),
        (status = 409, description = "Event is being processed by another delivery", body = WebhookErrorBody),
        (status = 413, description = "Payload too large", body = WebhookErrorBody),
        (status = 500, description = "Handler failed (event recorded for replay) or provider secret not configured", body = WebhookErrorBody)
    ),
    tag = "webhooks"
)]
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(ProviderPathParam { provider }): Path<ProviderPathParam>,
    request: Request,
) -> Response {
    let Ok(provider) = provider.parse::<Provider>() else {
        debug!(%provider, "Webhook for unknown provider");
        return reject(StatusCode::NOT_FOUND, "Unknown provider");
    };

    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, state.config.webhook_max_body_bytes()).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(provider = %provider, error = %err, "Failed to read webhook body");
            return reject(StatusCode::PAYLOAD_TOO_LARGE, "Payload too large");
        }
    };

    let now = Utc::now();
    if let Err(err) =
        verify_webhook_signature(provider, &body, &parts.headers, &state.config, now.timestamp())
    {
        match &err {
            VerificationError::NotConfigured { .. } => {
                error!(provider = %provider, "Webhook secret not configured")
            }
            _ => warn!(provider = %provider, error = %err, "Webhook signature rejected"),
        }
        return reject(err.status_code(), err.to_string());
    }

    let envelope = match WebhookEnvelope::parse(provider, &body) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(provider = %provider, error = %err, "Malformed webhook payload");
            return reject(StatusCode::BAD_REQUEST, err.to_string());
        }
    };

    match state.processor.process(&envelope, now).await {
        Ok(ProcessOutcome::Processed { .. }) | Ok(ProcessOutcome::Unsupported) => {
            Json(WebhookAck::received()).into_response()
        }
        Ok(ProcessOutcome::Duplicate { .. }) => Json(WebhookAck::duplicate()).into_response(),
        Err(ProcessError::InFlight { .. }) => reject(
            StatusCode::CONFLICT,
            "Event is already being processed; retry later",
        ),
        Err(ProcessError::Handler { message, .. }) => {
            reject(StatusCode::INTERNAL_SERVER_ERROR, message)
        }
        Err(err) => {
            error!(
                provider = %provider,
                event_id = %envelope.event_id,
                error = ?err,
                "Webhook processing failed"
            );
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}
