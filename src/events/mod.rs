//! # Webhook Events
//!
//! Provider identification, envelope normalization and the handler contract
//! shared by the Stripe, Square and backend event handlers.

use std::fmt;
use std::str::FromStr;

use sea_orm::DbErr;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::models::user;
use crate::notifications::SseMessage;
use crate::repositories::{CreditSource, RepositoryError, UserLookup};

pub mod backend;
pub mod dispatcher;
pub mod square;
pub mod stripe;

pub use dispatcher::{EventDispatcher, EventHandler, HandlerContext};

/// Webhook sources accepted by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Stripe,
    Square,
    Backend,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Stripe, Provider::Square, Provider::Backend];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Stripe => "stripe",
            Provider::Square => "square",
            Provider::Backend => "backend",
        }
    }

    /// Header carrying the provider's payload signature.
    pub fn signature_header(&self) -> &'static str {
        match self {
            Provider::Stripe => "stripe-signature",
            Provider::Square => "x-square-hmacsha256-signature",
            Provider::Backend => "x-webhook-signature",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = EnvelopeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "stripe" => Ok(Provider::Stripe),
            "square" => Ok(Provider::Square),
            "backend" => Ok(Provider::Backend),
            other => Err(EnvelopeError::UnknownProvider(other.to_string())),
        }
    }
}

/// Errors raised while turning a raw body into a [`WebhookEnvelope`].
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("payload must be a JSON object")]
    NotAnObject,
    #[error("missing or empty field '{0}'")]
    MissingField(&'static str),
}

/// Provider-neutral view of an inbound event.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEnvelope {
    pub provider: Provider,
    pub event_id: String,
    pub event_type: String,
    /// The event's business object (`data.object` for gateways, `data` for the backend)
    pub data: JsonValue,
    /// Full payload as delivered
    pub raw: JsonValue,
}

impl WebhookEnvelope {
    /// Parse and normalize a raw request body.
    pub fn parse(provider: Provider, body: &[u8]) -> Result<Self, EnvelopeError> {
        let value: JsonValue = serde_json::from_slice(body)?;
        Self::from_value(provider, value)
    }

    /// Normalize an already-decoded payload, e.g. one stored for replay.
    pub fn from_value(provider: Provider, raw: JsonValue) -> Result<Self, EnvelopeError> {
        if !raw.is_object() {
            return Err(EnvelopeError::NotAnObject);
        }

        let (id_field, data_pointer) = match provider {
            Provider::Stripe => ("id", "/data/object"),
            Provider::Square => ("event_id", "/data/object"),
            Provider::Backend => ("event_id", "/data"),
        };

        let event_id = non_empty_str(&raw, id_field).ok_or(EnvelopeError::MissingField(id_field))?;
        let event_type = non_empty_str(&raw, "type").ok_or(EnvelopeError::MissingField("type"))?;
        let data = raw.pointer(data_pointer).cloned().unwrap_or(JsonValue::Null);

        Ok(Self {
            provider,
            event_id,
            event_type,
            data,
            raw,
        })
    }

    /// String field of the business object.
    pub fn data_str(&self, pointer: &str) -> Option<&str> {
        self.data
            .pointer(pointer)
            .and_then(JsonValue::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// Ledger provenance for balance changes caused by this event.
    pub fn credit_source(&self) -> CreditSource {
        CreditSource {
            reason: self.event_type.clone(),
            provider: self.provider.as_str().to_string(),
            event_id: self.event_id.clone(),
        }
    }

    /// Integer field of the business object; numeric strings are accepted.
    pub fn data_i64(&self, pointer: &str) -> Option<i64> {
        match self.data.pointer(pointer)? {
            JsonValue::Number(number) => number.as_i64(),
            JsonValue::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }
}

fn non_empty_str(value: &JsonValue, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// What a handler did, stored as the idempotency result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerOutput {
    pub summary: JsonValue,
    /// Messages fanned out to SSE clients once the event is committed
    pub notifications: Vec<SseMessage>,
}

impl HandlerOutput {
    pub fn new(summary: JsonValue) -> Self {
        Self {
            summary,
            notifications: Vec::new(),
        }
    }

    pub fn with_notification(mut self, message: SseMessage) -> Self {
        self.notifications.push(message);
        self
    }
}

/// Business failures raised by handlers; all are recorded and surfaced as 500.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("no account matches {0}")]
    UserNotFound(String),
    #[error("invalid {field}: {reason}")]
    InvalidPayload { field: &'static str, reason: String },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

impl HandlerError {
    pub(crate) fn missing(field: &'static str) -> Self {
        HandlerError::InvalidPayload {
            field,
            reason: "missing".to_string(),
        }
    }
}

/// Credit amount carried by a payload: absent means none, negative is rejected.
pub(crate) fn credit_amount(
    amount: Option<i64>,
    field: &'static str,
) -> Result<i64, HandlerError> {
    match amount {
        Some(credits) if credits < 0 => Err(HandlerError::InvalidPayload {
            field,
            reason: format!("negative credit amount {credits}"),
        }),
        Some(credits) => Ok(credits),
        None => Ok(0),
    }
}

/// Resolve the account with the first lookup that matches.
pub(crate) async fn resolve_user(
    ctx: &HandlerContext,
    lookups: &[UserLookup],
) -> Result<user::Model, HandlerError> {
    if lookups.is_empty() {
        return Err(HandlerError::InvalidPayload {
            field: "account",
            reason: "payload carries no email, customer or subscription id".to_string(),
        });
    }

    ctx.users
        .resolve(lookups)
        .await?
        .ok_or_else(|| HandlerError::UserNotFound(describe_lookups(lookups)))
}

fn describe_lookups(lookups: &[UserLookup]) -> String {
    lookups
        .iter()
        .map(|lookup| match lookup {
            UserLookup::Email(email) => format!("email {email}"),
            UserLookup::Customer(gateway, id) => format!("{gateway:?} customer {id}"),
            UserLookup::Subscription(gateway, id) => format!("{gateway:?} subscription {id}"),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn credit_amount_rejects_negative_values() {
        assert_eq!(credit_amount(None, "data.credits").unwrap(), 0);
        assert_eq!(credit_amount(Some(25), "data.credits").unwrap(), 25);
        assert!(matches!(
            credit_amount(Some(-1), "metadata.credits"),
            Err(HandlerError::InvalidPayload { field: "metadata.credits", .. })
        ));
    }

    #[test]
    fn normalizes_stripe_envelope() {
        let body = json!({
            "id": "evt_1",
            "type": "invoice.paid",
            "data": { "object": { "customer": "cus_1" } }
        });
        let envelope = WebhookEnvelope::parse(Provider::Stripe, body.to_string().as_bytes()).unwrap();

        assert_eq!(envelope.event_id, "evt_1");
        assert_eq!(envelope.event_type, "invoice.paid");
        assert_eq!(envelope.data_str("/customer"), Some("cus_1"));
    }

    #[test]
    fn normalizes_square_and_backend_envelopes() {
        let square = WebhookEnvelope::from_value(
            Provider::Square,
            json!({
                "event_id": "sq-1",
                "type": "payment.updated",
                "data": { "object": { "payment": { "status": "COMPLETED" } } }
            }),
        )
        .unwrap();
        assert_eq!(square.data_str("/payment/status"), Some("COMPLETED"));

        let backend = WebhookEnvelope::from_value(
            Provider::Backend,
            json!({
                "event_id": "evt_123",
                "type": "payment.updated",
                "data": { "status": "completed", "credits": "200" }
            }),
        )
        .unwrap();
        assert_eq!(backend.data_i64("/credits"), Some(200));
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(matches!(
            WebhookEnvelope::parse(Provider::Backend, b"not json"),
            Err(EnvelopeError::InvalidJson(_))
        ));
        assert!(matches!(
            WebhookEnvelope::from_value(Provider::Backend, json!([1, 2])),
            Err(EnvelopeError::NotAnObject)
        ));
        assert!(matches!(
            WebhookEnvelope::from_value(Provider::Stripe, json!({ "type": "invoice.paid" })),
            Err(EnvelopeError::MissingField("id"))
        ));
        assert!(matches!(
            WebhookEnvelope::from_value(Provider::Square, json!({ "event_id": " ", "type": "x" })),
            Err(EnvelopeError::MissingField("event_id"))
        ));
    }

    #[test]
    fn provider_round_trips() {
        for provider in Provider::ALL {
            assert_eq!(provider.as_str().parse::<Provider>().unwrap(), provider);
        }
        assert!("paypal".parse::<Provider>().is_err());
    }
}
