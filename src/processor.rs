//! # Webhook Processor
//!
//! Idempotent pipeline shared by the webhook endpoint and operator replay:
//! event-log dedup, idempotency claim, dispatch, then completion or failure
//! recorded on both the idempotency record and the event log.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use sea_orm::{DatabaseConnection, DbErr};
use serde_json::{Value as JsonValue, json};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BillingConfig;
use crate::events::{EnvelopeError, EventDispatcher, HandlerContext, Provider, WebhookEnvelope};
use crate::models::webhook_event;
use crate::notifications::NotificationHub;
use crate::repositories::{
    ClaimOutcome, IdempotencyRepository, UserRepository, WebhookEventRepository,
};

/// Idempotency action recorded for webhook deliveries.
pub const WEBHOOK_ACTION: &str = "webhook";

/// Terminal result of a delivery or replay that the provider should not retry.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// The handler ran and its effects are committed.
    Processed { summary: JsonValue },
    /// The event was handled before; `summary` is the stored result when still retained.
    Duplicate { summary: Option<JsonValue> },
    /// No handler exists for the event type; nothing was recorded.
    Unsupported,
}

/// Deliveries that must not be acknowledged.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("event {event_id} is already being processed")]
    InFlight { event_id: String },
    #[error("handler failed for event {event_id}: {message}")]
    Handler { event_id: String, message: String },
    #[error("webhook event {0} not found")]
    EventNotFound(Uuid),
    #[error("stored payload cannot be replayed: {0}")]
    InvalidStoredEvent(#[from] EnvelopeError),
    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

pub struct WebhookProcessor {
    dispatcher: EventDispatcher,
    users: Arc<UserRepository>,
    idempotency: IdempotencyRepository,
    events: WebhookEventRepository,
    hub: Arc<NotificationHub>,
    idempotency_ttl: Duration,
    event_retention: Duration,
}

impl WebhookProcessor {
    pub fn new(
        db: Arc<DatabaseConnection>,
        dispatcher: EventDispatcher,
        hub: Arc<NotificationHub>,
        billing: &BillingConfig,
    ) -> Self {
        Self {
            dispatcher,
            users: Arc::new(UserRepository::new(Arc::clone(&db))),
            idempotency: IdempotencyRepository::new(Arc::clone(&db)),
            events: WebhookEventRepository::new(db),
            hub,
            idempotency_ttl: Duration::hours(billing.idempotency_ttl_hours as i64),
            event_retention: Duration::days(billing.webhook_event_retention_days as i64),
        }
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Process a verified, parsed delivery.
    pub async fn process(
        &self,
        envelope: &WebhookEnvelope,
        now: DateTime<Utc>,
    ) -> Result<ProcessOutcome, ProcessError> {
        let provider = envelope.provider.as_str();

        if !self.dispatcher.supports(envelope.provider, &envelope.event_type) {
            counter!("webhook_events_total", "provider" => provider, "outcome" => "unsupported")
                .increment(1);
            info!(
                provider,
                event_id = %envelope.event_id,
                event_type = %envelope.event_type,
                "Ignoring unsupported webhook event type"
            );
            return Ok(ProcessOutcome::Unsupported);
        }

        let (event, created) = self
            .events
            .record_received(
                provider,
                &envelope.event_id,
                &envelope.event_type,
                envelope.raw.clone(),
                self.event_retention,
                now,
            )
            .await?;

        if event.processed {
            counter!("webhook_events_total", "provider" => provider, "outcome" => "duplicate")
                .increment(1);
            debug!(provider, event_id = %envelope.event_id, "Webhook event already processed");
            return Ok(ProcessOutcome::Duplicate {
                summary: self.stored_result(envelope, now).await?,
            });
        }

        if !created {
            debug!(
                provider,
                event_id = %envelope.event_id,
                attempts = event.attempts,
                "Redelivery of unprocessed webhook event"
            );
        }

        self.run(&event, envelope, now).await
    }

    /// Re-run a logged event through the same idempotent pipeline.
    pub async fn replay(
        &self,
        webhook_event_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ProcessOutcome, ProcessError> {
        let event = self
            .events
            .find_by_id(webhook_event_id, now)
            .await?
            .ok_or(ProcessError::EventNotFound(webhook_event_id))?;

        let provider: Provider = event.provider.parse()?;
        let envelope = WebhookEnvelope::from_value(provider, event.payload.clone())?;

        if event.processed {
            return Ok(ProcessOutcome::Duplicate {
                summary: self.stored_result(&envelope, now).await?,
            });
        }

        info!(
            webhook_event_id = %event.id,
            provider = %provider,
            event_id = %envelope.event_id,
            "Replaying webhook event"
        );
        self.run(&event, &envelope, now).await
    }

    async fn run(
        &self,
        event: &webhook_event::Model,
        envelope: &WebhookEnvelope,
        now: DateTime<Utc>,
    ) -> Result<ProcessOutcome, ProcessError> {
        let provider = envelope.provider.as_str();
        let key = IdempotencyRepository::compose_key(provider, WEBHOOK_ACTION, &envelope.event_id);

        let claim = self
            .idempotency
            .start_processing(
                &key,
                provider,
                WEBHOOK_ACTION,
                self.idempotency_ttl,
                Some(json!({
                    "event_type": envelope.event_type,
                    "webhook_event_id": event.id,
                })),
                now,
            )
            .await?;

        match claim {
            ClaimOutcome::Claimed(_) => {}
            ClaimOutcome::InFlight => {
                counter!("webhook_events_total", "provider" => provider, "outcome" => "in_flight")
                    .increment(1);
                return Err(ProcessError::InFlight {
                    event_id: envelope.event_id.clone(),
                });
            }
            ClaimOutcome::Completed(record) => {
                // Completed under the key but the log row missed the update
                self.events.mark_processed(event.id, now).await?;
                counter!("webhook_events_total", "provider" => provider, "outcome" => "duplicate")
                    .increment(1);
                return Ok(ProcessOutcome::Duplicate {
                    summary: record.result,
                });
            }
        }

        self.events.begin_attempt(event.id, now).await?;

        let ctx = HandlerContext {
            users: Arc::clone(&self.users),
            now,
        };

        match self.dispatcher.dispatch(envelope, &ctx).await {
            None => {
                let summary = json!({ "action": "ignored" });
                self.finish_success(&key, event, summary.clone(), now).await?;
                Ok(ProcessOutcome::Processed { summary })
            }
            Some(Ok(output)) => {
                self.finish_success(&key, event, output.summary.clone(), now)
                    .await?;

                for message in &output.notifications {
                    let report = self.hub.broadcast(message);
                    debug!(
                        message_type = message.kind(),
                        delivered = report.delivered,
                        "Broadcast task notification"
                    );
                }

                counter!("webhook_events_total", "provider" => provider, "outcome" => "processed")
                    .increment(1);
                info!(
                    provider,
                    event_id = %envelope.event_id,
                    event_type = %envelope.event_type,
                    "Webhook event processed"
                );
                Ok(ProcessOutcome::Processed {
                    summary: output.summary,
                })
            }
            Some(Err(err)) => {
                let message = err.to_string();
                self.idempotency
                    .fail(&key, provider, WEBHOOK_ACTION, &message, now)
                    .await?;
                self.events.mark_failed(event.id, &message, now).await?;

                counter!("webhook_events_total", "provider" => provider, "outcome" => "failed")
                    .increment(1);
                warn!(
                    provider,
                    event_id = %envelope.event_id,
                    event_type = %envelope.event_type,
                    error = %message,
                    "Webhook handler failed"
                );
                Err(ProcessError::Handler {
                    event_id: envelope.event_id.clone(),
                    message,
                })
            }
        }
    }

    async fn finish_success(
        &self,
        key: &str,
        event: &webhook_event::Model,
        summary: JsonValue,
        now: DateTime<Utc>,
    ) -> Result<(), DbErr> {
        self.idempotency
            .complete(key, &event.provider, WEBHOOK_ACTION, summary, now)
            .await?;
        self.events.mark_processed(event.id, now).await
    }

    async fn stored_result(
        &self,
        envelope: &WebhookEnvelope,
        now: DateTime<Utc>,
    ) -> Result<Option<JsonValue>, DbErr> {
        let provider = envelope.provider.as_str();
        let key = IdempotencyRepository::compose_key(provider, WEBHOOK_ACTION, &envelope.event_id);
        Ok(self
            .idempotency
            .check(&key, provider, WEBHOOK_ACTION, now)
            .await?
            .and_then(|record| record.result))
    }
}
