//! Event dispatcher
//!
//! Maps `(provider, event type)` to the handler responsible for it. Types
//! without a handler are acknowledged by the webhook layer and never reach
//! the database.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::BillingConfig;
use crate::events::{HandlerError, HandlerOutput, Provider, WebhookEnvelope, backend, square, stripe};
use crate::repositories::UserRepository;

/// Dependencies available to handlers for one dispatch.
pub struct HandlerContext {
    pub users: Arc<UserRepository>,
    pub now: DateTime<Utc>,
}

/// Business logic for one or more event types of a single provider.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn provider(&self) -> Provider;

    /// Event type strings this handler accepts.
    fn event_types(&self) -> &'static [&'static str];

    async fn handle(
        &self,
        event: &WebhookEnvelope,
        ctx: &HandlerContext,
    ) -> Result<HandlerOutput, HandlerError>;
}

/// Registry of handlers keyed by provider and event type
#[derive(Clone, Default)]
pub struct EventDispatcher {
    handlers: HashMap<(Provider, &'static str), Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    /// Create an empty dispatcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher with every built-in Stripe, Square and backend handler registered.
    pub fn with_default_handlers(billing: &BillingConfig) -> Self {
        let mut dispatcher = Self::new();
        stripe::register_handlers(&mut dispatcher);
        square::register_handlers(&mut dispatcher, billing.square_credits_per_dollar);
        backend::register_handlers(&mut dispatcher);
        dispatcher
    }

    /// Register a handler for each of its event types, replacing earlier registrations.
    pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
        let provider = handler.provider();
        for event_type in handler.event_types() {
            self.handlers
                .insert((provider, *event_type), Arc::clone(&handler));
        }
    }

    pub fn supports(&self, provider: Provider, event_type: &str) -> bool {
        self.handlers.contains_key(&(provider, event_type))
    }

    /// Event types registered for a provider, sorted.
    pub fn event_types(&self, provider: Provider) -> Vec<&'static str> {
        let mut types: Vec<_> = self
            .handlers
            .keys()
            .filter(|(p, _)| *p == provider)
            .map(|(_, event_type)| *event_type)
            .collect();
        types.sort_unstable();
        types
    }

    /// Run the handler for the event. Returns `None` when no handler is registered.
    pub async fn dispatch(
        &self,
        event: &WebhookEnvelope,
        ctx: &HandlerContext,
    ) -> Option<Result<HandlerOutput, HandlerError>> {
        let Some(handler) = self
            .handlers
            .get(&(event.provider, event.event_type.as_str()))
        else {
            debug!(
                provider = %event.provider,
                event_type = %event.event_type,
                "No handler registered for event type"
            );
            return None;
        };

        Some(handler.handle(event, ctx).await)
    }
}
