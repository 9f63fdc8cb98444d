//! Square event handlers
//!
//! Payments convert settled amounts into credits; subscription events mirror
//! the subscription status onto the account.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use crate::events::{
    EventDispatcher, EventHandler, HandlerContext, HandlerError, HandlerOutput, Provider,
    WebhookEnvelope, resolve_user,
};
use crate::repositories::{Gateway, UserLookup, user::SubscriptionUpdate};

pub const PAYMENT_CREATED: &str = "payment.created";
pub const PAYMENT_UPDATED: &str = "payment.updated";
pub const SUBSCRIPTION_CREATED: &str = "subscription.created";
pub const SUBSCRIPTION_UPDATED: &str = "subscription.updated";

pub fn register_handlers(dispatcher: &mut EventDispatcher, credits_per_dollar: i64) {
    dispatcher.register(Arc::new(PaymentHandler { credits_per_dollar }));
    dispatcher.register(Arc::new(SubscriptionHandler));
}

/// Credits owed for a settled amount in the smallest currency unit.
pub fn credits_for_amount(amount_cents: i64, credits_per_dollar: i64) -> i64 {
    amount_cents.saturating_mul(credits_per_dollar) / 100
}

/// `payment.created` / `payment.updated`
pub struct PaymentHandler {
    credits_per_dollar: i64,
}

#[async_trait]
impl EventHandler for PaymentHandler {
    fn provider(&self) -> Provider {
        Provider::Square
    }

    fn event_types(&self) -> &'static [&'static str] {
        &[PAYMENT_CREATED, PAYMENT_UPDATED]
    }

    async fn handle(
        &self,
        event: &WebhookEnvelope,
        ctx: &HandlerContext,
    ) -> Result<HandlerOutput, HandlerError> {
        let status = event
            .data_str("/payment/status")
            .ok_or_else(|| HandlerError::missing("payment.status"))?
            .to_ascii_uppercase();

        if !matches!(status.as_str(), "COMPLETED" | "FAILED" | "CANCELED") {
            debug!(event_id = %event.event_id, %status, "Square payment not settled; nothing to apply");
            return Ok(HandlerOutput::new(json!({
                "action": "ignored",
                "payment_status": status,
            })));
        }

        let mut lookups = Vec::new();
        if let Some(customer) = event.data_str("/payment/customer_id") {
            lookups.push(UserLookup::Customer(Gateway::Square, customer.to_string()));
        }
        if let Some(email) = event.data_str("/payment/buyer_email_address") {
            lookups.push(UserLookup::Email(email.to_string()));
        }
        let user = resolve_user(ctx, &lookups).await?;

        if status != "COMPLETED" {
            let message = format!("Square payment {}", status.to_ascii_lowercase());
            ctx.users
                .record_payment_failure(user.id, &message, ctx.now)
                .await?;
            return Ok(HandlerOutput::new(json!({
                "action": "payment_failed",
                "user_id": user.id,
                "error": message,
            })));
        }

        let amount_cents = event
            .data_i64("/payment/amount_money/amount")
            .ok_or_else(|| HandlerError::missing("payment.amount_money.amount"))?;
        if amount_cents < 0 {
            return Err(HandlerError::InvalidPayload {
                field: "payment.amount_money.amount",
                reason: format!("negative amount {amount_cents}"),
            });
        }

        ctx.users
            .link_gateway_ids(
                user.id,
                Gateway::Square,
                event.data_str("/payment/customer_id"),
                None,
                ctx.now,
            )
            .await?;

        let credits = credits_for_amount(amount_cents, self.credits_per_dollar);
        let balance_after = if credits > 0 {
            ctx.users
                .grant_credits(user.id, credits, &event.credit_source(), ctx.now)
                .await?
                .balance_after
        } else {
            user.credit_balance
        };

        info!(
            user_id = %user.id,
            event_id = %event.event_id,
            amount_cents,
            credits,
            "Applied Square payment"
        );

        Ok(HandlerOutput::new(json!({
            "action": "credits_granted",
            "user_id": user.id,
            "amount_cents": amount_cents,
            "credits_granted": credits,
            "balance_after": balance_after,
        })))
    }
}

/// `subscription.created` / `subscription.updated`
pub struct SubscriptionHandler;

#[async_trait]
impl EventHandler for SubscriptionHandler {
    fn provider(&self) -> Provider {
        Provider::Square
    }

    fn event_types(&self) -> &'static [&'static str] {
        &[SUBSCRIPTION_CREATED, SUBSCRIPTION_UPDATED]
    }

    async fn handle(
        &self,
        event: &WebhookEnvelope,
        ctx: &HandlerContext,
    ) -> Result<HandlerOutput, HandlerError> {
        let subscription_id = event
            .data_str("/subscription/id")
            .ok_or_else(|| HandlerError::missing("subscription.id"))?;
        let customer_id = event.data_str("/subscription/customer_id");

        let mut lookups = vec![UserLookup::Subscription(
            Gateway::Square,
            subscription_id.to_string(),
        )];
        if let Some(customer) = customer_id {
            lookups.push(UserLookup::Customer(Gateway::Square, customer.to_string()));
        }
        let user = resolve_user(ctx, &lookups).await?;

        ctx.users
            .link_gateway_ids(
                user.id,
                Gateway::Square,
                customer_id,
                Some(subscription_id),
                ctx.now,
            )
            .await?;

        let status = event
            .data_str("/subscription/status")
            .map(str::to_ascii_lowercase);
        let plan = match status.as_deref() {
            Some("canceled") => Some("free".to_string()),
            _ => event
                .data_str("/subscription/plan")
                .map(str::to_string),
        };
        let update = SubscriptionUpdate { status, plan };
        ctx.users.set_subscription(user.id, &update, ctx.now).await?;

        Ok(HandlerOutput::new(json!({
            "action": "subscription_changed",
            "user_id": user.id,
            "subscription_status": update.status,
            "plan": update.plan,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_cents_to_credits() {
        assert_eq!(credits_for_amount(2_000, 100), 2_000);
        assert_eq!(credits_for_amount(1_999, 10), 199);
        assert_eq!(credits_for_amount(0, 100), 0);
    }
}
