//! Stripe event handlers
//!
//! Checkout completion, invoice settlement and failure, and subscription
//! lifecycle changes. Payload fields follow Stripe's `data.object` shapes.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::events::{
    EventDispatcher, EventHandler, HandlerContext, HandlerError, HandlerOutput, Provider,
    WebhookEnvelope, credit_amount, resolve_user,
};
use crate::repositories::{Gateway, UserLookup, user::SubscriptionUpdate};

pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";
pub const INVOICE_PAID: &str = "invoice.paid";
pub const INVOICE_PAYMENT_SUCCEEDED: &str = "invoice.payment_succeeded";
pub const INVOICE_PAYMENT_FAILED: &str = "invoice.payment_failed";
pub const SUBSCRIPTION_UPDATED: &str = "customer.subscription.updated";
pub const SUBSCRIPTION_DELETED: &str = "customer.subscription.deleted";

pub fn register_handlers(dispatcher: &mut EventDispatcher) {
    dispatcher.register(Arc::new(CheckoutCompletedHandler));
    dispatcher.register(Arc::new(InvoicePaidHandler));
    dispatcher.register(Arc::new(InvoicePaymentFailedHandler));
    dispatcher.register(Arc::new(SubscriptionChangedHandler));
}

fn customer_lookups(event: &WebhookEnvelope, email_pointer: &str) -> Vec<UserLookup> {
    let mut lookups = Vec::new();
    if let Some(customer) = event.data_str("/customer") {
        lookups.push(UserLookup::Customer(Gateway::Stripe, customer.to_string()));
    }
    if let Some(subscription) = event.data_str("/subscription") {
        lookups.push(UserLookup::Subscription(
            Gateway::Stripe,
            subscription.to_string(),
        ));
    }
    if let Some(email) = event.data_str(email_pointer) {
        lookups.push(UserLookup::Email(email.to_string()));
    }
    lookups
}

/// `checkout.session.completed`: link the customer, apply the purchased plan and credits.
pub struct CheckoutCompletedHandler;

#[async_trait]
impl EventHandler for CheckoutCompletedHandler {
    fn provider(&self) -> Provider {
        Provider::Stripe
    }

    fn event_types(&self) -> &'static [&'static str] {
        &[CHECKOUT_SESSION_COMPLETED]
    }

    async fn handle(
        &self,
        event: &WebhookEnvelope,
        ctx: &HandlerContext,
    ) -> Result<HandlerOutput, HandlerError> {
        let mut lookups = Vec::new();
        if let Some(email) = event
            .data_str("/customer_details/email")
            .or_else(|| event.data_str("/customer_email"))
        {
            lookups.push(UserLookup::Email(email.to_string()));
        }
        if let Some(customer) = event.data_str("/customer") {
            lookups.push(UserLookup::Customer(Gateway::Stripe, customer.to_string()));
        }

        let credits = credit_amount(event.data_i64("/metadata/credits"), "metadata.credits")?;
        let user = resolve_user(ctx, &lookups).await?;
        let customer_id = event.data_str("/customer");
        let subscription_id = event.data_str("/subscription");

        ctx.users
            .link_gateway_ids(user.id, Gateway::Stripe, customer_id, subscription_id, ctx.now)
            .await?;

        let plan = event.data_str("/metadata/plan").map(str::to_string);
        let status = subscription_id.map(|_| "active".to_string());
        if plan.is_some() || status.is_some() {
            ctx.users
                .set_subscription(
                    user.id,
                    &SubscriptionUpdate {
                        status: status.clone(),
                        plan: plan.clone(),
                    },
                    ctx.now,
                )
                .await?;
        }

        let balance_after = if credits > 0 {
            let entry = ctx
                .users
                .grant_credits(user.id, credits, &event.credit_source(), ctx.now)
                .await?;
            entry.balance_after
        } else {
            user.credit_balance
        };

        info!(
            user_id = %user.id,
            event_id = %event.event_id,
            credits,
            "Applied Stripe checkout"
        );

        Ok(HandlerOutput::new(json!({
            "action": "checkout_completed",
            "user_id": user.id,
            "plan": plan,
            "subscription_status": status,
            "credits_granted": credits,
            "balance_after": balance_after,
        })))
    }
}

/// `invoice.paid` / `invoice.payment_succeeded`: mark active, grant renewal credits.
pub struct InvoicePaidHandler;

#[async_trait]
impl EventHandler for InvoicePaidHandler {
    fn provider(&self) -> Provider {
        Provider::Stripe
    }

    fn event_types(&self) -> &'static [&'static str] {
        &[INVOICE_PAID, INVOICE_PAYMENT_SUCCEEDED]
    }

    async fn handle(
        &self,
        event: &WebhookEnvelope,
        ctx: &HandlerContext,
    ) -> Result<HandlerOutput, HandlerError> {
        let credits = credit_amount(
            event
                .data_i64("/metadata/credits")
                .or_else(|| event.data_i64("/subscription_details/metadata/credits")),
            "metadata.credits",
        )?;
        let user = resolve_user(ctx, &customer_lookups(event, "/customer_email")).await?;

        ctx.users
            .set_subscription(
                user.id,
                &SubscriptionUpdate {
                    status: Some("active".to_string()),
                    plan: event
                        .data_str("/subscription_details/metadata/plan")
                        .map(str::to_string),
                },
                ctx.now,
            )
            .await?;

        let balance_after = if credits > 0 {
            ctx.users
                .grant_credits(user.id, credits, &event.credit_source(), ctx.now)
                .await?
                .balance_after
        } else {
            user.credit_balance
        };

        Ok(HandlerOutput::new(json!({
            "action": "invoice_paid",
            "user_id": user.id,
            "subscription_status": "active",
            "credits_granted": credits,
            "balance_after": balance_after,
        })))
    }
}

/// `invoice.payment_failed`: annotate the failure and mark the subscription past due.
pub struct InvoicePaymentFailedHandler;

#[async_trait]
impl EventHandler for InvoicePaymentFailedHandler {
    fn provider(&self) -> Provider {
        Provider::Stripe
    }

    fn event_types(&self) -> &'static [&'static str] {
        &[INVOICE_PAYMENT_FAILED]
    }

    async fn handle(
        &self,
        event: &WebhookEnvelope,
        ctx: &HandlerContext,
    ) -> Result<HandlerOutput, HandlerError> {
        let user = resolve_user(ctx, &customer_lookups(event, "/customer_email")).await?;
        let message = event
            .data_str("/last_finalization_error/message")
            .unwrap_or("Invoice payment failed");

        ctx.users
            .record_payment_failure(user.id, message, ctx.now)
            .await?;
        ctx.users
            .set_subscription(
                user.id,
                &SubscriptionUpdate {
                    status: Some("past_due".to_string()),
                    plan: None,
                },
                ctx.now,
            )
            .await?;

        Ok(HandlerOutput::new(json!({
            "action": "payment_failed",
            "user_id": user.id,
            "subscription_status": "past_due",
            "error": message,
        })))
    }
}

/// `customer.subscription.updated` / `.deleted`: mirror status and plan.
pub struct SubscriptionChangedHandler;

#[async_trait]
impl EventHandler for SubscriptionChangedHandler {
    fn provider(&self) -> Provider {
        Provider::Stripe
    }

    fn event_types(&self) -> &'static [&'static str] {
        &[SUBSCRIPTION_UPDATED, SUBSCRIPTION_DELETED]
    }

    async fn handle(
        &self,
        event: &WebhookEnvelope,
        ctx: &HandlerContext,
    ) -> Result<HandlerOutput, HandlerError> {
        let subscription_id = event
            .data_str("/id")
            .ok_or_else(|| HandlerError::missing("data.object.id"))?;

        let mut lookups = vec![UserLookup::Subscription(
            Gateway::Stripe,
            subscription_id.to_string(),
        )];
        if let Some(customer) = event.data_str("/customer") {
            lookups.push(UserLookup::Customer(Gateway::Stripe, customer.to_string()));
        }
        let user = resolve_user(ctx, &lookups).await?;

        let update = if event.event_type == SUBSCRIPTION_DELETED {
            SubscriptionUpdate {
                status: Some("canceled".to_string()),
                plan: Some("free".to_string()),
            }
        } else {
            ctx.users
                .link_gateway_ids(
                    user.id,
                    Gateway::Stripe,
                    event.data_str("/customer"),
                    Some(subscription_id),
                    ctx.now,
                )
                .await?;
            SubscriptionUpdate {
                status: event.data_str("/status").map(str::to_ascii_lowercase),
                plan: event.data_str("/metadata/plan").map(str::to_string),
            }
        };

        ctx.users.set_subscription(user.id, &update, ctx.now).await?;

        Ok(HandlerOutput::new(json!({
            "action": "subscription_changed",
            "user_id": user.id,
            "subscription_status": update.status,
            "plan": update.plan,
        })))
    }
}
