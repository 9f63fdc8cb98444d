//! Image-generation backend event handlers
//!
//! The backend reports credit purchases it settled on our behalf and the
//! progress of generation tasks. Task events never touch the account; they
//! only produce notifications for connected SSE clients.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::events::{
    EventDispatcher, EventHandler, HandlerContext, HandlerError, HandlerOutput, Provider,
    WebhookEnvelope, credit_amount, resolve_user,
};
use crate::notifications::{SseMessage, TaskNotification};
use crate::repositories::{UserLookup, user::SubscriptionUpdate};

pub const PAYMENT_UPDATED: &str = "payment.updated";
pub const TASK_COMPLETED: &str = "task.completed";
pub const TASK_FAILED: &str = "task.failed";
pub const TASK_PROGRESS: &str = "task.progress";

pub fn register_handlers(dispatcher: &mut EventDispatcher) {
    dispatcher.register(Arc::new(PaymentUpdatedHandler));
    dispatcher.register(Arc::new(TaskEventHandler));
}

/// `payment.updated`: `completed` grants credits, `failed` annotates the account.
pub struct PaymentUpdatedHandler;

#[async_trait]
impl EventHandler for PaymentUpdatedHandler {
    fn provider(&self) -> Provider {
        Provider::Backend
    }

    fn event_types(&self) -> &'static [&'static str] {
        &[PAYMENT_UPDATED]
    }

    async fn handle(
        &self,
        event: &WebhookEnvelope,
        ctx: &HandlerContext,
    ) -> Result<HandlerOutput, HandlerError> {
        let status = event
            .data_str("/status")
            .ok_or_else(|| HandlerError::missing("data.status"))?
            .to_ascii_lowercase();

        if !matches!(status.as_str(), "completed" | "failed") {
            return Ok(HandlerOutput::new(json!({
                "action": "ignored",
                "payment_status": status,
            })));
        }

        let email = event
            .data_str("/email")
            .ok_or_else(|| HandlerError::missing("data.email"))?;
        let user = resolve_user(ctx, &[UserLookup::Email(email.to_string())]).await?;

        if status == "failed" {
            let message = event.data_str("/error").unwrap_or("Payment failed");
            ctx.users
                .record_payment_failure(user.id, message, ctx.now)
                .await?;
            return Ok(HandlerOutput::new(json!({
                "action": "payment_failed",
                "user_id": user.id,
                "error": message,
            })));
        }

        let plan = event.data_str("/plan").map(str::to_string);
        if plan.is_some() {
            ctx.users
                .set_subscription(
                    user.id,
                    &SubscriptionUpdate {
                        status: None,
                        plan: plan.clone(),
                    },
                    ctx.now,
                )
                .await?;
        }

        let credits = credit_amount(event.data_i64("/credits"), "data.credits")?;
        let balance_after = if credits > 0 {
            ctx.users
                .grant_credits(user.id, credits, &event.credit_source(), ctx.now)
                .await?
                .balance_after
        } else {
            user.credit_balance
        };

        Ok(HandlerOutput::new(json!({
            "action": "credits_granted",
            "user_id": user.id,
            "plan": plan,
            "credits_granted": credits,
            "balance_after": balance_after,
        })))
    }
}

/// `task.completed` / `task.failed` / `task.progress`
pub struct TaskEventHandler;

#[async_trait]
impl EventHandler for TaskEventHandler {
    fn provider(&self) -> Provider {
        Provider::Backend
    }

    fn event_types(&self) -> &'static [&'static str] {
        &[TASK_COMPLETED, TASK_FAILED, TASK_PROGRESS]
    }

    async fn handle(
        &self,
        event: &WebhookEnvelope,
        ctx: &HandlerContext,
    ) -> Result<HandlerOutput, HandlerError> {
        let task_id = event
            .data_str("/task_id")
            .ok_or_else(|| HandlerError::missing("data.task_id"))?;

        let notification = TaskNotification {
            task_id: task_id.to_string(),
            progress: event.data_i64("/progress").map(|p| p.clamp(0, 100)),
            error: event.data_str("/error").map(str::to_string),
            result: event.data.get("result").cloned(),
            timestamp: ctx.now,
        };

        let message = match event.event_type.as_str() {
            TASK_COMPLETED => SseMessage::TaskCompleted(notification),
            TASK_FAILED => SseMessage::TaskFailed(notification),
            _ => SseMessage::TaskProgress(notification),
        };

        Ok(HandlerOutput::new(json!({
            "action": "task_notification",
            "task_id": task_id,
            "message_type": message.kind(),
        }))
        .with_notification(message))
    }
}
