//! # User Repository
//!
//! Account lookups used by webhook handlers and the ledgered balance mutations
//! they apply. Every credit grant updates the balance with a relative
//! `credit_balance + delta` expression and appends a ledger entry in the same
//! transaction.

use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
    Set, TransactionTrait,
    sea_query::{Alias, Expr, Func, SimpleExpr},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::is_unique_violation;
use crate::models::{
    credit_ledger,
    user::{self, ActiveModel, Entity, Model},
};
use crate::repositories::{RepositoryError, to_db_time};

/// Payment gateway whose identifiers are stored on the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gateway {
    Stripe,
    Square,
}

/// One strategy for resolving the account a webhook refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserLookup {
    Email(String),
    Customer(Gateway, String),
    Subscription(Gateway, String),
}

/// Provenance recorded on the ledger entry for a balance change.
#[derive(Debug, Clone)]
pub struct CreditSource {
    pub reason: String,
    pub provider: String,
    pub event_id: String,
}

/// Absolute subscription fields to apply; `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionUpdate {
    pub status: Option<String>,
    pub plan: Option<String>,
}

/// Whether the stored balance agrees with the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationState {
    InSync,
    Drift,
}

/// Comparison of the balance column against the ledger sum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CreditReconciliation {
    pub balance: i64,
    pub ledger_total: i64,
    /// `balance - ledger_total`
    pub drift: i64,
    pub state: ReconciliationState,
}

/// Repository for account and ledger operations
pub struct UserRepository {
    db: Arc<DatabaseConnection>,
}

impl UserRepository {
    /// Create a new user repository
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Create an account with the free plan and an empty balance.
    pub async fn create(&self, email: &str, now: DateTime<Utc>) -> Result<Model, RepositoryError> {
        let email = normalize_email(email);
        let db_now = to_db_time(now);
        let model = Model {
            id: Uuid::new_v4(),
            email: email.clone(),
            plan: "free".to_string(),
            credit_balance: 0,
            subscription_status: "inactive".to_string(),
            stripe_customer_id: None,
            stripe_subscription_id: None,
            square_customer_id: None,
            square_subscription_id: None,
            last_payment_error: None,
            payment_failed_at: None,
            created_at: db_now,
            updated_at: db_now,
        };

        let active = ActiveModel {
            id: Set(model.id),
            email: Set(model.email.clone()),
            plan: Set(model.plan.clone()),
            credit_balance: Set(0),
            subscription_status: Set(model.subscription_status.clone()),
            stripe_customer_id: Set(None),
            stripe_subscription_id: Set(None),
            square_customer_id: Set(None),
            square_subscription_id: Set(None),
            last_payment_error: Set(None),
            payment_failed_at: Set(None),
            created_at: Set(db_now),
            updated_at: Set(db_now),
        };

        match Entity::insert(active).exec_without_returning(&*self.db).await {
            Ok(_) => Ok(model),
            Err(err) if is_unique_violation(&err) => Err(RepositoryError::DuplicateEmail(email)),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(id).one(&*self.db).await
    }

    /// Find an account by email (case-insensitive).
    pub async fn find_by_email(&self, email: &str) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(user::Column::Email.eq(normalize_email(email)))
            .one(&*self.db)
            .await
    }

    /// Find an account with a single lookup strategy.
    pub async fn find(&self, lookup: &UserLookup) -> Result<Option<Model>, DbErr> {
        let (column, value) = match lookup {
            UserLookup::Email(email) => return self.find_by_email(email).await,
            UserLookup::Customer(Gateway::Stripe, id) => (user::Column::StripeCustomerId, id),
            UserLookup::Customer(Gateway::Square, id) => (user::Column::SquareCustomerId, id),
            UserLookup::Subscription(Gateway::Stripe, id) => {
                (user::Column::StripeSubscriptionId, id)
            }
            UserLookup::Subscription(Gateway::Square, id) => {
                (user::Column::SquareSubscriptionId, id)
            }
        };

        Entity::find()
            .filter(column.eq(value.as_str()))
            .one(&*self.db)
            .await
    }

    /// Try each lookup in order and return the first account found.
    pub async fn resolve(&self, lookups: &[UserLookup]) -> Result<Option<Model>, DbErr> {
        for lookup in lookups {
            if let Some(found) = self.find(lookup).await? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Store gateway customer/subscription identifiers on the account.
    pub async fn link_gateway_ids(
        &self,
        user_id: Uuid,
        gateway: Gateway,
        customer_id: Option<&str>,
        subscription_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        if customer_id.is_none() && subscription_id.is_none() {
            return Ok(());
        }

        let (customer_column, subscription_column) = match gateway {
            Gateway::Stripe => (
                user::Column::StripeCustomerId,
                user::Column::StripeSubscriptionId,
            ),
            Gateway::Square => (
                user::Column::SquareCustomerId,
                user::Column::SquareSubscriptionId,
            ),
        };

        let mut update = Entity::update_many()
            .col_expr(user::Column::UpdatedAt, Expr::value(to_db_time(now)))
            .filter(user::Column::Id.eq(user_id));
        if let Some(customer_id) = customer_id {
            update = update.col_expr(customer_column, Expr::value(customer_id));
        }
        if let Some(subscription_id) = subscription_id {
            update = update.col_expr(subscription_column, Expr::value(subscription_id));
        }

        let result = update.exec(&*self.db).await?;
        if result.rows_affected == 0 {
            return Err(RepositoryError::UserNotFound(user_id));
        }
        Ok(())
    }

    /// Add credits to the account and append the matching ledger entry.
    ///
    /// A source event grants at most once: a second grant for the same
    /// `(provider, event_id)` leaves the balance untouched and returns the
    /// entry recorded the first time.
    pub async fn grant_credits(
        &self,
        user_id: Uuid,
        amount: i64,
        source: &CreditSource,
        now: DateTime<Utc>,
    ) -> Result<credit_ledger::Model, RepositoryError> {
        if amount <= 0 {
            return Err(RepositoryError::InvalidCreditAmount(amount));
        }

        let db_now = to_db_time(now);
        let txn = self.db.begin().await?;

        let updated = Entity::update_many()
            .col_expr(
                user::Column::CreditBalance,
                Expr::col(user::Column::CreditBalance).add(amount),
            )
            .col_expr(user::Column::UpdatedAt, Expr::value(db_now))
            .filter(user::Column::Id.eq(user_id))
            .exec(&txn)
            .await?;

        if updated.rows_affected == 0 {
            return Err(RepositoryError::UserNotFound(user_id));
        }

        let balance_after = Entity::find_by_id(user_id)
            .one(&txn)
            .await?
            .map(|user| user.credit_balance)
            .ok_or(RepositoryError::UserNotFound(user_id))?;

        let entry = credit_ledger::Model {
            id: Uuid::new_v4(),
            user_id,
            delta: amount,
            balance_after,
            reason: source.reason.clone(),
            source_provider: source.provider.clone(),
            source_event_id: source.event_id.clone(),
            created_at: db_now,
        };

        let inserted = credit_ledger::Entity::insert(credit_ledger::ActiveModel {
            id: Set(entry.id),
            user_id: Set(user_id),
            delta: Set(amount),
            balance_after: Set(balance_after),
            reason: Set(entry.reason.clone()),
            source_provider: Set(entry.source_provider.clone()),
            source_event_id: Set(entry.source_event_id.clone()),
            created_at: Set(db_now),
        })
        .exec_without_returning(&txn)
        .await;

        match inserted {
            Ok(_) => txn.commit().await?,
            Err(err) if is_unique_violation(&err) => {
                // The event already granted credits; undo this balance update
                txn.rollback().await?;
                return self.existing_grant(source).await;
            }
            Err(err) => return Err(err.into()),
        }

        info!(
            user_id = %user_id,
            amount,
            balance_after,
            provider = %source.provider,
            event_id = %source.event_id,
            "Granted credits"
        );

        Ok(entry)
    }

    async fn existing_grant(
        &self,
        source: &CreditSource,
    ) -> Result<credit_ledger::Model, RepositoryError> {
        let entry = credit_ledger::Entity::find()
            .filter(credit_ledger::Column::SourceProvider.eq(source.provider.as_str()))
            .filter(credit_ledger::Column::SourceEventId.eq(source.event_id.as_str()))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                DbErr::RecordNotFound(format!(
                    "credit ledger entry {}/{}",
                    source.provider, source.event_id
                ))
            })?;

        info!(
            user_id = %entry.user_id,
            provider = %source.provider,
            event_id = %source.event_id,
            balance_after = entry.balance_after,
            "Credits already granted for event"
        );
        Ok(entry)
    }

    /// Apply absolute subscription status and plan values.
    ///
    /// Moving to `active` clears any recorded payment failure.
    pub async fn set_subscription(
        &self,
        user_id: Uuid,
        update: &SubscriptionUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut query = Entity::update_many()
            .col_expr(user::Column::UpdatedAt, Expr::value(to_db_time(now)))
            .filter(user::Column::Id.eq(user_id));

        if let Some(status) = update.status.as_deref() {
            query = query.col_expr(user::Column::SubscriptionStatus, Expr::value(status));
            if status == "active" {
                query = query
                    .col_expr(
                        user::Column::LastPaymentError,
                        Expr::value(Option::<String>::None),
                    )
                    .col_expr(
                        user::Column::PaymentFailedAt,
                        Expr::value(Option::<sea_orm::prelude::DateTimeWithTimeZone>::None),
                    );
            }
        }
        if let Some(plan) = update.plan.as_deref() {
            query = query.col_expr(user::Column::Plan, Expr::value(plan));
        }

        let result = query.exec(&*self.db).await?;
        if result.rows_affected == 0 {
            return Err(RepositoryError::UserNotFound(user_id));
        }
        Ok(())
    }

    /// Annotate the account with a gateway payment failure.
    pub async fn record_payment_failure(
        &self,
        user_id: Uuid,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let db_now = to_db_time(now);
        let result = Entity::update_many()
            .col_expr(user::Column::LastPaymentError, Expr::value(message))
            .col_expr(user::Column::PaymentFailedAt, Expr::value(db_now))
            .col_expr(user::Column::UpdatedAt, Expr::value(db_now))
            .filter(user::Column::Id.eq(user_id))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(RepositoryError::UserNotFound(user_id));
        }
        Ok(())
    }

    /// Most recent ledger entries for an account, newest first.
    pub async fn ledger_entries(
        &self,
        user_id: Uuid,
        limit: u64,
    ) -> Result<Vec<credit_ledger::Model>, DbErr> {
        credit_ledger::Entity::find()
            .filter(credit_ledger::Column::UserId.eq(user_id))
            .order_by_desc(credit_ledger::Column::CreatedAt)
            .limit(limit)
            .all(&*self.db)
            .await
    }

    /// Compare the stored balance with the sum of ledger deltas.
    pub async fn reconcile(&self, user_id: Uuid) -> Result<CreditReconciliation, RepositoryError> {
        let user = self
            .find_by_id(user_id)
            .await?
            .ok_or(RepositoryError::UserNotFound(user_id))?;

        // SUM(bigint) is numeric on Postgres; cast so both backends decode an i64
        let ledger_total = credit_ledger::Entity::find()
            .select_only()
            .column_as(
                SimpleExpr::from(Func::cast_as(
                    Func::sum(Expr::col(credit_ledger::Column::Delta)),
                    Alias::new("BIGINT"),
                )),
                "total",
            )
            .filter(credit_ledger::Column::UserId.eq(user_id))
            .into_tuple::<Option<i64>>()
            .one(&*self.db)
            .await?
            .flatten()
            .unwrap_or(0);

        let drift = user.credit_balance - ledger_total;
        Ok(CreditReconciliation {
            balance: user.credit_balance,
            ledger_total,
            drift,
            state: if drift == 0 {
                ReconciliationState::InSync
            } else {
                ReconciliationState::Drift
            },
        })
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}
