//! User entity model
//!
//! The single authoritative account row: plan, credit balance, subscription
//! state and the payment gateway identifiers webhooks are resolved against.

use super::credit_ledger::Entity as CreditLedger;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Unique, stored lowercased
    #[sea_orm(unique)]
    pub email: String,

    /// Plan name (e.g., free, pro, enterprise)
    pub plan: String,

    /// Current credit balance; mirrors the sum of ledger deltas
    pub credit_balance: i64,

    /// Gateway subscription status (e.g., inactive, active, past_due, canceled)
    pub subscription_status: String,

    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub square_customer_id: Option<String>,
    pub square_subscription_id: Option<String>,

    /// Last payment failure message reported by a gateway
    pub last_payment_error: Option<String>,
    pub payment_failed_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "CreditLedger")]
    CreditLedger,
}

impl Related<CreditLedger> for Entity {
    fn to() -> RelationDef {
        Relation::CreditLedger.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
