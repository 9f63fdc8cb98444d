//! CreditLedger entity model
//!
//! Append-only entries, one per balance mutation, written in the same
//! transaction as the balance update.

use super::user::Entity as User;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "credit_ledger")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: Uuid,

    /// Signed credit change
    pub delta: i64,

    /// Balance immediately after this entry was applied
    pub balance_after: i64,

    /// Short machine-readable reason (e.g., checkout.session.completed)
    pub reason: String,

    /// Provider that originated the change (stripe, square, backend, operator)
    pub source_provider: String,

    /// Provider event identifier that caused the change
    pub source_event_id: String,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "User",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    User,
}

impl Related<User> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
