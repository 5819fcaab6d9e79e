use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle of an order. Stored as its snake_case name.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    /// Whether the order lifecycle may move from `self` to `to`.
    pub fn can_transition_to(self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Shipped)
                | (Shipped, Delivered)
                | (Pending | Processing | Shipped | Delivered, Refunded)
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "orders")]
#[schema(as = Order)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub order_number: String,
    /// Owner key (`user:<uuid>` or `session:<token>`)
    pub owner: String,
    pub status: String,
    pub shipping_address: String,
    pub billing_address: String,
    pub payment_method: String,
    pub shipping_method_id: Option<Uuid>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub subtotal: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub tax: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub shipping_cost: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub total_amount: Decimal,
    pub notes: Option<String>,
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_reference: Option<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Parsed status; unknown strings are reported as a database inconsistency.
    pub fn order_status(&self) -> Result<OrderStatus, DbErr> {
        self.status.parse().map_err(|_| {
            DbErr::Custom(format!(
                "order {} has unknown status '{}'",
                self.id, self.status
            ))
        })
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
    #[sea_orm(has_one = "super::payment::Entity")]
    Payment,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
