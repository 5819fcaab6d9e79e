use crate::{
    auth::Owner,
    entities::{order, order_item, payment, Order, OrderItem, OrderItemModel, OrderModel, Payment,
        PaymentModel},
    errors::ServiceError,
};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// An order with its lines and payment
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderDetails {
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
    pub payment: Option<PaymentModel>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderListResponse {
    pub orders: Vec<OrderModel>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Loads an order, hiding orders of other owners behind `NotFound`.
pub async fn find_owned_order<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    owner: Option<&Owner>,
) -> Result<OrderModel, ServiceError> {
    let order = Order::find_by_id(order_id)
        .one(conn)
        .await?
        .filter(|order| owner.map_or(true, |o| order.owner == o.key()))
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
    Ok(order)
}

/// Read-only order queries. All writes go through checkout, reconciliation
/// and the status service.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Retrieves an order with its items and payment
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(
        &self,
        owner: &Owner,
        order_id: Uuid,
    ) -> Result<OrderDetails, ServiceError> {
        let db = &*self.db;
        let order = find_owned_order(db, order_id, Some(owner)).await?;

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(db)
            .await?;

        let payment = Payment::find()
            .filter(payment::Column::OrderId.eq(order.id))
            .one(db)
            .await?;

        Ok(OrderDetails {
            order,
            items,
            payment,
        })
    }

    /// Lists the owner's orders, newest first
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn list_orders(
        &self,
        owner: &Owner,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);

        let paginator = Order::find()
            .filter(order::Column::Owner.eq(owner.key()))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page - 1).await?;

        info!(total, page, per_page, returned_count = orders.len(), "Orders listed");

        Ok(OrderListResponse {
            orders,
            total,
            page,
            per_page,
        })
    }
}
