use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    TransactionTrait,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    auth::Owner,
    entities::{order, payment, Order, OrderModel, OrderStatus, Payment, PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    services::orders::find_owned_order,
};

/// Column changes applied in the same statement as a status transition.
#[derive(Debug, Clone, Default)]
pub struct OrderPatch {
    /// Marks the order paid at this instant with this reference
    pub paid: Option<(DateTime<Utc>, String)>,
}

/// Moves an order from `expected_from` to `to` inside the caller's transaction.
///
/// The update only matches while the row still has `expected_from`, so two
/// concurrent transitions cannot both win. A lost race or an illegal edge
/// yields `InvalidTransition` carrying the status actually stored.
pub async fn transition_in<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    expected_from: OrderStatus,
    to: OrderStatus,
    patch: OrderPatch,
) -> Result<OrderModel, ServiceError> {
    if !expected_from.can_transition_to(to) {
        return Err(ServiceError::invalid_transition(expected_from.to_string(), to.to_string()));
    }

    let now = Utc::now();
    let mut update = Order::update_many()
        .col_expr(order::Column::Status, Expr::value(to.to_string()))
        .col_expr(
            order::Column::Version,
            Expr::col(order::Column::Version).add(1),
        )
        .col_expr(order::Column::UpdatedAt, Expr::value(now));

    if let Some((paid_at, reference)) = patch.paid {
        update = update
            .col_expr(order::Column::IsPaid, Expr::value(true))
            .col_expr(order::Column::PaidAt, Expr::value(paid_at))
            .col_expr(order::Column::PaymentReference, Expr::value(reference));
    }

    let result = update
        .filter(order::Column::Id.eq(order_id))
        .filter(order::Column::Status.eq(expected_from.to_string()))
        .exec(conn)
        .await?;

    let current = Order::find_by_id(order_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

    if result.rows_affected == 0 {
        return Err(ServiceError::invalid_transition(current.status, to.to_string()));
    }

    Ok(current)
}

/// Order lifecycle transitions outside of payment reconciliation.
#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderStatusService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Cancels one of the owner's orders. Only pending orders can be cancelled;
    /// the payment row is left pending.
    #[instrument(skip(self), fields(owner = %owner, order_id = %order_id))]
    pub async fn cancel(&self, owner: &Owner, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        let order = self
            .apply(Some(owner), order_id, OrderStatus::Cancelled)
            .await?;
        self.event_sender
            .send_or_log(Event::OrderCancelled(order_id))
            .await;
        Ok(order)
    }

    #[instrument(skip(self))]
    pub async fn mark_shipped(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        self.apply(None, order_id, OrderStatus::Shipped).await
    }

    #[instrument(skip(self))]
    pub async fn mark_delivered(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        self.apply(None, order_id, OrderStatus::Delivered).await
    }

    /// Refunds an order. A completed payment is marked refunded in the same transaction.
    #[instrument(skip(self))]
    pub async fn refund(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        self.apply(None, order_id, OrderStatus::Refunded).await
    }

    /// Gets the current status of an order
    #[instrument(skip(self))]
    pub async fn get_status(&self, order_id: Uuid) -> Result<OrderStatus, ServiceError> {
        let order = find_owned_order(&*self.db, order_id, None).await?;
        Ok(order.order_status()?)
    }

    async fn apply(
        &self,
        owner: Option<&Owner>,
        order_id: Uuid,
        to: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        let txn = self.db.begin().await?;

        let order = find_owned_order(&txn, order_id, owner).await?;
        let from = order.order_status()?;
        let updated = transition_in(&txn, order_id, from, to, OrderPatch::default()).await?;

        let refunded_payment = if to == OrderStatus::Refunded {
            let result = Payment::update_many()
                .col_expr(
                    payment::Column::Status,
                    Expr::value(PaymentStatus::Refunded.to_string()),
                )
                .col_expr(payment::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(payment::Column::OrderId.eq(order_id))
                .filter(payment::Column::Status.eq(PaymentStatus::Completed.to_string()))
                .exec(&txn)
                .await?;
            if result.rows_affected > 0 {
                Payment::find()
                    .filter(payment::Column::OrderId.eq(order_id))
                    .one(&txn)
                    .await?
            } else {
                None
            }
        } else {
            None
        };

        txn.commit().await?;

        info!(%order_id, old_status = %from, new_status = %to, "Order status updated");

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: from.to_string(),
                new_status: to.to_string(),
            })
            .await;
        if let Some(payment) = refunded_payment {
            info!(%order_id, payment_id = %payment.id, "Completed payment marked refunded");
            self.event_sender
                .send_or_log(Event::PaymentRefunded {
                    payment_id: payment.id,
                    order_id,
                })
                .await;
        }

        Ok(updated)
    }
}
