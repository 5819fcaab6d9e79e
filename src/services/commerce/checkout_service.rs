use crate::{
    auth::Owner,
    config::CommerceSettings,
    db,
    entities::{
        commerce::{cart_item, CartItem, CartItemModel, ShippingMethod},
        order, order_item, payment, payment_method_entry, OrderItemModel, OrderModel,
        OrderStatus, PaymentMethod, PaymentMethodCatalog, PaymentModel, PaymentStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        commerce::{
            catalog::{load_products, CatalogProduct},
            customer_service::ProfileDirectory,
            owner_locks::OwnerLocks,
            pricing_service::{OrderQuote, PricedLine, PricingPolicy},
        },
        references::{ReferenceGenerator, ReferenceSource, MAX_REFERENCE_ATTEMPTS},
    },
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Input for building an order from the owner's cart
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct BuildOrderInput {
    pub payment_method: PaymentMethod,
    pub shipping_method_id: Option<Uuid>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

/// Everything written by a successful build
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BuiltOrder {
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
    pub payment: PaymentModel,
}

/// Turns a cart into an order, its items and a pending payment in one transaction.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    profiles: Arc<dyn ProfileDirectory>,
    locks: OwnerLocks,
    pricing: PricingPolicy,
    references: Arc<dyn ReferenceSource>,
    currency: String,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        profiles: Arc<dyn ProfileDirectory>,
        locks: OwnerLocks,
        settings: &CommerceSettings,
    ) -> Self {
        Self {
            db,
            event_sender,
            profiles,
            locks,
            pricing: PricingPolicy::from_settings(settings),
            references: Arc::new(ReferenceGenerator::new(
                settings.order_number_prefix.clone(),
                settings.payment_reference_prefix.clone(),
            )),
            currency: settings.currency.clone(),
        }
    }

    /// Replaces the source of order numbers and payment references.
    pub fn with_references(mut self, references: Arc<dyn ReferenceSource>) -> Self {
        self.references = references;
        self
    }

    /// Builds an order from the owner's cart.
    ///
    /// Either the order, its items, the pending payment and the emptied cart
    /// are all committed, or nothing is. No network calls are made.
    ///
    /// # Errors
    ///
    /// * `EmptyCart` - the cart has no lines
    /// * `MissingProfile` - no usable shipping address
    /// * `ValidationError` - unknown or inactive product, shipping method or
    ///   payment method
    /// * `InsufficientStock` - a line asks for more than the catalog has
    /// * `Conflict` - the cart changed while the order was being built
    #[instrument(skip(self, input), fields(owner = %owner, payment_method = %input.payment_method))]
    pub async fn build(
        &self,
        owner: &Owner,
        input: BuildOrderInput,
    ) -> Result<BuiltOrder, ServiceError> {
        input.validate()?;

        let _guard = self.locks.lock(owner).await;
        let key = owner.key();

        let snapshot = self.read_cart(&*self.db, &key, false).await?;
        if snapshot.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let (shipping_address, billing_address) = self
            .profiles
            .addresses(owner)
            .await?
            .ok_or_else(|| {
                ServiceError::MissingProfile("no customer profile for this account".into())
            })?
            .resolve()?;

        self.ensure_payment_method_offered(input.payment_method).await?;

        let shipping_override = match input.shipping_method_id {
            Some(method_id) => Some(self.shipping_method_price(method_id).await?),
            None => None,
        };

        let txn = self.db.begin().await?;
        let row_locks = db::supports_row_locks(txn.get_database_backend());

        let current = self.read_cart(&txn, &key, row_locks).await?;
        if !same_cart(&snapshot, &current) {
            warn!("Cart changed between snapshot and transaction");
            return Err(ServiceError::Conflict(
                "cart changed while the order was being placed; please retry".into(),
            ));
        }

        let product_ids: Vec<Uuid> = current.iter().map(|line| line.product_id).collect();
        let products = load_products(&txn, &product_ids).await?;
        let priced = price_lines(&current, &products)?;

        let lines: Vec<PricedLine> = priced.iter().map(|(_, _, line)| *line).collect();
        let quote = self.pricing.quote(&lines, shipping_override);
        let now = Utc::now();

        let order = self
            .insert_order(
                &txn,
                owner,
                &OrderDraft {
                    owner: &key,
                    shipping_address: &shipping_address,
                    billing_address: &billing_address,
                    payment_method: input.payment_method,
                    shipping_method_id: input.shipping_method_id,
                    notes: input.notes.as_deref(),
                    quote,
                    now,
                },
            )
            .await?;

        let mut items = Vec::with_capacity(priced.len());
        for (line, product, priced_line) in &priced {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                product_id: Set(line.product_id),
                product_name: Set(product.name.clone()),
                quantity: Set(line.quantity),
                price: Set(priced_line.unit_price),
                discount: Set(Decimal::ZERO),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
            items.push(item);
        }

        let payment = self
            .insert_payment(&txn, owner, &order, input.payment_method, quote.total, now)
            .await?;

        let removed = CartItem::delete_many()
            .filter(cart_item::Column::Owner.eq(key.clone()))
            .exec(&txn)
            .await?
            .rows_affected;
        if removed != current.len() as u64 {
            return Err(ServiceError::Conflict(
                "cart changed while the order was being placed; please retry".into(),
            ));
        }

        txn.commit().await?;

        counter!("bazaar_orders_created_total", 1);
        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total = %order.total_amount,
            "Order built from cart"
        );

        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id: order.id,
                order_number: order.order_number.clone(),
                owner: key,
            })
            .await;
        self.event_sender
            .send_or_log(Event::PaymentCreated {
                payment_id: payment.id,
                order_id: order.id,
                payment_reference: payment.payment_reference.clone(),
            })
            .await;

        Ok(BuiltOrder {
            order,
            items,
            payment,
        })
    }

    async fn read_cart<C: ConnectionTrait>(
        &self,
        conn: &C,
        key: &str,
        lock_rows: bool,
    ) -> Result<Vec<CartItemModel>, ServiceError> {
        let mut query = CartItem::find()
            .filter(cart_item::Column::Owner.eq(key))
            .order_by_asc(cart_item::Column::Id);
        if lock_rows {
            query = query.lock_exclusive();
        }
        Ok(query.all(conn).await?)
    }

    async fn ensure_payment_method_offered(
        &self,
        method: PaymentMethod,
    ) -> Result<(), ServiceError> {
        let offered = PaymentMethodCatalog::find()
            .filter(payment_method_entry::Column::Code.eq(method.to_string()))
            .filter(payment_method_entry::Column::IsActive.eq(true))
            .one(&*self.db)
            .await?;
        if offered.is_none() {
            return Err(ServiceError::ValidationError(format!(
                "Payment method {} is not available",
                method
            )));
        }
        Ok(())
    }

    async fn shipping_method_price(&self, method_id: Uuid) -> Result<Decimal, ServiceError> {
        let method = ShippingMethod::find_by_id(method_id)
            .one(&*self.db)
            .await?
            .filter(|method| method.is_active)
            .ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "Shipping method {} is not available",
                    method_id
                ))
            })?;
        Ok(method.price.round_dp(2))
    }

    async fn insert_order(
        &self,
        txn: &DatabaseTransaction,
        owner: &Owner,
        draft: &OrderDraft<'_>,
    ) -> Result<OrderModel, ServiceError> {
        for attempt in 1..=MAX_REFERENCE_ATTEMPTS {
            let order_number = self.references.order_number(owner);
            let savepoint = txn.begin().await?;

            let model = order::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_number: Set(order_number.clone()),
                owner: Set(draft.owner.to_string()),
                status: Set(OrderStatus::Pending.to_string()),
                shipping_address: Set(draft.shipping_address.to_string()),
                billing_address: Set(draft.billing_address.to_string()),
                payment_method: Set(draft.payment_method.to_string()),
                shipping_method_id: Set(draft.shipping_method_id),
                subtotal: Set(draft.quote.subtotal),
                tax: Set(draft.quote.tax),
                shipping_cost: Set(draft.quote.shipping),
                total_amount: Set(draft.quote.total),
                notes: Set(draft.notes.map(str::to_string)),
                is_paid: Set(false),
                paid_at: Set(None),
                payment_reference: Set(None),
                version: Set(1),
                created_at: Set(draft.now),
                updated_at: Set(draft.now),
            };

            match model.insert(&savepoint).await {
                Ok(order) => {
                    savepoint.commit().await?;
                    return Ok(order);
                }
                Err(e) if db::is_unique_violation(&e) => {
                    savepoint.rollback().await?;
                    warn!(attempt, %order_number, "Order number collision; regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ServiceError::Conflict(
            "could not allocate a unique order number".into(),
        ))
    }

    async fn insert_payment(
        &self,
        txn: &DatabaseTransaction,
        owner: &Owner,
        order: &OrderModel,
        method: PaymentMethod,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<PaymentModel, ServiceError> {
        for attempt in 1..=MAX_REFERENCE_ATTEMPTS {
            let reference = self.references.payment_reference(owner);
            let savepoint = txn.begin().await?;

            let model = payment::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                payment_method: Set(method.to_string()),
                amount: Set(amount),
                currency: Set(self.currency.clone()),
                status: Set(PaymentStatus::Pending.to_string()),
                transaction_id: Set(None),
                payment_reference: Set(reference.clone()),
                gateway_response: Set(None),
                paid_at: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
            };

            match model.insert(&savepoint).await {
                Ok(payment) => {
                    savepoint.commit().await?;
                    return Ok(payment);
                }
                Err(e) if db::is_unique_violation(&e) => {
                    savepoint.rollback().await?;
                    warn!(attempt, %reference, "Payment reference collision; regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ServiceError::Conflict(
            "could not allocate a unique payment reference".into(),
        ))
    }
}

struct OrderDraft<'a> {
    owner: &'a str,
    shipping_address: &'a str,
    billing_address: &'a str,
    payment_method: PaymentMethod,
    shipping_method_id: Option<Uuid>,
    notes: Option<&'a str>,
    quote: OrderQuote,
    now: DateTime<Utc>,
}

fn same_cart(snapshot: &[CartItemModel], current: &[CartItemModel]) -> bool {
    snapshot.len() == current.len()
        && snapshot.iter().zip(current).all(|(a, b)| {
            a.id == b.id && a.product_id == b.product_id && a.quantity == b.quantity
        })
}

/// Checks every line against the catalog and prices it.
fn price_lines<'a>(
    lines: &'a [CartItemModel],
    products: &'a HashMap<Uuid, CatalogProduct>,
) -> Result<Vec<(&'a CartItemModel, &'a CatalogProduct, PricedLine)>, ServiceError> {
    lines
        .iter()
        .map(|line| {
            let product = products
                .get(&line.product_id)
                .filter(|product| product.is_active)
                .ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "Product {} is no longer available",
                        line.product_id
                    ))
                })?;

            if product.stock < line.quantity {
                return Err(ServiceError::InsufficientStock(format!(
                    "{} has {} in stock, {} requested",
                    product.name, product.stock, line.quantity
                )));
            }

            Ok((
                line,
                product,
                PricedLine {
                    unit_price: product.price,
                    quantity: line.quantity,
                },
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(product_id: Uuid, quantity: i32) -> CartItemModel {
        let now = Utc::now();
        CartItemModel {
            id: Uuid::new_v4(),
            owner: "session:t".into(),
            product_id,
            quantity,
            created_at: now,
            updated_at: now,
        }
    }

    fn product(id: Uuid, stock: i32, is_active: bool) -> CatalogProduct {
        CatalogProduct {
            id,
            name: "Kettle".into(),
            price: dec!(10.00),
            stock,
            is_active,
        }
    }

    #[test]
    fn price_lines_rejects_inactive_and_missing_products() {
        let id = Uuid::new_v4();
        let lines = vec![line(id, 1)];

        let inactive = HashMap::from([(id, product(id, 10, false))]);
        assert!(matches!(
            price_lines(&lines, &inactive),
            Err(ServiceError::ValidationError(_))
        ));

        assert!(matches!(
            price_lines(&lines, &HashMap::new()),
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[test]
    fn price_lines_checks_stock() {
        let id = Uuid::new_v4();
        let lines = vec![line(id, 3)];
        let products = HashMap::from([(id, product(id, 2, true))]);
        assert!(matches!(
            price_lines(&lines, &products),
            Err(ServiceError::InsufficientStock(_))
        ));
    }

    #[test]
    fn same_cart_detects_quantity_changes() {
        let a = line(Uuid::new_v4(), 1);
        let mut b = a.clone();
        assert!(same_cart(&[a.clone()], &[b.clone()]));
        b.quantity = 2;
        assert!(!same_cart(&[a.clone()], &[b]));
        assert!(!same_cart(&[a.clone()], &[]));
    }
}
