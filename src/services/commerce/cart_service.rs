use crate::{
    auth::Owner,
    db,
    entities::commerce::{cart_item, CartItem, CartItemModel},
    errors::ServiceError,
    events::{Event, EventSender},
    services::commerce::{catalog::CatalogStore, owner_locks::OwnerLocks},
};
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// A cart line joined with live catalog data.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct CartLine {
    pub id: Uuid,
    pub product_id: Uuid,
    /// `None` when the product no longer exists in the catalog
    pub product_name: Option<String>,
    pub unit_price: Option<Decimal>,
    pub quantity: i32,
    pub line_total: Decimal,
    /// False when the product is missing or inactive; such lines block checkout
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct CartView {
    pub items: Vec<CartLine>,
    /// Sum of available line totals
    pub subtotal: Decimal,
    pub item_count: usize,
    pub total_quantity: i64,
}

/// Shopping cart service.
///
/// A cart is the set of `cart_items` rows sharing an owner key. There is no
/// cart row of its own: the cart exists while it has lines.
///
/// - Adding a product that is already in the cart **replaces** its quantity.
/// - Prices are never stored on cart lines; they are read from the catalog on
///   every listing and snapshotted only when an order is built.
/// - Every mutation takes the owner's lock, shared with `CheckoutService`, so
///   a cart cannot change underneath an order build in this process.
///
/// # Examples
///
/// ```ignore
/// let owner = Owner::Session("sess_123".into());
/// cart_service.add_or_update(&owner, product_id, 2).await?;
/// let cart = cart_service.list(&owner).await?;
/// assert_eq!(cart.item_count, 1);
/// ```
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    catalog: Arc<dyn CatalogStore>,
    locks: OwnerLocks,
}

impl CartService {
    /// Creates a new `CartService` instance.
    ///
    /// # Arguments
    ///
    /// * `db` - Database connection pool
    /// * `event_sender` - Event sender for publishing cart events
    /// * `catalog` - Read-only product lookups
    /// * `locks` - Per-owner locks shared with checkout
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        catalog: Arc<dyn CatalogStore>,
        locks: OwnerLocks,
    ) -> Self {
        Self {
            db,
            event_sender,
            catalog,
            locks,
        }
    }

    /// Adds a product to the cart, or replaces the quantity of an existing line.
    ///
    /// # Returns
    ///
    /// * `Ok(CartItemModel)` - The created or updated line
    /// * `Err(ServiceError::ValidationError)` - Quantity below 1 or inactive product
    /// * `Err(ServiceError::NotFound)` - Product not in the catalog
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn add_or_update(
        &self,
        owner: &Owner,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartItemModel, ServiceError> {
        validate_quantity(quantity)?;

        let product = self
            .catalog
            .get_product(product_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;
        if !product.is_active {
            return Err(ServiceError::ValidationError(format!(
                "Product {} is not available",
                product.name
            )));
        }

        let _guard = self.locks.lock(owner).await;
        let key = owner.key();

        let item = match self.find_line(&key, product_id).await? {
            Some(existing) => self.set_quantity(existing, quantity).await?,
            None => {
                let now = Utc::now();
                let line = cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    owner: Set(key.clone()),
                    product_id: Set(product_id),
                    quantity: Set(quantity),
                    created_at: Set(now),
                    updated_at: Set(now),
                };

                match line.insert(&*self.db).await {
                    Ok(item) => item,
                    // Another process inserted the same line first
                    Err(e) if db::is_unique_violation(&e) => {
                        warn!(%product_id, "Cart line inserted concurrently; replacing quantity");
                        let existing = self.find_line(&key, product_id).await?.ok_or_else(|| {
                            ServiceError::Conflict("cart line changed concurrently".into())
                        })?;
                        self.set_quantity(existing, quantity).await?
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        counter!("bazaar_cart_mutations_total", 1, "operation" => "upsert");
        self.event_sender
            .send_or_log(Event::CartItemUpserted {
                owner: key,
                product_id,
                quantity,
            })
            .await;

        info!(%product_id, quantity, "Cart line upserted");
        Ok(item)
    }

    /// Sets the quantity of an existing cart line.
    ///
    /// Quantities below 1 are rejected; use `remove` to drop a line.
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn update_quantity(
        &self,
        owner: &Owner,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<CartItemModel, ServiceError> {
        validate_quantity(quantity)?;

        let _guard = self.locks.lock(owner).await;
        let key = owner.key();

        let item = self.find_owned(&key, item_id).await?;
        let product_id = item.product_id;
        let updated = self.set_quantity(item, quantity).await?;

        counter!("bazaar_cart_mutations_total", 1, "operation" => "update");
        self.event_sender
            .send_or_log(Event::CartItemUpserted {
                owner: key,
                product_id,
                quantity,
            })
            .await;

        Ok(updated)
    }

    /// Removes one line from the cart.
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn remove(&self, owner: &Owner, item_id: Uuid) -> Result<(), ServiceError> {
        let _guard = self.locks.lock(owner).await;

        let result = CartItem::delete_many()
            .filter(cart_item::Column::Id.eq(item_id))
            .filter(cart_item::Column::Owner.eq(owner.key()))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Cart item {} not found",
                item_id
            )));
        }

        counter!("bazaar_cart_mutations_total", 1, "operation" => "remove");
        info!(%item_id, "Cart line removed");
        Ok(())
    }

    /// Deletes every line in the cart and returns how many were removed.
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn clear(&self, owner: &Owner) -> Result<u64, ServiceError> {
        let _guard = self.locks.lock(owner).await;
        let key = owner.key();

        let removed = CartItem::delete_many()
            .filter(cart_item::Column::Owner.eq(key.clone()))
            .exec(&*self.db)
            .await?
            .rows_affected;

        counter!("bazaar_cart_mutations_total", 1, "operation" => "clear");
        self.event_sender
            .send_or_log(Event::CartCleared {
                owner: key,
                removed,
            })
            .await;

        Ok(removed)
    }

    /// Lists the cart with current catalog prices.
    ///
    /// Lines whose product is missing or inactive are returned with
    /// `available = false` and do not count toward the subtotal.
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn list(&self, owner: &Owner) -> Result<CartView, ServiceError> {
        let items = CartItem::find()
            .filter(cart_item::Column::Owner.eq(owner.key()))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        let ids: Vec<Uuid> = items.iter().map(|item| item.product_id).collect();
        let products = self.catalog.get_products(&ids).await?;

        let lines: Vec<CartLine> = items
            .into_iter()
            .map(|item| match products.get(&item.product_id) {
                Some(product) => CartLine {
                    id: item.id,
                    product_id: item.product_id,
                    product_name: Some(product.name.clone()),
                    unit_price: Some(product.price),
                    quantity: item.quantity,
                    line_total: (product.price * Decimal::from(item.quantity)).round_dp(2),
                    available: product.is_active,
                },
                None => CartLine {
                    id: item.id,
                    product_id: item.product_id,
                    product_name: None,
                    unit_price: None,
                    quantity: item.quantity,
                    line_total: Decimal::ZERO,
                    available: false,
                },
            })
            .collect();

        let subtotal = lines
            .iter()
            .filter(|line| line.available)
            .map(|line| line.line_total)
            .sum();
        let total_quantity = lines.iter().map(|line| i64::from(line.quantity)).sum();

        Ok(CartView {
            item_count: lines.len(),
            total_quantity,
            subtotal,
            items: lines,
        })
    }

    async fn find_line(
        &self,
        key: &str,
        product_id: Uuid,
    ) -> Result<Option<CartItemModel>, ServiceError> {
        Ok(CartItem::find()
            .filter(cart_item::Column::Owner.eq(key))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&*self.db)
            .await?)
    }

    async fn find_owned(&self, key: &str, item_id: Uuid) -> Result<CartItemModel, ServiceError> {
        CartItem::find_by_id(item_id)
            .filter(cart_item::Column::Owner.eq(key))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart item {} not found", item_id)))
    }

    async fn set_quantity(
        &self,
        item: CartItemModel,
        quantity: i32,
    ) -> Result<CartItemModel, ServiceError> {
        let mut active: cart_item::ActiveModel = item.into();
        active.quantity = Set(quantity);
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }
}

fn validate_quantity(quantity: i32) -> Result<(), ServiceError> {
    if quantity < 1 {
        return Err(ServiceError::ValidationError(
            "quantity must be at least 1".to_string(),
        ));
    }
    Ok(())
}
