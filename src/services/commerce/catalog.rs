use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    entities::commerce::{product, Product, ProductModel},
    errors::ServiceError,
};

/// What the order core needs to know about a product.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogProduct {
    pub id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub stock: i32,
    pub is_active: bool,
}

impl From<ProductModel> for CatalogProduct {
    fn from(model: ProductModel) -> Self {
        Self {
            id: model.id,
            name: model.name,
            price: model.price.round_dp(2),
            stock: model.stock,
            is_active: model.is_active,
        }
    }
}

/// Read-only view of the external catalog.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn get_product(&self, id: Uuid) -> Result<Option<CatalogProduct>, ServiceError>;

    async fn get_products(
        &self,
        ids: &[Uuid],
    ) -> Result<HashMap<Uuid, CatalogProduct>, ServiceError>;
}

/// Loads products through any connection, including an open transaction.
pub async fn load_products<C: ConnectionTrait>(
    conn: &C,
    ids: &[Uuid],
) -> Result<HashMap<Uuid, CatalogProduct>, ServiceError> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let products = Product::find()
        .filter(product::Column::Id.is_in(ids.iter().copied()))
        .all(conn)
        .await?;

    Ok(products
        .into_iter()
        .map(|model| (model.id, CatalogProduct::from(model)))
        .collect())
}

#[derive(Clone)]
pub struct DbCatalogStore {
    db: Arc<DatabaseConnection>,
}

impl DbCatalogStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CatalogStore for DbCatalogStore {
    async fn get_product(&self, id: Uuid) -> Result<Option<CatalogProduct>, ServiceError> {
        Ok(Product::find_by_id(id)
            .one(&*self.db)
            .await?
            .map(CatalogProduct::from))
    }

    async fn get_products(
        &self,
        ids: &[Uuid],
    ) -> Result<HashMap<Uuid, CatalogProduct>, ServiceError> {
        load_products(&*self.db, ids).await
    }
}
