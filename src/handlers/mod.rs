pub mod commerce;
pub mod common;
pub mod orders;
pub mod payment_webhooks;
pub mod payments;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::payment_gateway::PaymentGateway;
use crate::services::{
    commerce::{
        CartService, CatalogStore, CheckoutService, DbCatalogStore, DbProfileDirectory,
        OwnerLocks, ProfileDirectory,
    },
    order_status::OrderStatusService,
    orders::OrderService,
    payment_reconciliation::PaymentReconciliationService,
    payments::PaymentService,
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub order_status: Arc<OrderStatusService>,
    pub payments: Arc<PaymentService>,
    pub reconciliation: Arc<PaymentReconciliationService>,
}

impl AppServices {
    /// Wires every service against the database-backed catalog and profiles.
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let catalog: Arc<dyn CatalogStore> = Arc::new(DbCatalogStore::new(db_pool.clone()));
        let profiles: Arc<dyn ProfileDirectory> =
            Arc::new(DbProfileDirectory::new(db_pool.clone()));
        Self::with_dependencies(db_pool, event_sender, config, gateway, catalog, profiles)
    }

    /// Same as `new` with the catalog and profile lookups supplied by the caller.
    pub fn with_dependencies(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
        gateway: Arc<dyn PaymentGateway>,
        catalog: Arc<dyn CatalogStore>,
        profiles: Arc<dyn ProfileDirectory>,
    ) -> Self {
        // Cart mutations and order builds for one owner share these locks
        let locks = OwnerLocks::new();

        let cart = Arc::new(CartService::new(
            db_pool.clone(),
            event_sender.clone(),
            catalog,
            locks.clone(),
        ));
        let checkout = Arc::new(CheckoutService::new(
            db_pool.clone(),
            event_sender.clone(),
            profiles.clone(),
            locks,
            &config.commerce,
        ));
        let orders = Arc::new(OrderService::new(db_pool.clone()));
        let order_status = Arc::new(OrderStatusService::new(
            db_pool.clone(),
            event_sender.clone(),
        ));
        let payments = Arc::new(PaymentService::new(
            db_pool.clone(),
            event_sender.clone(),
            gateway.clone(),
            profiles,
            config,
        ));
        let reconciliation = Arc::new(PaymentReconciliationService::new(
            db_pool,
            event_sender,
            gateway,
            config,
        ));

        Self {
            cart,
            checkout,
            orders,
            order_status,
            payments,
            reconciliation,
        }
    }
}
