/// Cart, pricing and checkout services
pub mod cart_service;
pub mod catalog;
pub mod checkout_service;
pub mod customer_service;
pub mod owner_locks;
pub mod pricing_service;

pub use cart_service::{CartLine, CartService, CartView};
pub use catalog::{CatalogProduct, CatalogStore, DbCatalogStore};
pub use checkout_service::{BuildOrderInput, BuiltOrder, CheckoutService};
pub use customer_service::{CustomerAddresses, DbProfileDirectory, ProfileDirectory};
pub use owner_locks::OwnerLocks;
pub use pricing_service::{OrderQuote, PricedLine, PricingPolicy};
