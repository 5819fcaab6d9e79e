/// Commerce entities module
pub mod cart_item;
pub mod customer_profile;
pub mod product;
pub mod shipping_method;

// Re-export entities
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use customer_profile::{Entity as CustomerProfile, Model as CustomerProfileModel};
pub use product::{Entity as Product, Model as ProductModel};
pub use shipping_method::{Entity as ShippingMethod, Model as ShippingMethodModel};
