pub mod commerce;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod payment_method_entry;

pub use order::{Entity as Order, Model as OrderModel, OrderStatus};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use payment::{Entity as Payment, Model as PaymentModel, PaymentMethod, PaymentStatus};
pub use payment_method_entry::{
    Entity as PaymentMethodCatalog, Model as PaymentMethodEntry,
};
