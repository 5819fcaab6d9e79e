use async_trait::async_trait;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;

use crate::{
    auth::Owner,
    entities::commerce::{customer_profile, CustomerProfile},
    errors::ServiceError,
};

/// Contact and delivery details for an owner.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerAddresses {
    pub email: String,
    pub shipping_address: Option<String>,
    pub billing_address: Option<String>,
}

impl CustomerAddresses {
    /// Shipping and billing addresses to stamp on an order.
    ///
    /// A blank billing address falls back to the shipping address; a blank
    /// shipping address makes the profile unusable for checkout.
    pub fn resolve(&self) -> Result<(String, String), ServiceError> {
        let shipping = non_blank(self.shipping_address.as_deref()).ok_or_else(|| {
            ServiceError::MissingProfile("a shipping address is required to place an order".into())
        })?;
        let billing = non_blank(self.billing_address.as_deref()).unwrap_or(shipping);
        Ok((shipping.to_string(), billing.to_string()))
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Address book owned by the identity system.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    async fn addresses(&self, owner: &Owner) -> Result<Option<CustomerAddresses>, ServiceError>;
}

#[derive(Clone)]
pub struct DbProfileDirectory {
    db: Arc<DatabaseConnection>,
}

impl DbProfileDirectory {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProfileDirectory for DbProfileDirectory {
    async fn addresses(&self, owner: &Owner) -> Result<Option<CustomerAddresses>, ServiceError> {
        let profile = CustomerProfile::find()
            .filter(customer_profile::Column::Owner.eq(owner.key()))
            .one(&*self.db)
            .await?;

        Ok(profile.map(|p| CustomerAddresses {
            email: p.email,
            shipping_address: p.shipping_address,
            billing_address: p.billing_address,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addresses(shipping: Option<&str>, billing: Option<&str>) -> CustomerAddresses {
        CustomerAddresses {
            email: "buyer@example.com".into(),
            shipping_address: shipping.map(str::to_string),
            billing_address: billing.map(str::to_string),
        }
    }

    #[test]
    fn billing_falls_back_to_shipping() {
        let (shipping, billing) = addresses(Some("1 Marina, Lagos"), Some("  "))
            .resolve()
            .unwrap();
        assert_eq!(shipping, "1 Marina, Lagos");
        assert_eq!(billing, "1 Marina, Lagos");
    }

    #[test]
    fn missing_shipping_is_missing_profile() {
        assert!(matches!(
            addresses(None, Some("billing")).resolve(),
            Err(ServiceError::MissingProfile(_))
        ));
        assert!(matches!(
            addresses(Some(""), None).resolve(),
            Err(ServiceError::MissingProfile(_))
        ));
    }
}
