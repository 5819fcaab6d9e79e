//! External payment gateway boundary.
//!
//! A gateway call has two kinds of failure. A business decline (bad card,
//! abandoned checkout, unknown reference) is an `Ok(GatewayOutcome::Declined)`.
//! Anything that prevents us from learning the business result is a
//! `GatewayError`. Callers must never treat a `GatewayError` as a success.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

mod paystack;

pub use paystack::PaystackGateway;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    #[error("gateway request timed out: {0}")]
    Timeout(String),

    #[error("gateway transport error: {0}")]
    Transport(String),

    #[error("gateway returned unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("gateway response could not be parsed: {0}")]
    Malformed(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}

impl GatewayError {
    /// Errors worth retrying on an idempotent call.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Timeout(_) | GatewayError::Transport(_) => true,
            GatewayError::UnexpectedStatus { status, .. } => *status >= 500 || *status == 429,
            GatewayError::Malformed(_) | GatewayError::InvalidAmount(_) => false,
        }
    }
}

/// Business result of a gateway call.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayOutcome<T> {
    Approved(T),
    Declined { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct InitializeRequest {
    pub email: String,
    pub amount_minor: i64,
    pub currency: String,
    pub reference: String,
    pub callback_url: Option<String>,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializedTransaction {
    pub authorization_url: String,
    pub access_code: String,
    pub reference: String,
}

/// A transaction the gateway confirms as successfully charged.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedTransaction {
    pub transaction_id: String,
    pub reference: String,
    pub amount_minor: i64,
    pub currency: Option<String>,
    pub metadata: Value,
    /// Raw `data` object as returned by the gateway, kept for audit
    pub raw: Value,
}

impl VerifiedTransaction {
    /// Order id the checkout was started for, when the initializer attached one.
    pub fn metadata_order_id(&self) -> Option<Uuid> {
        order_id_from_metadata(&self.metadata)
    }
}

fn order_id_from_metadata(metadata: &Value) -> Option<Uuid> {
    match metadata {
        Value::Object(map) => map
            .get("order_id")
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok()),
        // Some providers echo metadata back as a JSON-encoded string
        Value::String(encoded) => serde_json::from_str::<Value>(encoded)
            .ok()
            .filter(Value::is_object)
            .and_then(|decoded| order_id_from_metadata(&decoded)),
        _ => None,
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Starts a hosted checkout. Not retried; it changes no local state.
    async fn initialize(
        &self,
        request: InitializeRequest,
    ) -> Result<GatewayOutcome<InitializedTransaction>, GatewayError>;

    /// Asks the gateway whether `reference` was successfully charged.
    async fn verify(
        &self,
        reference: &str,
    ) -> Result<GatewayOutcome<VerifiedTransaction>, GatewayError>;
}

const MINOR_UNITS_PER_MAJOR: i64 = 100;

/// Converts a major-unit amount (e.g. 27.50) into minor units (2750).
pub fn to_minor_units(amount: Decimal) -> Result<i64, GatewayError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(GatewayError::InvalidAmount(format!(
            "amount must not be negative: {}",
            amount
        )));
    }

    let scaled = amount * Decimal::from(MINOR_UNITS_PER_MAJOR);
    if !scaled.fract().is_zero() {
        return Err(GatewayError::InvalidAmount(format!(
            "amount has more than two decimal places: {}",
            amount
        )));
    }

    i64::try_from(scaled.trunc())
        .map_err(|_| GatewayError::InvalidAmount(format!("amount out of range: {}", amount)))
}

/// Converts minor units back into a major-unit amount with two decimal places.
pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn minor_units_scale_by_one_hundred() {
        assert_eq!(to_minor_units(dec!(27.00)).unwrap(), 2700);
        assert_eq!(to_minor_units(dec!(0.01)).unwrap(), 1);
        assert_eq!(to_minor_units(dec!(0)).unwrap(), 0);
        assert_eq!(to_minor_units(dec!(19.9900)).unwrap(), 1999);
        assert_eq!(from_minor_units(2750), dec!(27.50));
    }

    #[test]
    fn fractional_minor_units_are_rejected() {
        assert!(matches!(
            to_minor_units(dec!(1.005)),
            Err(GatewayError::InvalidAmount(_))
        ));
    }

    #[test]
    fn negative_amounts_are_rejected() {
        assert!(matches!(
            to_minor_units(dec!(-1.00)),
            Err(GatewayError::InvalidAmount(_))
        ));
    }

    #[test]
    fn metadata_order_id_accepts_object_and_encoded_string() {
        let order_id = Uuid::new_v4();

        let as_object = json!({ "order_id": order_id.to_string(), "owner": "user:x" });
        assert_eq!(order_id_from_metadata(&as_object), Some(order_id));

        let as_string = Value::String(json!({ "order_id": order_id.to_string() }).to_string());
        assert_eq!(order_id_from_metadata(&as_string), Some(order_id));

        assert_eq!(order_id_from_metadata(&Value::String(String::new())), None);
        assert_eq!(order_id_from_metadata(&json!({ "order_id": "nope" })), None);
        assert_eq!(order_id_from_metadata(&Value::Null), None);
    }

    #[test]
    fn transient_classification() {
        assert!(GatewayError::Timeout("t".into()).is_transient());
        assert!(GatewayError::Transport("t".into()).is_transient());
        assert!(GatewayError::UnexpectedStatus {
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(!GatewayError::UnexpectedStatus {
            status: 401,
            body: String::new()
        }
        .is_transient());
        assert!(!GatewayError::Malformed("x".into()).is_transient());
    }
}
