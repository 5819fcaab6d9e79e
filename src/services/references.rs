//! Human-readable unique identifiers for orders and payments.
//!
//! Format: `{PREFIX}-{owner tag}-{unix seconds}-{counter}{random}`. The
//! counter is process-wide so two generations in the same second never share
//! a suffix; the random tail covers multiple processes. Unique indexes on
//! `orders.order_number` and `payments.payment_reference` remain the final
//! guard, and callers regenerate on a violation.

use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::auth::Owner;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

const RANDOM_LEN: usize = 4;

/// Attempts made before a reference collision is reported as a conflict.
pub const MAX_REFERENCE_ATTEMPTS: usize = 5;

/// Source of order numbers and payment references.
pub trait ReferenceSource: Send + Sync {
    fn order_number(&self, owner: &Owner) -> String;
    fn payment_reference(&self, owner: &Owner) -> String;
}

#[derive(Debug, Clone)]
pub struct ReferenceGenerator {
    order_prefix: String,
    payment_prefix: String,
}

impl ReferenceGenerator {
    pub fn new(order_prefix: impl Into<String>, payment_prefix: impl Into<String>) -> Self {
        Self {
            order_prefix: order_prefix.into(),
            payment_prefix: payment_prefix.into(),
        }
    }
}

impl ReferenceSource for ReferenceGenerator {
    fn order_number(&self, owner: &Owner) -> String {
        generate(&self.order_prefix, owner)
    }

    fn payment_reference(&self, owner: &Owner) -> String {
        generate(&self.payment_prefix, owner)
    }
}

fn generate(prefix: &str, owner: &Owner) -> String {
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_LEN)
        .map(|c| char::from(c).to_ascii_uppercase())
        .collect();

    format!(
        "{}-{}-{}-{}{}",
        prefix,
        owner.tag().to_ascii_uppercase(),
        Utc::now().timestamp(),
        to_base36(seq),
        random
    )
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use uuid::Uuid;

    #[test]
    fn references_carry_prefix_and_owner_tag() {
        let owner = Owner::User(Uuid::new_v4());
        let generator = ReferenceGenerator::new("ORD", "PAY");

        let order_number = generator.order_number(&owner);
        let reference = generator.payment_reference(&owner);
        let tag = owner.tag().to_ascii_uppercase();

        assert!(order_number.starts_with(&format!("ORD-{}-", tag)));
        assert!(reference.starts_with(&format!("PAY-{}-", tag)));
        assert_ne!(order_number, reference);
    }

    #[test]
    fn base36_encoding() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "Z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn same_owner_same_second_never_collides() {
        let owner = Owner::Session("sess".into());
        let generator = ReferenceGenerator::new("ORD", "PAY");
        let seen: HashSet<_> = (0..1_000).map(|_| generator.order_number(&owner)).collect();
        assert_eq!(seen.len(), 1_000);
    }
}
