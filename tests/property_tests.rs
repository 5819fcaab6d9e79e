//! Property-based tests for pricing, money conversion, references and the
//! order state machine.

use std::collections::HashSet;
use std::sync::Arc;

use bazaar_api::{
    auth::Owner,
    entities::OrderStatus,
    handlers::payment_webhooks::{sign_payload, verify_signature},
    payment_gateway::{from_minor_units, to_minor_units},
    services::{
        commerce::{PricedLine, PricingPolicy},
        references::{ReferenceGenerator, ReferenceSource},
    },
};
use proptest::prelude::*;
use rust_decimal::Decimal;

fn money_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..10_000_000).prop_map(|cents| Decimal::new(cents, 2))
}

fn line_strategy() -> impl Strategy<Value = PricedLine> {
    (money_strategy(), 1i32..500).prop_map(|(unit_price, quantity)| PricedLine {
        unit_price,
        quantity,
    })
}

fn rate_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..=10_000).prop_map(|basis_points| Decimal::new(basis_points, 4))
}

fn owner_strategy() -> impl Strategy<Value = Owner> {
    prop_oneof![
        any::<u128>().prop_map(|raw| Owner::User(uuid::Uuid::from_u128(raw))),
        "[A-Za-z0-9_-]{1,64}".prop_map(Owner::Session),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn total_is_sum_of_components(
        lines in prop::collection::vec(line_strategy(), 1..20),
        rate in rate_strategy(),
        flat in money_strategy(),
        chosen in prop::option::of(money_strategy()),
    ) {
        let quote = PricingPolicy::new(rate, flat).quote(&lines, chosen);

        prop_assert_eq!(quote.total, quote.subtotal + quote.tax + quote.shipping);
        prop_assert_eq!(quote.shipping, chosen.unwrap_or(flat));
        prop_assert!(quote.tax >= Decimal::ZERO);
        prop_assert!(quote.subtotal.scale() <= 2);
        prop_assert!(quote.tax.scale() <= 2);
    }

    #[test]
    fn subtotal_is_independent_of_line_order(
        mut lines in prop::collection::vec(line_strategy(), 1..20),
    ) {
        let forward = PricingPolicy::subtotal(&lines);
        lines.reverse();
        prop_assert_eq!(forward, PricingPolicy::subtotal(&lines));
    }

    #[test]
    fn two_decimal_amounts_survive_minor_units(amount in money_strategy()) {
        let minor = to_minor_units(amount).unwrap();
        prop_assert_eq!(from_minor_units(minor), amount);
        prop_assert_eq!(Decimal::from(minor), amount * Decimal::from(100));
    }

    #[test]
    fn sub_cent_amounts_are_refused(cents in 0i64..1_000_000, extra in 1i64..10) {
        let amount = Decimal::new(cents * 10 + extra, 3);
        prop_assert!(to_minor_units(amount).is_err());
    }

    #[test]
    fn owner_keys_round_trip(owner in owner_strategy()) {
        prop_assert_eq!(Owner::from_key(&owner.key()), Some(owner));
    }

    #[test]
    fn any_byte_flip_breaks_the_signature(
        payload in prop::collection::vec(any::<u8>(), 1..256),
        index in any::<prop::sample::Index>(),
    ) {
        let secret = "whsec_property";
        let signature = sign_payload(&payload, secret).unwrap();
        prop_assert!(verify_signature(&payload, &signature, secret).unwrap());

        let mut tampered = payload.clone();
        let at = index.index(tampered.len());
        tampered[at] ^= 0x01;
        prop_assert!(!verify_signature(&tampered, &signature, secret).unwrap());
    }
}

const ALL_STATUSES: [OrderStatus; 6] = [
    OrderStatus::Pending,
    OrderStatus::Processing,
    OrderStatus::Shipped,
    OrderStatus::Delivered,
    OrderStatus::Cancelled,
    OrderStatus::Refunded,
];

#[test]
fn cancelled_and_refunded_orders_never_move() {
    for from in ALL_STATUSES {
        for to in ALL_STATUSES {
            if from == OrderStatus::Cancelled || from == OrderStatus::Refunded {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
            if from == to {
                assert!(!from.can_transition_to(to), "{from} -> {to} is not a transition");
            }
        }
    }
    assert!(OrderStatus::Delivered.can_transition_to(OrderStatus::Refunded));
    assert!(!OrderStatus::Processing.can_transition_to(OrderStatus::Cancelled));
}

#[test]
fn references_stay_unique_across_threads() {
    let generator = Arc::new(ReferenceGenerator::new("ORD", "PAY"));
    let owner = Owner::Session("sess_shared".to_string());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let generator = Arc::clone(&generator);
            let owner = owner.clone();
            std::thread::spawn(move || {
                (0..1_250)
                    .flat_map(|_| {
                        [
                            generator.order_number(&owner),
                            generator.payment_reference(&owner),
                        ]
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for reference in handle.join().unwrap() {
            assert!(seen.insert(reference.clone()), "duplicate reference {reference}");
        }
    }
    assert_eq!(seen.len(), 20_000);
}
