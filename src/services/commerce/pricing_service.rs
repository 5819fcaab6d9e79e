use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;

use crate::config::CommerceSettings;

/// Priced cart line used as pricing input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricedLine {
    pub unit_price: Decimal,
    pub quantity: i32,
}

impl PricedLine {
    pub fn line_total(&self) -> Decimal {
        (self.unit_price * Decimal::from(self.quantity)).round_dp(2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct OrderQuote {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub shipping: Decimal,
    pub total: Decimal,
}

/// Tax and shipping rules applied when an order is built.
#[derive(Debug, Clone)]
pub struct PricingPolicy {
    tax_rate: Decimal,
    flat_shipping: Decimal,
}

impl PricingPolicy {
    pub fn new(tax_rate: Decimal, flat_shipping: Decimal) -> Self {
        Self {
            tax_rate,
            flat_shipping,
        }
    }

    pub fn from_settings(settings: &CommerceSettings) -> Self {
        Self::new(settings.tax_rate, settings.shipping_cost)
    }

    pub fn subtotal(lines: &[PricedLine]) -> Decimal {
        lines.iter().map(PricedLine::line_total).sum()
    }

    /// Quotes an order. `shipping_override` is a chosen shipping method's price.
    pub fn quote(&self, lines: &[PricedLine], shipping_override: Option<Decimal>) -> OrderQuote {
        let subtotal = Self::subtotal(lines).round_dp(2);
        let tax = (subtotal * self.tax_rate).round_dp(2);
        let shipping = shipping_override.unwrap_or(self.flat_shipping).round_dp(2);

        OrderQuote {
            subtotal,
            tax,
            shipping,
            total: subtotal + tax + shipping,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn quote_matches_reference_scenario() {
        let policy = PricingPolicy::new(dec!(0.10), dec!(5.00));
        let quote = policy.quote(
            &[PricedLine {
                unit_price: dec!(10.00),
                quantity: 2,
            }],
            None,
        );

        assert_eq!(quote.subtotal, dec!(20.00));
        assert_eq!(quote.tax, dec!(2.00));
        assert_eq!(quote.shipping, dec!(5.00));
        assert_eq!(quote.total, dec!(27.00));
    }

    #[test]
    fn tax_is_rounded_to_cents() {
        let policy = PricingPolicy::new(dec!(0.075), dec!(0));
        let quote = policy.quote(
            &[PricedLine {
                unit_price: dec!(3.33),
                quantity: 1,
            }],
            None,
        );
        // 3.33 * 0.075 = 0.24975
        assert_eq!(quote.tax, dec!(0.25));
        assert_eq!(quote.total, dec!(3.58));
    }

    #[test]
    fn shipping_method_price_overrides_flat_rate() {
        let policy = PricingPolicy::new(dec!(0), dec!(5.00));
        let quote = policy.quote(
            &[PricedLine {
                unit_price: dec!(1.00),
                quantity: 1,
            }],
            Some(dec!(12.50)),
        );
        assert_eq!(quote.shipping, dec!(12.50));
        assert_eq!(quote.total, dec!(13.50));
    }
}
