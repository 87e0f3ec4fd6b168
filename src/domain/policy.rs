//! Store-wide pricing rules: tax, shipping, cash-on-delivery limit.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::value_objects::Money;

#[derive(Clone, Debug, Serialize)]
pub struct StorePolicy {
    pub currency: String,
    /// GST percentage, split evenly into CGST and SGST.
    pub tax_rate: Decimal,
    pub shipping_charge: Money,
    pub free_shipping_above: Money,
    /// Lower-cased state names that always ship free.
    pub free_shipping_states: Vec<String>,
    pub cod_limit: Money,
    pub max_qty_per_line: u32,
}

impl Default for StorePolicy {
    fn default() -> Self {
        Self {
            currency: "INR".to_string(),
            tax_rate: Decimal::from(18),
            shipping_charge: Money::whole(50),
            free_shipping_above: Money::whole(1000),
            free_shipping_states: vec!["kerala".to_string()],
            cod_limit: Money::whole(1000),
            max_qty_per_line: 5,
        }
    }
}

impl StorePolicy {
    pub fn tax_on(&self, amount: Money) -> Money { amount.percent(self.tax_rate) }

    /// Shipping shown on the cart, before an address is known.
    pub fn cart_shipping(&self, grand_total: Money) -> Money {
        if grand_total.is_positive() && grand_total < self.free_shipping_above { self.shipping_charge } else { Money::ZERO }
    }

    pub fn checkout_shipping(&self, subtotal: Money, state: &str) -> Money {
        let state = state.trim().to_lowercase();
        if self.free_shipping_states.iter().any(|s| *s == state) || subtotal >= self.free_shipping_above {
            Money::ZERO
        } else {
            self.shipping_charge
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cart_shipping_threshold() {
        let p = StorePolicy::default();
        assert_eq!(p.cart_shipping(Money::ZERO), Money::ZERO);
        assert_eq!(p.cart_shipping(Money::whole(999)), Money::whole(50));
        assert_eq!(p.cart_shipping(Money::whole(1000)), Money::ZERO);
    }

    #[test]
    fn test_checkout_shipping_free_state() {
        let p = StorePolicy::default();
        assert_eq!(p.checkout_shipping(Money::whole(200), " Kerala "), Money::ZERO);
        assert_eq!(p.checkout_shipping(Money::whole(200), "Goa"), Money::whole(50));
        assert_eq!(p.checkout_shipping(Money::whole(1500), "Goa"), Money::ZERO);
    }
}
