//! Refund arithmetic for cancelled and returned items.
//!
//! An item's refund is its sale total plus the tax charged on it, minus its
//! proportional share of the order's coupon discount. The share is always
//! taken against the subtotal fixed when the order was placed, so the item
//! refunds of an order plus its shipping charge add back up to what was paid.

use rust_decimal::Decimal;

use crate::domain::value_objects::Money;

pub fn item_refund(item_total: Money, order_subtotal: Money, coupon_discount: Money, tax_rate: Decimal) -> Money {
    let share = if order_subtotal.is_positive() {
        item_total.amount() / order_subtotal.amount()
    } else {
        Decimal::ZERO
    };
    let tax = item_total.amount() * tax_rate / Decimal::ONE_HUNDRED;
    let coupon_share = coupon_discount.amount() * share;
    Money::new((item_total.amount() + tax - coupon_share).max(Decimal::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refund_without_coupon() {
        let refund = item_refund(Money::whole(500), Money::whole(1000), Money::ZERO, Decimal::from(18));
        assert_eq!(refund, Money::whole(590));
    }

    #[test]
    fn test_refund_with_coupon_share() {
        // share 0.25 of a 200 coupon
        let refund = item_refund(Money::whole(250), Money::whole(1000), Money::whole(200), Decimal::from(18));
        assert_eq!(refund, Money::whole(245));
    }

    #[test]
    fn test_refunds_sum_to_paid_amount() {
        let tax_rate = Decimal::from(18);
        let items = [Money::whole(333), Money::whole(333), Money::whole(334)];
        let subtotal: Money = items.iter().copied().sum();
        let coupon = Money::whole(100);
        let total: Money = items.iter().map(|i| item_refund(*i, subtotal, coupon, tax_rate)).sum();
        let paid = subtotal + subtotal.percent(tax_rate) - coupon;
        assert!((total.amount() - paid.amount()).abs() <= Decimal::new(2, 2));
    }

    #[test]
    fn test_zero_subtotal_has_no_coupon_share() {
        assert_eq!(item_refund(Money::ZERO, Money::ZERO, Money::whole(50), Decimal::from(18)), Money::ZERO);
    }
}
