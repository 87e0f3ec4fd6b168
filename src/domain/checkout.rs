//! Checkout pricing and payment checks.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::{
    Cart, Coupon, CouponError, NewOrder, NewOrderItem, PaymentMethod, ShippingAddress,
};
use crate::domain::catalog::CatalogView;
use crate::domain::policy::StorePolicy;
use crate::domain::value_objects::Money;

#[derive(Clone, Debug, Serialize)]
pub struct CheckoutQuote {
    #[serde(skip)]
    pub items: Vec<NewOrderItem>,
    pub item_count: u32,
    /// Cart lines left out because they can no longer be bought.
    pub skipped: usize,
    pub subtotal: Money,
    pub offer_discount: Money,
    pub tax: Money,
    pub shipping: Money,
    pub coupon_code: Option<String>,
    pub coupon_discount: Money,
    pub payable: Money,
}

impl CheckoutQuote {
    /// Prices the cart against live catalog data.
    pub fn build(
        cart: &Cart,
        catalog: &CatalogView,
        coupon: Option<&Coupon>,
        address: &ShippingAddress,
        policy: &StorePolicy,
        now: DateTime<Utc>,
    ) -> Result<Self, CheckoutError> {
        validate_address(address)?;
        let mut items = Vec::new();
        let mut skipped = 0;
        for line in cart.lines() {
            let priced = catalog.listing(line.product_id).filter(|l| l.is_purchasable()).and_then(|listing| {
                let variant = listing.product.variant(&line.size, &line.color).filter(|v| !v.stock.is_zero())?;
                let quote = listing.quote(variant, now);
                Some(NewOrderItem {
                    product_id: line.product_id,
                    product_name: listing.product.name().to_string(),
                    category: listing.category_name().to_string(),
                    subcategory: listing.subcategory_name().to_string(),
                    sku: variant.sku.to_string(),
                    size: variant.size.clone(),
                    color: variant.color.clone(),
                    quantity: line.quantity.min(variant.stock.value()),
                    base_price: quote.base,
                    sale_price: quote.sale,
                })
            });
            match priced {
                Some(item) => items.push(item),
                None => skipped += 1,
            }
        }
        if items.is_empty() { return Err(CheckoutError::EmptyCart); }

        let subtotal: Money = items.iter().map(|i| i.sale_price * i.quantity).sum();
        let offer_discount: Money = items.iter().map(|i| i.base_price.saturating_sub(i.sale_price) * i.quantity).sum();
        let tax = policy.tax_on(subtotal);
        let shipping = policy.checkout_shipping(subtotal, &address.state);

        let coupon_discount = match (cart.coupon_code(), coupon) {
            (None, _) => Money::ZERO,
            (Some(_), None) => return Err(CouponError::NotFound.into()),
            (Some(_), Some(coupon)) => coupon.check(cart.user_id(), subtotal, tax, now)?,
        };
        let payable = Money::new((subtotal + tax + shipping).saturating_sub(coupon_discount).amount());

        Ok(Self {
            item_count: items.iter().map(|i| i.quantity).sum(),
            items,
            skipped,
            subtotal,
            offer_discount,
            tax,
            shipping,
            coupon_code: coupon.filter(|_| cart.coupon_code().is_some()).map(|c| c.code().to_string()),
            coupon_discount,
            payable,
        })
    }

    /// Rejects payment methods the quote cannot use. `wallet_balance` is
    /// only consulted for wallet payments.
    pub fn check_payment(&self, method: PaymentMethod, wallet_balance: Money, policy: &StorePolicy) -> Result<(), CheckoutError> {
        match method {
            PaymentMethod::Cod if self.payable > policy.cod_limit => Err(CheckoutError::CodLimitExceeded { limit: policy.cod_limit }),
            PaymentMethod::Wallet if wallet_balance < self.payable => {
                Err(CheckoutError::InsufficientBalance { balance: wallet_balance, payable: self.payable })
            }
            _ => Ok(()),
        }
    }

    pub fn into_new_order(self, user_id: Uuid, address: ShippingAddress, method: PaymentMethod, policy: &StorePolicy) -> NewOrder {
        NewOrder {
            user_id,
            items: self.items,
            subtotal: self.subtotal,
            offer_discount: self.offer_discount,
            tax: self.tax,
            tax_rate: policy.tax_rate,
            shipping_charge: self.shipping,
            coupon_code: self.coupon_code,
            coupon_discount: self.coupon_discount,
            payable: self.payable,
            shipping_address: address,
            payment_method: method,
        }
    }
}

pub fn validate_address(address: &ShippingAddress) -> Result<(), CheckoutError> {
    let required = [&address.name, &address.phone, &address.line1, &address.city, &address.state, &address.pincode];
    if required.iter().any(|f| f.trim().is_empty()) { return Err(CheckoutError::InvalidAddress("missing required field")); }
    if !address.pincode.trim().chars().all(|c| c.is_ascii_digit()) { return Err(CheckoutError::InvalidAddress("pincode must be numeric")); }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckoutError {
    #[error("No valid items in cart")]
    EmptyCart,
    #[error("COD is not available for orders above {limit}")]
    CodLimitExceeded { limit: Money },
    #[error("Insufficient wallet balance: {balance} available, {payable} due")]
    InsufficientBalance { balance: Money, payable: Money },
    #[error("Invalid address: {0}")]
    InvalidAddress(&'static str),
    #[error(transparent)]
    Coupon(#[from] CouponError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{
        CatalogNodeDraft, Category, CouponDraft, CouponKind, NewVariant, Product, ProductDraft, Subcategory,
    };
    use chrono::Duration;
    use rust_decimal::Decimal;

    fn address(state: &str) -> ShippingAddress {
        ShippingAddress {
            name: "Ravi".into(), phone: "9000000001".into(), line1: "4 MG Road".into(), line2: None,
            city: "Bengaluru".into(), state: state.into(), pincode: "560001".into(), country: "India".into(),
        }
    }

    fn product(name: &str, cat: &Category, sub: &Subcategory, price: i64, stock: u32) -> Product {
        Product::create(ProductDraft {
            name: name.into(), description: String::new(), category_id: cat.id(), subcategory_id: sub.id(),
            variants: vec![NewVariant { sku: None, size: "L".into(), color: "Black".into(), price: Money::whole(price), stock }],
            images: vec![], tags: vec![], fit_type: None, listed: true,
        }, Utc::now()).unwrap()
    }

    /// Two in-stock tees (300 and 500) and one sold-out jacket in the cart.
    fn setup() -> (CatalogView, Cart, Uuid) {
        let now = Utc::now();
        let policy = StorePolicy::default();
        let node = |n: &str| CatalogNodeDraft { name: n.into(), listed: true, ..Default::default() };
        let cat = Category::create(node("Unisex"), now).unwrap();
        let sub = Subcategory::create(&cat, node("Tees"), now).unwrap();
        let a = product("Crew Tee", &cat, &sub, 300, 4);
        let b = product("Polo Tee", &cat, &sub, 500, 4);
        let c = product("Rain Jacket", &cat, &sub, 900, 1);
        let jacket = c.id();
        let mut view = CatalogView::new(vec![cat], vec![sub], vec![a.clone(), b.clone(), c]);
        let mut cart = Cart::new(Uuid::now_v7(), now);
        cart.add(&view.listing(a.id()).unwrap(), "L", "Black", 1, &policy, now).unwrap();
        cart.add(&view.listing(b.id()).unwrap(), "L", "Black", 1, &policy, now).unwrap();
        cart.add(&view.listing(jacket).unwrap(), "L", "Black", 1, &policy, now).unwrap();
        view.product_mut(jacket).unwrap().withdraw("L", "Black", 1, now).unwrap();
        (view, cart, jacket)
    }

    fn coupon(value: i64) -> Coupon {
        let now = Utc::now();
        Coupon::create(CouponDraft {
            name: "Welcome".into(), code: "WELCOME".into(), description: String::new(), kind: CouponKind::Fixed,
            value: Decimal::from(value), max_discount: None, minimum_order: Money::ZERO,
            starts_at: now - Duration::days(1), expires_at: now + Duration::days(1), usage_per_user: 1, active: true,
        }, now).unwrap()
    }

    #[test]
    fn test_quote_skips_sold_out_lines() {
        let (view, cart, _) = setup();
        let policy = StorePolicy::default();
        let quote = CheckoutQuote::build(&cart, &view, None, &address("Karnataka"), &policy, Utc::now()).unwrap();
        assert_eq!(quote.items.len(), 2);
        assert_eq!(quote.skipped, 1);
        assert_eq!(quote.subtotal, Money::whole(800));
        assert_eq!(quote.tax, Money::whole(144));
        assert_eq!(quote.shipping, Money::whole(50));
        assert_eq!(quote.payable, Money::whole(994));
    }

    #[test]
    fn test_quote_clamps_quantity_to_stock() {
        let (mut view, mut cart, _) = setup();
        let policy = StorePolicy::default();
        let now = Utc::now();
        let crew = cart.lines()[0].product_id;
        cart.add(&view.listing(crew).unwrap(), "L", "Black", 2, &policy, now).unwrap();
        view.product_mut(crew).unwrap().withdraw("L", "Black", 3, now).unwrap();

        let quote = CheckoutQuote::build(&cart, &view, None, &address("Goa"), &policy, now).unwrap();
        assert_eq!(quote.items[0].quantity, 1);
        assert_eq!(quote.item_count, 2);
        assert_eq!(quote.subtotal, Money::whole(800));
    }

    #[test]
    fn test_free_shipping_state_and_coupon() {
        let (view, mut cart, _) = setup();
        let policy = StorePolicy::default();
        let coupon = coupon(100);
        cart.apply_coupon(coupon.code(), Utc::now());
        let quote = CheckoutQuote::build(&cart, &view, Some(&coupon), &address(" kerala "), &policy, Utc::now()).unwrap();
        assert_eq!(quote.shipping, Money::ZERO);
        assert_eq!(quote.coupon_discount, Money::whole(100));
        assert_eq!(quote.payable, Money::whole(844));
        assert_eq!(quote.coupon_code.as_deref(), Some("WELCOME"));

        let missing = CheckoutQuote::build(&cart, &view, None, &address("Kerala"), &policy, Utc::now());
        assert_eq!(missing.unwrap_err(), CheckoutError::Coupon(CouponError::NotFound));
    }

    #[test]
    fn test_payment_checks() {
        let (view, cart, _) = setup();
        let policy = StorePolicy { cod_limit: Money::whole(900), ..StorePolicy::default() };
        let quote = CheckoutQuote::build(&cart, &view, None, &address("Goa"), &policy, Utc::now()).unwrap();
        assert_eq!(quote.check_payment(PaymentMethod::Cod, Money::ZERO, &policy), Err(CheckoutError::CodLimitExceeded { limit: Money::whole(900) }));
        assert!(matches!(quote.check_payment(PaymentMethod::Wallet, Money::whole(500), &policy), Err(CheckoutError::InsufficientBalance { .. })));
        assert!(quote.check_payment(PaymentMethod::Wallet, Money::whole(994), &policy).is_ok());
        assert!(quote.check_payment(PaymentMethod::Gateway, Money::ZERO, &policy).is_ok());
    }

    #[test]
    fn test_empty_cart_and_bad_address() {
        let (view, _, _) = setup();
        let policy = StorePolicy::default();
        let cart = Cart::new(Uuid::now_v7(), Utc::now());
        assert_eq!(CheckoutQuote::build(&cart, &view, None, &address("Goa"), &policy, Utc::now()).unwrap_err(), CheckoutError::EmptyCart);
        let mut bad = address("Goa");
        bad.pincode = "56A001".into();
        assert!(matches!(validate_address(&bad), Err(CheckoutError::InvalidAddress(_))));
    }

    #[test]
    fn test_into_new_order_places() {
        let (view, cart, _) = setup();
        let policy = StorePolicy::default();
        let quote = CheckoutQuote::build(&cart, &view, None, &address("Goa"), &policy, Utc::now()).unwrap();
        let new = quote.into_new_order(cart.user_id(), address("Goa"), PaymentMethod::Gateway, &policy);
        let order = crate::domain::aggregates::Order::place(new, Utc::now()).unwrap();
        assert_eq!(order.items().len(), 2);
        assert_eq!(order.payable(), Money::whole(994));
    }
}
