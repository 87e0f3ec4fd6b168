//! Cart Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::catalog::{CatalogView, Listing};
use crate::domain::policy::StorePolicy;
use crate::domain::value_objects::Money;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cart {
    user_id: Uuid,
    lines: Vec<CartLine>,
    coupon_code: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub sku: String,
    pub size: String,
    pub color: String,
    pub quantity: u32,
    pub base_price: Money,
    pub sale_price: Money,
    pub in_stock: bool,
}

impl CartLine {
    pub fn line_total(&self) -> Money { self.sale_price * self.quantity }

    pub fn is(&self, product_id: Uuid, size: &str, color: &str) -> bool {
        self.product_id == product_id && self.size.eq_ignore_ascii_case(size.trim()) && self.color.eq_ignore_ascii_case(color.trim())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CartTotals {
    pub grand_total: Money,
    pub tax: Money,
    pub shipping: Money,
    pub payable: Money,
    pub item_count: u32,
}

/// What revalidation changed, for the shopper.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CartNotice {
    UnavailableRemoved,
    QuantitiesAdjusted,
}

impl CartNotice {
    pub fn message(&self) -> &'static str {
        match self {
            Self::UnavailableRemoved => "Some unavailable products were removed from your cart.",
            Self::QuantitiesAdjusted => "Quantities adjusted due to stock changes.",
        }
    }
}

impl Cart {
    pub fn new(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self { user_id, lines: vec![], coupon_code: None, created_at: now, updated_at: now }
    }

    pub fn user_id(&self) -> Uuid { self.user_id }
    pub fn lines(&self) -> &[CartLine] { &self.lines }
    pub fn coupon_code(&self) -> Option<&str> { self.coupon_code.as_deref() }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn is_empty(&self) -> bool { self.lines.is_empty() }

    /// Adds `quantity` of a variant, merging into an existing line. Returns
    /// true when an existing line was updated.
    pub fn add(&mut self, listing: &Listing<'_>, size: &str, color: &str, quantity: u32, policy: &StorePolicy, now: DateTime<Utc>) -> Result<bool, CartError> {
        if quantity == 0 { return Err(CartError::InvalidQuantity); }
        if !listing.is_purchasable() { return Err(CartError::ProductUnavailable); }
        let variant = listing.product.variant(size, color).ok_or(CartError::VariantUnavailable)?;
        let stock = variant.stock.value();
        if stock < 1 { return Err(CartError::OutOfStock); }
        let product_id = listing.product.id();
        let existing = self.lines.iter().position(|l| l.is(product_id, size, color));
        let wanted = existing.map_or(0, |i| self.lines[i].quantity) + quantity;
        if wanted > policy.max_qty_per_line { return Err(CartError::QuantityLimit { max: policy.max_qty_per_line }); }
        if wanted > stock { return Err(CartError::NotEnoughStock { available: stock }); }
        let quote = listing.quote(variant, now);
        let merged = match existing {
            Some(i) => {
                let line = &mut self.lines[i];
                line.quantity = wanted;
                line.base_price = quote.base;
                line.sale_price = quote.sale;
                true
            }
            None => {
                self.lines.push(CartLine {
                    product_id, product_name: listing.product.name().to_string(), sku: variant.sku.to_string(),
                    size: variant.size.clone(), color: variant.color.clone(), quantity, base_price: quote.base,
                    sale_price: quote.sale, in_stock: true,
                });
                false
            }
        };
        self.touch(now);
        Ok(merged)
    }

    pub fn increment(&mut self, listing: &Listing<'_>, size: &str, color: &str, policy: &StorePolicy, now: DateTime<Utc>) -> Result<u32, CartError> {
        let product_id = listing.product.id();
        let line = self.lines.iter().find(|l| l.is(product_id, size, color)).ok_or(CartError::LineNotFound)?;
        if line.quantity >= policy.max_qty_per_line { return Err(CartError::QuantityLimit { max: policy.max_qty_per_line }); }
        self.add(listing, size, color, 1, policy, now)?;
        Ok(self.lines.iter().find(|l| l.is(product_id, size, color)).map_or(0, |l| l.quantity))
    }

    /// Returns the new quantity, or `None` when the line was removed.
    pub fn decrement(&mut self, product_id: Uuid, size: &str, color: &str, now: DateTime<Utc>) -> Result<Option<u32>, CartError> {
        let idx = self.lines.iter().position(|l| l.is(product_id, size, color)).ok_or(CartError::LineNotFound)?;
        let remaining = if self.lines[idx].quantity <= 1 {
            self.lines.remove(idx);
            None
        } else {
            self.lines[idx].quantity -= 1;
            Some(self.lines[idx].quantity)
        };
        self.touch(now);
        Ok(remaining)
    }

    pub fn remove(&mut self, product_id: Uuid, size: &str, color: &str, now: DateTime<Utc>) -> Result<(), CartError> {
        let before = self.lines.len();
        self.lines.retain(|l| !l.is(product_id, size, color));
        if self.lines.len() == before { return Err(CartError::LineNotFound); }
        self.touch(now);
        Ok(())
    }

    /// Drops the lines an order was placed for.
    pub fn remove_ordered(&mut self, ordered: &[(Uuid, String, String)], now: DateTime<Utc>) {
        self.lines.retain(|l| !ordered.iter().any(|(p, s, c)| l.is(*p, s, c)));
        self.coupon_code = None;
        self.touch(now);
    }

    pub fn clear(&mut self, now: DateTime<Utc>) {
        self.lines.clear();
        self.coupon_code = None;
        self.touch(now);
    }

    pub fn apply_coupon(&mut self, code: impl Into<String>, now: DateTime<Utc>) { self.coupon_code = Some(code.into()); self.touch(now); }
    pub fn clear_coupon(&mut self, now: DateTime<Utc>) { self.coupon_code = None; self.touch(now); }

    /// Re-checks every line against the live catalog: unavailable lines are
    /// dropped, out-of-stock lines are kept but flagged, quantities are
    /// clamped to stock and prices refreshed.
    pub fn revalidate(&mut self, catalog: &CatalogView, now: DateTime<Utc>) -> Option<CartNotice> {
        let mut notice = None;
        let mut kept = Vec::with_capacity(self.lines.len());
        for mut line in std::mem::take(&mut self.lines) {
            let Some(listing) = catalog.listing(line.product_id).filter(|l| l.is_purchasable()) else {
                notice = Some(CartNotice::UnavailableRemoved);
                continue;
            };
            let Some(variant) = listing.product.variant(&line.size, &line.color) else {
                notice = Some(CartNotice::UnavailableRemoved);
                continue;
            };
            let stock = variant.stock.value();
            line.in_stock = stock > 0;
            if line.in_stock && line.quantity > stock {
                line.quantity = stock;
                notice.get_or_insert(CartNotice::QuantitiesAdjusted);
            }
            let quote = listing.quote(variant, now);
            line.base_price = quote.base;
            line.sale_price = quote.sale;
            kept.push(line);
        }
        self.lines = kept;
        self.touch(now);
        notice
    }

    pub fn in_stock_lines(&self) -> impl Iterator<Item = &CartLine> { self.lines.iter().filter(|l| l.in_stock) }

    pub fn totals(&self, policy: &StorePolicy) -> CartTotals {
        let grand_total: Money = self.in_stock_lines().map(CartLine::line_total).sum();
        let tax = policy.tax_on(grand_total);
        let shipping = policy.cart_shipping(grand_total);
        CartTotals {
            grand_total, tax, shipping, payable: grand_total + tax + shipping,
            item_count: self.in_stock_lines().map(|l| l.quantity).sum(),
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) { self.updated_at = now; }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CartError {
    #[error("Product not available")]
    ProductUnavailable,
    #[error("Variant not available")]
    VariantUnavailable,
    #[error("Out of stock")]
    OutOfStock,
    #[error("Max {max} allowed per item")]
    QuantityLimit { max: u32 },
    #[error("Not enough stock, only {available} left")]
    NotEnoughStock { available: u32 },
    #[error("Item not found in cart")]
    LineNotFound,
    #[error("Quantity must be at least 1")]
    InvalidQuantity,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{CatalogNodeDraft, Category, NewVariant, Product, ProductDraft, Subcategory};

    fn catalog(stock: u32, price: i64) -> (CatalogView, Uuid) {
        let now = Utc::now();
        let node = |n: &str| CatalogNodeDraft { name: n.into(), listed: true, ..Default::default() };
        let cat = Category::create(node("Men"), now).unwrap();
        let sub = Subcategory::create(&cat, node("Jeans"), now).unwrap();
        let p = Product::create(ProductDraft {
            name: "Slim Jeans".into(), description: String::new(), category_id: cat.id(), subcategory_id: sub.id(),
            variants: vec![NewVariant { sku: None, size: "32".into(), color: "Indigo".into(), price: Money::whole(price), stock }],
            images: vec![], tags: vec![], fit_type: None, listed: true,
        }, now).unwrap();
        let id = p.id();
        (CatalogView::new(vec![cat], vec![sub], vec![p]), id)
    }

    #[test]
    fn test_cart_operations() {
        let policy = StorePolicy::default();
        let (view, id) = catalog(10, 400);
        let mut cart = Cart::new(Uuid::now_v7(), Utc::now());
        let listing = view.listing(id).unwrap();
        assert!(!cart.add(&listing, "32", "indigo", 2, &policy, Utc::now()).unwrap());
        assert!(cart.add(&listing, "32", "Indigo", 1, &policy, Utc::now()).unwrap());
        assert_eq!(cart.lines()[0].quantity, 3); // Merged
        let totals = cart.totals(&policy);
        assert_eq!(totals.grand_total, Money::whole(1200));
        assert_eq!(totals.tax, Money::whole(216));
        assert_eq!(totals.shipping, Money::ZERO);
        assert_eq!(totals.payable, Money::whole(1416));
    }

    #[test]
    fn test_quantity_limit_and_stock() {
        let policy = StorePolicy::default();
        let (view, id) = catalog(3, 100);
        let listing = view.listing(id).unwrap();
        let mut cart = Cart::new(Uuid::now_v7(), Utc::now());
        assert_eq!(cart.add(&listing, "32", "Indigo", 4, &policy, Utc::now()), Err(CartError::NotEnoughStock { available: 3 }));
        let (view, id) = catalog(10, 100);
        let listing = view.listing(id).unwrap();
        cart.add(&listing, "32", "Indigo", 5, &policy, Utc::now()).unwrap();
        assert_eq!(cart.increment(&listing, "32", "Indigo", &policy, Utc::now()), Err(CartError::QuantityLimit { max: 5 }));
    }

    #[test]
    fn test_decrement_removes_last_unit() {
        let policy = StorePolicy::default();
        let (view, id) = catalog(5, 100);
        let mut cart = Cart::new(Uuid::now_v7(), Utc::now());
        cart.add(&view.listing(id).unwrap(), "32", "Indigo", 2, &policy, Utc::now()).unwrap();
        assert_eq!(cart.decrement(id, "32", "Indigo", Utc::now()).unwrap(), Some(1));
        assert_eq!(cart.decrement(id, "32", "Indigo", Utc::now()).unwrap(), None);
        assert!(cart.is_empty());
        assert_eq!(cart.remove(id, "32", "Indigo", Utc::now()), Err(CartError::LineNotFound));
    }

    #[test]
    fn test_small_cart_pays_shipping() {
        let policy = StorePolicy::default();
        let (view, id) = catalog(5, 300);
        let mut cart = Cart::new(Uuid::now_v7(), Utc::now());
        cart.add(&view.listing(id).unwrap(), "32", "Indigo", 1, &policy, Utc::now()).unwrap();
        let totals = cart.totals(&policy);
        assert_eq!(totals.shipping, Money::whole(50));
        assert_eq!(totals.payable, Money::whole(404));
    }

    #[test]
    fn test_revalidate_clamps_and_flags() {
        let policy = StorePolicy::default();
        let (mut view, id) = catalog(5, 100);
        let mut cart = Cart::new(Uuid::now_v7(), Utc::now());
        cart.add(&view.listing(id).unwrap(), "32", "Indigo", 4, &policy, Utc::now()).unwrap();

        view.product_mut(id).unwrap().withdraw("32", "Indigo", 3, Utc::now()).unwrap();
        assert_eq!(cart.revalidate(&view, Utc::now()), Some(CartNotice::QuantitiesAdjusted));
        assert_eq!(cart.lines()[0].quantity, 2);

        view.product_mut(id).unwrap().withdraw("32", "Indigo", 2, Utc::now()).unwrap();
        assert_eq!(cart.revalidate(&view, Utc::now()), None);
        assert!(!cart.lines()[0].in_stock);
        assert_eq!(cart.totals(&policy).grand_total, Money::ZERO);

        view.product_mut(id).unwrap().soft_delete(Utc::now()).unwrap();
        assert_eq!(cart.revalidate(&view, Utc::now()), Some(CartNotice::UnavailableRemoved));
        assert!(cart.is_empty());
    }
}
