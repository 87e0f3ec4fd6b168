//! Shopper cart.

use chrono::Utc;
use serde::Serialize;
use sqlx::PgConnection;
use tracing::{info, instrument};
use uuid::Uuid;

use super::Store;
use crate::db::{self, queries};
use crate::domain::aggregates::coupon::normalize_code;
use crate::domain::aggregates::{Cart, CartError, CartLine, CartTotals, CouponError};
use crate::domain::value_objects::Money;
use crate::Result;

#[derive(Clone, Debug, Serialize)]
pub struct CartView {
    pub lines: Vec<CartLine>,
    pub coupon_code: Option<String>,
    pub totals: CartTotals,
    /// Set when revalidation changed the cart.
    pub notice: Option<&'static str>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CouponApplied { pub code: String, pub discount: Money }

/// Identifies one cart line.
#[derive(Clone, Debug)]
pub struct LineKey { pub product_id: Uuid, pub size: String, pub color: String }

impl Store {
    fn cart_view(&self, cart: &Cart, notice: Option<&'static str>) -> CartView {
        CartView {
            lines: cart.lines().to_vec(),
            coupon_code: cart.coupon_code().map(str::to_string),
            totals: cart.totals(&self.policy),
            notice,
        }
    }

    /// Revalidates against the live catalog before returning.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn cart(&self, user_id: Uuid) -> Result<CartView> {
        let mut tx = self.db.begin().await?;
        let mut cart = load_cart(&mut tx, user_id).await?;
        let view = queries::load_catalog(&mut tx).await?;
        let notice = cart.revalidate(&view, Utc::now());
        db::upsert(&mut tx, &cart).await?;
        tx.commit().await?;
        if let Some(n) = &notice { info!(notice = ?n, "cart revalidated"); }
        Ok(self.cart_view(&cart, notice.map(|n| n.message())))
    }

    #[instrument(skip(self, key), fields(user_id = %user_id, product_id = %key.product_id))]
    pub async fn add_to_cart(&self, user_id: Uuid, key: LineKey, quantity: u32) -> Result<CartView> {
        let mut tx = self.db.begin().await?;
        let mut cart = load_cart(&mut tx, user_id).await?;
        let view = queries::load_catalog(&mut tx).await?;
        let listing = view.listing(key.product_id).ok_or(CartError::ProductUnavailable)?;
        let merged = cart.add(&listing, &key.size, &key.color, quantity, &self.policy, Utc::now())?;
        db::upsert(&mut tx, &cart).await?;
        tx.commit().await?;
        info!(merged, quantity, "added to cart");
        Ok(self.cart_view(&cart, None))
    }

    #[instrument(skip(self, key), fields(user_id = %user_id, product_id = %key.product_id))]
    pub async fn increment_line(&self, user_id: Uuid, key: LineKey) -> Result<CartView> {
        let mut tx = self.db.begin().await?;
        let mut cart = load_cart(&mut tx, user_id).await?;
        let view = queries::load_catalog(&mut tx).await?;
        let listing = view.listing(key.product_id).ok_or(CartError::ProductUnavailable)?;
        cart.increment(&listing, &key.size, &key.color, &self.policy, Utc::now())?;
        db::upsert(&mut tx, &cart).await?;
        tx.commit().await?;
        Ok(self.cart_view(&cart, None))
    }

    #[instrument(skip(self, key), fields(user_id = %user_id, product_id = %key.product_id))]
    pub async fn decrement_line(&self, user_id: Uuid, key: LineKey) -> Result<CartView> {
        let mut tx = self.db.begin().await?;
        let mut cart = load_cart(&mut tx, user_id).await?;
        cart.decrement(key.product_id, &key.size, &key.color, Utc::now())?;
        db::upsert(&mut tx, &cart).await?;
        tx.commit().await?;
        Ok(self.cart_view(&cart, None))
    }

    #[instrument(skip(self, key), fields(user_id = %user_id, product_id = %key.product_id))]
    pub async fn remove_line(&self, user_id: Uuid, key: LineKey) -> Result<CartView> {
        let mut tx = self.db.begin().await?;
        let mut cart = load_cart(&mut tx, user_id).await?;
        cart.remove(key.product_id, &key.size, &key.color, Utc::now())?;
        db::upsert(&mut tx, &cart).await?;
        tx.commit().await?;
        info!("cart line removed");
        Ok(self.cart_view(&cart, None))
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn clear_cart(&self, user_id: Uuid) -> Result<()> {
        let mut tx = self.db.begin().await?;
        let mut cart = load_cart(&mut tx, user_id).await?;
        cart.clear(Utc::now());
        db::upsert(&mut tx, &cart).await?;
        tx.commit().await?;
        info!("cart cleared");
        Ok(())
    }

    /// Checks the coupon against the current cart totals and remembers it.
    #[instrument(skip(self, code), fields(user_id = %user_id))]
    pub async fn apply_coupon(&self, user_id: Uuid, code: &str) -> Result<CouponApplied> {
        let mut tx = self.db.begin().await?;
        let mut cart = load_cart(&mut tx, user_id).await?;
        if cart.is_empty() { return Err(CartError::LineNotFound.into()); }
        let coupon = queries::coupon_by_code(&mut tx, &normalize_code(code), false).await?.ok_or(CouponError::NotFound)?;
        let totals = cart.totals(&self.policy);
        let discount = coupon.check(user_id, totals.grand_total, totals.tax, Utc::now())?;
        cart.apply_coupon(coupon.code(), Utc::now());
        db::upsert(&mut tx, &cart).await?;
        tx.commit().await?;
        info!(code = coupon.code(), %discount, "coupon applied");
        Ok(CouponApplied { code: coupon.code().to_string(), discount })
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn remove_coupon(&self, user_id: Uuid) -> Result<CartView> {
        let mut tx = self.db.begin().await?;
        let mut cart = load_cart(&mut tx, user_id).await?;
        cart.clear_coupon(Utc::now());
        db::upsert(&mut tx, &cart).await?;
        tx.commit().await?;
        Ok(self.cart_view(&cart, None))
    }
}

/// Locked cart of the user, or a fresh one.
pub(crate) async fn load_cart(conn: &mut PgConnection, user_id: Uuid) -> Result<Cart> {
    Ok(db::find_for_update::<Cart>(conn, user_id).await?.unwrap_or_else(|| Cart::new(user_id, Utc::now())))
}
