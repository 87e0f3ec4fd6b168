//! Checkout: pricing the cart, placing the order and the gateway callbacks.

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::catalog::{move_stock, StockChange};
use super::cart::load_cart;
use super::wallet;
use super::Store;
use crate::db::{self, queries};
use crate::domain::aggregates::{Cart, Order, PaymentMethod, ShippingAddress, WalletMethod, WalletMovement};
use crate::domain::checkout::CheckoutQuote;
use crate::domain::value_objects::Money;
use crate::{Result, StoreError};

fn gateway_ref() -> String { format!("gw_{}", Uuid::new_v4().simple()) }

impl Store {
    pub async fn checkout_quote(&self, user_id: Uuid, address: &ShippingAddress) -> Result<CheckoutQuote> {
        let mut conn = self.db.acquire().await?;
        let cart = db::find::<Cart>(&mut conn, user_id).await?.unwrap_or_else(|| Cart::new(user_id, Utc::now()));
        let view = queries::load_catalog(&mut conn).await?;
        let coupon = match cart.coupon_code() {
            Some(code) => queries::coupon_by_code(&mut conn, code, false).await?,
            None => None,
        };
        Ok(CheckoutQuote::build(&cart, &view, coupon.as_ref(), address, &self.policy, Utc::now())?)
    }

    #[instrument(skip(self, address), fields(user_id = %user_id, method = ?method))]
    pub async fn place_order(&self, user_id: Uuid, address: ShippingAddress, method: PaymentMethod) -> Result<Order> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;
        let mut cart = load_cart(&mut tx, user_id).await?;
        let view = queries::load_catalog(&mut tx).await?;
        if let Some(notice) = cart.revalidate(&view, now) { info!(notice = ?notice, "cart revalidated at checkout"); }
        let mut coupon = match cart.coupon_code() {
            Some(code) => queries::coupon_by_code(&mut tx, code, true).await?,
            None => None,
        };
        let quote = CheckoutQuote::build(&cart, &view, coupon.as_ref(), &address, &self.policy, now)?;
        let balance = match method {
            PaymentMethod::Wallet => wallet::balance(&mut tx, user_id).await?,
            _ => Money::ZERO,
        };
        if let Err(e) = quote.check_payment(method, balance, &self.policy) {
            warn!(error = %e, "payment method rejected");
            return Err(e.into());
        }
        if quote.skipped > 0 { info!(skipped = quote.skipped, "unavailable cart lines left out"); }

        let mut order = Order::place(quote.into_new_order(user_id, address, method, &self.policy), now)?;
        let mut events = Vec::new();
        if let Some(coupon) = coupon.as_mut().filter(|_| order.coupon_code().is_some()) {
            coupon.record_use(user_id);
            db::upsert(&mut tx, &*coupon).await?;
        }

        match method {
            PaymentMethod::Cod => {
                let movements = order.confirm_cod(now)?;
                move_stock(&mut tx, &movements, StockChange::Remove, &mut events).await?;
                cart.remove_ordered(&order.ordered_lines(), now);
            }
            PaymentMethod::Wallet => {
                if order.payable().is_positive() {
                    let movement = WalletMovement::new(order.payable(), WalletMethod::WalletPayment, format!("Payment for order {}", order.order_number()))
                        .for_order(order.order_number());
                    wallet::debit(&mut tx, user_id, movement, &mut events).await?;
                }
                let movements = order.confirm_wallet_payment(now)?;
                move_stock(&mut tx, &movements, StockChange::Remove, &mut events).await?;
                cart.remove_ordered(&order.ordered_lines(), now);
            }
            PaymentMethod::Gateway => order.start_gateway_payment(gateway_ref(), now)?,
        }

        db::upsert(&mut tx, &order).await?;
        db::upsert(&mut tx, &cart).await?;
        tx.commit().await?;
        info!(order_number = order.order_number(), payable = %order.payable(), "order placed");
        let mut published = order.take_events();
        published.append(&mut events);
        self.events.publish(published).await;
        Ok(order)
    }

    #[instrument(skip(self, gateway_order_ref, payment_ref), fields(user_id = %user_id, order_number = %order_number))]
    pub async fn confirm_gateway_payment(&self, user_id: Uuid, order_number: &str, gateway_order_ref: &str, payment_ref: String) -> Result<Order> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;
        let mut order = own_order(&mut tx, user_id, order_number).await?;
        let movements = order.confirm_payment(gateway_order_ref, payment_ref, now)?;
        let mut events = Vec::new();
        move_stock(&mut tx, &movements, StockChange::Remove, &mut events).await?;
        let mut cart = load_cart(&mut tx, user_id).await?;
        cart.clear(now);
        db::upsert(&mut tx, &order).await?;
        db::upsert(&mut tx, &cart).await?;
        tx.commit().await?;
        info!("gateway payment confirmed");
        let mut published = order.take_events();
        published.append(&mut events);
        self.events.publish(published).await;
        Ok(order)
    }

    #[instrument(skip(self), fields(user_id = %user_id, order_number = %order_number))]
    pub async fn fail_gateway_payment(&self, user_id: Uuid, order_number: &str) -> Result<Order> {
        let mut tx = self.db.begin().await?;
        let mut order = own_order(&mut tx, user_id, order_number).await?;
        order.fail_payment(Utc::now())?;
        db::upsert(&mut tx, &order).await?;
        tx.commit().await?;
        warn!("gateway payment failed");
        self.events.publish(order.take_events()).await;
        Ok(order)
    }

    #[instrument(skip(self), fields(user_id = %user_id, order_number = %order_number))]
    pub async fn retry_payment(&self, user_id: Uuid, order_number: &str) -> Result<Order> {
        let mut tx = self.db.begin().await?;
        let mut order = own_order(&mut tx, user_id, order_number).await?;
        order.retry_payment(gateway_ref(), Utc::now())?;
        db::upsert(&mut tx, &order).await?;
        tx.commit().await?;
        info!(gateway_order_ref = ?order.gateway_order_ref(), "payment retry started");
        Ok(order)
    }
}

/// Locked order that belongs to `user_id`. Other users' orders read as missing.
pub(crate) async fn own_order(conn: &mut sqlx::PgConnection, user_id: Uuid, order_number: &str) -> Result<Order> {
    queries::order_by_number(conn, order_number, true)
        .await?
        .filter(|o| o.user_id() == user_id)
        .ok_or(StoreError::NotFound("Order"))
}
