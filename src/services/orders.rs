//! Order history, cancellations, returns and admin status updates.

use chrono::Utc;
use serde::Serialize;
use sqlx::PgConnection;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::catalog::{move_stock, StockChange};
use super::checkout::own_order;
use super::wallet;
use super::Store;
use crate::db::{self, queries};
use crate::db::queries::OrderFilter;
use crate::domain::aggregates::{ItemStatus, Order, OrderStatus, ReturnDecision, Settlement, WalletMethod, WalletMovement};
use crate::domain::aggregates::order::TaxBreakdown;
use crate::domain::events::DomainEvent;
use crate::domain::Page;
use crate::{Result, StoreError};

const USER_ORDERS_PER_PAGE: u32 = 3;
const ADMIN_ORDERS_PER_PAGE: u32 = 7;

#[derive(Clone, Debug, Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub tax_breakdown: TaxBreakdown,
    pub shipping_address_text: String,
}

impl From<Order> for OrderDetail {
    fn from(order: Order) -> Self {
        Self { tax_breakdown: order.tax_breakdown(), shipping_address_text: order.shipping_address().to_string(), order }
    }
}

/// Outcome of a cancellation or return decision, as shown to the caller.
#[derive(Clone, Debug, Serialize)]
pub struct SettledOrder {
    pub order: OrderDetail,
    pub refunded: crate::domain::value_objects::Money,
}

impl Store {
    // ---- shopper ----

    pub async fn user_orders(&self, user_id: Uuid, page: u32) -> Result<Page<Order>> {
        let mut conn = self.db.acquire().await?;
        let filter = OrderFilter { user_id: Some(user_id), page, per_page: USER_ORDERS_PER_PAGE, ..Default::default() };
        Ok(queries::list_orders(&mut conn, &filter).await?)
    }

    pub async fn user_order(&self, user_id: Uuid, order_number: &str) -> Result<OrderDetail> {
        let mut conn = self.db.acquire().await?;
        let order = queries::order_by_number(&mut conn, order_number, false)
            .await?
            .filter(|o| o.user_id() == user_id)
            .ok_or(StoreError::NotFound("Order"))?;
        Ok(order.into())
    }

    #[instrument(skip(self, reason), fields(user_id = %user_id, order_number = %order_number))]
    pub async fn cancel_order(&self, user_id: Uuid, order_number: &str, reason: &str) -> Result<SettledOrder> {
        let mut tx = self.db.begin().await?;
        let mut order = own_order(&mut tx, user_id, order_number).await?;
        let settlement = order.cancel(reason, Utc::now()).map_err(|e| {
            warn!(error = %e, "cancellation rejected");
            e
        })?;
        self.finish_settlement(tx, order, settlement).await
    }

    #[instrument(skip(self, reason), fields(user_id = %user_id, order_number = %order_number, item_id = %item_id))]
    pub async fn cancel_order_item(&self, user_id: Uuid, order_number: &str, item_id: Uuid, reason: &str) -> Result<SettledOrder> {
        let mut tx = self.db.begin().await?;
        let mut order = own_order(&mut tx, user_id, order_number).await?;
        let settlement = order.cancel_item(item_id, reason, Utc::now())?;
        self.finish_settlement(tx, order, settlement).await
    }

    #[instrument(skip(self, reason), fields(user_id = %user_id, order_number = %order_number))]
    pub async fn request_return(&self, user_id: Uuid, order_number: &str, reason: &str) -> Result<OrderDetail> {
        let mut tx = self.db.begin().await?;
        let mut order = own_order(&mut tx, user_id, order_number).await?;
        order.request_return(reason, Utc::now())?;
        self.finish(tx, order, "return requested").await
    }

    #[instrument(skip(self, reason), fields(user_id = %user_id, order_number = %order_number, item_id = %item_id))]
    pub async fn request_item_return(&self, user_id: Uuid, order_number: &str, item_id: Uuid, reason: &str) -> Result<OrderDetail> {
        let mut tx = self.db.begin().await?;
        let mut order = own_order(&mut tx, user_id, order_number).await?;
        order.request_item_return(item_id, reason, Utc::now())?;
        self.finish(tx, order, "item return requested").await
    }

    // ---- admin ----

    pub async fn admin_orders(&self, status: Option<OrderStatus>, search: Option<String>, page: u32) -> Result<Page<Order>> {
        let mut conn = self.db.acquire().await?;
        let filter = OrderFilter { status, search, page, per_page: ADMIN_ORDERS_PER_PAGE, ..Default::default() };
        Ok(queries::list_orders(&mut conn, &filter).await?)
    }

    pub async fn admin_order(&self, order_number: &str) -> Result<OrderDetail> {
        let mut conn = self.db.acquire().await?;
        let order = queries::order_by_number(&mut conn, order_number, false).await?.ok_or(StoreError::NotFound("Order"))?;
        Ok(order.into())
    }

    #[instrument(skip(self), fields(order_number = %order_number, target = %target))]
    pub async fn update_order_status(&self, order_number: &str, target: OrderStatus) -> Result<OrderDetail> {
        let mut tx = self.db.begin().await?;
        let mut order = locked_order(&mut tx, order_number).await?;
        order.advance(target, Utc::now()).map_err(|e| {
            warn!(error = %e, "status change rejected");
            e
        })?;
        self.finish(tx, order, "order status updated").await
    }

    #[instrument(skip(self), fields(order_number = %order_number, item_id = %item_id, target = %target))]
    pub async fn update_item_status(&self, order_number: &str, item_id: Uuid, target: ItemStatus) -> Result<OrderDetail> {
        let mut tx = self.db.begin().await?;
        let mut order = locked_order(&mut tx, order_number).await?;
        order.advance_item(item_id, target, Utc::now())?;
        self.finish(tx, order, "item status updated").await
    }

    #[instrument(skip(self), fields(order_number = %order_number, decision = ?decision))]
    pub async fn decide_return(&self, order_number: &str, decision: ReturnDecision) -> Result<SettledOrder> {
        let mut tx = self.db.begin().await?;
        let mut order = locked_order(&mut tx, order_number).await?;
        let settlement = order.decide_return(decision, Utc::now())?;
        self.finish_settlement(tx, order, settlement).await
    }

    #[instrument(skip(self), fields(order_number = %order_number, item_id = %item_id, decision = ?decision))]
    pub async fn decide_item_return(&self, order_number: &str, item_id: Uuid, decision: ReturnDecision) -> Result<SettledOrder> {
        let mut tx = self.db.begin().await?;
        let mut order = locked_order(&mut tx, order_number).await?;
        let settlement = order.decide_item_return(item_id, decision, Utc::now())?;
        self.finish_settlement(tx, order, settlement).await
    }

    async fn finish(&self, mut tx: sqlx::Transaction<'_, sqlx::Postgres>, mut order: Order, what: &'static str) -> Result<OrderDetail> {
        db::upsert(&mut tx, &order).await?;
        tx.commit().await?;
        info!(status = %order.status(), "{}", what);
        self.events.publish(order.take_events()).await;
        Ok(order.into())
    }

    async fn finish_settlement(&self, mut tx: sqlx::Transaction<'_, sqlx::Postgres>, mut order: Order, settlement: Settlement) -> Result<SettledOrder> {
        let mut events = order.take_events();
        apply_settlement(&mut tx, &order, &settlement, &mut events).await?;
        db::upsert(&mut tx, &order).await?;
        tx.commit().await?;
        info!(status = %order.status(), refund = %settlement.refund, restocked = settlement.restock.len(), "order settled");
        self.events.publish(events).await;
        Ok(SettledOrder { order: order.into(), refunded: settlement.refund })
    }
}

async fn locked_order(conn: &mut PgConnection, order_number: &str) -> Result<Order> {
    queries::order_by_number(conn, order_number, true).await?.ok_or(StoreError::NotFound("Order"))
}

/// Restocks, refunds to the wallet and releases the coupon use.
async fn apply_settlement(conn: &mut PgConnection, order: &Order, settlement: &Settlement, events: &mut Vec<DomainEvent>) -> Result<()> {
    move_stock(&mut *conn, &settlement.restock, StockChange::Add, events).await?;
    if let Some((amount, method)) = settlement.wallet_refund() {
        let description = match method {
            WalletMethod::OrderCancel => format!("Refund for cancelled order {}", order.order_number()),
            _ => format!("Refund for returned items of order {}", order.order_number()),
        };
        let movement = WalletMovement::new(amount, method, description).for_order(order.order_number());
        wallet::credit(&mut *conn, order.user_id(), movement, events).await?;
    }
    if settlement.release_coupon {
        if let Some(code) = order.coupon_code() {
            match queries::coupon_by_code(&mut *conn, code, true).await? {
                Some(mut coupon) => {
                    coupon.release_use(order.user_id());
                    db::upsert(&mut *conn, &coupon).await?;
                }
                None => warn!(code, "coupon of cancelled order no longer exists"),
            }
        }
    }
    Ok(())
}
