//! Order Aggregate
//!
//! Items carry their own status. The order status is always derived from the
//! item statuses, see [`derive_status`].

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::aggregates::wallet::WalletMethod;
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::refund::item_refund;
use crate::domain::value_objects::Money;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Shipped,
    OutForDelivery,
    Delivered,
    Cancelled,
    ReturnRequested,
    Returned,
    Failed,
}

/// Items move through the same states as orders.
pub type ItemStatus = OrderStatus;

impl OrderStatus {
    pub const ALL: [OrderStatus; 9] = [
        Self::Pending, Self::Confirmed, Self::Shipped, Self::OutForDelivery, Self::Delivered,
        Self::Cancelled, Self::ReturnRequested, Self::Returned, Self::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Shipped => "shipped",
            Self::OutForDelivery => "out_for_delivery",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::ReturnRequested => "return_requested",
            Self::Returned => "returned",
            Self::Failed => "failed",
        }
    }

    pub fn can_transition_to(self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, to),
            (Pending, Confirmed | Cancelled | Failed)
                | (Confirmed, Shipped | Cancelled)
                | (Shipped, OutForDelivery | Delivered)
                | (OutForDelivery, Delivered)
                | (Delivered, ReturnRequested)
                | (ReturnRequested, Returned | Delivered)
                | (Failed, Pending)
        )
    }

    /// Position on the forward chain, `None` for side branches.
    fn rank(self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Confirmed => Some(1),
            Self::Shipped => Some(2),
            Self::OutForDelivery => Some(3),
            Self::Delivered => Some(4),
            _ => None,
        }
    }

    fn is_settled(self) -> bool { matches!(self, Self::Cancelled | Self::Returned) }

    /// Item states a cancel may still unwind.
    fn is_cancellable(self) -> bool { matches!(self, Self::Pending | Self::Confirmed | Self::Failed) }

    /// Targets an admin may set directly.
    pub fn is_admin_target(self) -> bool {
        matches!(self, Self::Confirmed | Self::Shipped | Self::OutForDelivery | Self::Delivered)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for OrderStatus {
    type Err = OrderError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|st| st.as_str() == s).ok_or_else(|| OrderError::UnknownStatus(s.to_string()))
    }
}

/// Order status from item statuses, `None` when there are no items.
pub fn derive_status(items: &[ItemStatus]) -> Option<OrderStatus> {
    if items.is_empty() { return None; }
    if items.iter().all(|s| *s == OrderStatus::Cancelled) { return Some(OrderStatus::Cancelled); }
    if items.iter().all(|s| s.is_settled()) { return Some(OrderStatus::Returned); }
    let active: Vec<ItemStatus> = items.iter().copied().filter(|s| !s.is_settled()).collect();
    if active.iter().all(|s| *s == OrderStatus::Failed) { return Some(OrderStatus::Failed); }
    if active.contains(&OrderStatus::ReturnRequested) { return Some(OrderStatus::ReturnRequested); }
    active.into_iter().filter_map(|s| s.rank().map(|r| (r, s))).min_by_key(|(r, _)| *r).map(|(_, s)| s)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod { Cod, Wallet, Gateway }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus { #[default] Pending, Completed, Failed, Refunded }

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnDecision { Accept, Reject }

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub name: String,
    pub phone: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub pincode: String,
    pub country: String,
}

impl fmt::Display for ShippingAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.name, self.line1)?;
        if let Some(line2) = self.line2.as_deref().filter(|l| !l.trim().is_empty()) { write!(f, ", {}", line2)?; }
        write!(f, ", {}, {} - {}, {} (phone {})", self.city, self.state, self.pincode, self.country, self.phone)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub category: String,
    pub subcategory: String,
    pub sku: String,
    pub size: String,
    pub color: String,
    pub quantity: u32,
    pub base_price: Money,
    pub sale_price: Money,
    pub final_price: Money,
    pub status: ItemStatus,
    pub cancellation_reason: Option<String>,
    pub cancelled_on: Option<DateTime<Utc>>,
    pub return_reason: Option<String>,
    pub return_requested_on: Option<DateTime<Utc>>,
    pub returned_on: Option<DateTime<Utc>>,
}

impl OrderItem {
    fn stock(&self) -> StockMovement {
        StockMovement { product_id: self.product_id, size: self.size.clone(), color: self.color.clone(), quantity: self.quantity }
    }
}

#[derive(Clone, Debug)]
pub struct NewOrderItem {
    pub product_id: Uuid,
    pub product_name: String,
    pub category: String,
    pub subcategory: String,
    pub sku: String,
    pub size: String,
    pub color: String,
    pub quantity: u32,
    pub base_price: Money,
    pub sale_price: Money,
}

/// Priced checkout, ready to become an order.
#[derive(Clone, Debug)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub items: Vec<NewOrderItem>,
    pub subtotal: Money,
    pub offer_discount: Money,
    pub tax: Money,
    pub tax_rate: Decimal,
    pub shipping_charge: Money,
    pub coupon_code: Option<String>,
    pub coupon_discount: Money,
    pub payable: Money,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StockMovement { pub product_id: Uuid, pub size: String, pub color: String, pub quantity: u32 }

/// Side effects the service applies after a cancellation or return.
#[derive(Clone, Debug, Default)]
pub struct Settlement {
    pub restock: Vec<StockMovement>,
    /// Amount owed to the wallet; zero when nothing is refunded.
    pub refund: Money,
    pub refund_method: Option<WalletMethod>,
    pub release_coupon: bool,
}

impl Settlement {
    pub fn wallet_refund(&self) -> Option<(Money, WalletMethod)> {
        self.refund_method.filter(|_| self.refund.is_positive()).map(|m| (self.refund, m))
    }

    fn absorb(&mut self, other: Settlement) {
        self.restock.extend(other.restock);
        self.refund += other.refund;
        self.refund_method = self.refund_method.or(other.refund_method);
        self.release_coupon |= other.release_coupon;
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct TaxBreakdown { pub cgst: Money, pub sgst: Money, pub rate_each: Decimal }

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    id: Uuid,
    order_number: String,
    user_id: Uuid,
    items: Vec<OrderItem>,
    subtotal: Money,
    offer_discount: Money,
    tax: Money,
    tax_rate: Decimal,
    shipping_charge: Money,
    coupon_code: Option<String>,
    coupon_discount: Money,
    payable: Money,
    shipping_address: ShippingAddress,
    payment_method: PaymentMethod,
    payment_status: PaymentStatus,
    gateway_order_ref: Option<String>,
    gateway_payment_ref: Option<String>,
    stock_committed: bool,
    status: OrderStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    delivered_on: Option<DateTime<Utc>>,
    cancelled_on: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

impl Order {
    pub fn place(new: NewOrder, now: DateTime<Utc>) -> Result<Self, OrderError> {
        if new.items.is_empty() { return Err(OrderError::NoItems); }
        let items = new
            .items
            .into_iter()
            .map(|i| OrderItem {
                id: Uuid::now_v7(), final_price: i.sale_price * i.quantity, product_id: i.product_id,
                product_name: i.product_name, category: i.category, subcategory: i.subcategory, sku: i.sku,
                size: i.size, color: i.color, quantity: i.quantity, base_price: i.base_price, sale_price: i.sale_price,
                status: ItemStatus::Pending, cancellation_reason: None, cancelled_on: None, return_reason: None,
                return_requested_on: None, returned_on: None,
            })
            .collect();
        let mut order = Self {
            id: Uuid::now_v7(), order_number: Self::generate_number(now), user_id: new.user_id, items,
            subtotal: new.subtotal, offer_discount: new.offer_discount, tax: new.tax, tax_rate: new.tax_rate,
            shipping_charge: new.shipping_charge, coupon_code: new.coupon_code, coupon_discount: new.coupon_discount,
            payable: new.payable, shipping_address: new.shipping_address, payment_method: new.payment_method,
            payment_status: PaymentStatus::Pending, gateway_order_ref: None, gateway_payment_ref: None,
            stock_committed: false, status: OrderStatus::Pending, created_at: now, updated_at: now,
            delivered_on: None, cancelled_on: None, cancellation_reason: None, events: vec![],
        };
        let event = OrderEvent::Placed { order_number: order.order_number.clone(), user_id: order.user_id, payable: order.payable };
        order.raise_event(DomainEvent::Order(event));
        Ok(order)
    }

    /// `MM` + last six digits of the millisecond clock + a random 0..999.
    fn generate_number(now: DateTime<Utc>) -> String {
        let millis = now.timestamp_millis().rem_euclid(1_000_000);
        let salt: u16 = rand::thread_rng().gen_range(0..1000);
        format!("MM{:06}{}", millis, salt)
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn order_number(&self) -> &str { &self.order_number }
    pub fn user_id(&self) -> Uuid { self.user_id }
    pub fn items(&self) -> &[OrderItem] { &self.items }
    pub fn item(&self, item_id: Uuid) -> Option<&OrderItem> { self.items.iter().find(|i| i.id == item_id) }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn subtotal(&self) -> Money { self.subtotal }
    pub fn offer_discount(&self) -> Money { self.offer_discount }
    pub fn tax(&self) -> Money { self.tax }
    pub fn shipping_charge(&self) -> Money { self.shipping_charge }
    pub fn coupon_code(&self) -> Option<&str> { self.coupon_code.as_deref() }
    pub fn coupon_discount(&self) -> Money { self.coupon_discount }
    pub fn payable(&self) -> Money { self.payable }
    pub fn shipping_address(&self) -> &ShippingAddress { &self.shipping_address }
    pub fn payment_method(&self) -> PaymentMethod { self.payment_method }
    pub fn payment_status(&self) -> PaymentStatus { self.payment_status }
    pub fn gateway_order_ref(&self) -> Option<&str> { self.gateway_order_ref.as_deref() }
    pub fn is_stock_committed(&self) -> bool { self.stock_committed }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn delivered_on(&self) -> Option<DateTime<Utc>> { self.delivered_on }
    pub fn cancelled_on(&self) -> Option<DateTime<Utc>> { self.cancelled_on }

    /// Cart keys of the ordered lines.
    pub fn ordered_lines(&self) -> Vec<(Uuid, String, String)> {
        self.items.iter().map(|i| (i.product_id, i.size.clone(), i.color.clone())).collect()
    }

    pub fn tax_breakdown(&self) -> TaxBreakdown {
        let half = Money::new(self.tax.amount() / Decimal::TWO);
        TaxBreakdown { cgst: half, sgst: self.tax - half, rate_each: self.tax_rate / Decimal::TWO }
    }

    pub fn confirm_cod(&mut self, now: DateTime<Utc>) -> Result<Vec<StockMovement>, OrderError> {
        self.require_method(PaymentMethod::Cod)?;
        self.confirm(PaymentStatus::Pending, now)
    }

    /// The wallet debit has already been taken by the caller.
    pub fn confirm_wallet_payment(&mut self, now: DateTime<Utc>) -> Result<Vec<StockMovement>, OrderError> {
        self.require_method(PaymentMethod::Wallet)?;
        self.confirm(PaymentStatus::Completed, now)
    }

    pub fn start_gateway_payment(&mut self, gateway_order_ref: impl Into<String>, now: DateTime<Utc>) -> Result<(), OrderError> {
        self.require_method(PaymentMethod::Gateway)?;
        if self.payment_status != PaymentStatus::Pending { return Err(OrderError::PaymentNotPending); }
        self.gateway_order_ref = Some(gateway_order_ref.into());
        self.touch(now);
        Ok(())
    }

    pub fn confirm_payment(&mut self, gateway_order_ref: &str, payment_ref: impl Into<String>, now: DateTime<Utc>) -> Result<Vec<StockMovement>, OrderError> {
        self.require_method(PaymentMethod::Gateway)?;
        if self.payment_status != PaymentStatus::Pending { return Err(OrderError::PaymentNotPending); }
        if self.gateway_order_ref.as_deref() != Some(gateway_order_ref) { return Err(OrderError::GatewayMismatch); }
        let movements = self.confirm(PaymentStatus::Completed, now)?;
        self.gateway_payment_ref = Some(payment_ref.into());
        self.raise_event(DomainEvent::Order(OrderEvent::PaymentConfirmed { order_number: self.order_number.clone() }));
        Ok(movements)
    }

    pub fn fail_payment(&mut self, now: DateTime<Utc>) -> Result<(), OrderError> {
        self.require_method(PaymentMethod::Gateway)?;
        if self.payment_status != PaymentStatus::Pending { return Err(OrderError::PaymentNotPending); }
        for item in self.items.iter_mut().filter(|i| i.status == ItemStatus::Pending) {
            item.status = ItemStatus::Failed;
        }
        self.payment_status = PaymentStatus::Failed;
        self.refresh_status(now);
        self.raise_event(DomainEvent::Order(OrderEvent::PaymentFailed { order_number: self.order_number.clone() }));
        Ok(())
    }

    pub fn retry_payment(&mut self, gateway_order_ref: impl Into<String>, now: DateTime<Utc>) -> Result<(), OrderError> {
        if self.payment_status != PaymentStatus::Failed || self.status == OrderStatus::Cancelled {
            return Err(OrderError::RetryNotAllowed);
        }
        for item in self.items.iter_mut().filter(|i| i.status == ItemStatus::Failed) {
            item.status = ItemStatus::Pending;
        }
        self.payment_status = PaymentStatus::Pending;
        self.gateway_order_ref = Some(gateway_order_ref.into());
        self.refresh_status(now);
        Ok(())
    }

    pub fn cancel(&mut self, reason: &str, now: DateTime<Utc>) -> Result<Settlement, OrderError> {
        let reason = require_reason(reason)?;
        match self.status {
            OrderStatus::Cancelled => return Err(OrderError::AlreadyCancelled),
            OrderStatus::Shipped | OrderStatus::OutForDelivery | OrderStatus::Delivered
            | OrderStatus::ReturnRequested | OrderStatus::Returned => return Err(OrderError::NotCancellable(self.status)),
            _ => {}
        }
        // A sibling already on its way out blocks a whole-order cancel.
        if let Some(item) = self.items.iter().find(|i| !i.status.is_settled() && !i.status.is_cancellable()) {
            return Err(OrderError::NotCancellable(item.status));
        }
        let mut settlement = Settlement::default();
        let mut refund = self.shipping_charge;
        for idx in 0..self.items.len() {
            if !self.items[idx].status.is_cancellable() { continue; }
            refund += self.item_refund(&self.items[idx]);
            if self.stock_committed { settlement.restock.push(self.items[idx].stock()); }
            let item = &mut self.items[idx];
            item.status = ItemStatus::Cancelled;
            item.cancellation_reason = Some(reason.clone());
            item.cancelled_on = Some(now);
        }
        if self.refunds_on_cancel() {
            settlement.refund = refund;
            settlement.refund_method = Some(WalletMethod::OrderCancel);
            self.payment_status = PaymentStatus::Refunded;
        }
        settlement.release_coupon = self.coupon_code.is_some();
        self.cancellation_reason = Some(reason);
        self.cancelled_on = Some(now);
        self.refresh_status(now);
        let event = OrderEvent::Cancelled { order_number: self.order_number.clone(), refund: settlement.refund };
        self.raise_event(DomainEvent::Order(event));
        Ok(settlement)
    }

    pub fn cancel_item(&mut self, item_id: Uuid, reason: &str, now: DateTime<Utc>) -> Result<Settlement, OrderError> {
        let reason = require_reason(reason)?;
        let idx = self.item_index(item_id)?;
        let status = self.items[idx].status;
        if !matches!(status, ItemStatus::Pending | ItemStatus::Confirmed) { return Err(OrderError::ItemNotCancellable(status)); }

        let mut settlement = Settlement::default();
        let mut refund = self.item_refund(&self.items[idx]);
        if self.stock_committed { settlement.restock.push(self.items[idx].stock()); }
        let item = &mut self.items[idx];
        item.status = ItemStatus::Cancelled;
        item.cancellation_reason = Some(reason.clone());
        item.cancelled_on = Some(now);

        if self.items.iter().all(|i| i.status.is_settled()) { refund += self.shipping_charge; }
        if self.refunds_on_cancel() {
            settlement.refund = refund;
            settlement.refund_method = Some(WalletMethod::OrderCancel);
        }
        self.refresh_status(now);
        if self.status == OrderStatus::Cancelled {
            settlement.release_coupon = self.coupon_code.is_some();
            if settlement.refund_method.is_some() { self.payment_status = PaymentStatus::Refunded; }
            self.cancellation_reason = Some(reason);
            self.cancelled_on = Some(now);
        }
        let event = OrderEvent::ItemCancelled { order_number: self.order_number.clone(), item_id, refund: settlement.refund };
        self.raise_event(DomainEvent::Order(event));
        Ok(settlement)
    }

    pub fn request_item_return(&mut self, item_id: Uuid, reason: &str, now: DateTime<Utc>) -> Result<(), OrderError> {
        let reason = require_reason(reason)?;
        let idx = self.item_index(item_id)?;
        let status = self.items[idx].status;
        if status != ItemStatus::Delivered { return Err(OrderError::ItemNotReturnable(status)); }
        self.mark_return_requested(idx, &reason, now);
        self.refresh_status(now);
        let event = OrderEvent::ReturnRequested { order_number: self.order_number.clone(), item_ids: vec![item_id] };
        self.raise_event(DomainEvent::Order(event));
        Ok(())
    }

    pub fn request_return(&mut self, reason: &str, now: DateTime<Utc>) -> Result<(), OrderError> {
        let reason = require_reason(reason)?;
        if self.status != OrderStatus::Delivered { return Err(OrderError::NotReturnable(self.status)); }
        let eligible: Vec<usize> = (0..self.items.len()).filter(|i| self.items[*i].status == ItemStatus::Delivered).collect();
        if eligible.is_empty() { return Err(OrderError::NothingToReturn); }
        for idx in &eligible { self.mark_return_requested(*idx, &reason, now); }
        self.refresh_status(now);
        let item_ids = eligible.iter().map(|i| self.items[*i].id).collect();
        self.raise_event(DomainEvent::Order(OrderEvent::ReturnRequested { order_number: self.order_number.clone(), item_ids }));
        Ok(())
    }

    pub fn decide_item_return(&mut self, item_id: Uuid, decision: ReturnDecision, now: DateTime<Utc>) -> Result<Settlement, OrderError> {
        let idx = self.item_index(item_id)?;
        if self.items[idx].status != ItemStatus::ReturnRequested { return Err(OrderError::NoReturnPending); }
        let settlement = self.settle_return(idx, decision, now);
        self.refresh_status(now);
        self.raise_return_decision(vec![item_id], decision, settlement.refund);
        Ok(settlement)
    }

    pub fn decide_return(&mut self, decision: ReturnDecision, now: DateTime<Utc>) -> Result<Settlement, OrderError> {
        if self.status != OrderStatus::ReturnRequested { return Err(OrderError::NoReturnPending); }
        let requested: Vec<usize> = (0..self.items.len()).filter(|i| self.items[*i].status == ItemStatus::ReturnRequested).collect();
        let mut settlement = Settlement::default();
        for idx in &requested { settlement.absorb(self.settle_return(*idx, decision, now)); }
        self.refresh_status(now);
        let item_ids = requested.iter().map(|i| self.items[*i].id).collect();
        self.raise_return_decision(item_ids, decision, settlement.refund);
        Ok(settlement)
    }

    /// Moves every active item that may legally reach `target`.
    pub fn advance(&mut self, target: OrderStatus, now: DateTime<Utc>) -> Result<(), OrderError> {
        self.check_admin_target(target)?;
        let movable: Vec<usize> = (0..self.items.len())
            .filter(|i| !self.items[*i].status.is_settled() && self.items[*i].status.can_transition_to(target))
            .collect();
        if movable.is_empty() { return Err(OrderError::InvalidTransition { from: self.status, to: target }); }
        for idx in movable { self.items[idx].status = target; }
        self.after_advance(target, now);
        Ok(())
    }

    pub fn advance_item(&mut self, item_id: Uuid, target: ItemStatus, now: DateTime<Utc>) -> Result<(), OrderError> {
        self.check_admin_target(target)?;
        let idx = self.item_index(item_id)?;
        let from = self.items[idx].status;
        if !from.can_transition_to(target) { return Err(OrderError::InvalidTransition { from, to: target }); }
        self.items[idx].status = target;
        self.after_advance(target, now);
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self, now: DateTime<Utc>) { self.updated_at = now; }

    fn confirm(&mut self, payment: PaymentStatus, now: DateTime<Utc>) -> Result<Vec<StockMovement>, OrderError> {
        if self.status != OrderStatus::Pending {
            return Err(OrderError::InvalidTransition { from: self.status, to: OrderStatus::Confirmed });
        }
        for item in self.items.iter_mut().filter(|i| i.status == ItemStatus::Pending) {
            item.status = ItemStatus::Confirmed;
        }
        self.payment_status = payment;
        self.refresh_status(now);
        Ok(self.commit_stock())
    }

    fn commit_stock(&mut self) -> Vec<StockMovement> {
        if self.stock_committed { return vec![]; }
        self.stock_committed = true;
        self.items.iter().filter(|i| !i.status.is_settled()).map(OrderItem::stock).collect()
    }

    fn check_admin_target(&self, target: OrderStatus) -> Result<(), OrderError> {
        if !target.is_admin_target() { return Err(OrderError::InvalidStatusTarget(target)); }
        // Confirming by hand would skip the stock commit of the payment path.
        if target == OrderStatus::Confirmed && !self.stock_committed { return Err(OrderError::AwaitingPayment); }
        Ok(())
    }

    fn after_advance(&mut self, target: OrderStatus, now: DateTime<Utc>) {
        if target == OrderStatus::Delivered {
            self.delivered_on = Some(now);
            if self.payment_method == PaymentMethod::Cod && self.payment_status == PaymentStatus::Pending {
                self.payment_status = PaymentStatus::Completed;
            }
        }
        self.refresh_status(now);
        let event = OrderEvent::StatusChanged { order_number: self.order_number.clone(), status: self.status.to_string() };
        self.raise_event(DomainEvent::Order(event));
    }

    fn settle_return(&mut self, idx: usize, decision: ReturnDecision, now: DateTime<Utc>) -> Settlement {
        let mut settlement = Settlement::default();
        match decision {
            ReturnDecision::Accept => {
                if self.stock_committed { settlement.restock.push(self.items[idx].stock()); }
                if self.payment_status == PaymentStatus::Completed {
                    settlement.refund = self.item_refund(&self.items[idx]);
                    settlement.refund_method = Some(WalletMethod::OrderRefund);
                }
                self.items[idx].status = ItemStatus::Returned;
                self.items[idx].returned_on = Some(now);
            }
            ReturnDecision::Reject => self.items[idx].status = ItemStatus::Delivered,
        }
        settlement
    }

    fn raise_return_decision(&mut self, item_ids: Vec<Uuid>, decision: ReturnDecision, refund: Money) {
        let order_number = self.order_number.clone();
        let event = match decision {
            ReturnDecision::Accept => OrderEvent::ReturnAccepted { order_number, item_ids, refund },
            ReturnDecision::Reject => OrderEvent::ReturnRejected { order_number, item_ids },
        };
        self.raise_event(DomainEvent::Order(event));
    }

    fn mark_return_requested(&mut self, idx: usize, reason: &str, now: DateTime<Utc>) {
        let item = &mut self.items[idx];
        item.status = ItemStatus::ReturnRequested;
        item.return_reason = Some(reason.to_string());
        item.return_requested_on = Some(now);
    }

    fn refunds_on_cancel(&self) -> bool {
        self.payment_status == PaymentStatus::Completed
            && matches!(self.payment_method, PaymentMethod::Wallet | PaymentMethod::Gateway)
    }

    fn item_refund(&self, item: &OrderItem) -> Money {
        item_refund(item.final_price, self.subtotal, self.coupon_discount, self.tax_rate)
    }

    fn item_index(&self, item_id: Uuid) -> Result<usize, OrderError> {
        self.items.iter().position(|i| i.id == item_id).ok_or(OrderError::ItemNotFound(item_id))
    }

    fn require_method(&self, method: PaymentMethod) -> Result<(), OrderError> {
        if self.payment_method != method { return Err(OrderError::WrongPaymentMethod); }
        Ok(())
    }

    fn refresh_status(&mut self, now: DateTime<Utc>) {
        let statuses: Vec<ItemStatus> = self.items.iter().map(|i| i.status).collect();
        if let Some(status) = derive_status(&statuses) {
            self.status = status;
        }
        self.touch(now);
    }
}

fn require_reason(reason: &str) -> Result<String, OrderError> {
    let reason = reason.trim();
    if reason.is_empty() { return Err(OrderError::MissingReason); }
    Ok(reason.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("Order has no items")]
    NoItems,
    #[error("Order item {0} not found")]
    ItemNotFound(Uuid),
    #[error("A reason is required")]
    MissingReason,
    #[error("Order is already cancelled")]
    AlreadyCancelled,
    #[error("Order cannot be cancelled once {0}")]
    NotCancellable(OrderStatus),
    #[error("Item cannot be cancelled once {0}")]
    ItemNotCancellable(ItemStatus),
    #[error("Only delivered orders can be returned, order is {0}")]
    NotReturnable(OrderStatus),
    #[error("Only delivered items can be returned, item is {0}")]
    ItemNotReturnable(ItemStatus),
    #[error("No delivered items to return")]
    NothingToReturn,
    #[error("No return request pending")]
    NoReturnPending,
    #[error("Cannot move from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    #[error("Status {0} cannot be set directly")]
    InvalidStatusTarget(OrderStatus),
    #[error("Order is awaiting payment")]
    AwaitingPayment,
    #[error("Payment is not pending")]
    PaymentNotPending,
    #[error("Payment can only be retried after a failure")]
    RetryNotAllowed,
    #[error("Operation does not match the order's payment method")]
    WrongPaymentMethod,
    #[error("Gateway order reference does not match")]
    GatewayMismatch,
    #[error("Unknown order status: {0}")]
    UnknownStatus(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(state: &str) -> ShippingAddress {
        ShippingAddress {
            name: "Asha".into(), phone: "9876543210".into(), line1: "12 Beach Road".into(), line2: None,
            city: "Kochi".into(), state: state.into(), pincode: "682001".into(), country: "India".into(),
        }
    }

    fn line(name: &str, base: i64, sale: i64, qty: u32) -> NewOrderItem {
        NewOrderItem {
            product_id: Uuid::now_v7(), product_name: name.into(), category: "Men".into(), subcategory: "Shirts".into(),
            sku: format!("{}-M-BLU", name), size: "M".into(), color: "Blue".into(), quantity: qty,
            base_price: Money::whole(base), sale_price: Money::whole(sale),
        }
    }

    // subtotal 1000, tax 180, coupon 100; item refunds are 864 and 216.
    fn new_order(method: PaymentMethod, shipping: i64) -> NewOrder {
        NewOrder {
            user_id: Uuid::now_v7(), items: vec![line("Denim", 500, 400, 2), line("Linen", 200, 200, 1)],
            subtotal: Money::whole(1000), offer_discount: Money::whole(200), tax: Money::whole(180),
            tax_rate: Decimal::from(18), shipping_charge: Money::whole(shipping), coupon_code: Some("FEST10".into()),
            coupon_discount: Money::whole(100), payable: Money::whole(1080 + shipping), shipping_address: address("Kerala"),
            payment_method: method,
        }
    }

    fn ids(order: &Order) -> (Uuid, Uuid) { (order.items()[0].id, order.items()[1].id) }

    #[test]
    fn test_status_cascade() {
        use OrderStatus::*;
        assert_eq!(derive_status(&[]), None);
        assert_eq!(derive_status(&[Cancelled, Cancelled]), Some(Cancelled));
        assert_eq!(derive_status(&[Cancelled, Returned]), Some(Returned));
        assert_eq!(derive_status(&[Failed, Cancelled]), Some(Failed));
        assert_eq!(derive_status(&[Delivered, ReturnRequested]), Some(ReturnRequested));
        assert_eq!(derive_status(&[Delivered, Shipped, Cancelled]), Some(Shipped));
        assert_eq!(derive_status(&[Returned, Delivered]), Some(Delivered));
    }

    #[test]
    fn test_transition_table() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Shipped.can_transition_to(Delivered));
        assert!(ReturnRequested.can_transition_to(Delivered));
        assert!(Failed.can_transition_to(Pending));
        assert!(!Shipped.can_transition_to(Cancelled));
        assert!(!Delivered.can_transition_to(Shipped));
        assert_eq!("out_for_delivery".parse::<OrderStatus>().unwrap(), OutForDelivery);
        assert!("lost".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_place_and_confirm_cod() {
        let mut order = Order::place(new_order(PaymentMethod::Cod, 0), Utc::now()).unwrap();
        assert!(order.order_number().starts_with("MM"));
        assert_eq!(order.items()[0].final_price, Money::whole(800));
        let movements = order.confirm_cod(Utc::now()).unwrap();
        assert_eq!(movements.len(), 2);
        assert_eq!(order.status(), OrderStatus::Confirmed);
        assert_eq!(order.payment_status(), PaymentStatus::Pending);
        assert!(order.is_stock_committed());
        assert!(matches!(order.confirm_cod(Utc::now()), Err(OrderError::InvalidTransition { .. })));
        assert_eq!(order.take_events().len(), 1);
    }

    #[test]
    fn test_cancel_wallet_order_refunds_everything() {
        let mut order = Order::place(new_order(PaymentMethod::Wallet, 0), Utc::now()).unwrap();
        order.confirm_wallet_payment(Utc::now()).unwrap();
        assert_eq!(order.cancel("  ", Utc::now()).unwrap_err(), OrderError::MissingReason);
        let settlement = order.cancel("Changed my mind", Utc::now()).unwrap();
        assert_eq!(settlement.wallet_refund(), Some((Money::whole(1080), WalletMethod::OrderCancel)));
        assert_eq!(settlement.restock.len(), 2);
        assert!(settlement.release_coupon);
        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert_eq!(order.payment_status(), PaymentStatus::Refunded);
        assert_eq!(order.cancel("again", Utc::now()).unwrap_err(), OrderError::AlreadyCancelled);
    }

    #[test]
    fn test_cancel_items_one_by_one() {
        let mut order = Order::place(new_order(PaymentMethod::Wallet, 50), Utc::now()).unwrap();
        order.confirm_wallet_payment(Utc::now()).unwrap();
        let (denim, linen) = ids(&order);

        let first = order.cancel_item(linen, "Wrong size", Utc::now()).unwrap();
        assert_eq!(first.refund, Money::whole(216));
        assert!(!first.release_coupon);
        assert_eq!(order.status(), OrderStatus::Confirmed);
        assert_eq!(order.payment_status(), PaymentStatus::Completed);

        let last = order.cancel_item(denim, "Wrong size", Utc::now()).unwrap();
        assert_eq!(last.refund, Money::whole(914));
        assert!(last.release_coupon);
        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert_eq!(order.payment_status(), PaymentStatus::Refunded);
        assert_eq!(first.refund + last.refund, order.payable());
    }

    #[test]
    fn test_cod_cancel_restocks_without_refund() {
        let mut order = Order::place(new_order(PaymentMethod::Cod, 0), Utc::now()).unwrap();
        order.confirm_cod(Utc::now()).unwrap();
        let settlement = order.cancel("No longer needed", Utc::now()).unwrap();
        assert_eq!(settlement.wallet_refund(), None);
        assert_eq!(settlement.restock.len(), 2);
        assert_eq!(order.payment_status(), PaymentStatus::Pending);
    }

    #[test]
    fn test_gateway_failure_and_retry() {
        let now = Utc::now();
        let mut order = Order::place(new_order(PaymentMethod::Gateway, 0), now).unwrap();
        order.start_gateway_payment("gw_1", now).unwrap();
        order.fail_payment(now).unwrap();
        assert_eq!(order.status(), OrderStatus::Failed);
        assert_eq!(order.payment_status(), PaymentStatus::Failed);

        order.retry_payment("gw_2", now).unwrap();
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.confirm_payment("gw_1", "pay_1", now).unwrap_err(), OrderError::GatewayMismatch);
        let movements = order.confirm_payment("gw_2", "pay_1", now).unwrap();
        assert_eq!(movements.len(), 2);
        assert_eq!(order.status(), OrderStatus::Confirmed);
        assert_eq!(order.payment_status(), PaymentStatus::Completed);
        assert_eq!(order.retry_payment("gw_3", now).unwrap_err(), OrderError::RetryNotAllowed);
    }

    #[test]
    fn test_failed_gateway_cancel_does_not_restock() {
        let now = Utc::now();
        let mut order = Order::place(new_order(PaymentMethod::Gateway, 0), now).unwrap();
        order.start_gateway_payment("gw_1", now).unwrap();
        order.fail_payment(now).unwrap();
        let settlement = order.cancel("Payment failed", now).unwrap();
        assert!(settlement.restock.is_empty());
        assert_eq!(settlement.wallet_refund(), None);
        assert_eq!(order.status(), OrderStatus::Cancelled);
    }

    #[test]
    fn test_delivery_and_returns() {
        let now = Utc::now();
        let mut order = Order::place(new_order(PaymentMethod::Cod, 0), now).unwrap();
        order.confirm_cod(now).unwrap();
        let (denim, linen) = ids(&order);

        order.advance(OrderStatus::Shipped, now).unwrap();
        assert!(matches!(order.advance(OrderStatus::Confirmed, now), Err(OrderError::InvalidTransition { .. })));
        assert_eq!(order.advance(OrderStatus::Returned, now).unwrap_err(), OrderError::InvalidStatusTarget(OrderStatus::Returned));
        order.advance(OrderStatus::OutForDelivery, now).unwrap();
        order.advance(OrderStatus::Delivered, now).unwrap();
        assert_eq!(order.payment_status(), PaymentStatus::Completed);
        assert!(order.delivered_on().is_some());
        assert_eq!(order.cancel("late", now).unwrap_err(), OrderError::NotCancellable(OrderStatus::Delivered));

        order.request_item_return(linen, "Too small", now).unwrap();
        assert_eq!(order.status(), OrderStatus::ReturnRequested);
        let accepted = order.decide_item_return(linen, ReturnDecision::Accept, now).unwrap();
        assert_eq!(accepted.wallet_refund(), Some((Money::whole(216), WalletMethod::OrderRefund)));
        assert_eq!(accepted.restock.len(), 1);
        assert_eq!(order.status(), OrderStatus::Delivered);

        order.request_return("Faded colour", now).unwrap();
        assert_eq!(order.item(denim).unwrap().status, ItemStatus::ReturnRequested);
        let rejected = order.decide_return(ReturnDecision::Reject, now).unwrap();
        assert!(rejected.restock.is_empty());
        assert_eq!(order.status(), OrderStatus::Delivered);

        order.request_return("Faded colour", now).unwrap();
        let accepted = order.decide_return(ReturnDecision::Accept, now).unwrap();
        assert_eq!(accepted.refund, Money::whole(864));
        assert_eq!(order.status(), OrderStatus::Returned);
        assert_eq!(order.request_return("again", now).unwrap_err(), OrderError::NotReturnable(OrderStatus::Returned));
    }

    #[test]
    fn test_cancel_after_partial_return_refunds_only_open_items() {
        let now = Utc::now();
        let mut order = Order::place(new_order(PaymentMethod::Wallet, 50), now).unwrap();
        order.confirm_wallet_payment(now).unwrap();
        let (denim, linen) = ids(&order);

        order.advance_item(linen, OrderStatus::Shipped, now).unwrap();
        order.advance_item(linen, OrderStatus::Delivered, now).unwrap();
        order.request_item_return(linen, "Too small", now).unwrap();
        let returned = order.decide_item_return(linen, ReturnDecision::Accept, now).unwrap();
        assert_eq!(returned.refund, Money::whole(216));
        assert_eq!(order.status(), OrderStatus::Confirmed);

        let cancelled = order.cancel("Changed my mind", now).unwrap();
        assert_eq!(cancelled.refund, Money::whole(914));
        assert_eq!(cancelled.restock.len(), 1);
        assert_eq!(cancelled.restock[0].product_id, order.item(denim).unwrap().product_id);
        assert_eq!(order.item(linen).unwrap().status, ItemStatus::Returned);
        assert_eq!(order.item(denim).unwrap().status, ItemStatus::Cancelled);
        assert_eq!(returned.refund + cancelled.refund, order.payable());
    }

    #[test]
    fn test_cancel_blocked_while_an_item_is_shipped() {
        let now = Utc::now();
        let mut order = Order::place(new_order(PaymentMethod::Wallet, 0), now).unwrap();
        order.confirm_wallet_payment(now).unwrap();
        let (denim, linen) = ids(&order);

        order.advance_item(linen, OrderStatus::Shipped, now).unwrap();
        assert_eq!(order.status(), OrderStatus::Confirmed);
        assert_eq!(order.cancel("Too slow", now).unwrap_err(), OrderError::NotCancellable(OrderStatus::Shipped));
        assert_eq!(order.item(denim).unwrap().status, ItemStatus::Confirmed);
        assert_eq!(order.item(linen).unwrap().status, ItemStatus::Shipped);

        let settlement = order.cancel_item(denim, "Too slow", now).unwrap();
        assert_eq!(settlement.refund, Money::whole(864));
        assert_eq!(order.status(), OrderStatus::Shipped);
    }

    #[test]
    fn test_advance_moves_only_items_that_can_follow() {
        let now = Utc::now();
        let mut order = Order::place(new_order(PaymentMethod::Cod, 0), now).unwrap();
        order.confirm_cod(now).unwrap();
        let (denim, linen) = ids(&order);

        order.advance_item(linen, OrderStatus::Shipped, now).unwrap();
        order.advance(OrderStatus::Shipped, now).unwrap();
        assert_eq!(order.item(denim).unwrap().status, ItemStatus::Shipped);
        assert_eq!(order.status(), OrderStatus::Shipped);

        order.advance_item(linen, OrderStatus::Delivered, now).unwrap();
        assert_eq!(order.status(), OrderStatus::Shipped);
        order.advance(OrderStatus::Delivered, now).unwrap();
        assert_eq!(order.item(denim).unwrap().status, ItemStatus::Delivered);
        assert_eq!(order.status(), OrderStatus::Delivered);
        assert!(matches!(order.advance(OrderStatus::Delivered, now), Err(OrderError::InvalidTransition { .. })));
    }

    #[test]
    fn test_manual_confirm_requires_payment() {
        let now = Utc::now();
        let mut order = Order::place(new_order(PaymentMethod::Gateway, 0), now).unwrap();
        let (denim, _) = ids(&order);
        assert_eq!(order.advance(OrderStatus::Confirmed, now).unwrap_err(), OrderError::AwaitingPayment);
        assert_eq!(order.advance_item(denim, OrderStatus::Confirmed, now).unwrap_err(), OrderError::AwaitingPayment);
    }

    #[test]
    fn test_tax_breakdown() {
        let order = Order::place(new_order(PaymentMethod::Cod, 0), Utc::now()).unwrap();
        let tax = order.tax_breakdown();
        assert_eq!(tax.cgst, Money::whole(90));
        assert_eq!(tax.sgst, Money::whole(90));
        assert_eq!(tax.rate_each, Decimal::from(9));
    }
}
