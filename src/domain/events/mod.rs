//! Domain events
use crate::domain::value_objects::{Money, Sku};
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "aggregate", rename_all = "snake_case")]
pub enum DomainEvent {
    Product(ProductEvent),
    Order(OrderEvent),
    Wallet(WalletEvent),
}

impl DomainEvent {
    /// NATS subject, `store.<aggregate>.<event>`.
    pub fn subject(&self) -> String {
        let (aggregate, name) = match self {
            DomainEvent::Product(e) => ("product", e.name()),
            DomainEvent::Order(e) => ("order", e.name()),
            DomainEvent::Wallet(e) => ("wallet", e.name()),
        };
        format!("store.{}.{}", aggregate, name)
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProductEvent {
    Created { product_id: Uuid },
    StockAdjusted { product_id: Uuid, sku: Sku, delta: i64, remaining: u32 },
}

impl ProductEvent {
    fn name(&self) -> &'static str {
        match self { Self::Created { .. } => "created", Self::StockAdjusted { .. } => "stock_adjusted" }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrderEvent {
    Placed { order_number: String, user_id: Uuid, payable: Money },
    PaymentConfirmed { order_number: String },
    PaymentFailed { order_number: String },
    StatusChanged { order_number: String, status: String },
    Cancelled { order_number: String, refund: Money },
    ItemCancelled { order_number: String, item_id: Uuid, refund: Money },
    ReturnRequested { order_number: String, item_ids: Vec<Uuid> },
    ReturnAccepted { order_number: String, item_ids: Vec<Uuid>, refund: Money },
    ReturnRejected { order_number: String, item_ids: Vec<Uuid> },
}

impl OrderEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::Placed { .. } => "placed",
            Self::PaymentConfirmed { .. } => "payment_confirmed",
            Self::PaymentFailed { .. } => "payment_failed",
            Self::StatusChanged { .. } => "status_changed",
            Self::Cancelled { .. } => "cancelled",
            Self::ItemCancelled { .. } => "item_cancelled",
            Self::ReturnRequested { .. } => "return_requested",
            Self::ReturnAccepted { .. } => "return_accepted",
            Self::ReturnRejected { .. } => "return_rejected",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WalletEvent {
    Credited { user_id: Uuid, amount: Money, balance: Money },
    Debited { user_id: Uuid, amount: Money, balance: Money },
}

impl WalletEvent {
    fn name(&self) -> &'static str {
        match self { Self::Credited { .. } => "credited", Self::Debited { .. } => "debited" }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn test_subject() {
        let e = DomainEvent::Order(OrderEvent::PaymentFailed { order_number: "MM1".into() });
        assert_eq!(e.subject(), "store.order.payment_failed");
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["aggregate"], "order");
        assert_eq!(json["event"], "payment_failed");
    }
}
