//! Wallet Aggregate
//!
//! Append-only ledger per user. `balance` is cached next to the ledger and
//! moves together with every push.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::events::{DomainEvent, WalletEvent};
use crate::domain::value_objects::Money;
use crate::domain::{paginate, Page};

const TRANSACTIONS_PER_PAGE: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind { Credit, Debit }

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletMethod { Gateway, OrderRefund, OrderCancel, WalletPayment, Admin, Referral }

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub kind: TransactionKind,
    pub amount: Money,
    pub description: String,
    pub method: WalletMethod,
    pub order_number: Option<String>,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct WalletMovement {
    pub amount: Money,
    pub description: String,
    pub method: WalletMethod,
    pub order_number: Option<String>,
    pub reference: Option<String>,
}

impl WalletMovement {
    pub fn new(amount: Money, method: WalletMethod, description: impl Into<String>) -> Self {
        Self { amount, description: description.into(), method, order_number: None, reference: None }
    }

    pub fn for_order(mut self, order_number: impl Into<String>) -> Self { self.order_number = Some(order_number.into()); self }
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self { self.reference = Some(reference.into()); self }
}

#[derive(Clone, Debug, Default)]
pub struct TransactionFilter {
    pub kind: Option<TransactionKind>,
    pub search: Option<String>,
    pub page: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Wallet {
    user_id: Uuid,
    balance: Money,
    transactions: Vec<WalletTransaction>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

impl Wallet {
    pub fn open(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self { user_id, balance: Money::ZERO, transactions: vec![], created_at: now, updated_at: now, events: vec![] }
    }

    pub fn user_id(&self) -> Uuid { self.user_id }
    pub fn balance(&self) -> Money { self.balance }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }

    pub fn credit(&mut self, movement: WalletMovement, now: DateTime<Utc>) -> Result<&WalletTransaction, WalletError> {
        if !movement.amount.is_positive() { return Err(WalletError::InvalidAmount); }
        if let Some(reference) = movement.reference.as_deref().filter(|_| movement.method == WalletMethod::Gateway) {
            if self.has_gateway_reference(reference) { return Err(WalletError::DuplicateReference(reference.to_string())); }
        }
        self.balance += movement.amount;
        let event = WalletEvent::Credited { user_id: self.user_id, amount: movement.amount, balance: self.balance };
        self.raise_event(DomainEvent::Wallet(event));
        Ok(self.push(TransactionKind::Credit, movement, now))
    }

    pub fn debit(&mut self, movement: WalletMovement, now: DateTime<Utc>) -> Result<&WalletTransaction, WalletError> {
        if !movement.amount.is_positive() { return Err(WalletError::InvalidAmount); }
        if movement.amount > self.balance {
            return Err(WalletError::InsufficientBalance { balance: self.balance, requested: movement.amount });
        }
        self.balance = self.balance - movement.amount;
        let event = WalletEvent::Debited { user_id: self.user_id, amount: movement.amount, balance: self.balance };
        self.raise_event(DomainEvent::Wallet(event));
        Ok(self.push(TransactionKind::Debit, movement, now))
    }

    pub fn ledger_balance(&self) -> Money {
        self.transactions.iter().fold(Money::ZERO, |acc, t| match t.kind {
            TransactionKind::Credit => acc + t.amount,
            TransactionKind::Debit => acc - t.amount,
        })
    }

    /// Cached balance must equal credits minus debits.
    pub fn verify(&self) -> Result<(), WalletError> {
        let ledger = self.ledger_balance();
        if ledger != self.balance { return Err(WalletError::LedgerMismatch { cached: self.balance, ledger }); }
        Ok(())
    }

    pub fn transactions(&self, filter: &TransactionFilter) -> Page<WalletTransaction> {
        let term = filter.search.as_deref().map(str::trim).filter(|t| !t.is_empty()).map(str::to_lowercase);
        let mut rows: Vec<WalletTransaction> = self
            .transactions
            .iter()
            .filter(|t| filter.kind.map_or(true, |k| t.kind == k))
            .filter(|t| match &term {
                Some(term) => {
                    t.description.to_lowercase().contains(term)
                        || t.reference.as_deref().is_some_and(|r| r.to_lowercase().contains(term))
                }
                None => true,
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        paginate(rows, filter.page, TRANSACTIONS_PER_PAGE)
    }

    /// A gateway payment is credited at most once.
    fn has_gateway_reference(&self, reference: &str) -> bool {
        self.transactions.iter().any(|t| t.method == WalletMethod::Gateway && t.reference.as_deref() == Some(reference))
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }

    fn push(&mut self, kind: TransactionKind, m: WalletMovement, now: DateTime<Utc>) -> &WalletTransaction {
        self.updated_at = now;
        self.transactions.push(WalletTransaction {
            id: Uuid::now_v7(), kind, amount: m.amount, description: m.description, method: m.method,
            order_number: m.order_number, reference: m.reference, created_at: now,
        });
        &self.transactions[self.transactions.len() - 1]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalletError {
    #[error("Amount must be greater than zero")]
    InvalidAmount,
    #[error("Insufficient wallet balance: {balance} available, {requested} requested")]
    InsufficientBalance { balance: Money, requested: Money },
    #[error("Payment {0} has already been credited")]
    DuplicateReference(String),
    #[error("Wallet ledger mismatch: cached {cached}, ledger {ledger}")]
    LedgerMismatch { cached: Money, ledger: Money },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_credit_and_debit_keep_ledger_in_sync() {
        let now = Utc::now();
        let mut wallet = Wallet::open(Uuid::now_v7(), now);
        wallet.credit(WalletMovement::new(Money::whole(500), WalletMethod::Gateway, "Top-up").with_reference("pay_1"), now).unwrap();
        wallet.debit(WalletMovement::new(Money::whole(120), WalletMethod::WalletPayment, "Order payment").for_order("MM1"), now).unwrap();
        assert_eq!(wallet.balance(), Money::whole(380));
        assert!(wallet.verify().is_ok());
        assert_eq!(wallet.take_events().len(), 2);
    }

    #[test]
    fn test_debit_rejections() {
        let now = Utc::now();
        let mut wallet = Wallet::open(Uuid::now_v7(), now);
        wallet.credit(WalletMovement::new(Money::whole(100), WalletMethod::Admin, "Goodwill"), now).unwrap();
        let err = wallet.debit(WalletMovement::new(Money::whole(101), WalletMethod::WalletPayment, "Order"), now).unwrap_err();
        assert!(matches!(err, WalletError::InsufficientBalance { .. }));
        let err = wallet.credit(WalletMovement::new(Money::ZERO, WalletMethod::Admin, "Nothing"), now).unwrap_err();
        assert_eq!(err, WalletError::InvalidAmount);
        assert_eq!(wallet.balance(), Money::whole(100));
    }

    #[test]
    fn test_gateway_reference_credited_once() {
        let now = Utc::now();
        let mut wallet = Wallet::open(Uuid::now_v7(), now);
        let top_up = || WalletMovement::new(Money::whole(250), WalletMethod::Gateway, "Wallet top-up").with_reference("pay_7");
        wallet.credit(top_up(), now).unwrap();
        assert_eq!(wallet.credit(top_up(), now).unwrap_err(), WalletError::DuplicateReference("pay_7".into()));
        assert_eq!(wallet.balance(), Money::whole(250));

        let goodwill = WalletMovement::new(Money::whole(50), WalletMethod::Admin, "Goodwill").with_reference("pay_7");
        wallet.credit(goodwill, now).unwrap();
        assert_eq!(wallet.balance(), Money::whole(300));
        assert!(wallet.verify().is_ok());
    }

    #[test]
    fn test_transactions_filter_and_order() {
        let now = Utc::now();
        let mut wallet = Wallet::open(Uuid::now_v7(), now);
        for i in 0..12 {
            let m = WalletMovement::new(Money::whole(10), WalletMethod::Gateway, format!("Top-up {}", i)).with_reference(format!("pay_{}", i));
            wallet.credit(m, now + Duration::minutes(i)).unwrap();
        }
        wallet.debit(WalletMovement::new(Money::whole(5), WalletMethod::WalletPayment, "Order payment"), now + Duration::hours(1)).unwrap();

        let first = wallet.transactions(&TransactionFilter { page: 1, ..Default::default() });
        assert_eq!(first.total, 13);
        assert_eq!(first.data.len(), 10);
        assert_eq!(first.data[0].kind, TransactionKind::Debit);

        let debits = wallet.transactions(&TransactionFilter { kind: Some(TransactionKind::Debit), ..Default::default() });
        assert_eq!(debits.total, 1);

        let search = wallet.transactions(&TransactionFilter { search: Some("PAY_11".into()), ..Default::default() });
        assert_eq!(search.total, 1);
    }
}
