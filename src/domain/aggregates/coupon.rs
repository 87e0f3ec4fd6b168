//! Coupon Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::value_objects::Money;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponKind { Fixed, Percentage }

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponUsage { pub user_id: Uuid, pub count: u32 }

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Coupon {
    id: Uuid,
    name: String,
    code: String,
    description: String,
    kind: CouponKind,
    value: Decimal,
    max_discount: Option<Money>,
    minimum_order: Money,
    starts_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    active: bool,
    usage_per_user: u32,
    usage: Vec<CouponUsage>,
    created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct CouponDraft {
    pub name: String,
    pub code: String,
    pub description: String,
    pub kind: CouponKind,
    pub value: Decimal,
    pub max_discount: Option<Money>,
    pub minimum_order: Money,
    pub starts_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub usage_per_user: u32,
    pub active: bool,
}

/// Codes are compared trimmed and upper-cased.
pub fn normalize_code(code: &str) -> String { code.trim().to_uppercase() }

impl Coupon {
    pub fn create(draft: CouponDraft, now: DateTime<Utc>) -> Result<Self, CouponError> {
        let mut coupon = Self {
            id: Uuid::now_v7(), name: String::new(), code: String::new(), description: String::new(),
            kind: draft.kind, value: Decimal::ZERO, max_discount: None, minimum_order: Money::ZERO,
            starts_at: draft.starts_at, expires_at: draft.expires_at, active: true, usage_per_user: 1,
            usage: vec![], created_at: now,
        };
        coupon.apply_draft(draft)?;
        Ok(coupon)
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn code(&self) -> &str { &self.code }
    pub fn name(&self) -> &str { &self.name }
    pub fn is_active(&self) -> bool { self.active }
    pub fn expires_at(&self) -> DateTime<Utc> { self.expires_at }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }

    pub fn update(&mut self, draft: CouponDraft) -> Result<(), CouponError> { self.apply_draft(draft) }

    pub fn used_by(&self, user_id: Uuid) -> u32 {
        self.usage.iter().find(|u| u.user_id == user_id).map_or(0, |u| u.count)
    }

    /// Shown in the shopper's coupon list: active, unexpired, uses left.
    pub fn is_available_to(&self, user_id: Uuid, now: DateTime<Utc>) -> bool {
        self.active && now <= self.expires_at && self.used_by(user_id) < self.usage_per_user
    }

    /// Discount this coupon grants on `subtotal`, after every eligibility rule.
    pub fn check(&self, user_id: Uuid, subtotal: Money, tax: Money, now: DateTime<Utc>) -> Result<Money, CouponError> {
        if !self.active { return Err(CouponError::Inactive); }
        if now > self.expires_at { return Err(CouponError::Expired); }
        if now < self.starts_at { return Err(CouponError::NotStarted); }
        if self.used_by(user_id) >= self.usage_per_user { return Err(CouponError::UsageExhausted); }
        if subtotal + tax < self.minimum_order { return Err(CouponError::MinimumNotMet { minimum: self.minimum_order }); }
        let mut discount = match self.kind {
            CouponKind::Percentage => {
                let raw = (self.value / Decimal::ONE_HUNDRED * subtotal.amount()).round_dp_with_strategy(0, RoundingStrategy::ToNegativeInfinity);
                let raw = Money::new(raw);
                match self.max_discount {
                    Some(cap) if cap.is_positive() && raw > cap => cap,
                    _ => raw,
                }
            }
            CouponKind::Fixed => Money::new(self.value),
        };
        if discount > subtotal { discount = subtotal; }
        Ok(discount)
    }

    pub fn record_use(&mut self, user_id: Uuid) {
        match self.usage.iter_mut().find(|u| u.user_id == user_id) {
            Some(entry) => entry.count += 1,
            None => self.usage.push(CouponUsage { user_id, count: 1 }),
        }
    }

    pub fn release_use(&mut self, user_id: Uuid) {
        if let Some(idx) = self.usage.iter().position(|u| u.user_id == user_id) {
            if self.usage[idx].count > 1 { self.usage[idx].count -= 1; } else { self.usage.remove(idx); }
        }
    }

    fn apply_draft(&mut self, draft: CouponDraft) -> Result<(), CouponError> {
        let name = draft.name.trim();
        let code = normalize_code(&draft.code);
        if name.is_empty() || code.is_empty() { return Err(CouponError::MissingField); }
        if draft.value <= Decimal::ZERO { return Err(CouponError::InvalidValue); }
        if draft.kind == CouponKind::Percentage && draft.value > Decimal::ONE_HUNDRED { return Err(CouponError::InvalidValue); }
        if draft.expires_at <= draft.starts_at { return Err(CouponError::InvalidWindow); }
        if draft.usage_per_user == 0 { return Err(CouponError::InvalidUsageLimit); }
        self.name = name.to_string();
        self.code = code;
        self.description = draft.description.trim().to_string();
        self.kind = draft.kind;
        self.value = draft.value;
        self.max_discount = draft.max_discount;
        self.minimum_order = draft.minimum_order;
        self.starts_at = draft.starts_at;
        self.expires_at = draft.expires_at;
        self.usage_per_user = draft.usage_per_user;
        self.active = draft.active;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CouponError {
    #[error("Invalid Coupon")]
    NotFound,
    #[error("Coupon code already exists")]
    DuplicateCode,
    #[error("Coupon name and code are required")]
    MissingField,
    #[error("Coupon value is out of range")]
    InvalidValue,
    #[error("Coupon must expire after it starts")]
    InvalidWindow,
    #[error("Usage per user must be at least 1")]
    InvalidUsageLimit,
    #[error("Coupon is inactive")]
    Inactive,
    #[error("Coupon not active yet")]
    NotStarted,
    #[error("Coupon expired")]
    Expired,
    #[error("You already used this coupon")]
    UsageExhausted,
    #[error("Minimum order amount of {minimum} required")]
    MinimumNotMet { minimum: Money },
}
