//! Offer resolution.
//!
//! Each catalog level (product, subcategory, category) may carry one
//! time-bounded percentage offer. A variant sells at its base price reduced
//! by the single best offer that is valid right now.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::{Money, Percentage};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub percentage: Percentage,
    /// Per-unit cap on the discount amount; zero means uncapped.
    #[serde(default)]
    pub max_redeem: Money,
    pub starts_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

impl Offer {
    pub fn new(percentage: Percentage, max_redeem: Money, starts_at: DateTime<Utc>, valid_until: DateTime<Utc>) -> Result<Self, OfferError> {
        if valid_until < starts_at { return Err(OfferError::InvalidWindow); }
        if max_redeem < Money::ZERO { return Err(OfferError::NegativeCap); }
        Ok(Self { percentage, max_redeem, starts_at, valid_until })
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.starts_at <= now && now <= self.valid_until
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OfferError {
    #[error("offer ends before it starts")]
    InvalidWindow,
    #[error("offer cap cannot be negative")]
    NegativeCap,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferSource { Product, Subcategory, Category }

/// The three offers that can apply to one product.
#[derive(Clone, Copy, Debug, Default)]
pub struct OfferSet<'a> {
    pub product: Option<&'a Offer>,
    pub subcategory: Option<&'a Offer>,
    pub category: Option<&'a Offer>,
}

impl<'a> OfferSet<'a> {
    /// Highest valid, non-zero percentage. Ties go to the more specific level.
    pub fn best(&self, now: DateTime<Utc>) -> Option<(OfferSource, &'a Offer)> {
        let candidates = [
            (OfferSource::Product, self.product),
            (OfferSource::Subcategory, self.subcategory),
            (OfferSource::Category, self.category),
        ];
        let mut best: Option<(OfferSource, &'a Offer)> = None;
        for (source, offer) in candidates {
            let Some(offer) = offer else { continue };
            if !offer.is_valid_at(now) || offer.percentage.is_zero() { continue; }
            match best {
                Some((_, current)) if current.percentage >= offer.percentage => {}
                _ => best = Some((source, offer)),
            }
        }
        best
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PriceQuote {
    pub base: Money,
    pub sale: Money,
    pub discount: Money,
    pub percentage: Option<Percentage>,
    pub source: Option<OfferSource>,
}

impl PriceQuote {
    pub fn undiscounted(base: Money) -> Self {
        Self { base, sale: base, discount: Money::ZERO, percentage: None, source: None }
    }
}

/// Sale price for one unit: base minus the best offer, rounded to whole units
/// and never below zero.
pub fn resolve_price(base: Money, offers: OfferSet<'_>, now: DateTime<Utc>) -> PriceQuote {
    let Some((source, offer)) = offers.best(now) else { return PriceQuote::undiscounted(base) };
    let mut discount = base.amount() * offer.percentage.value() / Decimal::ONE_HUNDRED;
    if offer.max_redeem.is_positive() && discount > offer.max_redeem.amount() {
        discount = offer.max_redeem.amount();
    }
    let sale = (base.amount() - discount)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .max(Decimal::ZERO);
    let sale = Money::new(sale);
    PriceQuote { base, sale, discount: base - sale, percentage: Some(offer.percentage), source: Some(source) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn offer(pct: i64, now: DateTime<Utc>) -> Offer {
        Offer::new(Percentage::new(Decimal::from(pct)).unwrap(), Money::ZERO, now - Duration::days(1), now + Duration::days(1)).unwrap()
    }

    #[test]
    fn test_best_of_three() {
        let now = Utc::now();
        let (p, s, c) = (offer(10, now), offer(25, now), offer(15, now));
        let set = OfferSet { product: Some(&p), subcategory: Some(&s), category: Some(&c) };
        let (source, best) = set.best(now).unwrap();
        assert_eq!(source, OfferSource::Subcategory);
        assert_eq!(best.percentage.value(), Decimal::from(25));
    }

    #[test]
    fn test_expired_offer_ignored() {
        let now = Utc::now();
        let mut expired = offer(50, now);
        expired.valid_until = now - Duration::hours(1);
        let c = offer(20, now);
        let set = OfferSet { product: Some(&expired), subcategory: None, category: Some(&c) };
        let quote = resolve_price(Money::whole(1000), set, now);
        assert_eq!(quote.source, Some(OfferSource::Category));
        assert_eq!(quote.sale, Money::whole(800));
        assert_eq!(quote.discount, Money::whole(200));
    }

    #[test]
    fn test_future_offer_ignored() {
        let now = Utc::now();
        let mut later = offer(30, now);
        later.starts_at = now + Duration::hours(2);
        let set = OfferSet { product: Some(&later), ..Default::default() };
        assert_eq!(resolve_price(Money::whole(499), set, now), PriceQuote::undiscounted(Money::whole(499)));
    }

    #[test]
    fn test_tie_prefers_product() {
        let now = Utc::now();
        let (p, c) = (offer(20, now), offer(20, now));
        let set = OfferSet { product: Some(&p), subcategory: None, category: Some(&c) };
        assert_eq!(set.best(now).unwrap().0, OfferSource::Product);
    }

    #[test]
    fn test_sale_price_rounds_half_away() {
        let now = Utc::now();
        let p = offer(15, now);
        let set = OfferSet { product: Some(&p), ..Default::default() };
        // 999 - 149.85 = 849.15
        assert_eq!(resolve_price(Money::whole(999), set, now).sale, Money::whole(849));
        // 1 - 0.5 = 0.5
        let half = offer(50, now);
        let set = OfferSet { product: Some(&half), ..Default::default() };
        assert_eq!(resolve_price(Money::whole(1), set, now).sale, Money::whole(1));
    }

    #[test]
    fn test_max_redeem_caps_discount() {
        let now = Utc::now();
        let mut p = offer(50, now);
        p.max_redeem = Money::whole(100);
        let set = OfferSet { product: Some(&p), ..Default::default() };
        let quote = resolve_price(Money::whole(1000), set, now);
        assert_eq!(quote.sale, Money::whole(900));
    }

    #[test]
    fn test_invalid_window_rejected() {
        let now = Utc::now();
        let pct = Percentage::new(Decimal::from(10)).unwrap();
        assert_eq!(Offer::new(pct, Money::ZERO, now, now - Duration::days(1)), Err(OfferError::InvalidWindow));
    }
}
