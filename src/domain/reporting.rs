//! Admin dashboard and sales report over placed orders.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::domain::aggregates::{Order, OrderStatus, PaymentMethod};
use crate::domain::value_objects::Money;

const TOP_N: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DashboardRange {
    Day,
    Week,
    Month,
    Year,
    Custom { from: NaiveDate, to: NaiveDate },
}

impl DashboardRange {
    /// Half-open `[start, end)` window in UTC.
    pub fn bounds(&self, now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>), ReportError> {
        let today = now.date_naive();
        let tomorrow = midnight(today + Duration::days(1));
        let window = match *self {
            Self::Day => (midnight(today), tomorrow),
            Self::Week => (midnight(today - Duration::days(6)), tomorrow),
            Self::Month => (midnight(today.with_day(1).unwrap_or(today)), tomorrow),
            Self::Year => (midnight(today.with_ordinal(1).unwrap_or(today)), tomorrow),
            Self::Custom { from, to } => {
                if from > to { return Err(ReportError::InvalidRange { from, to }); }
                (midnight(from), midnight(to + Duration::days(1)))
            }
        };
        Ok(window)
    }

    fn bucket(&self, at: DateTime<Utc>) -> String {
        match self {
            Self::Year => at.format("%Y-%m").to_string(),
            _ => at.format("%Y-%m-%d").to_string(),
        }
    }
}

fn midnight(day: NaiveDate) -> DateTime<Utc> { Utc.from_utc_datetime(&day.and_time(chrono::NaiveTime::MIN)) }

/// Orders that count as sales: inside the window and not unwound.
fn counted<'a>(orders: &'a [Order], range: &DashboardRange, now: DateTime<Utc>) -> Result<Vec<&'a Order>, ReportError> {
    let (start, end) = range.bounds(now)?;
    Ok(orders
        .iter()
        .filter(|o| o.created_at() >= start && o.created_at() < end)
        .filter(|o| {
            !matches!(
                o.status(),
                OrderStatus::Cancelled | OrderStatus::Returned | OrderStatus::Failed | OrderStatus::ReturnRequested
            )
        })
        .collect())
}

#[derive(Clone, Debug, Serialize)]
pub struct ChartPoint { pub label: String, pub sales: Money, pub orders: u32 }

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TopEntry { pub name: String, pub quantity: u32 }

#[derive(Clone, Debug, Serialize)]
pub struct Dashboard {
    pub total_orders: u32,
    pub total_sales: Money,
    pub total_pending: u32,
    pub total_customers: u32,
    pub sales_chart: Vec<ChartPoint>,
    pub top_products: Vec<TopEntry>,
    pub top_categories: Vec<TopEntry>,
    pub top_subcategories: Vec<TopEntry>,
}

impl Dashboard {
    pub fn build(orders: &[Order], range: DashboardRange, now: DateTime<Utc>) -> Result<Self, ReportError> {
        let orders = counted(orders, &range, now)?;
        let mut chart: BTreeMap<String, ChartPoint> = BTreeMap::new();
        let mut products = HashMap::new();
        let mut categories = HashMap::new();
        let mut subcategories = HashMap::new();
        for order in &orders {
            let label = range.bucket(order.created_at());
            let point = chart.entry(label.clone()).or_insert(ChartPoint { label, sales: Money::ZERO, orders: 0 });
            point.sales += order.payable();
            point.orders += 1;
            for item in order.items().iter().filter(|i| !matches!(i.status, OrderStatus::Cancelled | OrderStatus::Returned)) {
                *products.entry(item.product_name.clone()).or_insert(0) += item.quantity;
                *categories.entry(item.category.clone()).or_insert(0) += item.quantity;
                *subcategories.entry(item.subcategory.clone()).or_insert(0) += item.quantity;
            }
        }
        Ok(Self {
            total_orders: orders.len() as u32,
            total_sales: orders.iter().map(|o| o.payable()).sum(),
            total_pending: orders.iter().filter(|o| o.status() == OrderStatus::Pending).count() as u32,
            total_customers: orders.iter().map(|o| o.user_id()).collect::<HashSet<_>>().len() as u32,
            sales_chart: chart.into_values().collect(),
            top_products: top(products),
            top_categories: top(categories),
            top_subcategories: top(subcategories),
        })
    }
}

fn top(counts: HashMap<String, u32>) -> Vec<TopEntry> {
    let mut entries: Vec<TopEntry> = counts.into_iter().map(|(name, quantity)| TopEntry { name, quantity }).collect();
    entries.sort_by(|a, b| b.quantity.cmp(&a.quantity).then_with(|| a.name.cmp(&b.name)));
    entries.truncate(TOP_N);
    entries
}

#[derive(Clone, Debug, Serialize)]
pub struct SalesRow {
    pub order_number: String,
    pub date: DateTime<Utc>,
    pub customer: String,
    pub payment_method: PaymentMethod,
    pub status: OrderStatus,
    pub subtotal: Money,
    pub offer_discount: Money,
    pub coupon_discount: Money,
    pub shipping: Money,
    pub tax: Money,
    pub payable: Money,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SalesTotals {
    pub orders: u32,
    pub subtotal: Money,
    pub offer_discount: Money,
    pub coupon_discount: Money,
    pub shipping: Money,
    pub tax: Money,
    pub payable: Money,
}

#[derive(Clone, Debug, Serialize)]
pub struct SalesReport {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub rows: Vec<SalesRow>,
    pub totals: SalesTotals,
}

impl SalesReport {
    pub fn build(orders: &[Order], range: DashboardRange, now: DateTime<Utc>) -> Result<Self, ReportError> {
        let (from, to) = range.bounds(now)?;
        let mut counted = counted(orders, &range, now)?;
        counted.sort_by_key(|o| o.created_at());
        let mut totals = SalesTotals::default();
        let rows = counted
            .into_iter()
            .map(|o| {
                totals.orders += 1;
                totals.subtotal += o.subtotal();
                totals.offer_discount += o.offer_discount();
                totals.coupon_discount += o.coupon_discount();
                totals.shipping += o.shipping_charge();
                totals.tax += o.tax();
                totals.payable += o.payable();
                SalesRow {
                    order_number: o.order_number().to_string(), date: o.created_at(),
                    customer: o.shipping_address().name.clone(), payment_method: o.payment_method(), status: o.status(),
                    subtotal: o.subtotal(), offer_discount: o.offer_discount(), coupon_discount: o.coupon_discount(),
                    shipping: o.shipping_charge(), tax: o.tax(), payable: o.payable(),
                }
            })
            .collect();
        Ok(Self { from, to, rows, totals })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReportError {
    #[error("Invalid date range: {from} is after {to}")]
    InvalidRange { from: NaiveDate, to: NaiveDate },
}
