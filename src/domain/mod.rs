//! Store domain: aggregates, pricing rules and read models.
pub mod aggregates;
pub mod catalog;
pub mod checkout;
pub mod events;
pub mod policy;
pub mod pricing;
pub mod refund;
pub mod reporting;
pub mod value_objects;

use serde::Serialize;

#[derive(Clone, Debug, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u32,
}

/// Slices an already filtered and sorted list. Pages are 1-based.
pub fn paginate<T>(items: Vec<T>, page: u32, per_page: u32) -> Page<T> {
    let per_page = per_page.max(1);
    let page = page.max(1);
    let total = items.len() as u64;
    let total_pages = (total.div_ceil(u64::from(per_page)) as u32).max(1);
    let start = ((page - 1) as usize).saturating_mul(per_page as usize);
    let data = items.into_iter().skip(start).take(per_page as usize).collect();
    Page { data, total, page, per_page, total_pages }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paginate() {
        let page = paginate((1..=23).collect::<Vec<_>>(), 3, 10);
        assert_eq!(page.data, vec![21, 22, 23]);
        assert_eq!(page.total_pages, 3);
        let empty = paginate(Vec::<u8>::new(), 0, 10);
        assert_eq!(empty.page, 1);
        assert_eq!(empty.total_pages, 1);
    }
}
