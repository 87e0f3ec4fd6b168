//! Product Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::domain::events::{DomainEvent, ProductEvent};
use crate::domain::pricing::{resolve_price, Offer, OfferSet, PriceQuote};
use crate::domain::value_objects::{Money, Quantity, Sku, SkuError};

use super::catalog::{Category, Subcategory};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Product {
    id: Uuid,
    name: String,
    description: String,
    category_id: Uuid,
    subcategory_id: Uuid,
    offer: Option<Offer>,
    variants: Vec<Variant>,
    images: Vec<ProductImage>,
    tags: Vec<String>,
    fit_type: Option<String>,
    rating: Rating,
    listed: bool,
    deleted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Variant { pub sku: Sku, pub size: String, pub color: String, pub price: Money, pub stock: Quantity }
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductImage { pub url: String, pub thumbnail: Option<String>, pub is_main: bool }
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rating { pub average: f32, pub count: u32 }

impl Variant {
    pub fn matches(&self, size: &str, color: &str) -> bool {
        self.size.eq_ignore_ascii_case(size.trim()) && self.color.eq_ignore_ascii_case(color.trim())
    }
}

#[derive(Clone, Debug)]
pub struct NewVariant { pub sku: Option<String>, pub size: String, pub color: String, pub price: Money, pub stock: u32 }

#[derive(Clone, Debug)]
pub struct ProductDraft {
    pub name: String,
    pub description: String,
    pub category_id: Uuid,
    pub subcategory_id: Uuid,
    pub variants: Vec<NewVariant>,
    pub images: Vec<ProductImage>,
    pub tags: Vec<String>,
    pub fit_type: Option<String>,
    pub listed: bool,
}

impl Product {
    pub fn create(draft: ProductDraft, now: DateTime<Utc>) -> Result<Self, ProductError> {
        let id = Uuid::now_v7();
        let mut product = Self {
            id, name: String::new(), description: String::new(), category_id: draft.category_id,
            subcategory_id: draft.subcategory_id, offer: None, variants: vec![], images: vec![], tags: vec![],
            fit_type: None, rating: Rating::default(), listed: draft.listed, deleted: false,
            created_at: now, updated_at: now, events: vec![],
        };
        product.apply_draft(draft, now)?;
        product.raise_event(DomainEvent::Product(ProductEvent::Created { product_id: id }));
        Ok(product)
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn name(&self) -> &str { &self.name }
    pub fn description(&self) -> &str { &self.description }
    pub fn category_id(&self) -> Uuid { self.category_id }
    pub fn subcategory_id(&self) -> Uuid { self.subcategory_id }
    pub fn offer(&self) -> Option<&Offer> { self.offer.as_ref() }
    pub fn variants(&self) -> &[Variant] { &self.variants }
    pub fn images(&self) -> &[ProductImage] { &self.images }
    pub fn is_listed(&self) -> bool { self.listed }
    pub fn is_deleted(&self) -> bool { self.deleted }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }

    pub fn main_image(&self) -> Option<&str> {
        self.images.iter().find(|i| i.is_main).or_else(|| self.images.first()).map(|i| i.url.as_str())
    }

    /// Lowest base price across variants.
    pub fn min_price(&self) -> Money { self.variants.iter().map(|v| v.price).min().unwrap_or(Money::ZERO) }

    pub fn variant(&self, size: &str, color: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.matches(size, color))
    }

    pub fn total_stock(&self) -> u32 { self.variants.iter().map(|v| v.stock.value()).sum() }

    /// Listed, not deleted, and both parents active.
    pub fn is_purchasable(&self, category: Option<&Category>, subcategory: Option<&Subcategory>) -> bool {
        self.listed && !self.deleted
            && category.is_some_and(|c| c.id() == self.category_id && c.is_active())
            && subcategory.is_some_and(|s| s.id() == self.subcategory_id && s.is_active())
    }

    pub fn quote(&self, variant: &Variant, category: Option<&Category>, subcategory: Option<&Subcategory>, now: DateTime<Utc>) -> PriceQuote {
        let offers = OfferSet {
            product: self.offer.as_ref(),
            subcategory: subcategory.and_then(|s| s.offer()),
            category: category.and_then(|c| c.offer()),
        };
        resolve_price(variant.price, offers, now)
    }

    pub fn update(&mut self, draft: ProductDraft, now: DateTime<Utc>) -> Result<(), ProductError> {
        if self.deleted { return Err(ProductError::Deleted); }
        self.apply_draft(draft, now)
    }

    pub fn toggle_listed(&mut self, now: DateTime<Utc>) -> Result<bool, ProductError> {
        if self.deleted { return Err(ProductError::Deleted); }
        self.listed = !self.listed;
        self.touch(now);
        Ok(self.listed)
    }

    pub fn soft_delete(&mut self, now: DateTime<Utc>) -> Result<(), ProductError> {
        if self.deleted { return Err(ProductError::Deleted); }
        self.deleted = true;
        self.listed = false;
        self.touch(now);
        Ok(())
    }

    pub fn set_offer(&mut self, offer: Option<Offer>, now: DateTime<Utc>) { self.offer = offer; self.touch(now); }

    pub fn restock(&mut self, size: &str, color: &str, qty: u32, now: DateTime<Utc>) -> Result<(), ProductError> {
        let id = self.id;
        let variant = self.variants.iter_mut().find(|v| v.matches(size, color)).ok_or(ProductError::VariantNotFound)?;
        variant.stock = variant.stock.add(qty);
        let event = ProductEvent::StockAdjusted { product_id: id, sku: variant.sku.clone(), delta: i64::from(qty), remaining: variant.stock.value() };
        self.raise_event(DomainEvent::Product(event));
        self.touch(now);
        Ok(())
    }

    /// Puts units back after a cancel or return. Returns `false` and changes
    /// nothing when the variant has been removed since the sale.
    pub fn return_units(&mut self, size: &str, color: &str, qty: u32, now: DateTime<Utc>) -> bool {
        self.restock(size, color, qty, now).is_ok()
    }

    pub fn withdraw(&mut self, size: &str, color: &str, qty: u32, now: DateTime<Utc>) -> Result<(), ProductError> {
        let id = self.id;
        let variant = self.variants.iter_mut().find(|v| v.matches(size, color)).ok_or(ProductError::VariantNotFound)?;
        variant.stock = variant.stock.subtract(qty).ok_or_else(|| ProductError::InsufficientStock {
            sku: variant.sku.to_string(), available: variant.stock.value(), requested: qty,
        })?;
        let event = ProductEvent::StockAdjusted { product_id: id, sku: variant.sku.clone(), delta: -i64::from(qty), remaining: variant.stock.value() };
        self.raise_event(DomainEvent::Product(event));
        self.touch(now);
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self, now: DateTime<Utc>) { self.updated_at = now; }

    fn apply_draft(&mut self, draft: ProductDraft, now: DateTime<Utc>) -> Result<(), ProductError> {
        let name = draft.name.trim();
        if name.is_empty() { return Err(ProductError::MissingName); }
        if draft.variants.is_empty() { return Err(ProductError::NoVariants); }
        let mut combos = HashSet::new();
        let mut skus = HashSet::new();
        let mut variants = Vec::with_capacity(draft.variants.len());
        for v in draft.variants {
            let (size, color) = (v.size.trim().to_string(), v.color.trim().to_string());
            if size.is_empty() || color.is_empty() { return Err(ProductError::MissingSizeOrColor); }
            if !v.price.is_positive() { return Err(ProductError::InvalidPrice); }
            if !combos.insert((size.to_lowercase(), color.to_lowercase())) {
                return Err(ProductError::DuplicateVariant { size, color });
            }
            let sku = match v.sku.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
                Some(s) => Sku::new(s)?,
                None => Sku::generate(name, &size, &color)?,
            };
            if !skus.insert(sku.clone()) { return Err(ProductError::DuplicateSku(sku.to_string())); }
            variants.push(Variant { sku, size, color, price: v.price, stock: Quantity::new(v.stock) });
        }
        self.name = name.to_string();
        self.description = draft.description.trim().to_string();
        self.category_id = draft.category_id;
        self.subcategory_id = draft.subcategory_id;
        self.variants = variants;
        self.images = draft.images;
        self.tags = draft.tags.into_iter().map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect();
        self.fit_type = draft.fit_type;
        self.listed = draft.listed;
        self.touch(now);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProductError {
    #[error("Missing name")]
    MissingName,
    #[error("A product needs at least one variant")]
    NoVariants,
    #[error("Variant size and color are required")]
    MissingSizeOrColor,
    #[error("Variant price must be positive")]
    InvalidPrice,
    #[error("Duplicate variant {size}/{color}")]
    DuplicateVariant { size: String, color: String },
    #[error("Duplicate SKU {0}")]
    DuplicateSku(String),
    #[error(transparent)]
    Sku(#[from] SkuError),
    #[error("Variant not found")]
    VariantNotFound,
    #[error("Insufficient stock for {sku}: requested {requested}, available {available}")]
    InsufficientStock { sku: String, available: u32, requested: u32 },
    #[error("Product has been deleted")]
    Deleted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::catalog::CatalogNodeDraft;

    pub(crate) fn draft(category: Uuid, subcategory: Uuid) -> ProductDraft {
        ProductDraft {
            name: "Oxford Shirt".into(), description: "Cotton".into(), category_id: category, subcategory_id: subcategory,
            variants: vec![
                NewVariant { sku: None, size: "M".into(), color: "White".into(), price: Money::whole(1200), stock: 4 },
                NewVariant { sku: Some("oxf-l-wht".into()), size: "L".into(), color: "White".into(), price: Money::whole(1300), stock: 0 },
            ],
            images: vec![], tags: vec![" formal ".into(), "".into()], fit_type: Some("slim".into()), listed: true,
        }
    }

    #[test]
    fn test_product_create() {
        let p = Product::create(draft(Uuid::now_v7(), Uuid::now_v7()), Utc::now()).unwrap();
        assert_eq!(p.name(), "Oxford Shirt");
        assert_eq!(p.variants()[0].sku.as_str(), "OXF-M-WHI");
        assert_eq!(p.variants()[1].sku.as_str(), "OXF-L-WHT");
        assert_eq!(p.min_price(), Money::whole(1200));
        assert_eq!(p.total_stock(), 4);
    }

    #[test]
    fn test_duplicate_variant_rejected() {
        let mut d = draft(Uuid::now_v7(), Uuid::now_v7());
        d.variants[1].size = "m".into();
        d.variants[1].color = "white".into();
        assert!(matches!(Product::create(d, Utc::now()), Err(ProductError::DuplicateVariant { .. })));
    }

    #[test]
    fn test_inventory() {
        let mut p = Product::create(draft(Uuid::now_v7(), Uuid::now_v7()), Utc::now()).unwrap();
        p.withdraw("m", "white", 3, Utc::now()).unwrap();
        assert_eq!(p.variant("M", "White").unwrap().stock.value(), 1);
        let err = p.withdraw("M", "White", 2, Utc::now()).unwrap_err();
        assert_eq!(err, ProductError::InsufficientStock { sku: "OXF-M-WHI".into(), available: 1, requested: 2 });
        p.restock("M", "White", 2, Utc::now()).unwrap();
        assert_eq!(p.variant("M", "White").unwrap().stock.value(), 3);
        assert_eq!(p.take_events().len(), 3);
    }

    #[test]
    fn test_return_units_to_removed_variant() {
        let now = Utc::now();
        let mut p = Product::create(draft(Uuid::now_v7(), Uuid::now_v7()), now).unwrap();
        let mut d = draft(p.category_id(), p.subcategory_id());
        d.variants.remove(1);
        p.update(d, now).unwrap();

        assert!(!p.return_units("L", "White", 1, now));
        assert_eq!(p.restock("L", "White", 1, now).unwrap_err(), ProductError::VariantNotFound);
        assert!(p.take_events().is_empty());
        assert!(p.return_units("M", "White", 1, now));
        assert_eq!(p.variant("M", "White").unwrap().stock.value(), 5);
    }

    #[test]
    fn test_purchasable_requires_active_parents() {
        let now = Utc::now();
        let node = |n: &str| CatalogNodeDraft { name: n.into(), listed: true, ..Default::default() };
        let mut cat = Category::create(node("Men"), now).unwrap();
        let sub = Subcategory::create(&cat, node("Shirts"), now).unwrap();
        let p = Product::create(draft(cat.id(), sub.id()), now).unwrap();
        assert!(p.is_purchasable(Some(&cat), Some(&sub)));
        assert!(!p.is_purchasable(Some(&cat), None));
        cat.toggle_listed().unwrap();
        assert!(!p.is_purchasable(Some(&cat), Some(&sub)));
    }
}
