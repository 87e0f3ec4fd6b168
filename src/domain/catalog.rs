//! Read-side view over the catalog: purchasability, priced listings and
//! product search.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::aggregates::{Category, Product, Subcategory, Variant};
use crate::domain::pricing::PriceQuote;
use crate::domain::value_objects::Money;
use crate::domain::{paginate, Page};

#[derive(Clone, Debug, Default)]
pub struct CatalogView {
    categories: HashMap<Uuid, Category>,
    subcategories: HashMap<Uuid, Subcategory>,
    products: HashMap<Uuid, Product>,
}

/// A product together with its resolved parents.
#[derive(Clone, Copy, Debug)]
pub struct Listing<'a> {
    pub product: &'a Product,
    pub category: Option<&'a Category>,
    pub subcategory: Option<&'a Subcategory>,
}

impl<'a> Listing<'a> {
    pub fn is_purchasable(&self) -> bool { self.product.is_purchasable(self.category, self.subcategory) }

    pub fn quote(&self, variant: &Variant, now: DateTime<Utc>) -> PriceQuote {
        self.product.quote(variant, self.category, self.subcategory, now)
    }

    pub fn category_name(&self) -> &'a str { self.category.map(|c| c.name()).unwrap_or("Unknown") }
    pub fn subcategory_name(&self) -> &'a str { self.subcategory.map(|s| s.name()).unwrap_or("Unknown") }
}

impl CatalogView {
    pub fn new(categories: Vec<Category>, subcategories: Vec<Subcategory>, products: Vec<Product>) -> Self {
        Self {
            categories: categories.into_iter().map(|c| (c.id(), c)).collect(),
            subcategories: subcategories.into_iter().map(|s| (s.id(), s)).collect(),
            products: products.into_iter().map(|p| (p.id(), p)).collect(),
        }
    }

    pub fn listing(&self, product_id: Uuid) -> Option<Listing<'_>> {
        let product = self.products.get(&product_id)?;
        Some(Listing {
            product,
            category: self.categories.get(&product.category_id()),
            subcategory: self.subcategories.get(&product.subcategory_id()),
        })
    }

    pub fn product_mut(&mut self, product_id: Uuid) -> Option<&mut Product> { self.products.get_mut(&product_id) }

    pub fn into_products(self) -> Vec<Product> { self.products.into_values().collect() }

    pub fn search(&self, query: &ProductQuery, now: DateTime<Utc>) -> Page<ProductCard> {
        let mut cards: Vec<ProductCard> = self
            .products
            .keys()
            .filter_map(|id| self.listing(*id))
            .filter(|l| query.admits(l))
            .map(|l| ProductCard::from_listing(&l, now))
            .collect();
        query.sort.apply(&mut cards);
        paginate(cards, query.page, query.per_page)
    }
}

/// Who is looking at the catalog decides what is visible.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Purchasable products only.
    #[default]
    Storefront,
    /// Everything that is not deleted.
    Active,
    /// Soft-deleted products only.
    Deleted,
    All,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductSort {
    #[default]
    Newest,
    Oldest,
    PriceAsc,
    PriceDesc,
    NameAsc,
    NameDesc,
}

impl ProductSort {
    fn apply(self, cards: &mut [ProductCard]) {
        match self {
            Self::Newest => cards.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            Self::Oldest => cards.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
            Self::PriceAsc => cards.sort_by(|a, b| a.from_price.cmp(&b.from_price)),
            Self::PriceDesc => cards.sort_by(|a, b| b.from_price.cmp(&a.from_price)),
            Self::NameAsc => cards.sort_by_key(|c| c.name.to_lowercase()),
            Self::NameDesc => cards.sort_by(|a, b| b.name.to_lowercase().cmp(&a.name.to_lowercase())),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProductQuery {
    pub visibility: Visibility,
    pub search: Option<String>,
    pub category_id: Option<Uuid>,
    pub subcategory_id: Option<Uuid>,
    pub min_price: Option<Money>,
    pub max_price: Option<Money>,
    pub sort: ProductSort,
    pub page: u32,
    pub per_page: u32,
}

impl Default for ProductQuery {
    fn default() -> Self {
        Self {
            visibility: Visibility::Storefront, search: None, category_id: None, subcategory_id: None,
            min_price: None, max_price: None, sort: ProductSort::Newest, page: 1, per_page: 10,
        }
    }
}

impl ProductQuery {
    fn admits(&self, listing: &Listing<'_>) -> bool {
        let p = listing.product;
        let visible = match self.visibility {
            Visibility::Storefront => listing.is_purchasable(),
            Visibility::Active => !p.is_deleted(),
            Visibility::Deleted => p.is_deleted(),
            Visibility::All => true,
        };
        if !visible { return false; }
        if self.category_id.is_some_and(|c| c != p.category_id()) { return false; }
        if self.subcategory_id.is_some_and(|s| s != p.subcategory_id()) { return false; }
        if let Some(term) = self.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let term = term.to_lowercase();
            if !p.name().to_lowercase().contains(&term) && !p.description().to_lowercase().contains(&term) { return false; }
        }
        // Price filters match when any variant's base price is in range.
        if self.min_price.is_some() || self.max_price.is_some() {
            let in_range = p.variants().iter().any(|v| {
                self.min_price.map_or(true, |min| v.price >= min) && self.max_price.map_or(true, |max| v.price <= max)
            });
            if !in_range { return false; }
        }
        true
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct VariantCard {
    pub sku: String,
    pub size: String,
    pub color: String,
    pub stock: u32,
    pub price: PriceQuote,
}

/// Product as shown in lists and on the detail page, with live prices.
#[derive(Clone, Debug, Serialize)]
pub struct ProductCard {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub category: String,
    pub subcategory: String,
    pub image: Option<String>,
    pub from_price: Money,
    pub listed: bool,
    pub deleted: bool,
    pub variants: Vec<VariantCard>,
    pub created_at: DateTime<Utc>,
}

impl ProductCard {
    pub fn from_listing(listing: &Listing<'_>, now: DateTime<Utc>) -> Self {
        let p = listing.product;
        let variants: Vec<VariantCard> = p
            .variants()
            .iter()
            .map(|v| VariantCard {
                sku: v.sku.to_string(), size: v.size.clone(), color: v.color.clone(), stock: v.stock.value(),
                price: listing.quote(v, now),
            })
            .collect();
        let from_price = variants.iter().map(|v| v.price.sale).min().unwrap_or(Money::ZERO);
        Self {
            id: p.id(), name: p.name().to_string(), description: p.description().to_string(),
            category: listing.category_name().to_string(), subcategory: listing.subcategory_name().to_string(),
            image: p.main_image().map(str::to_string), from_price, listed: p.is_listed(), deleted: p.is_deleted(),
            variants, created_at: p.created_at(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{CatalogNodeDraft, NewVariant, ProductDraft};
    use crate::domain::pricing::Offer;
    use crate::domain::value_objects::Percentage;
    use chrono::Duration;
    use rust_decimal::Decimal;

    fn node(name: &str) -> CatalogNodeDraft { CatalogNodeDraft { name: name.into(), listed: true, ..Default::default() } }

    fn product(name: &str, cat: &Category, sub: &Subcategory, price: i64) -> Product {
        Product::create(ProductDraft {
            name: name.into(), description: format!("{} description", name), category_id: cat.id(), subcategory_id: sub.id(),
            variants: vec![NewVariant { sku: None, size: "M".into(), color: "Blue".into(), price: Money::whole(price), stock: 3 }],
            images: vec![], tags: vec![], fit_type: None, listed: true,
        }, Utc::now()).unwrap()
    }

    fn fixture() -> CatalogView {
        let now = Utc::now();
        let mut men = Category::create(node("Men"), now).unwrap();
        let women = Category::create(node("Women"), now).unwrap();
        let shirts = Subcategory::create(&men, node("Shirts"), now).unwrap();
        let dresses = Subcategory::create(&women, node("Dresses"), now).unwrap();
        let offer = Offer::new(Percentage::new(Decimal::from(10)).unwrap(), Money::ZERO, now - Duration::days(1), now + Duration::days(1)).unwrap();
        men.set_offer(offer).unwrap();
        let a = product("Denim Shirt", &men, &shirts, 1000);
        let b = product("Linen Shirt", &men, &shirts, 600);
        let c = product("Maxi Dress", &women, &dresses, 2000);
        CatalogView::new(vec![men, women], vec![shirts, dresses], vec![a, b, c])
    }

    #[test]
    fn test_storefront_search_filters_and_sorts() {
        let view = fixture();
        let query = ProductQuery { search: Some("shirt".into()), sort: ProductSort::PriceAsc, ..Default::default() };
        let page = view.search(&query, Utc::now());
        assert_eq!(page.total, 2);
        assert_eq!(page.data[0].name, "Linen Shirt");
        // 10% category offer
        assert_eq!(page.data[0].from_price, Money::whole(540));
    }

    #[test]
    fn test_price_range_uses_base_price() {
        let view = fixture();
        let query = ProductQuery { min_price: Some(Money::whole(900)), max_price: Some(Money::whole(1500)), ..Default::default() };
        let page = view.search(&query, Utc::now());
        assert_eq!(page.total, 1);
        assert_eq!(page.data[0].name, "Denim Shirt");
    }

    #[test]
    fn test_unlisted_product_hidden_from_storefront() {
        let mut view = fixture();
        let id = view.search(&ProductQuery { search: Some("maxi".into()), ..Default::default() }, Utc::now()).data[0].id;
        view.product_mut(id).unwrap().toggle_listed(Utc::now()).unwrap();
        let storefront = view.search(&ProductQuery::default(), Utc::now());
        assert_eq!(storefront.total, 2);
        let admin = view.search(&ProductQuery { visibility: Visibility::Active, ..Default::default() }, Utc::now());
        assert_eq!(admin.total, 3);
    }
}
