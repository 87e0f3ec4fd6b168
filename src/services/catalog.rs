//! Catalog administration and storefront reads.

use chrono::Utc;
use serde::Serialize;
use sqlx::PgConnection;
use std::collections::HashSet;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::Store;
use crate::db::{self, queries};
use crate::domain::aggregates::{CatalogError, CatalogNodeDraft, Category, Product, ProductDraft, StockMovement, Subcategory};
use crate::domain::catalog::{ProductCard, ProductQuery, Visibility};
use crate::domain::events::DomainEvent;
use crate::domain::pricing::Offer;
use crate::domain::{paginate, Page};
use crate::{Result, StoreError};

const CATALOG_PER_PAGE: u32 = 10;

/// Listed category with its listed subcategories, for navigation.
#[derive(Clone, Debug, Serialize)]
pub struct CategoryTree {
    pub category: Category,
    pub subcategories: Vec<Subcategory>,
}

#[derive(Clone, Copy, Debug)]
pub enum StockChange { Add(u32), Remove(u32) }

impl Store {
    // ---- storefront ----

    pub async fn storefront_products(&self, mut query: ProductQuery) -> Result<Page<ProductCard>> {
        query.visibility = Visibility::Storefront;
        let mut conn = self.db.acquire().await?;
        let view = queries::load_catalog(&mut conn).await?;
        Ok(view.search(&query, Utc::now()))
    }

    pub async fn storefront_product(&self, product_id: Uuid) -> Result<ProductCard> {
        let mut conn = self.db.acquire().await?;
        let view = queries::load_catalog(&mut conn).await?;
        let listing = view.listing(product_id).filter(|l| l.is_purchasable()).ok_or(StoreError::NotFound("Product"))?;
        Ok(ProductCard::from_listing(&listing, Utc::now()))
    }

    pub async fn storefront_categories(&self) -> Result<Vec<CategoryTree>> {
        let mut conn = self.db.acquire().await?;
        let categories = db::all::<Category>(&mut conn).await?;
        let subcategories = db::all::<Subcategory>(&mut conn).await?;
        Ok(categories
            .into_iter()
            .filter(Category::is_active)
            .map(|category| {
                let subcategories = subcategories.iter().filter(|s| s.category_id() == category.id() && s.is_active()).cloned().collect();
                CategoryTree { category, subcategories }
            })
            .collect())
    }

    // ---- categories ----

    pub async fn list_categories(&self, search: Option<String>, page: u32) -> Result<Page<Category>> {
        let mut conn = self.db.acquire().await?;
        let term = search.map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty());
        let categories: Vec<Category> = db::all::<Category>(&mut conn)
            .await?
            .into_iter()
            .filter(|c| term.as_deref().map_or(true, |t| c.name().to_lowercase().contains(t)))
            .collect();
        Ok(paginate(categories, page, CATALOG_PER_PAGE))
    }

    #[instrument(skip(self, draft), fields(name = %draft.name))]
    pub async fn create_category(&self, draft: CatalogNodeDraft) -> Result<Category> {
        let mut tx = self.db.begin().await?;
        let existing = db::all::<Category>(&mut tx).await?;
        if existing.iter().any(|c| c.same_name(&draft.name)) {
            warn!("duplicate category name");
            return Err(CatalogError::DuplicateName(draft.name.trim().to_string()).into());
        }
        let category = Category::create(draft, Utc::now())?;
        db::upsert(&mut tx, &category).await?;
        tx.commit().await?;
        info!(category_id = %category.id(), "category created");
        Ok(category)
    }

    #[instrument(skip(self, draft), fields(category_id = %id))]
    pub async fn update_category(&self, id: Uuid, draft: CatalogNodeDraft) -> Result<Category> {
        let mut tx = self.db.begin().await?;
        let mut category = db::find_for_update::<Category>(&mut tx, id).await?.ok_or(StoreError::NotFound("Category"))?;
        let others = db::all::<Category>(&mut tx).await?;
        if others.iter().any(|c| c.id() != id && c.same_name(&draft.name)) {
            return Err(CatalogError::DuplicateName(draft.name.trim().to_string()).into());
        }
        category.update(draft)?;
        db::upsert(&mut tx, &category).await?;
        tx.commit().await?;
        info!("category updated");
        Ok(category)
    }

    #[instrument(skip(self), fields(category_id = %id))]
    pub async fn toggle_category(&self, id: Uuid) -> Result<bool> {
        let mut tx = self.db.begin().await?;
        let mut category = db::find_for_update::<Category>(&mut tx, id).await?.ok_or(StoreError::NotFound("Category"))?;
        let listed = category.toggle_listed()?;
        db::upsert(&mut tx, &category).await?;
        tx.commit().await?;
        info!(listed, "category visibility changed");
        Ok(listed)
    }

    #[instrument(skip(self), fields(category_id = %id))]
    pub async fn delete_category(&self, id: Uuid) -> Result<()> {
        let mut tx = self.db.begin().await?;
        let mut category = db::find_for_update::<Category>(&mut tx, id).await?.ok_or(StoreError::NotFound("Category"))?;
        category.soft_delete()?;
        db::upsert(&mut tx, &category).await?;
        tx.commit().await?;
        info!("category deleted");
        Ok(())
    }

    #[instrument(skip(self, offer), fields(category_id = %id))]
    pub async fn set_category_offer(&self, id: Uuid, offer: Option<Offer>) -> Result<Category> {
        let mut tx = self.db.begin().await?;
        let mut category = db::find_for_update::<Category>(&mut tx, id).await?.ok_or(StoreError::NotFound("Category"))?;
        match offer {
            Some(offer) => category.set_offer(offer)?,
            None => category.clear_offer(),
        }
        db::upsert(&mut tx, &category).await?;
        tx.commit().await?;
        info!("category offer changed");
        Ok(category)
    }

    // ---- subcategories ----

    pub async fn list_subcategories(&self, category_id: Uuid, search: Option<String>, page: u32) -> Result<Page<Subcategory>> {
        let mut conn = self.db.acquire().await?;
        db::find::<Category>(&mut conn, category_id).await?.ok_or(StoreError::NotFound("Category"))?;
        let term = search.map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty());
        let subs: Vec<Subcategory> = queries::subcategories_of(&mut conn, category_id)
            .await?
            .into_iter()
            .filter(|s| term.as_deref().map_or(true, |t| s.name().to_lowercase().contains(t)))
            .collect();
        Ok(paginate(subs, page, CATALOG_PER_PAGE))
    }

    #[instrument(skip(self, draft), fields(category_id = %category_id, name = %draft.name))]
    pub async fn create_subcategory(&self, category_id: Uuid, draft: CatalogNodeDraft) -> Result<Subcategory> {
        let mut tx = self.db.begin().await?;
        let parent = db::find::<Category>(&mut tx, category_id).await?.ok_or(StoreError::NotFound("Category"))?;
        let siblings = queries::subcategories_of(&mut tx, category_id).await?;
        if siblings.iter().any(|s| s.same_name(&draft.name)) {
            return Err(CatalogError::DuplicateName(draft.name.trim().to_string()).into());
        }
        let sub = Subcategory::create(&parent, draft, Utc::now())?;
        db::upsert(&mut tx, &sub).await?;
        tx.commit().await?;
        info!(subcategory_id = %sub.id(), "subcategory created");
        Ok(sub)
    }

    #[instrument(skip(self, draft), fields(subcategory_id = %id))]
    pub async fn update_subcategory(&self, id: Uuid, draft: CatalogNodeDraft) -> Result<Subcategory> {
        let mut tx = self.db.begin().await?;
        let mut sub = db::find_for_update::<Subcategory>(&mut tx, id).await?.ok_or(StoreError::NotFound("Subcategory"))?;
        let siblings = queries::subcategories_of(&mut tx, sub.category_id()).await?;
        if siblings.iter().any(|s| s.id() != id && s.same_name(&draft.name)) {
            return Err(CatalogError::DuplicateName(draft.name.trim().to_string()).into());
        }
        sub.update(draft)?;
        db::upsert(&mut tx, &sub).await?;
        tx.commit().await?;
        info!("subcategory updated");
        Ok(sub)
    }

    #[instrument(skip(self), fields(subcategory_id = %id))]
    pub async fn toggle_subcategory(&self, id: Uuid) -> Result<bool> {
        let mut tx = self.db.begin().await?;
        let mut sub = db::find_for_update::<Subcategory>(&mut tx, id).await?.ok_or(StoreError::NotFound("Subcategory"))?;
        let listed = sub.toggle_listed()?;
        db::upsert(&mut tx, &sub).await?;
        tx.commit().await?;
        info!(listed, "subcategory visibility changed");
        Ok(listed)
    }

    #[instrument(skip(self), fields(subcategory_id = %id))]
    pub async fn delete_subcategory(&self, id: Uuid) -> Result<()> {
        let mut tx = self.db.begin().await?;
        let mut sub = db::find_for_update::<Subcategory>(&mut tx, id).await?.ok_or(StoreError::NotFound("Subcategory"))?;
        sub.soft_delete()?;
        db::upsert(&mut tx, &sub).await?;
        tx.commit().await?;
        info!("subcategory deleted");
        Ok(())
    }

    #[instrument(skip(self, offer), fields(subcategory_id = %id))]
    pub async fn set_subcategory_offer(&self, id: Uuid, offer: Option<Offer>) -> Result<Subcategory> {
        let mut tx = self.db.begin().await?;
        let mut sub = db::find_for_update::<Subcategory>(&mut tx, id).await?.ok_or(StoreError::NotFound("Subcategory"))?;
        match offer {
            Some(offer) => sub.set_offer(offer)?,
            None => sub.clear_offer(),
        }
        db::upsert(&mut tx, &sub).await?;
        tx.commit().await?;
        info!("subcategory offer changed");
        Ok(sub)
    }

    // ---- products ----

    pub async fn admin_products(&self, query: ProductQuery) -> Result<Page<ProductCard>> {
        let mut conn = self.db.acquire().await?;
        let view = queries::load_catalog(&mut conn).await?;
        Ok(view.search(&query, Utc::now()))
    }

    pub async fn admin_product(&self, product_id: Uuid) -> Result<ProductCard> {
        let mut conn = self.db.acquire().await?;
        let view = queries::load_catalog(&mut conn).await?;
        let listing = view.listing(product_id).ok_or(StoreError::NotFound("Product"))?;
        Ok(ProductCard::from_listing(&listing, Utc::now()))
    }

    #[instrument(skip(self, draft), fields(name = %draft.name))]
    pub async fn create_product(&self, draft: ProductDraft) -> Result<Product> {
        let mut tx = self.db.begin().await?;
        check_parents(&mut tx, &draft).await?;
        let mut product = Product::create(draft, Utc::now())?;
        check_unique_skus(&mut tx, &product).await?;
        db::upsert(&mut tx, &product).await?;
        tx.commit().await?;
        info!(product_id = %product.id(), "product created");
        self.events.publish(product.take_events()).await;
        Ok(product)
    }

    #[instrument(skip(self, draft), fields(product_id = %id))]
    pub async fn update_product(&self, id: Uuid, draft: ProductDraft) -> Result<Product> {
        let mut tx = self.db.begin().await?;
        let mut product = db::find_for_update::<Product>(&mut tx, id).await?.ok_or(StoreError::NotFound("Product"))?;
        check_parents(&mut tx, &draft).await?;
        product.update(draft, Utc::now())?;
        check_unique_skus(&mut tx, &product).await?;
        db::upsert(&mut tx, &product).await?;
        tx.commit().await?;
        info!("product updated");
        Ok(product)
    }

    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn toggle_product(&self, id: Uuid) -> Result<bool> {
        let mut tx = self.db.begin().await?;
        let mut product = db::find_for_update::<Product>(&mut tx, id).await?.ok_or(StoreError::NotFound("Product"))?;
        let listed = product.toggle_listed(Utc::now())?;
        db::upsert(&mut tx, &product).await?;
        tx.commit().await?;
        info!(listed, "product visibility changed");
        Ok(listed)
    }

    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn delete_product(&self, id: Uuid) -> Result<()> {
        let mut tx = self.db.begin().await?;
        let mut product = db::find_for_update::<Product>(&mut tx, id).await?.ok_or(StoreError::NotFound("Product"))?;
        product.soft_delete(Utc::now())?;
        db::upsert(&mut tx, &product).await?;
        tx.commit().await?;
        info!("product deleted");
        Ok(())
    }

    #[instrument(skip(self, offer), fields(product_id = %id))]
    pub async fn set_product_offer(&self, id: Uuid, offer: Option<Offer>) -> Result<Product> {
        let mut tx = self.db.begin().await?;
        let mut product = db::find_for_update::<Product>(&mut tx, id).await?.ok_or(StoreError::NotFound("Product"))?;
        product.set_offer(offer, Utc::now());
        db::upsert(&mut tx, &product).await?;
        tx.commit().await?;
        info!("product offer changed");
        Ok(product)
    }

    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn adjust_stock(&self, id: Uuid, size: &str, color: &str, change: StockChange) -> Result<Product> {
        let mut tx = self.db.begin().await?;
        let mut product = db::find_for_update::<Product>(&mut tx, id).await?.ok_or(StoreError::NotFound("Product"))?;
        match change {
            StockChange::Add(qty) => product.restock(size, color, qty, Utc::now())?,
            StockChange::Remove(qty) => product.withdraw(size, color, qty, Utc::now())?,
        }
        db::upsert(&mut tx, &product).await?;
        tx.commit().await?;
        info!(?change, "stock adjusted");
        self.events.publish(product.take_events()).await;
        Ok(product)
    }
}

async fn check_parents(conn: &mut PgConnection, draft: &ProductDraft) -> Result<()> {
    let category = db::find::<Category>(&mut *conn, draft.category_id).await?.ok_or(StoreError::NotFound("Category"))?;
    if category.is_deleted() { return Err(CatalogError::Deleted(category.name().to_string()).into()); }
    let sub = db::find::<Subcategory>(&mut *conn, draft.subcategory_id).await?.ok_or(StoreError::NotFound("Subcategory"))?;
    if sub.category_id() != category.id() { return Err(CatalogError::WrongParent.into()); }
    if sub.is_deleted() { return Err(CatalogError::Deleted(sub.name().to_string()).into()); }
    Ok(())
}

/// SKUs are unique across the whole catalog.
async fn check_unique_skus(conn: &mut PgConnection, product: &Product) -> Result<()> {
    let mine: HashSet<&str> = product.variants().iter().map(|v| v.sku.as_str()).collect();
    let others = db::all::<Product>(conn).await?;
    let clash = others
        .iter()
        .filter(|p| p.id() != product.id())
        .flat_map(|p| p.variants())
        .find(|v| mine.contains(v.sku.as_str()));
    match clash {
        Some(v) => Err(StoreError::Conflict(format!("SKU {} already exists", v.sku))),
        None => Ok(()),
    }
}

/// Applies stock movements on row-locked products and collects their events.
///
/// Rows are locked in product id order. Units coming back for a product or
/// variant that no longer exists are dropped with a warning so the cancel or
/// return that produced them still goes through.
pub(crate) async fn move_stock(
    conn: &mut PgConnection,
    movements: &[StockMovement],
    direction: fn(u32) -> StockChange,
    events: &mut Vec<DomainEvent>,
) -> Result<()> {
    let now = Utc::now();
    for m in lock_order(movements) {
        let Some(mut product) = db::find_for_update::<Product>(&mut *conn, m.product_id).await? else {
            if let StockChange::Add(qty) = direction(m.quantity) {
                warn!(product_id = %m.product_id, qty, "restock skipped, product is gone");
                continue;
            }
            return Err(StoreError::NotFound("Product"));
        };
        match direction(m.quantity) {
            StockChange::Add(qty) => {
                if !product.return_units(&m.size, &m.color, qty, now) {
                    warn!(product_id = %m.product_id, size = %m.size, color = %m.color, qty, "restock skipped, variant is gone");
                    continue;
                }
            }
            StockChange::Remove(qty) => product.withdraw(&m.size, &m.color, qty, now)?,
        }
        db::upsert(&mut *conn, &product).await?;
        events.extend(product.take_events());
    }
    Ok(())
}

/// Movements sorted by product so concurrent writers take row locks in the
/// same order.
fn lock_order(movements: &[StockMovement]) -> Vec<&StockMovement> {
    let mut sorted: Vec<&StockMovement> = movements.iter().collect();
    sorted.sort_by_key(|m| m.product_id);
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movement(product_id: Uuid) -> StockMovement {
        StockMovement { product_id, size: "M".into(), color: "Black".into(), quantity: 1 }
    }

    #[test]
    fn test_lock_order_is_by_product() {
        let (first, second) = (Uuid::from_u128(1), Uuid::from_u128(2));
        let a = [movement(second), movement(first)];
        let b = [movement(first), movement(second)];
        let ids = |ms: &[StockMovement]| lock_order(ms).iter().map(|m| m.product_id).collect::<Vec<_>>();
        assert_eq!(ids(&a), vec![first, second]);
        assert_eq!(ids(&a), ids(&b));
    }
}
