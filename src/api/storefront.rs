use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::Router;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use super::{ApiResponse, ApiResult, CurrentUser};
use crate::domain::aggregates::Coupon;
use crate::domain::catalog::{ProductCard, ProductQuery, ProductSort, Visibility};
use crate::domain::value_objects::Money;
use crate::domain::Page;
use crate::services::catalog::CategoryTree;
use crate::services::AppState;

const MAX_PER_PAGE: u32 = 50;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/products", get(list_products))
        .route("/products/:id", get(get_product))
        .route("/categories", get(list_categories))
        .route("/coupons", get(available_coupons))
}

/// Query string shared by the storefront and admin product listings.
#[derive(Debug, Default, Deserialize)]
pub(super) struct ProductParams {
    /// Admin listings only; the storefront always shows purchasable products.
    pub view: Option<Visibility>,
    pub search: Option<String>,
    pub category_id: Option<Uuid>,
    pub subcategory_id: Option<Uuid>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub sort: Option<ProductSort>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl ProductParams {
    pub(super) fn into_query(self, visibility: Visibility) -> ProductQuery {
        let defaults = ProductQuery::default();
        ProductQuery {
            visibility,
            search: self.search,
            category_id: self.category_id,
            subcategory_id: self.subcategory_id,
            min_price: self.min_price.map(Money::new),
            max_price: self.max_price.map(Money::new),
            sort: self.sort.unwrap_or_default(),
            page: self.page.unwrap_or(1).max(1),
            per_page: self.per_page.unwrap_or(defaults.per_page).clamp(1, MAX_PER_PAGE),
        }
    }
}

async fn list_products(State(s): State<AppState>, Query(p): Query<ProductParams>) -> ApiResult<Page<ProductCard>> {
    Ok(ApiResponse::ok(s.store.storefront_products(p.into_query(Visibility::Storefront)).await?))
}

async fn get_product(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<ProductCard> {
    Ok(ApiResponse::ok(s.store.storefront_product(id).await?))
}

async fn list_categories(State(s): State<AppState>) -> ApiResult<Vec<CategoryTree>> {
    Ok(ApiResponse::ok(s.store.storefront_categories().await?))
}

async fn available_coupons(State(s): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<Vec<Coupon>> {
    Ok(ApiResponse::ok(s.store.available_coupons(user).await?))
}
