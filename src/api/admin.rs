//! Admin routes. Every handler takes an [`AdminGuard`] first so requests
//! without the admin token are refused before the body is read.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post, put};
use axum::Router;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::storefront::ProductParams;
use super::wallet::{positive_amount, BalanceResponse};
use super::{AdminGuard, ApiResponse, ApiResult, ValidatedJson};
use crate::domain::aggregates::{
    CatalogNodeDraft, Category, Coupon, CouponDraft, CouponKind, ItemStatus, NewVariant, Order, OrderStatus, Product,
    ProductDraft, ProductImage, ReturnDecision, Subcategory, WalletMethod,
};
use crate::domain::catalog::{ProductCard, Visibility};
use crate::domain::pricing::Offer;
use crate::domain::reporting::{Dashboard, DashboardRange, SalesReport};
use crate::domain::value_objects::{Money, Percentage};
use crate::domain::Page;
use crate::services::catalog::StockChange;
use crate::services::coupons::CouponFilter;
use crate::services::orders::{OrderDetail, SettledOrder};
use crate::services::AppState;
use crate::StoreError;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        // catalog
        .route("/categories", get(list_categories).post(create_category))
        .route("/categories/:id", put(update_category).delete(delete_category))
        .route("/categories/:id/toggle", post(toggle_category))
        .route("/categories/:id/offer", put(set_category_offer).delete(clear_category_offer))
        .route("/categories/:id/subcategories", get(list_subcategories).post(create_subcategory))
        .route("/subcategories/:id", put(update_subcategory).delete(delete_subcategory))
        .route("/subcategories/:id/toggle", post(toggle_subcategory))
        .route("/subcategories/:id/offer", put(set_subcategory_offer).delete(clear_subcategory_offer))
        .route("/products", get(list_products).post(create_product))
        .route("/products/:id", get(get_product).put(update_product).delete(delete_product))
        .route("/products/:id/toggle", post(toggle_product))
        .route("/products/:id/offer", put(set_product_offer).delete(clear_product_offer))
        .route("/products/:id/stock", post(adjust_stock))
        // coupons
        .route("/coupons", get(list_coupons).post(create_coupon))
        .route("/coupons/:id", put(update_coupon).delete(delete_coupon))
        // orders
        .route("/orders", get(list_orders))
        .route("/orders/:number", get(get_order))
        .route("/orders/:number/status", put(update_order_status))
        .route("/orders/:number/return", post(decide_return))
        .route("/orders/:number/items/:item_id/status", put(update_item_status))
        .route("/orders/:number/items/:item_id/return", post(decide_item_return))
        // wallets and reports
        .route("/wallets/:user_id/credit", post(credit_wallet))
        .route("/dashboard", get(dashboard))
        .route("/reports/sales", get(sales_report))
}

fn percentage_range(value: &Decimal) -> Result<(), ValidationError> {
    if *value >= Decimal::ZERO && *value <= Decimal::ONE_HUNDRED { Ok(()) } else { Err(ValidationError::new("percentage_out_of_range")) }
}

fn not_negative(value: &Decimal) -> Result<(), ValidationError> {
    if *value >= Decimal::ZERO { Ok(()) } else { Err(ValidationError::new("must_not_be_negative")) }
}

#[derive(Debug, Default, Deserialize)]
struct SearchParams {
    search: Option<String>,
    page: Option<u32>,
}

#[derive(Debug, Serialize)]
struct Listed {
    listed: bool,
}

// ---- categories and subcategories ----

#[derive(Debug, Deserialize, Validate)]
struct NodeRequest {
    #[validate(length(min = 1, max = 60))]
    name: String,
    #[serde(default)]
    #[validate(length(max = 500))]
    description: String,
    #[validate(url)]
    image_url: Option<String>,
    #[serde(default = "listed_by_default")]
    listed: bool,
}

fn listed_by_default() -> bool { true }

impl From<NodeRequest> for CatalogNodeDraft {
    fn from(r: NodeRequest) -> Self {
        CatalogNodeDraft { name: r.name, description: r.description, image_url: r.image_url, listed: r.listed }
    }
}

#[derive(Debug, Deserialize, Validate)]
struct OfferRequest {
    #[validate(custom = "percentage_range")]
    percentage: Decimal,
    /// Per-unit cap; omitted or zero means uncapped.
    #[validate(custom = "not_negative")]
    max_redeem: Option<Decimal>,
    starts_at: DateTime<Utc>,
    valid_until: DateTime<Utc>,
}

impl OfferRequest {
    fn into_offer(self) -> Result<Offer, StoreError> {
        let cap = Money::new(self.max_redeem.unwrap_or(Decimal::ZERO));
        Ok(Offer::new(Percentage::new(self.percentage)?, cap, self.starts_at, self.valid_until)?)
    }
}

async fn list_categories(_: AdminGuard, State(s): State<AppState>, Query(p): Query<SearchParams>) -> ApiResult<Page<Category>> {
    Ok(ApiResponse::ok(s.store.list_categories(p.search, p.page.unwrap_or(1)).await?))
}

async fn create_category(_: AdminGuard, State(s): State<AppState>, ValidatedJson(r): ValidatedJson<NodeRequest>) -> ApiResult<Category> {
    Ok(ApiResponse::created(s.store.create_category(r.into()).await?))
}

async fn update_category(_: AdminGuard, State(s): State<AppState>, Path(id): Path<Uuid>, ValidatedJson(r): ValidatedJson<NodeRequest>) -> ApiResult<Category> {
    Ok(ApiResponse::ok(s.store.update_category(id, r.into()).await?))
}

async fn toggle_category(_: AdminGuard, State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Listed> {
    Ok(ApiResponse::ok(Listed { listed: s.store.toggle_category(id).await? }))
}

async fn delete_category(_: AdminGuard, State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<()> {
    s.store.delete_category(id).await?;
    Ok(ApiResponse::ok(()))
}

async fn set_category_offer(_: AdminGuard, State(s): State<AppState>, Path(id): Path<Uuid>, ValidatedJson(r): ValidatedJson<OfferRequest>) -> ApiResult<Category> {
    Ok(ApiResponse::ok(s.store.set_category_offer(id, Some(r.into_offer()?)).await?))
}

async fn clear_category_offer(_: AdminGuard, State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Category> {
    Ok(ApiResponse::ok(s.store.set_category_offer(id, None).await?))
}

async fn list_subcategories(_: AdminGuard, State(s): State<AppState>, Path(id): Path<Uuid>, Query(p): Query<SearchParams>) -> ApiResult<Page<Subcategory>> {
    Ok(ApiResponse::ok(s.store.list_subcategories(id, p.search, p.page.unwrap_or(1)).await?))
}

async fn create_subcategory(_: AdminGuard, State(s): State<AppState>, Path(id): Path<Uuid>, ValidatedJson(r): ValidatedJson<NodeRequest>) -> ApiResult<Subcategory> {
    Ok(ApiResponse::created(s.store.create_subcategory(id, r.into()).await?))
}

async fn update_subcategory(_: AdminGuard, State(s): State<AppState>, Path(id): Path<Uuid>, ValidatedJson(r): ValidatedJson<NodeRequest>) -> ApiResult<Subcategory> {
    Ok(ApiResponse::ok(s.store.update_subcategory(id, r.into()).await?))
}

async fn toggle_subcategory(_: AdminGuard, State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Listed> {
    Ok(ApiResponse::ok(Listed { listed: s.store.toggle_subcategory(id).await? }))
}

async fn delete_subcategory(_: AdminGuard, State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<()> {
    s.store.delete_subcategory(id).await?;
    Ok(ApiResponse::ok(()))
}

async fn set_subcategory_offer(_: AdminGuard, State(s): State<AppState>, Path(id): Path<Uuid>, ValidatedJson(r): ValidatedJson<OfferRequest>) -> ApiResult<Subcategory> {
    Ok(ApiResponse::ok(s.store.set_subcategory_offer(id, Some(r.into_offer()?)).await?))
}

async fn clear_subcategory_offer(_: AdminGuard, State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Subcategory> {
    Ok(ApiResponse::ok(s.store.set_subcategory_offer(id, None).await?))
}

// ---- products ----

#[derive(Debug, Deserialize, Validate)]
struct VariantRequest {
    #[validate(length(min = 1, max = 40))]
    sku: Option<String>,
    #[validate(length(min = 1, max = 20))]
    size: String,
    #[validate(length(min = 1, max = 40))]
    color: String,
    #[validate(custom = "positive_amount")]
    price: Decimal,
    #[serde(default)]
    stock: u32,
}

#[derive(Debug, Deserialize, Validate)]
struct ImageRequest {
    #[validate(url)]
    url: String,
    thumbnail: Option<String>,
    #[serde(default)]
    is_main: bool,
}

#[derive(Debug, Deserialize, Validate)]
struct ProductRequest {
    #[validate(length(min = 1, max = 120))]
    name: String,
    #[serde(default)]
    #[validate(length(max = 2000))]
    description: String,
    category_id: Uuid,
    subcategory_id: Uuid,
    #[validate]
    variants: Vec<VariantRequest>,
    #[serde(default)]
    #[validate]
    images: Vec<ImageRequest>,
    #[serde(default)]
    tags: Vec<String>,
    fit_type: Option<String>,
    #[serde(default = "listed_by_default")]
    listed: bool,
}

impl From<ProductRequest> for ProductDraft {
    fn from(r: ProductRequest) -> Self {
        ProductDraft {
            name: r.name,
            description: r.description,
            category_id: r.category_id,
            subcategory_id: r.subcategory_id,
            variants: r
                .variants
                .into_iter()
                .map(|v| NewVariant { sku: v.sku, size: v.size, color: v.color, price: Money::new(v.price), stock: v.stock })
                .collect(),
            images: r.images.into_iter().map(|i| ProductImage { url: i.url, thumbnail: i.thumbnail, is_main: i.is_main }).collect(),
            tags: r.tags,
            fit_type: r.fit_type,
            listed: r.listed,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum StockDirection {
    Add,
    Remove,
}

#[derive(Debug, Deserialize, Validate)]
struct StockRequest {
    #[validate(length(min = 1))]
    size: String,
    #[validate(length(min = 1))]
    color: String,
    direction: StockDirection,
    #[validate(range(min = 1, max = 10000))]
    quantity: u32,
}

async fn list_products(_: AdminGuard, State(s): State<AppState>, Query(p): Query<ProductParams>) -> ApiResult<Page<ProductCard>> {
    let view = p.view.unwrap_or(Visibility::Active);
    let query = p.into_query(view);
    Ok(ApiResponse::ok(s.store.admin_products(query).await?))
}

async fn get_product(_: AdminGuard, State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<ProductCard> {
    Ok(ApiResponse::ok(s.store.admin_product(id).await?))
}

async fn create_product(_: AdminGuard, State(s): State<AppState>, ValidatedJson(r): ValidatedJson<ProductRequest>) -> ApiResult<Product> {
    Ok(ApiResponse::created(s.store.create_product(r.into()).await?))
}

async fn update_product(_: AdminGuard, State(s): State<AppState>, Path(id): Path<Uuid>, ValidatedJson(r): ValidatedJson<ProductRequest>) -> ApiResult<Product> {
    Ok(ApiResponse::ok(s.store.update_product(id, r.into()).await?))
}

async fn toggle_product(_: AdminGuard, State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Listed> {
    Ok(ApiResponse::ok(Listed { listed: s.store.toggle_product(id).await? }))
}

async fn delete_product(_: AdminGuard, State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<()> {
    s.store.delete_product(id).await?;
    Ok(ApiResponse::ok(()))
}

async fn set_product_offer(_: AdminGuard, State(s): State<AppState>, Path(id): Path<Uuid>, ValidatedJson(r): ValidatedJson<OfferRequest>) -> ApiResult<Product> {
    Ok(ApiResponse::ok(s.store.set_product_offer(id, Some(r.into_offer()?)).await?))
}

async fn clear_product_offer(_: AdminGuard, State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Product> {
    Ok(ApiResponse::ok(s.store.set_product_offer(id, None).await?))
}

async fn adjust_stock(_: AdminGuard, State(s): State<AppState>, Path(id): Path<Uuid>, ValidatedJson(r): ValidatedJson<StockRequest>) -> ApiResult<Product> {
    let change = match r.direction {
        StockDirection::Add => StockChange::Add(r.quantity),
        StockDirection::Remove => StockChange::Remove(r.quantity),
    };
    Ok(ApiResponse::ok(s.store.adjust_stock(id, &r.size, &r.color, change).await?))
}

// ---- coupons ----

#[derive(Debug, Deserialize, Validate)]
struct CouponRequest {
    #[validate(length(min = 1, max = 80))]
    name: String,
    #[validate(length(min = 3, max = 20))]
    code: String,
    #[serde(default)]
    description: String,
    kind: CouponKind,
    #[validate(custom = "positive_amount")]
    value: Decimal,
    #[validate(custom = "positive_amount")]
    max_discount: Option<Decimal>,
    #[serde(default)]
    #[validate(custom = "not_negative")]
    minimum_order: Decimal,
    starts_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    #[serde(default = "one_use")]
    #[validate(range(min = 1))]
    usage_per_user: u32,
    #[serde(default = "listed_by_default")]
    active: bool,
}

fn one_use() -> u32 { 1 }

impl From<CouponRequest> for CouponDraft {
    fn from(r: CouponRequest) -> Self {
        CouponDraft {
            name: r.name,
            code: r.code,
            description: r.description,
            kind: r.kind,
            value: r.value,
            max_discount: r.max_discount.map(Money::new),
            minimum_order: Money::new(r.minimum_order),
            starts_at: r.starts_at,
            expires_at: r.expires_at,
            usage_per_user: r.usage_per_user,
            active: r.active,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct CouponParams {
    search: Option<String>,
    active: Option<bool>,
    page: Option<u32>,
}

async fn list_coupons(_: AdminGuard, State(s): State<AppState>, Query(p): Query<CouponParams>) -> ApiResult<Page<Coupon>> {
    let filter = CouponFilter { search: p.search, active: p.active, page: p.page.unwrap_or(1) };
    Ok(ApiResponse::ok(s.store.list_coupons(filter).await?))
}

async fn create_coupon(_: AdminGuard, State(s): State<AppState>, ValidatedJson(r): ValidatedJson<CouponRequest>) -> ApiResult<Coupon> {
    Ok(ApiResponse::created(s.store.create_coupon(r.into()).await?))
}

async fn update_coupon(_: AdminGuard, State(s): State<AppState>, Path(id): Path<Uuid>, ValidatedJson(r): ValidatedJson<CouponRequest>) -> ApiResult<Coupon> {
    Ok(ApiResponse::ok(s.store.update_coupon(id, r.into()).await?))
}

async fn delete_coupon(_: AdminGuard, State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<()> {
    s.store.delete_coupon(id).await?;
    Ok(ApiResponse::ok(()))
}

// ---- orders ----

#[derive(Debug, Default, Deserialize)]
struct OrderParams {
    status: Option<OrderStatus>,
    search: Option<String>,
    page: Option<u32>,
}

#[derive(Debug, Deserialize, Validate)]
struct StatusRequest {
    status: OrderStatus,
}

#[derive(Debug, Deserialize, Validate)]
struct DecisionRequest {
    decision: ReturnDecision,
}

async fn list_orders(_: AdminGuard, State(s): State<AppState>, Query(p): Query<OrderParams>) -> ApiResult<Page<Order>> {
    Ok(ApiResponse::ok(s.store.admin_orders(p.status, p.search, p.page.unwrap_or(1)).await?))
}

async fn get_order(_: AdminGuard, State(s): State<AppState>, Path(number): Path<String>) -> ApiResult<OrderDetail> {
    Ok(ApiResponse::ok(s.store.admin_order(&number).await?))
}

async fn update_order_status(_: AdminGuard, State(s): State<AppState>, Path(number): Path<String>, ValidatedJson(r): ValidatedJson<StatusRequest>) -> ApiResult<OrderDetail> {
    Ok(ApiResponse::ok(s.store.update_order_status(&number, r.status).await?))
}

async fn update_item_status(
    _: AdminGuard,
    State(s): State<AppState>,
    Path((number, item_id)): Path<(String, Uuid)>,
    ValidatedJson(r): ValidatedJson<StatusRequest>,
) -> ApiResult<OrderDetail> {
    let target: ItemStatus = r.status;
    Ok(ApiResponse::ok(s.store.update_item_status(&number, item_id, target).await?))
}

async fn decide_return(_: AdminGuard, State(s): State<AppState>, Path(number): Path<String>, ValidatedJson(r): ValidatedJson<DecisionRequest>) -> ApiResult<SettledOrder> {
    Ok(ApiResponse::ok(s.store.decide_return(&number, r.decision).await?))
}

async fn decide_item_return(
    _: AdminGuard,
    State(s): State<AppState>,
    Path((number, item_id)): Path<(String, Uuid)>,
    ValidatedJson(r): ValidatedJson<DecisionRequest>,
) -> ApiResult<SettledOrder> {
    Ok(ApiResponse::ok(s.store.decide_item_return(&number, item_id, r.decision).await?))
}

// ---- wallets ----

#[derive(Debug, Deserialize, Validate)]
struct CreditRequest {
    #[validate(custom = "positive_amount")]
    amount: Decimal,
    method: WalletMethod,
    #[validate(length(min = 1, max = 200))]
    description: String,
}

async fn credit_wallet(_: AdminGuard, State(s): State<AppState>, Path(user_id): Path<Uuid>, ValidatedJson(r): ValidatedJson<CreditRequest>) -> ApiResult<BalanceResponse> {
    let balance = s.store.admin_credit(user_id, Money::new(r.amount), r.method, r.description).await?;
    Ok(ApiResponse::ok(BalanceResponse { balance }))
}

// ---- reports ----

#[derive(Debug, Default, Deserialize)]
struct RangeParams {
    range: Option<String>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
}

impl TryFrom<RangeParams> for DashboardRange {
    type Error = StoreError;

    fn try_from(p: RangeParams) -> Result<Self, Self::Error> {
        match p.range.as_deref().unwrap_or("week") {
            "day" => Ok(DashboardRange::Day),
            "week" => Ok(DashboardRange::Week),
            "month" => Ok(DashboardRange::Month),
            "year" => Ok(DashboardRange::Year),
            "custom" => match (p.from, p.to) {
                (Some(from), Some(to)) => Ok(DashboardRange::Custom { from, to }),
                _ => Err(StoreError::Validation("custom range needs from and to".into())),
            },
            other => Err(StoreError::Validation(format!("unknown range {:?}", other))),
        }
    }
}

async fn dashboard(_: AdminGuard, State(s): State<AppState>, Query(p): Query<RangeParams>) -> ApiResult<Dashboard> {
    Ok(ApiResponse::ok(s.store.dashboard(p.try_into()?).await?))
}

async fn sales_report(_: AdminGuard, State(s): State<AppState>, Query(p): Query<RangeParams>) -> ApiResult<SalesReport> {
    Ok(ApiResponse::ok(s.store.sales_report(p.try_into()?).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_params() {
        let week: DashboardRange = RangeParams::default().try_into().unwrap();
        assert_eq!(week, DashboardRange::Week);

        let custom = RangeParams {
            range: Some("custom".into()),
            from: NaiveDate::from_ymd_opt(2026, 1, 1),
            to: NaiveDate::from_ymd_opt(2026, 1, 31),
        };
        assert!(matches!(DashboardRange::try_from(custom), Ok(DashboardRange::Custom { .. })));

        let open = RangeParams { range: Some("custom".into()), from: NaiveDate::from_ymd_opt(2026, 1, 1), to: None };
        assert!(matches!(DashboardRange::try_from(open), Err(StoreError::Validation(_))));

        let unknown = RangeParams { range: Some("decade".into()), ..Default::default() };
        assert!(DashboardRange::try_from(unknown).is_err());
    }

    #[test]
    fn test_offer_request_validation() {
        let at = Utc::now();
        let over = OfferRequest { percentage: Decimal::from(101), max_redeem: None, starts_at: at, valid_until: at };
        assert!(over.validate().is_err());
        let ok = OfferRequest { percentage: Decimal::from(20), max_redeem: Some(Decimal::from(100)), starts_at: at, valid_until: at };
        assert!(ok.validate().is_ok());
        assert!(ok.into_offer().is_ok());
    }
}
