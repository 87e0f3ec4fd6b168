use axum::extract::State;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::{ApiResponse, ApiResult, CurrentUser, ValidatedJson};
use crate::services::cart::{CartView, CouponApplied, LineKey};
use crate::services::AppState;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/cart", get(view_cart).delete(clear_cart))
        .route("/cart/items", post(add_item))
        .route("/cart/items/increment", post(increment_item))
        .route("/cart/items/decrement", post(decrement_item))
        .route("/cart/items/remove", post(remove_item))
        .route("/cart/coupon", post(apply_coupon).delete(remove_coupon))
}

#[derive(Debug, Deserialize, Validate)]
struct LineRequest {
    product_id: Uuid,
    #[validate(length(min = 1, max = 20))]
    size: String,
    #[validate(length(min = 1, max = 40))]
    color: String,
}

impl From<LineRequest> for LineKey {
    fn from(r: LineRequest) -> Self { LineKey { product_id: r.product_id, size: r.size, color: r.color } }
}

#[derive(Debug, Deserialize, Validate)]
struct AddItemRequest {
    #[serde(flatten)]
    #[validate]
    line: LineRequest,
    #[validate(range(min = 1, max = 5))]
    quantity: u32,
}

#[derive(Debug, Deserialize, Validate)]
struct CouponRequest {
    #[validate(length(min = 1, max = 40))]
    code: String,
}

async fn view_cart(State(s): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<CartView> {
    Ok(ApiResponse::ok(s.store.cart(user).await?))
}

async fn clear_cart(State(s): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<()> {
    s.store.clear_cart(user).await?;
    Ok(ApiResponse::ok(()))
}

async fn add_item(State(s): State<AppState>, CurrentUser(user): CurrentUser, ValidatedJson(r): ValidatedJson<AddItemRequest>) -> ApiResult<CartView> {
    Ok(ApiResponse::ok(s.store.add_to_cart(user, r.line.into(), r.quantity).await?))
}

async fn increment_item(State(s): State<AppState>, CurrentUser(user): CurrentUser, ValidatedJson(r): ValidatedJson<LineRequest>) -> ApiResult<CartView> {
    Ok(ApiResponse::ok(s.store.increment_line(user, r.into()).await?))
}

async fn decrement_item(State(s): State<AppState>, CurrentUser(user): CurrentUser, ValidatedJson(r): ValidatedJson<LineRequest>) -> ApiResult<CartView> {
    Ok(ApiResponse::ok(s.store.decrement_line(user, r.into()).await?))
}

async fn remove_item(State(s): State<AppState>, CurrentUser(user): CurrentUser, ValidatedJson(r): ValidatedJson<LineRequest>) -> ApiResult<CartView> {
    Ok(ApiResponse::ok(s.store.remove_line(user, r.into()).await?))
}

async fn apply_coupon(State(s): State<AppState>, CurrentUser(user): CurrentUser, ValidatedJson(r): ValidatedJson<CouponRequest>) -> ApiResult<CouponApplied> {
    Ok(ApiResponse::ok(s.store.apply_coupon(user, &r.code).await?))
}

async fn remove_coupon(State(s): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<CartView> {
    Ok(ApiResponse::ok(s.store.remove_coupon(user).await?))
}
