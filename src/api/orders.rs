//! Checkout, order history, cancellations, returns and the gateway callbacks.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::{ApiResponse, ApiResult, CurrentUser, ValidatedJson};
use crate::domain::aggregates::{Order, PaymentMethod, ShippingAddress};
use crate::domain::checkout::CheckoutQuote;
use crate::domain::Page;
use crate::services::orders::{OrderDetail, SettledOrder};
use crate::services::AppState;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/checkout/quote", post(quote))
        .route("/orders", get(list_orders).post(place_order))
        .route("/orders/:number", get(get_order))
        .route("/orders/:number/cancel", post(cancel_order))
        .route("/orders/:number/return", post(request_return))
        .route("/orders/:number/items/:item_id/cancel", post(cancel_item))
        .route("/orders/:number/items/:item_id/return", post(request_item_return))
        .route("/orders/:number/payment/confirm", post(confirm_payment))
        .route("/orders/:number/payment/fail", post(fail_payment))
        .route("/orders/:number/payment/retry", post(retry_payment))
}

#[derive(Debug, Deserialize, Validate)]
pub(super) struct AddressRequest {
    #[validate(length(min = 1, max = 100))]
    name: String,
    #[validate(length(min = 7, max = 15))]
    phone: String,
    #[validate(length(min = 1, max = 200))]
    line1: String,
    line2: Option<String>,
    #[validate(length(min = 1, max = 100))]
    city: String,
    #[validate(length(min = 1, max = 100))]
    state: String,
    #[validate(length(min = 4, max = 10))]
    pincode: String,
    #[serde(default = "default_country")]
    country: String,
}

fn default_country() -> String { "India".to_string() }

impl From<AddressRequest> for ShippingAddress {
    fn from(r: AddressRequest) -> Self {
        ShippingAddress {
            name: r.name.trim().to_string(),
            phone: r.phone.trim().to_string(),
            line1: r.line1.trim().to_string(),
            line2: r.line2.map(|l| l.trim().to_string()).filter(|l| !l.is_empty()),
            city: r.city.trim().to_string(),
            state: r.state.trim().to_string(),
            pincode: r.pincode.trim().to_string(),
            country: r.country.trim().to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
struct QuoteRequest {
    #[validate]
    address: AddressRequest,
}

#[derive(Debug, Deserialize, Validate)]
struct PlaceOrderRequest {
    #[validate]
    address: AddressRequest,
    payment_method: PaymentMethod,
}

#[derive(Debug, Deserialize, Validate)]
struct ReasonRequest {
    #[validate(length(min = 1, max = 500))]
    reason: String,
}

#[derive(Debug, Deserialize, Validate)]
struct ConfirmPaymentRequest {
    #[validate(length(min = 1))]
    gateway_order_ref: String,
    #[validate(length(min = 1))]
    payment_ref: String,
}

#[derive(Debug, Default, Deserialize)]
struct PageParams {
    page: Option<u32>,
}

async fn quote(State(s): State<AppState>, CurrentUser(user): CurrentUser, ValidatedJson(r): ValidatedJson<QuoteRequest>) -> ApiResult<CheckoutQuote> {
    Ok(ApiResponse::ok(s.store.checkout_quote(user, &r.address.into()).await?))
}

async fn place_order(State(s): State<AppState>, CurrentUser(user): CurrentUser, ValidatedJson(r): ValidatedJson<PlaceOrderRequest>) -> ApiResult<OrderDetail> {
    let order = s.store.place_order(user, r.address.into(), r.payment_method).await?;
    Ok(ApiResponse::created(order.into()))
}

async fn list_orders(State(s): State<AppState>, CurrentUser(user): CurrentUser, Query(p): Query<PageParams>) -> ApiResult<Page<Order>> {
    Ok(ApiResponse::ok(s.store.user_orders(user, p.page.unwrap_or(1)).await?))
}

async fn get_order(State(s): State<AppState>, CurrentUser(user): CurrentUser, Path(number): Path<String>) -> ApiResult<OrderDetail> {
    Ok(ApiResponse::ok(s.store.user_order(user, &number).await?))
}

async fn cancel_order(
    State(s): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(number): Path<String>,
    ValidatedJson(r): ValidatedJson<ReasonRequest>,
) -> ApiResult<SettledOrder> {
    Ok(ApiResponse::ok(s.store.cancel_order(user, &number, &r.reason).await?))
}

async fn cancel_item(
    State(s): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((number, item_id)): Path<(String, Uuid)>,
    ValidatedJson(r): ValidatedJson<ReasonRequest>,
) -> ApiResult<SettledOrder> {
    Ok(ApiResponse::ok(s.store.cancel_order_item(user, &number, item_id, &r.reason).await?))
}

async fn request_return(
    State(s): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(number): Path<String>,
    ValidatedJson(r): ValidatedJson<ReasonRequest>,
) -> ApiResult<OrderDetail> {
    Ok(ApiResponse::ok(s.store.request_return(user, &number, &r.reason).await?))
}

async fn request_item_return(
    State(s): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((number, item_id)): Path<(String, Uuid)>,
    ValidatedJson(r): ValidatedJson<ReasonRequest>,
) -> ApiResult<OrderDetail> {
    Ok(ApiResponse::ok(s.store.request_item_return(user, &number, item_id, &r.reason).await?))
}

async fn confirm_payment(
    State(s): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(number): Path<String>,
    ValidatedJson(r): ValidatedJson<ConfirmPaymentRequest>,
) -> ApiResult<OrderDetail> {
    let order = s.store.confirm_gateway_payment(user, &number, &r.gateway_order_ref, r.payment_ref).await?;
    Ok(ApiResponse::ok(order.into()))
}

async fn fail_payment(State(s): State<AppState>, CurrentUser(user): CurrentUser, Path(number): Path<String>) -> ApiResult<OrderDetail> {
    Ok(ApiResponse::ok(s.store.fail_gateway_payment(user, &number).await?.into()))
}

/// Issues a fresh gateway reference for a failed order.
async fn retry_payment(State(s): State<AppState>, CurrentUser(user): CurrentUser, Path(number): Path<String>) -> ApiResult<OrderDetail> {
    Ok(ApiResponse::ok(s.store.retry_payment(user, &number).await?.into()))
}
