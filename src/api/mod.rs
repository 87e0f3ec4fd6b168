//! HTTP surface. Shopper routes live under `/api/v1`, admin routes under
//! `/api/v1/admin`.

mod admin;
mod cart;
mod extract;
mod orders;
mod storefront;
mod wallet;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;

use crate::domain::aggregates::{CartError, CouponError, OrderError, ProductError};
use crate::domain::checkout::CheckoutError;
use crate::services::AppState;
use crate::StoreError;

pub use extract::{AdminGuard, CurrentUser, ValidatedJson};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", storefront::routes().merge(cart::routes()).merge(orders::routes()).merge(wallet::routes()))
        .nest("/api/v1/admin", admin::routes())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "healthy", "service": "wardrobe-commerce"}))
}

#[derive(Serialize)]
struct Envelope<T> {
    success: bool,
    data: T,
}

/// Success envelope: `{"success": true, "data": ...}`.
pub struct ApiResponse<T> {
    status: StatusCode,
    data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self { Self { status: StatusCode::OK, data } }
    pub fn created(data: T) -> Self { Self { status: StatusCode::CREATED, data } }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (self.status, Json(Envelope { success: true, data: self.data })).into_response()
    }
}

pub type ApiResult<T> = Result<ApiResponse<T>, StoreError>;

impl StoreError {
    fn status(&self) -> StatusCode {
        match self {
            _ if self.is_conflict() => StatusCode::CONFLICT,
            StoreError::NotFound(_)
            | StoreError::Coupon(CouponError::NotFound)
            | StoreError::Checkout(CheckoutError::Coupon(CouponError::NotFound))
            | StoreError::Cart(CartError::LineNotFound)
            | StoreError::Product(ProductError::VariantNotFound)
            | StoreError::Order(OrderError::ItemNotFound(_)) => StatusCode::NOT_FOUND,
            StoreError::Validation(_) | StoreError::Report(_) => StatusCode::UNPROCESSABLE_ENTITY,
            StoreError::Unauthorized => StatusCode::UNAUTHORIZED,
            StoreError::Forbidden => StatusCode::FORBIDDEN,
            StoreError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            StoreError::Wallet(crate::domain::aggregates::WalletError::LedgerMismatch { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({"success": false, "message": message}))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use sqlx::postgres::PgPoolOptions;
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::domain::policy::StorePolicy;
    use crate::services::{EventBus, Store};

    const TOKEN: &str = "test-admin-token";

    fn app() -> Router {
        let pool = PgPoolOptions::new().connect_lazy("postgres://localhost/wardrobe_test").expect("lazy pool");
        let store = Store::new(pool, EventBus::default(), StorePolicy::default());
        router(AppState { store, admin_token: Arc::from(TOKEN) })
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn test_health() {
        let response = app().oneshot(Request::get("/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_cart_requires_user() {
        let response = app().oneshot(Request::get("/api/v1/cart").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_malformed_user_header() {
        let request = Request::get("/api/v1/wallet").header("x-user-id", "not-a-uuid").body(Body::empty()).unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admin_requires_token() {
        let response = app().oneshot(Request::get("/api/v1/admin/orders").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let request = Request::get("/api/v1/admin/dashboard")
            .header(header::AUTHORIZATION, "Bearer wrong")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_quantity_over_limit_rejected() {
        let body = json!({"product_id": uuid::Uuid::now_v7(), "size": "M", "color": "Red", "quantity": 9});
        let request = Request::post("/api/v1/cart/items")
            .header("x-user-id", uuid::Uuid::now_v7().to_string())
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_blank_cancel_reason_rejected() {
        let request = Request::post("/api/v1/orders/MM1234567/cancel")
            .header("x-user-id", uuid::Uuid::now_v7().to_string())
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"reason": ""}).to_string()))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_offer_percentage_out_of_range() {
        let body = json!({
            "percentage": "120",
            "starts_at": "2026-01-01T00:00:00Z",
            "valid_until": "2026-02-01T00:00:00Z"
        });
        let request = Request::put(format!("/api/v1/admin/products/{}/offer", uuid::Uuid::now_v7()))
            .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(StoreError::NotFound("Order").status(), StatusCode::NOT_FOUND);
        assert_eq!(StoreError::Coupon(CouponError::DuplicateCode).status(), StatusCode::CONFLICT);
        let replay = StoreError::Wallet(crate::domain::aggregates::WalletError::DuplicateReference("pay_1".into()));
        assert_eq!(replay.status(), StatusCode::CONFLICT);
        assert_eq!(StoreError::Order(OrderError::NoItems).status(), StatusCode::BAD_REQUEST);
        assert_eq!(StoreError::Cart(CartError::OutOfStock).status(), StatusCode::BAD_REQUEST);
        assert_eq!(StoreError::Validation("bad".into()).status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
