//! Wardrobe Commerce
//!
//! Backend for a clothing store.
//!
//! ## Features
//! - Catalog with category, subcategory and product offers
//! - Per-user cart with stock revalidation
//! - Coupons with per-user usage limits
//! - Checkout with cash on delivery, wallet or gateway payment
//! - Order lifecycle with per-item cancellation and returns
//! - Wallet ledger for refunds and payments
//! - Admin dashboard and sales report

pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod services;

use thiserror::Error;

use domain::aggregates::{CartError, CatalogError, CouponError, OrderError, ProductError, WalletError};
use domain::checkout::CheckoutError;
use domain::pricing::OfferError;
use domain::reporting::ReportError;
use domain::value_objects::PercentageError;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Missing or invalid user identity")]
    Unauthorized,

    #[error("Admin access required")]
    Forbidden,

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Product(#[from] ProductError),

    #[error(transparent)]
    Offer(#[from] OfferError),

    #[error(transparent)]
    Percentage(#[from] PercentageError),

    #[error(transparent)]
    Cart(#[from] CartError),

    #[error(transparent)]
    Coupon(#[from] CouponError),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl From<validator::ValidationErrors> for StoreError {
    fn from(errors: validator::ValidationErrors) -> Self { StoreError::Validation(errors.to_string()) }
}

impl StoreError {
    /// Unique-index violations surface as conflicts.
    pub fn is_conflict(&self) -> bool {
        match self {
            StoreError::Conflict(_) => true,
            StoreError::Catalog(CatalogError::DuplicateName(_))
            | StoreError::Coupon(CouponError::DuplicateCode)
            | StoreError::Wallet(WalletError::DuplicateReference(_)) => true,
            StoreError::Storage(e) => e.as_database_error().and_then(|d| d.code()).is_some_and(|c| c == "23505"),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
