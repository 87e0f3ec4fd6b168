//! Aggregates module
pub mod cart;
pub mod catalog;
pub mod coupon;
pub mod order;
pub mod product;
pub mod wallet;

pub use cart::{Cart, CartError, CartLine, CartNotice, CartTotals};
pub use catalog::{CatalogError, CatalogNodeDraft, Category, Subcategory};
pub use coupon::{Coupon, CouponDraft, CouponError, CouponKind};
pub use order::{
    ItemStatus, NewOrder, NewOrderItem, Order, OrderError, OrderItem, OrderStatus, PaymentMethod, PaymentStatus,
    ReturnDecision, Settlement, ShippingAddress, StockMovement,
};
pub use product::{NewVariant, Product, ProductDraft, ProductError, ProductImage, Variant};
pub use wallet::{TransactionFilter, TransactionKind, Wallet, WalletError, WalletMethod, WalletMovement, WalletTransaction};
