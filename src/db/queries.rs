//! Lookups that go through generated columns instead of the primary key.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::domain::aggregates::{Category, Coupon, Order, OrderStatus, Product, Subcategory};
use crate::domain::catalog::CatalogView;
use crate::domain::Page;

pub async fn order_by_number(conn: &mut PgConnection, order_number: &str, lock: bool) -> Result<Option<Order>, sqlx::Error> {
    let sql = if lock {
        "SELECT doc FROM orders WHERE order_number = $1 FOR UPDATE"
    } else {
        "SELECT doc FROM orders WHERE order_number = $1"
    };
    let row: Option<Json<Order>> = sqlx::query_scalar(sql).bind(order_number).fetch_optional(conn).await?;
    Ok(row.map(|Json(o)| o))
}

#[derive(Clone, Debug, Default)]
pub struct OrderFilter {
    pub user_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
    /// Matches the order number or any item's product name.
    pub search: Option<String>,
    pub page: u32,
    pub per_page: u32,
}

impl OrderFilter {
    fn push_conditions<'a>(&'a self, qb: &mut QueryBuilder<'a, Postgres>) {
        qb.push(" WHERE TRUE");
        if let Some(user_id) = self.user_id {
            qb.push(" AND user_id = ").push_bind(user_id);
        }
        if let Some(status) = self.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(term) = self.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let pattern = format!("%{}%", term);
            qb.push(" AND (order_number ILIKE ").push_bind(pattern.clone());
            qb.push(" OR EXISTS (SELECT 1 FROM jsonb_array_elements(doc->'items') AS item WHERE item->>'product_name' ILIKE ")
                .push_bind(pattern)
                .push("))");
        }
    }
}

/// Newest first.
pub async fn list_orders(conn: &mut PgConnection, filter: &OrderFilter) -> Result<Page<Order>, sqlx::Error> {
    let per_page = filter.per_page.max(1);
    let page = filter.page.max(1);

    let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM orders");
    filter.push_conditions(&mut count);
    let total: i64 = count.build_query_scalar().fetch_one(&mut *conn).await?;

    let mut select = QueryBuilder::<Postgres>::new("SELECT doc FROM orders");
    filter.push_conditions(&mut select);
    select
        .push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(i64::from(per_page))
        .push(" OFFSET ")
        .push_bind(i64::from(page - 1) * i64::from(per_page));
    let rows: Vec<Json<Order>> = select.build_query_scalar().fetch_all(&mut *conn).await?;

    let total = total.max(0) as u64;
    Ok(Page {
        data: rows.into_iter().map(|Json(o)| o).collect(),
        total,
        page,
        per_page,
        total_pages: (total.div_ceil(u64::from(per_page)) as u32).max(1),
    })
}

pub async fn orders_between(conn: &mut PgConnection, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Order>, sqlx::Error> {
    let rows: Vec<Json<Order>> = sqlx::query_scalar("SELECT doc FROM orders WHERE created_at >= $1 AND created_at < $2 ORDER BY created_at")
        .bind(from)
        .bind(to)
        .fetch_all(conn)
        .await?;
    Ok(rows.into_iter().map(|Json(o)| o).collect())
}

pub async fn coupon_by_code(conn: &mut PgConnection, code: &str, lock: bool) -> Result<Option<Coupon>, sqlx::Error> {
    let sql = if lock {
        "SELECT doc FROM coupons WHERE code = $1 FOR UPDATE"
    } else {
        "SELECT doc FROM coupons WHERE code = $1"
    };
    let row: Option<Json<Coupon>> = sqlx::query_scalar(sql).bind(code).fetch_optional(conn).await?;
    Ok(row.map(|Json(c)| c))
}

pub async fn subcategories_of(conn: &mut PgConnection, category_id: Uuid) -> Result<Vec<Subcategory>, sqlx::Error> {
    let rows: Vec<Json<Subcategory>> = sqlx::query_scalar("SELECT doc FROM subcategories WHERE category_id = $1 ORDER BY created_at DESC")
        .bind(category_id)
        .fetch_all(conn)
        .await?;
    Ok(rows.into_iter().map(|Json(s)| s).collect())
}

/// Snapshot of the whole catalog. Nothing is locked.
pub async fn load_catalog(conn: &mut PgConnection) -> Result<CatalogView, sqlx::Error> {
    let categories = super::all::<Category>(&mut *conn).await?;
    let subcategories = super::all::<Subcategory>(&mut *conn).await?;
    let products = super::all::<Product>(&mut *conn).await?;
    Ok(CatalogView::new(categories, subcategories, products))
}
