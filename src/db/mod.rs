//! PostgreSQL persistence.
//!
//! Every aggregate is one JSONB document in its own table. Columns the
//! queries filter on are generated from the document (see `migrations/`).

pub mod queries;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::types::Json;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::domain::aggregates::{Cart, Category, Coupon, Order, Product, Subcategory, Wallet};

pub trait Document: Serialize + DeserializeOwned + Send + Sync + Unpin + 'static {
    const TABLE: &'static str;
    fn key(&self) -> Uuid;
    fn created_at(&self) -> DateTime<Utc>;
}

macro_rules! document {
    ($ty:ty, $table:literal, $key:ident) => {
        impl Document for $ty {
            const TABLE: &'static str = $table;
            fn key(&self) -> Uuid { self.$key() }
            fn created_at(&self) -> DateTime<Utc> { <$ty>::created_at(self) }
        }
    };
}

document!(Category, "categories", id);
document!(Subcategory, "subcategories", id);
document!(Product, "products", id);
document!(Coupon, "coupons", id);
document!(Order, "orders", id);
document!(Cart, "carts", user_id);
document!(Wallet, "wallets", user_id);

pub async fn find<D: Document>(conn: &mut PgConnection, id: Uuid) -> Result<Option<D>, sqlx::Error> {
    let sql = format!("SELECT doc FROM {} WHERE id = $1", D::TABLE);
    let row: Option<Json<D>> = sqlx::query_scalar(&sql).bind(id).fetch_optional(conn).await?;
    Ok(row.map(|Json(doc)| doc))
}

/// Reads and row-locks a document until the surrounding transaction ends.
pub async fn find_for_update<D: Document>(conn: &mut PgConnection, id: Uuid) -> Result<Option<D>, sqlx::Error> {
    let sql = format!("SELECT doc FROM {} WHERE id = $1 FOR UPDATE", D::TABLE);
    let row: Option<Json<D>> = sqlx::query_scalar(&sql).bind(id).fetch_optional(conn).await?;
    Ok(row.map(|Json(doc)| doc))
}

pub async fn all<D: Document>(conn: &mut PgConnection) -> Result<Vec<D>, sqlx::Error> {
    let sql = format!("SELECT doc FROM {} ORDER BY created_at DESC", D::TABLE);
    let rows: Vec<Json<D>> = sqlx::query_scalar(&sql).fetch_all(conn).await?;
    Ok(rows.into_iter().map(|Json(doc)| doc).collect())
}

pub async fn upsert<D: Document>(conn: &mut PgConnection, doc: &D) -> Result<(), sqlx::Error> {
    let sql = format!(
        "INSERT INTO {} (id, doc, created_at, updated_at) VALUES ($1, $2, $3, NOW()) \
         ON CONFLICT (id) DO UPDATE SET doc = EXCLUDED.doc, updated_at = NOW()",
        D::TABLE
    );
    sqlx::query(&sql).bind(doc.key()).bind(Json(doc)).bind(doc.created_at()).execute(conn).await?;
    Ok(())
}

pub async fn delete<D: Document>(conn: &mut PgConnection, id: Uuid) -> Result<bool, sqlx::Error> {
    let sql = format!("DELETE FROM {} WHERE id = $1", D::TABLE);
    let done = sqlx::query(&sql).bind(id).execute(conn).await?;
    Ok(done.rows_affected() > 0)
}
