//! Coupon administration and the shopper's coupon list.

use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;

use super::Store;
use crate::db::{self, queries};
use crate::domain::aggregates::coupon::normalize_code;
use crate::domain::aggregates::{Coupon, CouponDraft, CouponError};
use crate::domain::{paginate, Page};
use crate::{Result, StoreError};

const COUPONS_PER_PAGE: u32 = 10;

#[derive(Clone, Debug, Default)]
pub struct CouponFilter {
    pub search: Option<String>,
    pub active: Option<bool>,
    pub page: u32,
}

impl Store {
    /// Coupons the user can still redeem, soonest expiry first.
    pub async fn available_coupons(&self, user_id: Uuid) -> Result<Vec<Coupon>> {
        let mut conn = self.db.acquire().await?;
        let now = Utc::now();
        let mut coupons: Vec<Coupon> =
            db::all::<Coupon>(&mut conn).await?.into_iter().filter(|c| c.is_available_to(user_id, now)).collect();
        coupons.sort_by_key(|c| c.expires_at());
        Ok(coupons)
    }

    pub async fn list_coupons(&self, filter: CouponFilter) -> Result<Page<Coupon>> {
        let mut conn = self.db.acquire().await?;
        let term = filter.search.as_deref().map(normalize_code).filter(|t| !t.is_empty());
        let coupons: Vec<Coupon> = db::all::<Coupon>(&mut conn)
            .await?
            .into_iter()
            .filter(|c| term.as_deref().map_or(true, |t| c.code().contains(t)))
            .filter(|c| filter.active.map_or(true, |a| c.is_active() == a))
            .collect();
        Ok(paginate(coupons, filter.page, COUPONS_PER_PAGE))
    }

    #[instrument(skip(self, draft), fields(code = %draft.code))]
    pub async fn create_coupon(&self, draft: CouponDraft) -> Result<Coupon> {
        let mut tx = self.db.begin().await?;
        if queries::coupon_by_code(&mut tx, &normalize_code(&draft.code), false).await?.is_some() {
            return Err(CouponError::DuplicateCode.into());
        }
        let coupon = Coupon::create(draft, Utc::now())?;
        db::upsert(&mut tx, &coupon).await?;
        tx.commit().await?;
        info!(coupon_id = %coupon.id(), "coupon created");
        Ok(coupon)
    }

    #[instrument(skip(self, draft), fields(coupon_id = %id))]
    pub async fn update_coupon(&self, id: Uuid, draft: CouponDraft) -> Result<Coupon> {
        let mut tx = self.db.begin().await?;
        let mut coupon = db::find_for_update::<Coupon>(&mut tx, id).await?.ok_or(StoreError::NotFound("Coupon"))?;
        let clash = queries::coupon_by_code(&mut tx, &normalize_code(&draft.code), false).await?;
        if clash.is_some_and(|c| c.id() != id) { return Err(CouponError::DuplicateCode.into()); }
        coupon.update(draft)?;
        db::upsert(&mut tx, &coupon).await?;
        tx.commit().await?;
        info!("coupon updated");
        Ok(coupon)
    }

    #[instrument(skip(self), fields(coupon_id = %id))]
    pub async fn delete_coupon(&self, id: Uuid) -> Result<()> {
        let mut tx = self.db.begin().await?;
        if !db::delete::<Coupon>(&mut tx, id).await? { return Err(StoreError::NotFound("Coupon")); }
        tx.commit().await?;
        info!("coupon deleted");
        Ok(())
    }
}
