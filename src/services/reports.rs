use chrono::Utc;
use tracing::{debug, instrument};

use super::Store;
use crate::db::queries;
use crate::domain::reporting::{Dashboard, DashboardRange, SalesReport};
use crate::Result;

impl Store {
    #[instrument(skip(self))]
    pub async fn dashboard(&self, range: DashboardRange) -> Result<Dashboard> {
        let now = Utc::now();
        let (from, to) = range.bounds(now)?;
        let mut conn = self.db.acquire().await?;
        let orders = queries::orders_between(&mut conn, from, to).await?;
        debug!(orders = orders.len(), "building dashboard");
        Ok(Dashboard::build(&orders, range, now)?)
    }

    #[instrument(skip(self))]
    pub async fn sales_report(&self, range: DashboardRange) -> Result<SalesReport> {
        let now = Utc::now();
        let (from, to) = range.bounds(now)?;
        let mut conn = self.db.acquire().await?;
        let orders = queries::orders_between(&mut conn, from, to).await?;
        Ok(SalesReport::build(&orders, range, now)?)
    }
}
