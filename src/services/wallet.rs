//! Wallet reads, top-ups and admin credits.

use chrono::Utc;
use serde::Serialize;
use sqlx::PgConnection;
use tracing::{error, info, instrument};
use uuid::Uuid;

use super::Store;
use crate::db;
use crate::domain::aggregates::{TransactionFilter, Wallet, WalletMethod, WalletMovement, WalletTransaction};
use crate::domain::events::DomainEvent;
use crate::domain::value_objects::Money;
use crate::domain::Page;
use crate::{Result, StoreError};

#[derive(Clone, Debug, Serialize)]
pub struct WalletSummary { pub user_id: Uuid, pub balance: Money, pub transactions: Page<WalletTransaction> }

impl Store {
    pub async fn wallet(&self, user_id: Uuid, filter: TransactionFilter) -> Result<WalletSummary> {
        let mut conn = self.db.acquire().await?;
        let wallet = db::find::<Wallet>(&mut conn, user_id).await?.unwrap_or_else(|| Wallet::open(user_id, Utc::now()));
        Ok(WalletSummary { user_id, balance: wallet.balance(), transactions: wallet.transactions(&filter) })
    }

    /// Records a gateway payment the client already completed.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn top_up(&self, user_id: Uuid, amount: Money, payment_ref: String) -> Result<Money> {
        let movement = WalletMovement::new(amount, WalletMethod::Gateway, "Wallet top-up").with_reference(payment_ref);
        self.credit_wallet(user_id, movement).await
    }

    #[instrument(skip(self, description), fields(user_id = %user_id))]
    pub async fn admin_credit(&self, user_id: Uuid, amount: Money, method: WalletMethod, description: String) -> Result<Money> {
        if !matches!(method, WalletMethod::Admin | WalletMethod::Referral) {
            return Err(StoreError::Validation("method must be admin or referral".into()));
        }
        self.credit_wallet(user_id, WalletMovement::new(amount, method, description)).await
    }

    async fn credit_wallet(&self, user_id: Uuid, movement: WalletMovement) -> Result<Money> {
        let mut tx = self.db.begin().await?;
        let mut events = Vec::new();
        let balance = credit(&mut tx, user_id, movement, &mut events).await?;
        tx.commit().await?;
        info!(%balance, "wallet credited");
        self.events.publish(events).await;
        Ok(balance)
    }
}

/// Locked wallet of the user, or a fresh one.
async fn load_wallet(conn: &mut PgConnection, user_id: Uuid) -> Result<Wallet> {
    Ok(db::find_for_update::<Wallet>(conn, user_id).await?.unwrap_or_else(|| Wallet::open(user_id, Utc::now())))
}

pub(crate) async fn credit(conn: &mut PgConnection, user_id: Uuid, movement: WalletMovement, events: &mut Vec<DomainEvent>) -> Result<Money> {
    let mut wallet = load_wallet(&mut *conn, user_id).await?;
    wallet.credit(movement, Utc::now())?;
    save_wallet(conn, &mut wallet, events).await
}

pub(crate) async fn debit(conn: &mut PgConnection, user_id: Uuid, movement: WalletMovement, events: &mut Vec<DomainEvent>) -> Result<Money> {
    let mut wallet = load_wallet(&mut *conn, user_id).await?;
    wallet.debit(movement, Utc::now())?;
    save_wallet(conn, &mut wallet, events).await
}

/// Current balance without locking.
pub(crate) async fn balance(conn: &mut PgConnection, user_id: Uuid) -> Result<Money> {
    Ok(db::find::<Wallet>(conn, user_id).await?.map_or(Money::ZERO, |w| w.balance()))
}

async fn save_wallet(conn: &mut PgConnection, wallet: &mut Wallet, events: &mut Vec<DomainEvent>) -> Result<Money> {
    if let Err(e) = wallet.verify() {
        error!(user_id = %wallet.user_id(), error = %e, "wallet ledger out of sync");
        return Err(e.into());
    }
    db::upsert(conn, &*wallet).await?;
    events.extend(wallet.take_events());
    Ok(wallet.balance())
}
