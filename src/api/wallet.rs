use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::Router;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::{ApiResponse, ApiResult, CurrentUser, ValidatedJson};
use crate::domain::aggregates::{TransactionFilter, TransactionKind};
use crate::domain::value_objects::Money;
use crate::services::wallet::WalletSummary;
use crate::services::AppState;

pub(super) fn routes() -> Router<AppState> {
    Router::new().route("/wallet", get(view_wallet)).route("/wallet/top-up", post(top_up))
}

pub(super) fn positive_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount > Decimal::ZERO { Ok(()) } else { Err(ValidationError::new("amount_must_be_positive")) }
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum KindParam {
    #[default]
    All,
    Credit,
    Debit,
}

impl From<KindParam> for Option<TransactionKind> {
    fn from(k: KindParam) -> Self {
        match k {
            KindParam::All => None,
            KindParam::Credit => Some(TransactionKind::Credit),
            KindParam::Debit => Some(TransactionKind::Debit),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct WalletParams {
    #[serde(default)]
    kind: KindParam,
    search: Option<String>,
    page: Option<u32>,
}

#[derive(Debug, Deserialize, Validate)]
struct TopUpRequest {
    #[validate(custom = "positive_amount")]
    amount: Decimal,
    #[validate(length(min = 1, max = 100))]
    payment_ref: String,
}

#[derive(Debug, Serialize)]
pub(super) struct BalanceResponse {
    pub balance: Money,
}

async fn view_wallet(State(s): State<AppState>, CurrentUser(user): CurrentUser, Query(p): Query<WalletParams>) -> ApiResult<WalletSummary> {
    let filter = TransactionFilter { kind: p.kind.into(), search: p.search, page: p.page.unwrap_or(1) };
    Ok(ApiResponse::ok(s.store.wallet(user, filter).await?))
}

async fn top_up(State(s): State<AppState>, CurrentUser(user): CurrentUser, ValidatedJson(r): ValidatedJson<TopUpRequest>) -> ApiResult<BalanceResponse> {
    let balance = s.store.top_up(user, Money::new(r.amount), r.payment_ref).await?;
    Ok(ApiResponse::ok(BalanceResponse { balance }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_up_amount_must_be_positive() {
        let zero = TopUpRequest { amount: Decimal::ZERO, payment_ref: "pay_1".into() };
        assert!(zero.validate().is_err());
        let ok = TopUpRequest { amount: Decimal::from(250), payment_ref: "pay_1".into() };
        assert!(ok.validate().is_ok());
    }
}
