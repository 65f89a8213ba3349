use axum::{
    extract::{Extension, Query},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::extractor::AuthUser;
use crate::ledger::{CreditTransaction, LedgerService};

const DEFAULT_PAGE: i64 = 50;
const MAX_PAGE: i64 = 500;

/// key: credits-api -> read-only account view
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditSummary {
    pub balance: i64,
    pub tier: String,
    pub renewal_timestamp: Option<DateTime<Utc>>,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct TransactionQuery {
    #[serde(default)]
    pub limit: Option<i64>,
}

pub async fn get_credits(
    Extension(ledger): Extension<LedgerService>,
    AuthUser { account_id, .. }: AuthUser,
) -> AppResult<Json<CreditSummary>> {
    let account = ledger.ensure_account(account_id).await?;
    Ok(Json(CreditSummary {
        balance: account.balance,
        tier: account.tier,
        renewal_timestamp: account.renewal_at,
        status: account.status,
    }))
}

pub async fn list_transactions(
    Extension(ledger): Extension<LedgerService>,
    AuthUser { account_id, .. }: AuthUser,
    Query(query): Query<TransactionQuery>,
) -> AppResult<Json<Vec<CreditTransaction>>> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
    let transactions = ledger.transactions(account_id, limit).await?;
    Ok(Json(transactions))
}
