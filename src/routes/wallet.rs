use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use futures::stream::StreamExt;
use rust_decimal::Decimal;
use serde::Serialize;

use super::auth::AuthService;
use super::utils;
use crate::db::ledger::LedgerStore;
use crate::providers::FundingAccount;

const STATS_WINDOW_DAYS: i64 = 30;
const HISTORY_STREAM_LIMIT: i64 = 50;

type WalletState = (Arc<AuthService>, Arc<dyn LedgerStore>);

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    phone_number: String,
    full_name: String,
    balance: Decimal,
    currency: &'static str,
    last_30_days: PeriodStats,
    funding_account: Option<FundingAccount>,
}

#[derive(Debug, Serialize)]
pub struct PeriodStats {
    sent: Decimal,
    received: Decimal,
    count: i64,
}

// Wallet snapshot for the dashboard: balance, a 30-day activity summary and
// the virtual account to top up through.
pub async fn balance_handler(
    State((service, ledger)): State<WalletState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    let user_id = utils::validate_auth_token(headers, &service)?;

    let account = match ledger.find_account(user_id).await {
        Ok(Some(account)) => account,
        Ok(None) => return Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to load account {user_id}: {e}");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let since = Utc::now() - chrono::Duration::days(STATS_WINDOW_DAYS);
    let stats = match ledger.transaction_stats(user_id, since).await {
        Ok(stats) => stats,
        Err(e) => {
            tracing::error!("Failed to load transaction stats for {user_id}: {e}");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let funding_account = account.funding_details();
    Ok(Json(BalanceResponse {
        phone_number: account.phone_number,
        full_name: account.full_name,
        balance: account.wallet_balance,
        currency: "NGN",
        last_30_days: PeriodStats {
            sent: stats.sent,
            received: stats.received,
            count: stats.count,
        },
        funding_account,
    }))
}

// Streams the caller's recent transactions as server-sent events.
pub async fn history_handler(
    State((service, ledger)): State<WalletState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    let user_id = utils::validate_auth_token(headers, &service)?;

    let records = match ledger.recent_transactions(user_id, HISTORY_STREAM_LIMIT).await {
        Ok(records) => records,
        Err(e) => {
            tracing::error!("Failed to load history for {user_id}: {e}");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let stream = futures::stream::iter(records).map(|record| Event::default().json_data(record));

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(2))
            .text("keep-alive-text"),
    ))
}

// Single transaction, scoped to the caller so references stay private.
pub async fn transaction_handler(
    State((service, ledger)): State<WalletState>,
    headers: HeaderMap,
    Path(reference): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let user_id = utils::validate_auth_token(headers, &service)?;

    match ledger.find_transaction_for_user(&reference, user_id).await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to load transaction {reference}: {e}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub fn wallet_routes(service: Arc<AuthService>, ledger: Arc<dyn LedgerStore>) -> Router {
    Router::new()
        .route("/wallet/balance", get(balance_handler))
        .route("/tx/history", get(history_handler))
        .route("/tx/:reference", get(transaction_handler))
        .with_state((service, ledger))
}
