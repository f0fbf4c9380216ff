use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::providers::{BankDirectory, ProviderError};

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    account_number: String,
    bank_code: String,
}

pub async fn list_banks_handler(
    State(directory): State<Arc<dyn BankDirectory>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    match directory.list_banks().await {
        Ok(banks) => Ok(Json(banks)),
        Err(e) => {
            tracing::error!("Failed to list banks: {e}");
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                "Bank list is temporarily unavailable".to_string(),
            ))
        }
    }
}

// Name-check an account before the dashboard lets anyone send to it. The
// short-code alias form (GTB, UBA) is accepted alongside institution codes.
pub async fn resolve_account_handler(
    State(directory): State<Arc<dyn BankDirectory>>,
    Json(req): Json<ResolveRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let bank = match directory.resolve_by_code(&req.bank_code).await {
        Ok(Some(bank)) => bank,
        Ok(None) => {
            return Err((
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("{} is not a recognised bank", req.bank_code),
            ))
        }
        Err(e) => {
            tracing::error!("Bank lookup failed: {e}");
            return Err((
                StatusCode::SERVICE_UNAVAILABLE,
                "Bank lookups are temporarily unavailable".to_string(),
            ));
        }
    };

    match directory
        .resolve_account_name(&req.account_number, &bank.code)
        .await
    {
        Ok(resolved) => Ok(Json(resolved)),
        Err(ProviderError::Rejected(reason)) => Err((StatusCode::UNPROCESSABLE_ENTITY, reason)),
        Err(e) => {
            tracing::error!("Account resolution failed: {e}");
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                "Account lookups are temporarily unavailable".to_string(),
            ))
        }
    }
}

pub fn bank_routes(directory: Arc<dyn BankDirectory>) -> Router {
    Router::new()
        .route("/banks/list", get(list_banks_handler))
        .route("/banks/resolve", post(resolve_account_handler))
        .with_state(directory)
}
