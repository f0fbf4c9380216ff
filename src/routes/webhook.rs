use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::Deserialize;
use serde_email::Email;
use serde_json::json;

use crate::engine::Engine;
use crate::error::ServiceError;
use crate::providers::WebhookVerifier;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

#[derive(Debug, Deserialize)]
pub struct InboundSms {
    pub from: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UssdCallback {
    pub session_id: String,
    pub phone_number: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
struct PaymentEvent {
    event: String,
    data: PaymentEventData,
}

#[derive(Debug, Deserialize)]
struct PaymentEventData {
    reference: Option<String>,
    amount: Option<i64>,
    reason: Option<String>,
    transfer_code: Option<String>,
    customer: Option<PaymentCustomer>,
}

#[derive(Debug, Deserialize)]
struct PaymentCustomer {
    phone: Option<String>,
    email: Option<Email>,
}

// The SMS gateway wants its 200 fast; routing happens off the request path.
pub async fn inbound_sms_handler(
    State(engine): State<Arc<Engine>>,
    Form(sms): Form<InboundSms>,
) -> impl IntoResponse {
    tokio::spawn(async move {
        engine.route_sms(&sms.from, &sms.text).await;
    });
    (StatusCode::OK, Json(json!({ "success": true })))
}

// USSD is synchronous: the gateway renders whatever plain-text CON/END
// screen this returns.
pub async fn ussd_callback_handler(
    State(engine): State<Arc<Engine>>,
    Form(callback): Form<UssdCallback>,
) -> String {
    engine
        .route_ussd(&callback.session_id, &callback.phone_number, &callback.text)
        .await
}

pub async fn payment_events_handler(
    State((engine, verifier)): State<(Arc<Engine>, Arc<dyn WebhookVerifier>)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, StatusCode> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !verifier.verify(&body, signature) {
        tracing::warn!("Rejected payment webhook with a bad signature");
        return Err(StatusCode::UNAUTHORIZED);
    }

    // Unreadable payloads get a 200: the gateway would only redeliver them.
    let event: PaymentEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!("Discarding unreadable payment webhook: {e}");
            return Ok((StatusCode::OK, Json(json!({ "received": true }))));
        }
    };

    let outcome = match event.event.as_str() {
        "charge.success" => handle_charge_success(&engine, event.data).await,
        "transfer.success" => handle_transfer_success(&engine, event.data).await,
        "transfer.failed" => handle_transfer_failed(&engine, event.data).await,
        other => {
            tracing::debug!("Ignoring payment webhook event {other}");
            Ok(())
        }
    };

    if let Err(e) = outcome {
        tracing::error!("Payment webhook processing failed: {e}");
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    Ok((StatusCode::OK, Json(json!({ "received": true }))))
}

async fn handle_charge_success(
    engine: &Engine,
    data: PaymentEventData,
) -> Result<(), ServiceError> {
    let (Some(reference), Some(amount)) = (data.reference, data.amount) else {
        tracing::warn!("Ignoring charge.success without reference and amount");
        return Ok(());
    };
    let phone = data.customer.as_ref().and_then(|c| c.phone.as_deref());
    let email = data
        .customer
        .as_ref()
        .and_then(|c| c.email.as_ref().map(|e| e.to_string()));
    engine
        .wallet_funded(&reference, amount, phone, email.as_deref())
        .await
}

async fn handle_transfer_success(
    engine: &Engine,
    data: PaymentEventData,
) -> Result<(), ServiceError> {
    let Some(reference) = data.reference else {
        tracing::warn!("Ignoring transfer.success without a reference");
        return Ok(());
    };
    engine
        .transfer_settled(&reference, data.transfer_code.as_deref())
        .await
}

async fn handle_transfer_failed(
    engine: &Engine,
    data: PaymentEventData,
) -> Result<(), ServiceError> {
    let Some(reference) = data.reference else {
        tracing::warn!("Ignoring transfer.failed without a reference");
        return Ok(());
    };
    let reason = data
        .reason
        .unwrap_or_else(|| "the transfer could not be completed".to_string());
    engine.transfer_reversed(&reference, &reason).await
}

pub async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub fn gateway_routes(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/sms/webhook", post(inbound_sms_handler))
        .route("/ussd/callback", post(ussd_callback_handler))
        .with_state(engine)
}

pub fn payment_webhook_routes(engine: Arc<Engine>, verifier: Arc<dyn WebhookVerifier>) -> Router {
    Router::new()
        .route("/webhooks/payments", post(payment_events_handler))
        .with_state((engine, verifier))
}

pub fn health_routes() -> Router {
    Router::new().route("/health", get(health_handler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ledger::LedgerStore;
    use crate::engine::testkit;
    use crate::providers::sandbox::SharedSecretVerifier;
    use axum::http::HeaderValue;
    use rust_decimal::Decimal;

    fn signed_headers(secret: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(secret).unwrap());
        headers
    }

    #[tokio::test]
    async fn signed_charge_event_credits_the_wallet() {
        let kit = testkit::harness();
        let account = kit
            .seed_account("+2348012345678", "1234", Decimal::ZERO)
            .await;
        let verifier: Arc<dyn WebhookVerifier> = Arc::new(SharedSecretVerifier::new("whsec_test"));

        let body = json!({
            "event": "charge.success",
            "data": {
                "reference": "PSP_C_77",
                "amount": 250_000,
                "customer": { "phone": "+2348012345678", "email": null }
            }
        });
        let result = payment_events_handler(
            State((kit.engine.clone(), verifier)),
            signed_headers("whsec_test"),
            Bytes::from(body.to_string()),
        )
        .await;
        assert!(result.is_ok());

        let account = kit.ledger.find_account(account.id).await.unwrap().unwrap();
        assert_eq!(account.wallet_balance, Decimal::from(2_500));
    }

    #[tokio::test]
    async fn bad_signatures_get_401() {
        let kit = testkit::harness();
        let verifier: Arc<dyn WebhookVerifier> = Arc::new(SharedSecretVerifier::new("whsec_test"));

        let result = payment_events_handler(
            State((kit.engine.clone(), verifier)),
            signed_headers("whsec_wrong"),
            Bytes::from_static(b"{}"),
        )
        .await;
        assert_eq!(result.err(), Some(StatusCode::UNAUTHORIZED));
    }

    #[tokio::test]
    async fn unknown_events_are_acknowledged() {
        let kit = testkit::harness();
        let verifier: Arc<dyn WebhookVerifier> = Arc::new(SharedSecretVerifier::new("whsec_test"));

        let body = json!({ "event": "subscription.create", "data": {} });
        let result = payment_events_handler(
            State((kit.engine.clone(), verifier)),
            signed_headers("whsec_test"),
            Bytes::from(body.to_string()),
        )
        .await;
        assert!(result.is_ok());
    }

    #[test]
    fn ussd_callback_accepts_gateway_field_names() {
        let parsed: UssdCallback = serde_json::from_value(json!({
            "sessionId": "ATUid_1",
            "phoneNumber": "+2348012345678",
            "text": "1*AB12"
        }))
        .unwrap();
        assert_eq!(parsed.session_id, "ATUid_1");
        assert_eq!(parsed.phone_number, "+2348012345678");
        assert_eq!(parsed.text, "1*AB12");

        let bare: UssdCallback = serde_json::from_value(json!({
            "sessionId": "ATUid_1",
            "phoneNumber": "+2348012345678"
        }))
        .unwrap();
        assert_eq!(bare.text, "");
    }
}
