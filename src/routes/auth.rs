use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::ledger::LedgerStore;
use crate::engine::{phone, pin};

// Dashboard tokens are long-lived; handsets re-login rarely.
const TOKEN_TTL_SECS: u64 = 60 * 60 * 24 * 30;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    sub: Uuid, // user_id
    exp: i64,  // expiration timestamp
    iat: i64,  // issued at timestamp
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    phone: String,
    pin: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    access_token: String,
    user_uid: Uuid,
    full_name: String,
}

// Authentication service for the read-only dashboard API. Credentials are
// the same phone + PIN pair the SMS channel uses.
pub struct AuthService {
    ledger: Arc<dyn LedgerStore>,
    jwt_secret: String,
}

impl AuthService {
    pub fn new(ledger: Arc<dyn LedgerStore>, jwt_secret: String) -> Self {
        Self { ledger, jwt_secret }
    }

    pub async fn login(&self, req: LoginRequest) -> Result<AuthResponse, Box<dyn std::error::Error>> {
        let canonical = phone::normalize(&req.phone).ok_or("Invalid credentials")?;

        // Find the wallet behind the phone number
        let account = self
            .ledger
            .find_account_by_phone(&canonical)
            .await?
            .ok_or("Invalid credentials")?;
        if !account.is_usable() {
            return Err("Account is not active".into());
        }

        // Verify PIN
        if !pin::verify(&req.pin, &account.pin_hash) {
            tracing::warn!("Invalid credentials for wallet: {}", canonical);
            return Err("Invalid credentials".into());
        }

        let access_token = self.generate_token(account.id)?;
        tracing::info!("Generated dashboard token for wallet: {}", canonical);

        Ok(AuthResponse {
            access_token,
            user_uid: account.id,
            full_name: account.full_name,
        })
    }

    pub fn verify_token(&self, token: &str) -> Result<Uuid, Box<dyn std::error::Error>> {
        let mut validation = jsonwebtoken::Validation::default();

        validation.leeway = 10;
        validation.validate_exp = true;
        validation.algorithms = vec![jsonwebtoken::Algorithm::HS256];

        let token_data = jsonwebtoken::decode::<Claims>(
            token,
            &jsonwebtoken::DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|err| {
            tracing::warn!("Error decoding token: {:?}", err);
            "Invalid token"
        })?;

        Ok(token_data.claims.sub)
    }

    fn generate_token(&self, user_id: Uuid) -> Result<String, Box<dyn std::error::Error>> {
        let now = Utc::now();

        let claims = Claims {
            sub: user_id,
            exp: (now + Duration::from_secs(TOKEN_TTL_SECS)).timestamp(),
            iat: now.timestamp(),
        };

        let access_token = jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )?;

        Ok(access_token)
    }
}

// Route for handling dashboard login
pub async fn login_handler(
    State(service): State<Arc<AuthService>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    match service.login(req).await {
        Ok(response) => Ok((StatusCode::OK, Json(response))),
        Err(e) => Err((StatusCode::UNAUTHORIZED, e.to_string())),
    }
}

pub fn auth_routes(service: Arc<AuthService>) -> Router {
    Router::new()
        .route("/auth/login", post(login_handler))
        .with_state(service)
}
