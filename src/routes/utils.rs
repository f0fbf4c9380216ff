use axum::http::{HeaderMap, StatusCode};
use uuid::Uuid;

use super::auth::AuthService;

#[inline]
pub fn validate_auth_token(headers: HeaderMap, service: &AuthService) -> Result<Uuid, StatusCode> {
    let jwt_header_token = match headers.get("Authorization").map(|token| token.to_str()) {
        Some(Ok(token)) => token,
        _ => {
            return Err(StatusCode::UNAUTHORIZED);
        }
    };
    // Dashboard clients send "Bearer <jwt>"; accept the bare token too.
    let token = jwt_header_token
        .strip_prefix("Bearer ")
        .unwrap_or(jwt_header_token);
    //validate our token
    match service.verify_token(token) {
        Ok(user) => Ok(user),
        Err(_) => Err(StatusCode::UNAUTHORIZED),
    }
}
