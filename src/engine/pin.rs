//! Transaction PIN hashing and verification (argon2). Verification failures
//! and malformed stored hashes both read as a mismatch.

use argon2::password_hash::{PasswordHasher, SaltString};
use argon2::{Argon2, PasswordHash, PasswordVerifier};

use crate::error::ServiceError;

pub fn is_well_formed(pin: &str) -> bool {
    pin.len() == 4 && pin.chars().all(|c| c.is_ascii_digit())
}

pub fn hash(pin: &str) -> Result<String, ServiceError> {
    let salt = SaltString::generate(&mut rand::thread_rng());
    Argon2::default()
        .hash_password(pin.as_bytes(), &salt)
        .map(|hashed| hashed.to_string())
        .map_err(|err| ServiceError::Internal(format!("failed to hash PIN: {err}")))
}

pub fn verify(pin: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(pin.as_bytes(), &parsed)
            .is_ok(),
        Err(err) => {
            tracing::warn!("unparseable PIN hash in store: {err}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_verifies_and_rejects() {
        let hashed = hash("4321").unwrap();
        assert!(verify("4321", &hashed));
        assert!(!verify("1234", &hashed));
    }

    #[test]
    fn malformed_stored_hash_never_verifies() {
        assert!(!verify("4321", "not-a-hash"));
    }

    #[test]
    fn well_formed_means_exactly_four_digits() {
        assert!(is_well_formed("0000"));
        assert!(!is_well_formed("123"));
        assert!(!is_well_formed("12345"));
        assert!(!is_well_formed("12a4"));
    }
}
