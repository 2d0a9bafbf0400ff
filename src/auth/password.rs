//! Account credentials: the registration policy and Argon2id hashes as
//! stored in `users.hashed_password`.

use anyhow::anyhow;
use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::error;

use crate::error::{ApiError, ApiResult};

pub const MIN_PASSWORD_LEN: usize = 8;

/// Rejects passwords registration will not accept.
pub fn check_policy(password: &str) -> ApiResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// PHC string for a new account.
pub fn hash(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let phc = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "credential hashing failed");
            anyhow!("hash credential: {e}")
        })?;
    Ok(phc.to_string())
}

/// `Ok(false)` only for a wrong password. A stored hash that cannot be
/// parsed or checked is an error, not a failed login.
pub fn verify(password: &str, stored: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(stored).map_err(|e| {
        error!(error = %e, "stored credential is not a PHC string");
        anyhow!("parse stored credential: {e}")
    })?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(e) => {
            error!(error = %e, "credential check failed");
            Err(anyhow!("verify credential: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_hash_accepts_only_its_password() {
        let stored = hash("survey-analyst-2024").unwrap();
        assert!(stored.starts_with("$argon2id$"));
        assert!(verify("survey-analyst-2024", &stored).unwrap());
        assert!(!verify("survey-analyst-2025", &stored).unwrap());
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        assert_ne!(hash("district-codes").unwrap(), hash("district-codes").unwrap());
    }

    #[test]
    fn unparseable_stored_hash_is_an_error() {
        assert!(verify("anything", "plaintext-left-over").is_err());
    }

    #[test]
    fn short_passwords_fail_policy() {
        assert_eq!(check_policy("short").unwrap_err().kind(), "bad_request");
        assert!(check_policy("long-enough").is_ok());
    }
}
