//! Password hashing and session identity encoding.
//!
//! Handlers only see the narrow [`CredentialService`] contract; the Argon2id
//! implementation is the single concrete provider.

use std::sync::Arc;

use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::SaltString,
};
use rand::rngs::OsRng;
use uuid::Uuid;

use crate::{error::AppError, models::User};

/// CredentialError
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("No password was given.")]
    MissingPassword,

    #[error("password hashing failed: {0}")]
    HashingFailed(String),

    #[error("invalid hashing parameters: {0}")]
    InvalidParams(String),
}

/// CredentialService
///
/// Hashes and verifies passwords, and turns a user into the opaque value stored
/// in the session (and back).
pub trait CredentialService: Send + Sync {
    /// Produces a PHC string embedding algorithm, parameters, salt and hash.
    fn hash_password(&self, password: &str) -> Result<String, CredentialError>;

    /// Constant-time verification. Malformed stored hashes verify as `false`.
    fn verify_password(&self, password: &str, stored_hash: &str) -> bool;

    fn serialize_identity(&self, user: &User) -> String;

    /// Returns the user id the session refers to, or `None` when the value is not
    /// one this service produced.
    fn deserialize_identity(&self, raw: &str) -> Option<Uuid>;
}

/// CredentialState
///
/// Shared handle stored in `AppState`.
pub type CredentialState = Arc<dyn CredentialService>;

/// hash_password
///
/// [`CredentialService::hash_password`] on the blocking pool. Argon2 is
/// CPU-bound and must not run on a runtime worker.
pub async fn hash_password(
    credentials: &CredentialState,
    password: &str,
) -> Result<String, AppError> {
    let credentials = credentials.clone();
    let password = password.to_string();
    let hashed = tokio::task::spawn_blocking(move || credentials.hash_password(&password))
        .await
        .map_err(|e| AppError::Internal(format!("password hashing task failed: {e}")))?;
    Ok(hashed?)
}

/// verify_password
///
/// [`CredentialService::verify_password`] on the blocking pool.
pub async fn verify_password(
    credentials: &CredentialState,
    password: &str,
    stored_hash: &str,
) -> Result<bool, AppError> {
    let credentials = credentials.clone();
    let password = password.to_string();
    let stored_hash = stored_hash.to_string();
    tokio::task::spawn_blocking(move || credentials.verify_password(&password, &stored_hash))
        .await
        .map_err(|e| AppError::Internal(format!("password verification task failed: {e}")))
}

/// Argon2Credentials
///
/// Argon2id with the crate's default (OWASP) parameters and a fresh random salt per hash.
#[derive(Default, Clone)]
pub struct Argon2Credentials {
    argon2: Argon2<'static>,
}

impl Argon2Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Argon2id with explicit memory (KiB) and iteration cost. Hashes keep their
    /// parameters in the PHC string, so verification works across cost changes.
    pub fn with_cost(memory_kib: u32, iterations: u32) -> Result<Self, CredentialError> {
        let params = Params::new(memory_kib, iterations, 1, None)
            .map_err(|e| CredentialError::InvalidParams(e.to_string()))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }
}

impl CredentialService for Argon2Credentials {
    fn hash_password(&self, password: &str) -> Result<String, CredentialError> {
        if password.is_empty() {
            return Err(CredentialError::MissingPassword);
        }

        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| CredentialError::HashingFailed(e.to_string()))?;

        Ok(hash.to_string())
    }

    fn verify_password(&self, password: &str, stored_hash: &str) -> bool {
        let parsed = match PasswordHash::new(stored_hash) {
            Ok(h) => h,
            Err(_) => return false,
        };

        self.argon2
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }

    fn serialize_identity(&self, user: &User) -> String {
        user.id.to_string()
    }

    fn deserialize_identity(&self, raw: &str) -> Option<Uuid> {
        Uuid::parse_str(raw).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify() {
        let creds = Argon2Credentials::new();
        let hash = creds.hash_password("correct horse").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(creds.verify_password("correct horse", &hash));
        assert!(!creds.verify_password("wrong horse", &hash));
    }

    #[test]
    fn every_hash_gets_its_own_salt() {
        let creds = Argon2Credentials::new();
        let a = creds.hash_password("same").unwrap();
        let b = creds.hash_password("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn empty_password_is_refused() {
        let creds = Argon2Credentials::new();
        assert!(matches!(
            creds.hash_password(""),
            Err(CredentialError::MissingPassword)
        ));
    }

    #[test]
    fn hashes_verify_across_cost_settings() {
        let cheap = Argon2Credentials::with_cost(64, 1).unwrap();
        let hash = cheap.hash_password("pw").unwrap();
        assert!(Argon2Credentials::new().verify_password("pw", &hash));
        assert!(matches!(
            Argon2Credentials::with_cost(0, 0),
            Err(CredentialError::InvalidParams(_))
        ));
    }

    #[tokio::test]
    async fn blocking_pool_helpers_hash_and_verify() {
        let creds: CredentialState = Arc::new(Argon2Credentials::with_cost(64, 1).unwrap());
        let hash = hash_password(&creds, "pw").await.unwrap();

        assert!(verify_password(&creds, "pw", &hash).await.unwrap());
        assert!(!verify_password(&creds, "nope", &hash).await.unwrap());
        assert!(matches!(
            hash_password(&creds, "").await,
            Err(AppError::Credential(CredentialError::MissingPassword))
        ));
    }

    #[test]
    fn malformed_stored_hash_never_verifies() {
        let creds = Argon2Credentials::new();
        assert!(!creds.verify_password("anything", "not_a_phc_string"));
    }

    #[test]
    fn identity_roundtrips_through_the_session_value() {
        let creds = Argon2Credentials::new();
        let user = User {
            id: Uuid::new_v4(),
            ..User::default()
        };

        let raw = creds.serialize_identity(&user);
        assert_eq!(creds.deserialize_identity(&raw), Some(user.id));
        assert_eq!(creds.deserialize_identity("garbage"), None);
    }
}
