use axum::http::StatusCode;

/// PassphraseError
///
/// Returned when the submitted passphrase is absent or not on the accepted list.
/// Carries the user-facing message and the status it maps to.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct PassphraseError {
    pub message: String,
    pub status: StatusCode,
}

impl PassphraseError {
    fn rejected() -> Self {
        Self {
            message: "The passphrase is incorrect.".to_string(),
            status: StatusCode::BAD_REQUEST,
        }
    }
}

/// check
///
/// Compares `submitted` against the deploy-time passphrases, exact and case-sensitive.
/// `None` means the passphrase was accepted. Missing and empty input never match,
/// even if the accepted list were to contain an empty entry.
pub fn check(accepted: &[String], submitted: Option<&str>) -> Option<PassphraseError> {
    match submitted {
        Some(value) if !value.is_empty() && accepted.iter().any(|p| p == value) => None,
        _ => Some(PassphraseError::rejected()),
    }
}
