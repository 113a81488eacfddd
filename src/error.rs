use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::{
    credentials::CredentialError, models::ErrorView, passphrase::PassphraseError,
    render::Page, repository::RepositoryError,
};

/// Message shown on the error page when the error carries none of its own.
pub const DEFAULT_ERROR_MESSAGE: &str = "Something went wrong";

/// AppError
///
/// Every failure a handler or guard can produce. Expected domain failures
/// (`Validation`, `NotFound`, `Passphrase`, `Persistence`) are normally recovered at
/// the route boundary as flash + redirect; anything that escapes is rendered by
/// `IntoResponse` as the generic error page with [`AppError::status`].
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("Please log in first.")]
    Unauthenticated,

    #[error("You do not have permission to do that.")]
    Forbidden,

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Passphrase(#[from] PassphraseError),

    #[error("The request could not be completed.")]
    Persistence(#[from] RepositoryError),

    #[error("Authentication failed.")]
    Credential(#[from] CredentialError),

    #[error("Session unavailable.")]
    Session(#[from] tower_sessions::session::Error),

    #[error("{}", DEFAULT_ERROR_MESSAGE)]
    Internal(String),
}

impl AppError {
    /// status
    ///
    /// The HTTP status used when this error is rendered as a page.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Passphrase(err) => err.status,
            Self::Persistence(_)
            | Self::Credential(_)
            | Self::Session(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// is_recoverable
    ///
    /// True for failures a handler answers with a flash message and a redirect
    /// instead of the error page.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::Unauthenticated
                | Self::Forbidden
                | Self::NotFound(_)
                | Self::Passphrase(_)
                | Self::Persistence(_)
        )
    }

    pub fn page_not_found() -> Self {
        Self::NotFound("Page not found".to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            Self::Persistence(e) => tracing::error!(error = ?e, "persistence failure reached error page"),
            Self::Credential(e) => tracing::error!(error = ?e, "credential failure"),
            Self::Session(e) => tracing::error!(error = ?e, "session store failure"),
            Self::Internal(e) => tracing::error!(error = %e, "unhandled error"),
            _ => tracing::debug!(%status, error = %self, "rendering error page"),
        }

        let mut message = self.to_string();
        if message.is_empty() {
            message = DEFAULT_ERROR_MESSAGE.to_string();
        }

        let page = Page::new(
            "error",
            ErrorView {
                status: status.as_u16(),
                message,
            },
        );
        (status, Json(page)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(AppError::Validation("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::page_not_found().status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::Internal("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::Persistence(RepositoryError::Unavailable("down".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn only_domain_failures_are_recoverable() {
        assert!(AppError::NotFound("gone".into()).is_recoverable());
        assert!(AppError::Validation("bad".into()).is_recoverable());
        assert!(!AppError::Internal("boom".into()).is_recoverable());
    }

    #[tokio::test]
    async fn error_page_carries_status_and_message() {
        let response = AppError::page_not_found().into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["template"], "error");
        assert_eq!(body["data"]["status"], 404);
        assert_eq!(body["data"]["message"], "Page not found");
    }
}
