//! Typed access to the server-held session.
//!
//! Every transient key the request flows share lives here with explicit
//! read/take/clear operations, so handlers never touch raw session keys.

use axum::{
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use ts_rs::TS;
use utoipa::ToSchema;

use crate::error::AppError;

const IDENTITY_KEY: &str = "identity";
const FLASH_KEY: &str = "flash";
const RETURN_TO_KEY: &str = "return_to";
const RETURN_TO_PROFILE_KEY: &str = "return_to_profile";

/// Flash
///
/// One-time messages shown on the next rendered page, split by styling category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Flash {
    pub success: Vec<String>,
    pub error: Vec<String>,
}

impl Flash {
    pub fn is_empty(&self) -> bool {
        self.success.is_empty() && self.error.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashKind {
    Success,
    Error,
}

/// SessionContext
///
/// Request-scoped handle on the session, extracted like any other axum extractor.
/// Requires the `SessionManagerLayer` to be installed on the router.
#[derive(Clone, Debug)]
pub struct SessionContext {
    session: Session,
}

impl SessionContext {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    // --- Identity ---

    /// The serialized identity bound by the last login, if any.
    pub async fn identity(&self) -> Result<Option<String>, AppError> {
        Ok(self.session.get::<String>(IDENTITY_KEY).await?)
    }

    /// Binds `identity` to the session. The session id is cycled first so a
    /// pre-login id can never be reused as an authenticated one. A pending
    /// `return_to` belongs to the anonymous visit and is dropped; callers that
    /// honour it take it before logging in.
    pub async fn log_in(&self, identity: String) -> Result<(), AppError> {
        self.session.cycle_id().await?;
        self.session.remove::<String>(RETURN_TO_KEY).await?;
        self.session.insert(IDENTITY_KEY, identity).await?;
        Ok(())
    }

    /// Drops the identity and both return-to URLs but keeps the session, so the
    /// logout flash survives.
    pub async fn log_out(&self) -> Result<(), AppError> {
        self.session.remove::<String>(IDENTITY_KEY).await?;
        self.session.remove::<String>(RETURN_TO_KEY).await?;
        self.session.remove::<String>(RETURN_TO_PROFILE_KEY).await?;
        self.session.cycle_id().await?;
        Ok(())
    }

    // --- Flash ---

    pub async fn flash(&self, kind: FlashKind, message: impl Into<String>) -> Result<(), AppError> {
        let mut flash = self
            .session
            .get::<Flash>(FLASH_KEY)
            .await?
            .unwrap_or_default();
        match kind {
            FlashKind::Success => flash.success.push(message.into()),
            FlashKind::Error => flash.error.push(message.into()),
        }
        self.session.insert(FLASH_KEY, flash).await?;
        Ok(())
    }

    /// Reads and clears all pending flash messages.
    pub async fn take_flash(&self) -> Result<Flash, AppError> {
        Ok(self
            .session
            .remove::<Flash>(FLASH_KEY)
            .await?
            .unwrap_or_default())
    }

    // --- Return-to (after forced login) ---

    pub async fn set_return_to(&self, url: &str) -> Result<(), AppError> {
        self.session.insert(RETURN_TO_KEY, url).await?;
        Ok(())
    }

    pub async fn take_return_to(&self) -> Result<Option<String>, AppError> {
        Ok(self.session.remove::<String>(RETURN_TO_KEY).await?)
    }

    // --- Return-to-profile (multi-step flows started on a profile page) ---

    pub async fn set_return_to_profile(&self, url: &str) -> Result<(), AppError> {
        self.session.insert(RETURN_TO_PROFILE_KEY, url).await?;
        Ok(())
    }

    /// Reads without clearing; used for back-links on form and detail pages.
    pub async fn peek_return_to_profile(&self) -> Result<Option<String>, AppError> {
        Ok(self.session.get::<String>(RETURN_TO_PROFILE_KEY).await?)
    }

    /// Reads and clears. Called once when a flow completes.
    pub async fn take_return_to_profile(&self) -> Result<Option<String>, AppError> {
        Ok(self.session.remove::<String>(RETURN_TO_PROFILE_KEY).await?)
    }

    pub async fn clear_return_to_profile(&self) -> Result<(), AppError> {
        self.session.remove::<String>(RETURN_TO_PROFILE_KEY).await?;
        Ok(())
    }
}

impl<S> FromRequestParts<S> for SessionContext
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state).await?;
        Ok(Self::new(session))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tower_sessions::MemoryStore;

    use super::*;

    fn context() -> SessionContext {
        let store = Arc::new(MemoryStore::default());
        SessionContext::new(Session::new(None, store, None))
    }

    #[tokio::test]
    async fn flash_is_consumed_once() {
        let ctx = context();
        ctx.flash(FlashKind::Success, "saved").await.unwrap();
        ctx.flash(FlashKind::Error, "but also").await.unwrap();

        let flash = ctx.take_flash().await.unwrap();
        assert_eq!(flash.success, vec!["saved"]);
        assert_eq!(flash.error, vec!["but also"]);

        assert!(ctx.take_flash().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn return_to_profile_can_be_peeked_but_only_taken_once() {
        let ctx = context();
        ctx.set_return_to_profile("/profile/abc").await.unwrap();

        assert_eq!(
            ctx.peek_return_to_profile().await.unwrap().as_deref(),
            Some("/profile/abc")
        );
        assert_eq!(
            ctx.take_return_to_profile().await.unwrap().as_deref(),
            Some("/profile/abc")
        );
        assert_eq!(ctx.take_return_to_profile().await.unwrap(), None);
    }

    #[tokio::test]
    async fn clearing_return_to_profile_removes_it() {
        let ctx = context();
        ctx.set_return_to_profile("/profile/abc").await.unwrap();
        ctx.clear_return_to_profile().await.unwrap();
        assert_eq!(ctx.peek_return_to_profile().await.unwrap(), None);
    }

    #[tokio::test]
    async fn return_to_is_taken_once() {
        let ctx = context();
        ctx.set_return_to("/articles/new").await.unwrap();
        assert_eq!(
            ctx.take_return_to().await.unwrap().as_deref(),
            Some("/articles/new")
        );
        assert_eq!(ctx.take_return_to().await.unwrap(), None);
    }

    #[tokio::test]
    async fn log_out_drops_identity_but_keeps_flash() {
        let ctx = context();
        ctx.log_in("user-1".to_string()).await.unwrap();
        assert_eq!(ctx.identity().await.unwrap().as_deref(), Some("user-1"));

        ctx.log_out().await.unwrap();
        ctx.flash(FlashKind::Success, "bye").await.unwrap();

        assert_eq!(ctx.identity().await.unwrap(), None);
        assert_eq!(ctx.take_flash().await.unwrap().success, vec!["bye"]);
    }

    #[tokio::test]
    async fn log_in_and_log_out_drop_a_pending_return_to() {
        let ctx = context();
        ctx.set_return_to("/articles/new").await.unwrap();
        ctx.log_in("user-1".to_string()).await.unwrap();
        assert_eq!(ctx.take_return_to().await.unwrap(), None);

        ctx.set_return_to("/aboutus").await.unwrap();
        ctx.set_return_to_profile("/profile/abc").await.unwrap();
        ctx.log_out().await.unwrap();
        assert_eq!(ctx.take_return_to().await.unwrap(), None);
        assert_eq!(ctx.peek_return_to_profile().await.unwrap(), None);
    }
}
