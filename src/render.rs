//! Page rendering boundary.
//!
//! Templates are rendered outside this service. A handler "renders" by returning
//! the view envelope: template name, the viewer, pending flash messages and the
//! page data.

use axum::{
    Json,
    response::{IntoResponse, Redirect, Response},
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::User,
    session::{Flash, FlashKind, SessionContext},
};

/// CurrentUser
///
/// The viewer as exposed to every template (navigation bar, ownership buttons).
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CurrentUser {
    pub id: Uuid,
    pub username: String,
}

impl From<&User> for CurrentUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
        }
    }
}

/// Page
///
/// The JSON envelope handed to the external renderer.
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub template: &'static str,
    pub current_user: Option<CurrentUser>,
    pub flash: Flash,
    pub data: T,
}

impl<T: Serialize> Page<T> {
    pub fn new(template: &'static str, data: T) -> Self {
        Self {
            template,
            current_user: None,
            flash: Flash::default(),
            data,
        }
    }

    pub fn with_user(mut self, user: Option<&User>) -> Self {
        self.current_user = user.map(CurrentUser::from);
        self
    }

    /// Attaches (and thereby consumes) the session's pending flash messages.
    pub async fn with_flash(mut self, session: &SessionContext) -> Result<Self, AppError> {
        self.flash = session.take_flash().await?;
        Ok(self)
    }
}

impl<T: Serialize> IntoResponse for Page<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// render
///
/// Builds the page for `template`, consuming pending flash messages.
pub async fn render<T: Serialize>(
    session: &SessionContext,
    user: Option<&User>,
    template: &'static str,
    data: T,
) -> Result<Response, AppError> {
    let page = Page::new(template, data)
        .with_user(user)
        .with_flash(session)
        .await?;
    Ok(page.into_response())
}

/// redirect_with
///
/// Queues a flash message and answers with `303 See Other` to `to`.
pub async fn redirect_with(
    session: &SessionContext,
    kind: FlashKind,
    message: impl Into<String>,
    to: &str,
) -> Result<Response, AppError> {
    session.flash(kind, message).await?;
    Ok(Redirect::to(to).into_response())
}

/// recover
///
/// The boundary between expected and unexpected failures. Recoverable errors
/// become an error flash plus a redirect to `fallback`; everything else is
/// returned for the error page.
pub async fn recover(
    session: &SessionContext,
    err: AppError,
    fallback: &str,
) -> Result<Response, AppError> {
    if !err.is_recoverable() {
        return Err(err);
    }
    if let AppError::Persistence(e) = &err {
        tracing::error!(error = ?e, fallback, "persistence failure recovered with flash");
    }
    redirect_with(session, FlashKind::Error, err.to_string(), fallback).await
}
