//! Request guards.
//!
//! A guard list is evaluated strictly in order. The first guard that does not
//! answer [`GuardOutcome::Continue`] ends the chain: later guards and the handler
//! never run, so nothing downstream can leave side effects behind.

use axum::response::Response;
use uuid::Uuid;

use crate::{
    AppState,
    error::AppError,
    models::User,
    passphrase,
    render::{recover, redirect_with},
    session::{FlashKind, SessionContext},
};

pub const LOGIN_PATH: &str = "/login";

/// Guard
///
/// One check in front of a handler. Variants carrying an id take it from the route path.
#[derive(Debug, Clone, PartialEq)]
pub enum Guard {
    /// An identity must be bound to the session.
    Authenticated,
    /// The viewer must be the author of the article.
    ArticleAuthor(Uuid),
    /// The viewer must be the owner of the profile.
    ProfileOwner(Uuid),
    /// The submitted passphrase must be on the accepted list.
    Passphrase(Option<String>),
    /// Forget any pending return-to-profile link. Always continues.
    ResetReturnToProfile,
}

/// GuardOutcome
#[derive(Debug)]
pub enum GuardOutcome {
    Continue,
    Redirect { to: String, message: String },
    Fail(AppError),
}

impl GuardOutcome {
    pub fn is_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }
}

/// GuardContext
///
/// Everything a guard may consult. `user` is the identity already resolved from
/// the session; `request_uri` is set only for requests that are safe to replay
/// after login (GET).
pub struct GuardContext<'a> {
    pub state: &'a AppState,
    pub session: &'a SessionContext,
    pub user: Option<&'a User>,
    pub request_uri: Option<&'a str>,
}

impl<'a> GuardContext<'a> {
    pub fn new(state: &'a AppState, session: &'a SessionContext, user: Option<&'a User>) -> Self {
        Self {
            state,
            session,
            user,
            request_uri: None,
        }
    }

    pub fn with_request_uri(mut self, uri: &'a str) -> Self {
        self.request_uri = Some(uri);
        self
    }
}

impl Guard {
    /// check
    ///
    /// Evaluates this single guard.
    pub async fn check(&self, ctx: &GuardContext<'_>) -> GuardOutcome {
        match self {
            Self::Authenticated => check_authenticated(ctx).await,
            Self::ArticleAuthor(id) => check_article_author(ctx, *id).await,
            Self::ProfileOwner(id) => check_profile_owner(ctx, *id).await,
            Self::Passphrase(value) => {
                match passphrase::check(&ctx.state.config.passphrases, value.as_deref()) {
                    None => GuardOutcome::Continue,
                    Some(err) => GuardOutcome::Fail(err.into()),
                }
            }
            Self::ResetReturnToProfile => match ctx.session.clear_return_to_profile().await {
                Ok(()) => GuardOutcome::Continue,
                Err(err) => GuardOutcome::Fail(err),
            },
        }
    }
}

async fn check_authenticated(ctx: &GuardContext<'_>) -> GuardOutcome {
    if ctx.user.is_some() {
        return GuardOutcome::Continue;
    }

    if let Some(uri) = ctx.request_uri {
        if let Err(err) = ctx.session.set_return_to(uri).await {
            return GuardOutcome::Fail(err);
        }
    }

    GuardOutcome::Redirect {
        to: LOGIN_PATH.to_string(),
        message: AppError::Unauthenticated.to_string(),
    }
}

async fn check_article_author(ctx: &GuardContext<'_>, article_id: Uuid) -> GuardOutcome {
    let Some(user) = ctx.user else {
        return GuardOutcome::Fail(AppError::Unauthenticated);
    };

    let article = match ctx.state.repo.get_article(article_id).await {
        Ok(Some(article)) => article,
        Ok(None) => {
            return GuardOutcome::Fail(AppError::NotFound("Article not found.".to_string()));
        }
        Err(err) => return GuardOutcome::Fail(err.into()),
    };

    if article.author_id != user.id {
        tracing::warn!(%article_id, user_id = %user.id, "article mutation by non-author refused");
        return GuardOutcome::Redirect {
            to: format!("/articles/{article_id}"),
            message: AppError::Forbidden.to_string(),
        };
    }

    GuardOutcome::Continue
}

async fn check_profile_owner(ctx: &GuardContext<'_>, profile_id: Uuid) -> GuardOutcome {
    let Some(user) = ctx.user else {
        return GuardOutcome::Fail(AppError::Unauthenticated);
    };

    let profile = match ctx.state.repo.get_user(profile_id).await {
        Ok(Some(profile)) => profile,
        Ok(None) => return GuardOutcome::Fail(AppError::NotFound("User not found.".to_string())),
        Err(err) => return GuardOutcome::Fail(err.into()),
    };

    if profile.id != user.id {
        tracing::warn!(%profile_id, user_id = %user.id, "profile mutation by non-owner refused");
        return GuardOutcome::Redirect {
            to: format!("/profile/{profile_id}"),
            message: AppError::Forbidden.to_string(),
        };
    }

    GuardOutcome::Continue
}

/// run
///
/// Evaluates `guards` in order and returns the first non-`Continue` outcome.
pub async fn run(guards: &[Guard], ctx: &GuardContext<'_>) -> GuardOutcome {
    for guard in guards {
        let outcome = guard.check(ctx).await;
        if !outcome.is_continue() {
            tracing::debug!(?guard, "guard short-circuited request");
            return outcome;
        }
    }
    GuardOutcome::Continue
}

/// enforce
///
/// Runs the chain and turns a short-circuit into a response: redirects flash their
/// message, failures go through [`recover`] with `fallback` as the safe page.
/// `Ok(None)` means every guard passed and the handler may proceed.
pub async fn enforce(
    guards: &[Guard],
    ctx: &GuardContext<'_>,
    fallback: &str,
) -> Result<Option<Response>, AppError> {
    match run(guards, ctx).await {
        GuardOutcome::Continue => Ok(None),
        GuardOutcome::Redirect { to, message } => {
            redirect_with(ctx.session, FlashKind::Error, message, &to)
                .await
                .map(Some)
        }
        GuardOutcome::Fail(err) => recover(ctx.session, err, fallback).await.map(Some),
    }
}
