use axum::{
    extract::{FromRef, FromRequestParts, OptionalFromRequestParts},
    http::request::Parts,
    response::{IntoResponse, Response},
};

use crate::{
    credentials::CredentialState,
    error::AppError,
    guards::LOGIN_PATH,
    models::User,
    render::redirect_with,
    repository::RepositoryState,
    session::{FlashKind, SessionContext},
};

/// AuthUser Extractor Result
///
/// The resolved identity of an authenticated request. The authentication layer
/// resolves it once and stores it in the request extensions; handlers receive it
/// as an argument.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl AuthUser {
    pub fn user(&self) -> &User {
        &self.0
    }
}

/// resolve_session_user
///
/// Deserializes the session identity and loads the user it refers to. A stale
/// identity (user gone, unparsable value) resolves to `None`, same as anonymous.
pub async fn resolve_session_user(
    session: &SessionContext,
    repo: &RepositoryState,
    credentials: &CredentialState,
) -> Result<Option<User>, AppError> {
    let Some(raw) = session.identity().await? else {
        return Ok(None);
    };
    let Some(user_id) = credentials.deserialize_identity(&raw) else {
        tracing::warn!("discarding unparsable session identity");
        return Ok(None);
    };
    Ok(repo.get_user(user_id).await?)
}

async fn lookup<S>(parts: &mut Parts, state: &S) -> Result<Option<AuthUser>, Response>
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    CredentialState: FromRef<S>,
{
    if let Some(user) = parts.extensions.get::<AuthUser>() {
        return Ok(Some(user.clone()));
    }

    let session = SessionContext::from_request_parts(parts, state)
        .await
        .map_err(IntoResponse::into_response)?;
    let repo = RepositoryState::from_ref(state);
    let credentials = CredentialState::from_ref(state);

    let user = resolve_session_user(&session, &repo, &credentials)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(user.map(AuthUser))
}

/// AuthUser Extractor Implementation
///
/// Rejection: flash "please log in" and redirect to the login page. Normally never
/// hit, since the authentication layer has already short-circuited anonymous requests.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    CredentialState: FromRef<S>,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = lookup(parts, state).await? {
            return Ok(user);
        }

        let session = SessionContext::from_request_parts(parts, state)
            .await
            .map_err(IntoResponse::into_response)?;
        let response = redirect_with(
            &session,
            FlashKind::Error,
            AppError::Unauthenticated.to_string(),
            LOGIN_PATH,
        )
        .await
        .map_err(IntoResponse::into_response)?;
        Err(response)
    }
}

/// `Option<AuthUser>` for public pages that only decorate themselves with the viewer.
impl<S> OptionalFromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    CredentialState: FromRef<S>,
{
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        lookup(parts, state).await
    }
}

/// FavoriteSnapshot
///
/// The viewer's favorite article ids, fetched before the article detail page
/// renders so the page can tell whether the article is already favorited.
/// Best-effort: a failed lookup is logged and yields an empty snapshot, the
/// request itself never fails because of it.
#[derive(Debug, Clone, Default)]
pub struct FavoriteSnapshot(pub Vec<uuid::Uuid>);

impl FavoriteSnapshot {
    pub fn contains(&self, article_id: uuid::Uuid) -> bool {
        self.0.contains(&article_id)
    }
}

impl<S> FromRequestParts<S> for FavoriteSnapshot
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    CredentialState: FromRef<S>,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = match lookup(parts, state).await {
            Ok(Some(AuthUser(user))) => user,
            Ok(None) => return Ok(Self::default()),
            Err(_) => {
                tracing::warn!("favorite snapshot skipped: session could not be resolved");
                return Ok(Self::default());
            }
        };

        let repo = RepositoryState::from_ref(state);
        match repo.favorite_ids(user.id).await {
            Ok(ids) => Ok(Self(ids.unwrap_or_default())),
            Err(e) => {
                tracing::error!(error = ?e, user_id = %user.id, "error populating user favorites");
                Ok(Self::default())
            }
        }
    }
}
