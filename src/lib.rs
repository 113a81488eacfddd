use axum::{
    Router,
    extract::{FromRef, Query, Request, State},
    http::{HeaderName, Method},
    middleware::{self, Next},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use sha2::{Digest, Sha512};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::{
    Layer, ServiceBuilder,
    util::{MapRequest, MapRequestLayer},
};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tower_sessions::{
    Expiry, SessionManagerLayer, SessionStore,
    cookie::{Key, SameSite},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Core application services and components.
pub mod auth;
pub mod config;
pub mod credentials;
pub mod error;
pub mod guards;
pub mod handlers;
pub mod models;
pub mod passphrase;
pub mod render;
pub mod repository;
pub mod seed;
pub mod session;

// Module for routing segregation (Public, Authenticated).
pub mod routes;
use auth::{AuthUser, resolve_session_user};
use error::AppError;
use guards::{Guard, GuardContext, LOGIN_PATH};
use routes::{authenticated, public};
use session::SessionContext;

// --- Public Re-exports ---

pub use config::AppConfig;
pub use credentials::{Argon2Credentials, CredentialState};
pub use repository::{MemoryRepository, PostgresRepository, RepositoryState};

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "session";

/// ApiDoc
///
/// Aggregates every `#[utoipa::path]` handler and the view-model schemas. Served
/// at `/api-docs/openapi.json`, browsable at `/swagger-ui`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::home, handlers::register_form, handlers::register, handlers::login_form,
        handlers::login, handlers::logout, handlers::about, handlers::show_profile,
        handlers::introduction_form, handlers::update_introduction, handlers::favorite_article,
        handlers::list_articles, handlers::new_article, handlers::create_article,
        handlers::show_article, handlers::edit_article, handlers::update_article,
        handlers::delete_article
    ),
    components(
        schemas(
            models::User, models::Article, models::Author, models::ArticleDetail,
            models::RegisterForm, models::LoginForm, models::IntroductionForm, models::ArticleForm,
            models::ArticleIndexView, models::ArticleShowView, models::ArticleFormView,
            models::ProfileView, models::IntroductionFormView, models::ErrorView,
            session::Flash, render::CurrentUser,
        )
    ),
    tags(
        (name = "article-hub", description = "Article sharing site")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single shared container for the application's services and configuration.
/// Cloned per request; every field is cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Persistence Service: users, articles, favorites.
    pub repo: RepositoryState,
    /// Credential Service: password hashing and session identity encoding.
    pub credentials: CredentialState,
    /// Configuration: The loaded, immutable environment configuration.
    pub config: AppConfig,
}

// --- Axum FromRef Extractor Implementations ---

// Lets extractors such as `AuthUser` pull single services out of the state.

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for CredentialState {
    fn from_ref(app_state: &AppState) -> CredentialState {
        app_state.credentials.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Runs the `Authenticated` guard in front of every authenticated route.
///
/// *Mechanism*: resolves the session identity once. Anonymous (or stale) sessions
/// are redirected to `/login`; for page requests the requested URL is remembered
/// so a successful login can return to it. On success the user is stored in the
/// request extensions, where the `AuthUser` extractor picks it up.
async fn auth_middleware(
    State(state): State<AppState>,
    session: SessionContext,
    mut request: Request,
    next: Next,
) -> Response {
    let user = match resolve_session_user(&session, &state.repo, &state.credentials).await {
        Ok(user) => user,
        Err(err) => return err.into_response(),
    };

    let replay_uri = is_replayable(&request).then(|| {
        request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| request.uri().path().to_string())
    });

    let mut ctx = GuardContext::new(&state, &session, user.as_ref());
    if let Some(uri) = replay_uri.as_deref() {
        ctx = ctx.with_request_uri(uri);
    }
    match guards::enforce(&[Guard::Authenticated], &ctx, LOGIN_PATH).await {
        Ok(Some(response)) => return response,
        Ok(None) => {}
        Err(err) => return err.into_response(),
    }

    if let Some(user) = user {
        request.extensions_mut().insert(AuthUser(user));
    }
    next.run(request).await
}

/// Only GET pages are remembered for the post-login redirect. `/logout` and
/// `/favoriteArticle/{id}` act on GET, and replaying them would repeat the action.
fn is_replayable(request: &Request) -> bool {
    let path = request.uri().path();
    request.method() == Method::GET && path != "/logout" && !path.starts_with("/favoriteArticle/")
}

async fn not_found() -> AppError {
    AppError::page_not_found()
}

/// create_router
///
/// Assembles the routing table, the authentication layer, the session layer and
/// the observability stack around the shared state.
///
/// Session cookie: signed, HttpOnly, SameSite=Lax, not Secure (TLS terminates at
/// the proxy), expiring after the configured inactivity window. The signing key
/// is the SHA-512 digest of the deploy secret, exactly the 64 bytes `Key` needs.
pub fn create_router<Store>(state: AppState, store: Store) -> Router
where
    Store: SessionStore + Clone,
{
    // Header name constant for Request Correlation.
    let x_request_id = HeaderName::from_static("x-request-id");
    let digest = Sha512::digest(state.config.session_secret.as_bytes());
    let sessions = SessionManagerLayer::new(store)
        .with_name(SESSION_COOKIE)
        .with_secure(false)
        .with_http_only(true)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::hours(
            state.config.session_max_age_hours,
        )))
        .with_signed(Key::from(digest.as_slice()));

    let base_router = Router::new()
        // Documentation: Serve the auto-generated Swagger UI.
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Public Routes: No authentication layer.
        .merge(public::public_routes())
        // Authenticated Routes: every handler sits behind `auth_middleware`.
        .merge(
            authenticated::authenticated_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            )),
        )
        // Unmatched routes and unsupported methods render the 404 error page.
        .fallback(not_found)
        .method_not_allowed_fallback(not_found)
        .with_state(state);

    base_router
        // Sessions must wrap every route, the auth layer reads them.
        .layer(sessions)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
}

#[derive(Deserialize)]
struct MethodOverride {
    #[serde(rename = "_method")]
    method: Option<String>,
}

/// method_override
///
/// HTML forms can only send GET and POST. A POST carrying `?_method=PUT`,
/// `DELETE` or `PATCH` is rewritten to that method before routing; anything else
/// passes through untouched.
pub fn method_override(mut request: Request) -> Request {
    if request.method() != Method::POST {
        return request;
    }

    let Ok(Query(MethodOverride { method: Some(method) })) =
        Query::<MethodOverride>::try_from_uri(request.uri())
    else {
        return request;
    };

    let method = match method.to_ascii_uppercase().as_str() {
        "PUT" => Method::PUT,
        "DELETE" => Method::DELETE,
        "PATCH" => Method::PATCH,
        other => {
            tracing::debug!(method = other, "ignoring unsupported method override");
            return request;
        }
    };
    *request.method_mut() = method;
    request
}

/// The served application: the router behind the method override.
pub type App = MapRequest<Router, fn(Request) -> Request>;

/// create_app
///
/// The method override has to run before routing, so it wraps the router as a
/// service instead of being a router layer.
pub fn create_app<Store>(state: AppState, store: Store) -> App
where
    Store: SessionStore + Clone,
{
    let rewrite: fn(Request) -> Request = method_override;
    MapRequestLayer::new(rewrite).layer(create_router(state, store))
}

/// trace_span_logger
///
/// Builds the per-request span: method, uri and the `x-request-id` set above,
/// so every log line of one request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
