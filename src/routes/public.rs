use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Public Router Module
///
/// Endpoints open to anonymous visitors. Pages here still show the viewer when a
/// session identity is present, through `Option<AuthUser>`.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness check for load balancers; touches neither the session nor the store.
        .route("/health", get(|| async { "ok" }))
        // GET /
        .route("/", get(handlers::home))
        // GET/POST /register
        // The submission requires a valid passphrase and logs the new account in.
        .route(
            "/register",
            get(handlers::register_form).post(handlers::register),
        )
        // GET/POST /login
        // The submission runs the passphrase guard before verifying credentials.
        .route("/login", get(handlers::login_form).post(handlers::login))
}
