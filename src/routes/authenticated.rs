use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Authenticated Router Module
///
/// Every route here is wrapped by the authentication layer installed in
/// `create_router`, so an anonymous request is redirected to `/login` before any
/// handler runs. Ownership checks (article author, profile owner) are guards run
/// inside the handlers that mutate.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // --- Account ---
        .route("/logout", get(handlers::logout))
        .route("/aboutus", get(handlers::about))
        // GET /profile/{id}
        // Remembers its own URL so article flows started here can return to it.
        .route("/profile/{id}", get(handlers::show_profile))
        // GET/POST /updateIntroduction/{id}
        // Owner-only on submission.
        .route(
            "/updateIntroduction/{id}",
            get(handlers::introduction_form).post(handlers::update_introduction),
        )
        // GET /favoriteArticle/{id}
        // Idempotent add to the viewer's favorites.
        .route("/favoriteArticle/{id}", get(handlers::favorite_article))
        // --- Articles ---
        // GET /articles also clears any pending return-to-profile link.
        .route(
            "/articles",
            get(handlers::list_articles).post(handlers::create_article),
        )
        .route("/articles/new", get(handlers::new_article))
        // PUT/DELETE arrive from HTML forms as POST with `?_method=`.
        .route(
            "/articles/{id}",
            get(handlers::show_article)
                .put(handlers::update_article)
                .delete(handlers::delete_article),
        )
        .route("/articles/{id}/edit", get(handlers::edit_article))
}

