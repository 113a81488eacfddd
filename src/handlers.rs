use axum::{
    Form,
    extract::{OriginalUri, Path, State, rejection::FormRejection},
    response::Response,
};
use uuid::Uuid;

use crate::{
    AppState,
    auth::{AuthUser, FavoriteSnapshot},
    credentials,
    error::AppError,
    guards::{self, Guard, GuardContext, LOGIN_PATH},
    models::{
        ArticleForm, ArticleFormView, ArticleIndexView, ArticleShowView, IntroductionForm,
        IntroductionFormView, LoginForm, NewUser, ProfileView, RegisterForm,
    },
    passphrase,
    render::{recover, redirect_with, render},
    repository::RepositoryError,
    session::{FlashKind, SessionContext},
};

const ARTICLES_PATH: &str = "/articles";
const REGISTER_PATH: &str = "/register";
const INVALID_LOGIN: &str = "Password or username is incorrect.";

fn article_path(id: Uuid) -> String {
    format!("/articles/{id}")
}

fn profile_path(id: Uuid) -> String {
    format!("/profile/{id}")
}

/// Sends recoverable failures of `result` back to `fallback` as an error flash.
async fn or_recover(
    session: &SessionContext,
    result: Result<Response, AppError>,
    fallback: &str,
) -> Result<Response, AppError> {
    match result {
        Ok(response) => Ok(response),
        Err(err) => recover(session, err, fallback).await,
    }
}

/// Unwraps a form body. A body that does not deserialize (duplicate field,
/// wrong content type) is a validation failure like any other bad input.
fn read_form<T>(form: Result<Form<T>, FormRejection>) -> Result<T, AppError> {
    match form {
        Ok(Form(form)) => Ok(form),
        Err(rejection) => {
            tracing::debug!(error = %rejection, "form body rejected");
            Err(AppError::Validation(rejection.body_text()))
        }
    }
}

// --- Public Pages ---

/// home
///
/// [Public Route] Landing page. Shows the viewer when one is logged in.
#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Home page envelope"))
)]
pub async fn home(user: Option<AuthUser>, session: SessionContext) -> Result<Response, AppError> {
    render(&session, user.as_ref().map(AuthUser::user), "home", ()).await
}

#[utoipa::path(
    get,
    path = "/register",
    responses((status = 200, description = "Registration form envelope"))
)]
pub async fn register_form(
    user: Option<AuthUser>,
    session: SessionContext,
) -> Result<Response, AppError> {
    render(&session, user.as_ref().map(AuthUser::user), "users/register", ()).await
}

/// register
///
/// [Public Route] Creates an account and logs it in straight away.
///
/// The passphrase is checked before anything else, so a wrong keyword never
/// costs a password hash. Every failure lands back on the form with a flash.
#[utoipa::path(
    post,
    path = "/register",
    request_body(content = RegisterForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Registered and logged in; redirect to /articles. Rejected; redirect back to /register with a flash"),
    )
)]
pub async fn register(
    State(state): State<AppState>,
    session: SessionContext,
    form: Result<Form<RegisterForm>, FormRejection>,
) -> Result<Response, AppError> {
    let result = match read_form(form) {
        Ok(form) => register_user(&state, &session, form).await,
        Err(err) => Err(err),
    };
    or_recover(&session, result, REGISTER_PATH).await
}

async fn register_user(
    state: &AppState,
    session: &SessionContext,
    form: RegisterForm,
) -> Result<Response, AppError> {
    if let Some(err) = passphrase::check(&state.config.passphrases, form.keyword.as_deref()) {
        return Err(err.into());
    }

    let username = form.username.trim();
    let email = form.email.trim();
    if username.is_empty() || email.is_empty() || form.password.is_empty() {
        return Err(AppError::Validation(
            "Username, email and password are required.".to_string(),
        ));
    }

    if state.repo.get_user_by_username(username).await?.is_some() {
        return Err(AppError::Validation(
            RepositoryError::UniqueViolation("username").to_string(),
        ));
    }

    let password_hash = credentials::hash_password(&state.credentials, &form.password).await?;
    let user = state
        .repo
        .create_user(NewUser {
            username: username.to_string(),
            email: email.to_string(),
            password_hash,
        })
        .await
        .map_err(|err| match err {
            // Lost a race with a concurrent registration, or the email is taken.
            RepositoryError::UniqueViolation(_) => AppError::Validation(err.to_string()),
            other => other.into(),
        })?;

    session
        .log_in(state.credentials.serialize_identity(&user))
        .await?;
    tracing::info!(user_id = %user.id, "user registered");

    redirect_with(session, FlashKind::Success, "Welcome!", ARTICLES_PATH).await
}

#[utoipa::path(
    get,
    path = "/login",
    responses((status = 200, description = "Login form envelope"))
)]
pub async fn login_form(
    user: Option<AuthUser>,
    session: SessionContext,
) -> Result<Response, AppError> {
    render(&session, user.as_ref().map(AuthUser::user), "users/login", ()).await
}

/// login
///
/// [Public Route] Passphrase guard, then credential check. On success the
/// session id is cycled and the user is sent to the page that forced the login.
#[utoipa::path(
    post,
    path = "/login",
    request_body(content = LoginForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Logged in; redirect to the remembered page or /articles. Rejected; redirect back to /login with a flash"),
    )
)]
pub async fn login(
    State(state): State<AppState>,
    session: SessionContext,
    form: Result<Form<LoginForm>, FormRejection>,
) -> Result<Response, AppError> {
    let form = read_form(form);
    // An unreadable body carries no keyword and fails the passphrase guard.
    let keyword = form.as_ref().ok().and_then(|form| form.keyword.clone());
    let ctx = GuardContext::new(&state, &session, None);
    if let Some(response) = guards::enforce(&[Guard::Passphrase(keyword)], &ctx, LOGIN_PATH).await? {
        return Ok(response);
    }

    let result = match form {
        Ok(form) => authenticate(&state, &session, &form).await,
        Err(err) => Err(err),
    };
    or_recover(&session, result, LOGIN_PATH).await
}

async fn authenticate(
    state: &AppState,
    session: &SessionContext,
    form: &LoginForm,
) -> Result<Response, AppError> {
    let user = state.repo.get_user_by_username(form.username.trim()).await?;
    let verified = match &user {
        Some(user) => {
            credentials::verify_password(&state.credentials, &form.password, &user.password_hash)
                .await?
        }
        None => false,
    };

    let Some(user) = user.filter(|_| verified) else {
        tracing::info!("login rejected");
        return Err(AppError::Validation(INVALID_LOGIN.to_string()));
    };

    let return_to = session.take_return_to().await?;
    session
        .log_in(state.credentials.serialize_identity(&user))
        .await?;
    tracing::info!(user_id = %user.id, "user logged in");

    let to = return_to.as_deref().unwrap_or(ARTICLES_PATH);
    redirect_with(session, FlashKind::Success, "Welcome back!", to).await
}

// --- Account & Profile ---

#[utoipa::path(
    get,
    path = "/logout",
    responses((status = 303, description = "Logged out; redirect to /articles"))
)]
pub async fn logout(
    AuthUser(user): AuthUser,
    session: SessionContext,
) -> Result<Response, AppError> {
    session.log_out().await?;
    tracing::info!(user_id = %user.id, "user logged out");
    redirect_with(&session, FlashKind::Success, "Logged out.", ARTICLES_PATH).await
}

#[utoipa::path(
    get,
    path = "/aboutus",
    responses((status = 200, description = "About page envelope"))
)]
pub async fn about(AuthUser(user): AuthUser, session: SessionContext) -> Result<Response, AppError> {
    render(&session, Some(&user), "aboutus/aboutus", ()).await
}

/// show_profile
///
/// [Authenticated Route] A user with their articles and favorites. The URL of
/// this page is remembered so article flows started here can come back to it.
#[utoipa::path(
    get,
    path = "/profile/{id}",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "Profile page envelope", body = ProfileView),
        (status = 303, description = "Unknown user; redirect to /articles"),
    )
)]
pub async fn show_profile(
    AuthUser(viewer): AuthUser,
    State(state): State<AppState>,
    session: SessionContext,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let view = match load_profile(&state, id).await {
        Ok(view) => view,
        Err(err) => return recover(&session, err, ARTICLES_PATH).await,
    };

    let url = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    session.set_return_to_profile(url).await?;

    render(&session, Some(&viewer), "users/profile", view).await
}

async fn load_profile(state: &AppState, id: Uuid) -> Result<ProfileView, AppError> {
    let user = state
        .repo
        .get_user(id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found.".to_string()))?;
    let articles = state.repo.articles_by_author(id).await?;
    let favorite_articles = state.repo.favorite_articles(id).await?;

    Ok(ProfileView {
        user,
        articles,
        favorite_articles,
    })
}

#[utoipa::path(
    get,
    path = "/updateIntroduction/{id}",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "Introduction form envelope", body = IntroductionFormView),
        (status = 303, description = "Unknown user; redirect to the profile"),
    )
)]
pub async fn introduction_form(
    AuthUser(viewer): AuthUser,
    State(state): State<AppState>,
    session: SessionContext,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let user = match state.repo.get_user(id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            let err = AppError::NotFound("User not found.".to_string());
            return recover(&session, err, &profile_path(id)).await;
        }
        Err(err) => return recover(&session, err.into(), &profile_path(id)).await,
    };

    render(
        &session,
        Some(&viewer),
        "users/updateIntroduction",
        IntroductionFormView { user },
    )
    .await
}

/// update_introduction
///
/// [Authenticated Route] Owner-only. `introduction` is the only writable field.
#[utoipa::path(
    post,
    path = "/updateIntroduction/{id}",
    params(("id" = Uuid, Path, description = "User id")),
    request_body(content = IntroductionForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Updated; redirect to the profile. Not the owner; redirect to the profile with a flash"),
    )
)]
pub async fn update_introduction(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    session: SessionContext,
    Path(id): Path<Uuid>,
    form: Result<Form<IntroductionForm>, FormRejection>,
) -> Result<Response, AppError> {
    let ctx = GuardContext::new(&state, &session, Some(&user));
    if let Some(response) = guards::enforce(&[Guard::ProfileOwner(id)], &ctx, ARTICLES_PATH).await?
    {
        return Ok(response);
    }

    let form = match read_form(form) {
        Ok(form) => form,
        Err(err) => return recover(&session, err, &format!("/updateIntroduction/{id}")).await,
    };
    let result = match state.repo.update_introduction(id, &form.introduction).await {
        Ok(Some(_)) => {
            redirect_with(
                &session,
                FlashKind::Success,
                "Updated your introduction!",
                &profile_path(id),
            )
            .await
        }
        Ok(None) => Err(AppError::NotFound("User not found.".to_string())),
        Err(err) => Err(err.into()),
    };
    or_recover(&session, result, ARTICLES_PATH).await
}

/// favorite_article
///
/// [Authenticated Route] Adds the article to the viewer's favorites. Adding an
/// article twice is a no-op. Every outcome ends on the article page.
#[utoipa::path(
    get,
    path = "/favoriteArticle/{id}",
    params(("id" = Uuid, Path, description = "Article id")),
    responses((status = 303, description = "Redirect to the article with a flash"))
)]
pub async fn favorite_article(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    session: SessionContext,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let to = article_path(id);
    match state.repo.add_favorite(user.id, id).await {
        Ok(true) => {
            redirect_with(
                &session,
                FlashKind::Success,
                "Added the article to your favorites!",
                &to,
            )
            .await
        }
        Ok(false) => redirect_with(&session, FlashKind::Error, "User not found.", &to).await,
        Err(e) => {
            tracing::error!(error = ?e, user_id = %user.id, article_id = %id, "failed to add favorite");
            redirect_with(
                &session,
                FlashKind::Error,
                "Something went wrong while adding the favorite.",
                &to,
            )
            .await
        }
    }
}

// --- Articles ---

/// list_articles
///
/// [Authenticated Route] Every article in creation order. Visiting the index ends any
/// flow that was started from a profile page.
#[utoipa::path(
    get,
    path = "/articles",
    responses((status = 200, description = "Article index envelope", body = ArticleIndexView))
)]
pub async fn list_articles(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    session: SessionContext,
) -> Result<Response, AppError> {
    let ctx = GuardContext::new(&state, &session, Some(&user));
    if let Some(response) =
        guards::enforce(&[Guard::ResetReturnToProfile], &ctx, ARTICLES_PATH).await?
    {
        return Ok(response);
    }

    // No recovery here: the fallback page is this one.
    let articles = state.repo.list_articles().await?;
    render(
        &session,
        Some(&user),
        "articles/index",
        ArticleIndexView { articles },
    )
    .await
}

#[utoipa::path(
    get,
    path = "/articles/new",
    responses((status = 200, description = "New article form envelope", body = ArticleFormView))
)]
pub async fn new_article(
    AuthUser(user): AuthUser,
    session: SessionContext,
) -> Result<Response, AppError> {
    let view = ArticleFormView {
        article: None,
        profile_redirect_url: session.peek_return_to_profile().await?,
    };
    render(&session, Some(&user), "articles/new", view).await
}

/// create_article
///
/// [Authenticated Route] The viewer becomes the author. Goes back to the
/// profile the flow started from, otherwise to the new article.
#[utoipa::path(
    post,
    path = "/articles",
    request_body(content = ArticleForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Created; redirect to the profile or the article. Invalid form; redirect to /articles/new with a flash"),
    )
)]
pub async fn create_article(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    session: SessionContext,
    form: Result<Form<ArticleForm>, FormRejection>,
) -> Result<Response, AppError> {
    let result = match read_form(form) {
        Ok(form) => insert_article(&state, &session, user.id, form).await,
        Err(err) => Err(err),
    };
    or_recover(&session, result, "/articles/new").await
}

async fn insert_article(
    state: &AppState,
    session: &SessionContext,
    author_id: Uuid,
    form: ArticleForm,
) -> Result<Response, AppError> {
    let input = form.validate()?;
    let article = state.repo.create_article(author_id, input).await?;
    tracing::info!(article_id = %article.id, %author_id, "article created");

    let to = session
        .take_return_to_profile()
        .await?
        .unwrap_or_else(|| article_path(article.id));
    redirect_with(session, FlashKind::Success, "Created a new article!", &to).await
}

/// show_article
///
/// [Authenticated Route] Article detail with its author. `check_fav` comes from
/// the best-effort favorite snapshot taken before the page is built.
#[utoipa::path(
    get,
    path = "/articles/{id}",
    params(("id" = Uuid, Path, description = "Article id")),
    responses(
        (status = 200, description = "Article page envelope", body = ArticleShowView),
        (status = 303, description = "Unknown article; redirect to /articles"),
    )
)]
pub async fn show_article(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    session: SessionContext,
    favorites: FavoriteSnapshot,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let article = match state.repo.get_article_detail(id).await {
        Ok(Some(article)) => article,
        Ok(None) => {
            let err = AppError::NotFound("Article not found.".to_string());
            return recover(&session, err, ARTICLES_PATH).await;
        }
        Err(err) => return recover(&session, err.into(), ARTICLES_PATH).await,
    };

    let view = ArticleShowView {
        check_fav: favorites.contains(article.id),
        profile_redirect_url: session.peek_return_to_profile().await?,
        article,
    };
    render(&session, Some(&user), "articles/show", view).await
}

#[utoipa::path(
    get,
    path = "/articles/{id}/edit",
    params(("id" = Uuid, Path, description = "Article id")),
    responses(
        (status = 200, description = "Edit form envelope", body = ArticleFormView),
        (status = 303, description = "Not the author; redirect to the article"),
    )
)]
pub async fn edit_article(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    session: SessionContext,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let ctx = GuardContext::new(&state, &session, Some(&user));
    if let Some(response) = guards::enforce(&[Guard::ArticleAuthor(id)], &ctx, ARTICLES_PATH).await?
    {
        return Ok(response);
    }

    let article = match state.repo.get_article(id).await {
        Ok(Some(article)) => article,
        // Deleted between the guard and here.
        Ok(None) => {
            let err = AppError::NotFound("Article not found.".to_string());
            return recover(&session, err, ARTICLES_PATH).await;
        }
        Err(err) => return recover(&session, err.into(), ARTICLES_PATH).await,
    };

    let view = ArticleFormView {
        article: Some(article),
        profile_redirect_url: session.peek_return_to_profile().await?,
    };
    render(&session, Some(&user), "articles/edit", view).await
}

/// update_article
///
/// [Authenticated Route] Author-only. The authorship check runs before the body
/// is even read, so a non-author never learns whether their input was valid.
#[utoipa::path(
    put,
    path = "/articles/{id}",
    params(("id" = Uuid, Path, description = "Article id")),
    request_body(content = ArticleForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Updated; redirect to the profile or the article. Invalid form; redirect to the edit form with a flash. Not the author; redirect to the article"),
    )
)]
pub async fn update_article(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    session: SessionContext,
    Path(id): Path<Uuid>,
    form: Result<Form<ArticleForm>, FormRejection>,
) -> Result<Response, AppError> {
    let ctx = GuardContext::new(&state, &session, Some(&user));
    if let Some(response) = guards::enforce(&[Guard::ArticleAuthor(id)], &ctx, ARTICLES_PATH).await?
    {
        return Ok(response);
    }

    let result = match read_form(form) {
        Ok(form) => save_article(&state, &session, id, form).await,
        Err(err) => Err(err),
    };
    or_recover(&session, result, &format!("/articles/{id}/edit")).await
}

async fn save_article(
    state: &AppState,
    session: &SessionContext,
    id: Uuid,
    form: ArticleForm,
) -> Result<Response, AppError> {
    let input = form.validate()?;
    if state.repo.update_article(id, input).await?.is_none() {
        return Err(AppError::NotFound("Article not found.".to_string()));
    }
    tracing::info!(article_id = %id, "article updated");

    let to = session
        .take_return_to_profile()
        .await?
        .unwrap_or_else(|| article_path(id));
    redirect_with(session, FlashKind::Success, "Updated the article!", &to).await
}

#[utoipa::path(
    delete,
    path = "/articles/{id}",
    params(("id" = Uuid, Path, description = "Article id")),
    responses(
        (status = 303, description = "Deleted; redirect to the profile or /articles. Not the author; redirect to the article"),
    )
)]
pub async fn delete_article(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    session: SessionContext,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let ctx = GuardContext::new(&state, &session, Some(&user));
    if let Some(response) = guards::enforce(&[Guard::ArticleAuthor(id)], &ctx, ARTICLES_PATH).await?
    {
        return Ok(response);
    }

    let result = remove_article(&state, &session, id).await;
    or_recover(&session, result, ARTICLES_PATH).await
}

async fn remove_article(
    state: &AppState,
    session: &SessionContext,
    id: Uuid,
) -> Result<Response, AppError> {
    if !state.repo.delete_article(id).await? {
        return Err(AppError::NotFound("Article not found.".to_string()));
    }
    tracing::info!(article_id = %id, "article deleted");

    let to = session
        .take_return_to_profile()
        .await?
        .unwrap_or_else(|| ARTICLES_PATH.to_string());
    redirect_with(session, FlashKind::Success, "Deleted the article!", &to).await
}
