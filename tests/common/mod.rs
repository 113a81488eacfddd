//! Shared harness: drives the full application (method override, sessions,
//! router) with `oneshot`, carrying the session cookie like a browser would.
#![allow(dead_code)]

use std::sync::Arc;

use article_hub::{
    App, AppConfig, AppState, Argon2Credentials, MemoryRepository, create_app,
    credentials::CredentialState,
    models::{Article, ArticleDetail, ArticleInput, NewUser, User},
    repository::{Repository, RepositoryError, RepositoryState},
};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use serde_json::Value;
use tower::ServiceExt;
use tower_sessions::MemoryStore;
use uuid::Uuid;

pub const PASSPHRASE: &str = "X";
pub const PASSWORD: &str = "hunter2";

pub fn test_config() -> AppConfig {
    AppConfig {
        passphrases: vec![PASSPHRASE.to_string()],
        ..AppConfig::default()
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub location: Option<String>,
    pub body: Value,
    pub text: String,
}

impl TestResponse {
    pub fn location(&self) -> &str {
        self.location.as_deref().expect("response is not a redirect")
    }

    pub fn template(&self) -> &str {
        self.body["template"].as_str().unwrap_or_default()
    }

    pub fn data(&self) -> &Value {
        &self.body["data"]
    }

    pub fn flash_success(&self) -> Vec<String> {
        strings(&self.body["flash"]["success"])
    }

    pub fn flash_error(&self) -> Vec<String> {
        strings(&self.body["flash"]["error"])
    }

    /// The id at the end of a `/articles/{id}` style redirect.
    pub fn location_id(&self) -> Uuid {
        let last = self.location().rsplit('/').next().unwrap_or_default();
        Uuid::parse_str(last).expect("redirect does not end in an id")
    }
}

fn strings(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

// --- Mock Repository ---

/// FailingFavorites
///
/// Delegates to a shared in-memory store, except that every favorite operation
/// fails as if the database were down.
pub struct FailingFavorites(pub Arc<MemoryRepository>);

fn favorites_offline() -> RepositoryError {
    RepositoryError::Unavailable("favorites offline".to_string())
}

#[async_trait]
impl Repository for FailingFavorites {
    async fn create_user(&self, user: NewUser) -> Result<User, RepositoryError> {
        self.0.create_user(user).await
    }
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        self.0.get_user(id).await
    }
    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        self.0.get_user_by_username(username).await
    }
    async fn update_introduction(
        &self,
        id: Uuid,
        introduction: &str,
    ) -> Result<Option<User>, RepositoryError> {
        self.0.update_introduction(id, introduction).await
    }

    // --- Always failing ---
    async fn add_favorite(&self, _user_id: Uuid, _article_id: Uuid) -> Result<bool, RepositoryError> {
        Err(favorites_offline())
    }
    async fn favorite_ids(&self, _user_id: Uuid) -> Result<Option<Vec<Uuid>>, RepositoryError> {
        Err(favorites_offline())
    }
    async fn favorite_articles(&self, _user_id: Uuid) -> Result<Vec<Article>, RepositoryError> {
        Err(favorites_offline())
    }

    async fn list_articles(&self) -> Result<Vec<ArticleDetail>, RepositoryError> {
        self.0.list_articles().await
    }
    async fn articles_by_author(&self, author_id: Uuid) -> Result<Vec<Article>, RepositoryError> {
        self.0.articles_by_author(author_id).await
    }
    async fn get_article(&self, id: Uuid) -> Result<Option<Article>, RepositoryError> {
        self.0.get_article(id).await
    }
    async fn get_article_detail(&self, id: Uuid) -> Result<Option<ArticleDetail>, RepositoryError> {
        self.0.get_article_detail(id).await
    }
    async fn create_article(
        &self,
        author_id: Uuid,
        input: ArticleInput,
    ) -> Result<Article, RepositoryError> {
        self.0.create_article(author_id, input).await
    }
    async fn update_article(
        &self,
        id: Uuid,
        input: ArticleInput,
    ) -> Result<Option<Article>, RepositoryError> {
        self.0.update_article(id, input).await
    }
    async fn delete_article(&self, id: Uuid) -> Result<bool, RepositoryError> {
        self.0.delete_article(id).await
    }
}

/// One browser against one running application.
pub struct TestApp {
    app: App,
    pub repo: Arc<MemoryRepository>,
    cookie: Option<String>,
}

impl TestApp {
    pub fn new() -> Self {
        let repo = Arc::new(MemoryRepository::new());
        Self::build(repo.clone(), repo)
    }

    /// The application sees [`FailingFavorites`]; `repo` still reads the data.
    pub fn with_failing_favorites() -> Self {
        let repo = Arc::new(MemoryRepository::new());
        Self::build(Arc::new(FailingFavorites(repo.clone())), repo)
    }

    fn build(app_repo: RepositoryState, repo: Arc<MemoryRepository>) -> Self {
        // Cheap Argon2 cost keeps debug-build tests fast.
        let credentials =
            Arc::new(Argon2Credentials::with_cost(64, 1).unwrap()) as CredentialState;
        let state = AppState {
            repo: app_repo,
            credentials,
            config: test_config(),
        };

        Self {
            app: create_app(state, MemoryStore::default()),
            repo,
            cookie: None,
        }
    }

    /// A second browser (no cookie) against the same application and store.
    pub fn another_browser(&self) -> Self {
        Self {
            app: self.app.clone(),
            repo: self.repo.clone(),
            cookie: None,
        }
    }

    pub async fn request(&mut self, method: &str, uri: &str, form: Option<&str>) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = &self.cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let body = match form {
            Some(form) => {
                builder = builder.header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
                Body::from(form.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();

        for value in response.headers().get_all(header::SET_COOKIE) {
            let raw = value.to_str().unwrap();
            let pair = raw.split(';').next().unwrap_or_default().trim();
            if !pair.starts_with("session=") {
                continue;
            }
            if raw.contains("Max-Age=0") || pair == "session=" {
                self.cookie = None;
            } else {
                self.cookie = Some(pair.to_string());
            }
        }

        let status = response.status();
        let location = response
            .headers()
            .get(header::LOCATION)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8_lossy(&bytes).to_string();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        TestResponse {
            status,
            location,
            body,
            text,
        }
    }

    pub async fn get(&mut self, uri: &str) -> TestResponse {
        self.request("GET", uri, None).await
    }

    pub async fn post(&mut self, uri: &str, form: &str) -> TestResponse {
        self.request("POST", uri, Some(form)).await
    }

    pub async fn register(&mut self, username: &str) -> TestResponse {
        let form = format!(
            "email={username}%40example.com&username={username}&password={PASSWORD}&keyword={PASSPHRASE}"
        );
        self.post("/register", &form).await
    }

    pub async fn login(&mut self, username: &str) -> TestResponse {
        let form = format!("username={username}&password={PASSWORD}&keyword={PASSPHRASE}");
        self.post("/login", &form).await
    }

    /// Registers `username` in this browser and clears the welcome flash.
    pub async fn signed_in(username: &str) -> Self {
        let mut app = Self::new();
        app.register(username).await;
        app.get("/articles").await;
        app
    }

    /// Creates an article as the logged-in user and returns its id.
    pub async fn create_article(&mut self, title: &str, text: &str) -> Uuid {
        let response = self
            .post("/articles", &format!("title={title}&text={text}"))
            .await;
        assert_eq!(response.status, StatusCode::SEE_OTHER);
        self.repo
            .list_articles()
            .await
            .unwrap()
            .into_iter()
            .find(|a| a.title == title)
            .expect("article was not created")
            .id
    }

    pub async fn user_id(&self, username: &str) -> Uuid {
        self.repo
            .get_user_by_username(username)
            .await
            .unwrap()
            .expect("user does not exist")
            .id
    }
}
