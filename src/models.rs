use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::AppError;

/// Introduction every new profile starts with.
pub const DEFAULT_INTRODUCTION: &str = "Hello Neighbor";

// --- Core Application Schemas (Mapped to Database) ---

/// User
///
/// A registered account. The password hash is owned by the credential service and
/// never leaves the server: it is skipped when the user is serialized into a view.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct User {
    pub id: Uuid,
    // Unique login handle.
    pub username: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub introduction: String,
}

/// NewUser
///
/// Insert payload produced by the registration flow after hashing.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// Article
///
/// Row from the `articles` table. `author_id` is fixed at creation.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Article {
    pub id: Uuid,
    pub title: String,
    pub text: String,
    pub author_id: Uuid,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// Author
///
/// The populated side of `Article.author`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[ts(export)]
pub struct Author {
    pub id: Uuid,
    pub username: String,
}

/// ArticleDetail
///
/// An article joined with its author, as shown on the index and detail pages.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct ArticleDetail {
    pub id: Uuid,
    pub title: String,
    pub text: String,
    pub author: Author,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// Flat join row read by the Postgres repository before nesting the author.
#[derive(Debug, FromRow)]
pub(crate) struct ArticleDetailRow {
    pub id: Uuid,
    pub title: String,
    pub text: String,
    pub author_id: Uuid,
    pub author_username: String,
    pub created_at: DateTime<Utc>,
}

impl From<ArticleDetailRow> for ArticleDetail {
    fn from(row: ArticleDetailRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            text: row.text,
            author: Author {
                id: row.author_id,
                username: row.author_username,
            },
            created_at: row.created_at,
        }
    }
}

// --- Request Payloads (Form Schemas) ---

/// ArticleInput
///
/// A validated article body. Only obtainable through [`ArticleForm::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleInput {
    pub title: String,
    pub text: String,
}

/// ArticleForm
///
/// Raw submission for `POST /articles` and `PUT /articles/{id}`. Any field other
/// than `title` and `text` lands in `extra` so it can be reported, not silently dropped.
#[derive(Debug, Clone, Deserialize, ToSchema, Default)]
pub struct ArticleForm {
    pub title: Option<String>,
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl ArticleForm {
    /// validate
    ///
    /// Checks presence of both fields and rejects unknown ones. Every problem is
    /// reported; the messages are joined with `,` into one `Validation` error.
    pub fn validate(self) -> Result<ArticleInput, AppError> {
        let mut problems = Vec::new();

        let title = required_field("title", self.title, &mut problems);
        let text = required_field("text", self.text, &mut problems);

        for key in self.extra.keys() {
            // The method override travels in the query string, but tolerate it in the body too.
            if key != "_method" {
                problems.push(format!("\"{key}\" is not allowed"));
            }
        }

        match (title, text) {
            (Some(title), Some(text)) if problems.is_empty() => Ok(ArticleInput { title, text }),
            _ => Err(AppError::Validation(problems.join(","))),
        }
    }
}

fn required_field(name: &str, value: Option<String>, problems: &mut Vec<String>) -> Option<String> {
    match value {
        None => {
            problems.push(format!("\"{name}\" is required"));
            None
        }
        Some(v) if v.trim().is_empty() => {
            problems.push(format!("\"{name}\" is not allowed to be empty"));
            None
        }
        Some(v) => Some(v),
    }
}

/// RegisterForm
///
/// Submission for `POST /register`. Missing fields deserialize as empty so the
/// handler can answer with a flash message instead of a form rejection.
#[derive(Debug, Clone, Deserialize, ToSchema, Default)]
pub struct RegisterForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub keyword: Option<String>,
}

/// LoginForm
///
/// Submission for `POST /login`.
#[derive(Debug, Clone, Deserialize, ToSchema, Default)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub keyword: Option<String>,
}

/// IntroductionForm
///
/// Submission for `POST /updateIntroduction/{id}`. Only the introduction is writable.
#[derive(Debug, Clone, Deserialize, ToSchema, Default)]
pub struct IntroductionForm {
    #[serde(default)]
    pub introduction: String,
}

// --- View Models (Rendered Page Data) ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct ArticleIndexView {
    pub articles: Vec<ArticleDetail>,
}

/// ArticleShowView
///
/// `check_fav` tells the template whether the viewer already favorited this article.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct ArticleShowView {
    pub article: ArticleDetail,
    pub profile_redirect_url: Option<String>,
    pub check_fav: bool,
}

/// ArticleFormView
///
/// Shared by the "new" and "edit" forms; `article` is `None` on the new form.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct ArticleFormView {
    pub article: Option<Article>,
    pub profile_redirect_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct ProfileView {
    pub user: User,
    pub articles: Vec<Article>,
    pub favorite_articles: Vec<Article>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct IntroductionFormView {
    pub user: User,
}

/// ErrorView
///
/// Payload of the generic error page.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct ErrorView {
    pub status: u16,
    pub message: String,
}
