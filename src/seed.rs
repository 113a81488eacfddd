//! Demo data for a fresh installation.
//!
//! Seeding is idempotent per author: the demo author is created on the first
//! run, and each run replaces that author's articles with the seed set. Other
//! users' articles are never touched.

use uuid::Uuid;

use crate::{
    credentials::{self, CredentialState},
    error::AppError,
    models::{ArticleForm, NewUser},
    repository::Repository,
};

pub const SEED_USERNAME: &str = "archivist";
pub const SEED_EMAIL: &str = "archivist@example.com";

/// (title, text) of every seeded article, in creation order.
pub const SEED_ARTICLES: [(&str, &str); 3] = [
    (
        "Welcome to the archive",
        "This site collects short articles from its members. Register with the passphrase you were given, then write your own.",
    ),
    (
        "Keeping a profile",
        "Every member has a profile page listing their articles and favorites. The introduction at the top is yours to edit.",
    ),
    (
        "Favorites",
        "Open any article and add it to your favorites. It shows up on your profile from then on.",
    ),
];

/// SeedReport
#[derive(Debug, Clone, PartialEq)]
pub struct SeedReport {
    pub author_id: Uuid,
    pub author_created: bool,
    pub removed: usize,
    pub created: usize,
}

/// seed_demo
///
/// Ensures the demo author exists (with `password` on first creation), removes
/// the author's previous articles and writes [`SEED_ARTICLES`] again.
pub async fn seed_demo(
    repo: &dyn Repository,
    credentials: &CredentialState,
    password: &str,
) -> Result<SeedReport, AppError> {
    let (author, author_created) = match repo.get_user_by_username(SEED_USERNAME).await? {
        Some(user) => (user, false),
        None => {
            let password_hash = credentials::hash_password(credentials, password).await?;
            let user = repo
                .create_user(NewUser {
                    username: SEED_USERNAME.to_string(),
                    email: SEED_EMAIL.to_string(),
                    password_hash,
                })
                .await?;
            tracing::info!(user_id = %user.id, "seed author created");
            (user, true)
        }
    };

    let mut removed = 0;
    for article in repo.articles_by_author(author.id).await? {
        if repo.delete_article(article.id).await? {
            removed += 1;
        }
    }

    for (title, text) in SEED_ARTICLES {
        let input = ArticleForm {
            title: Some(title.to_string()),
            text: Some(text.to_string()),
            ..ArticleForm::default()
        }
        .validate()?;
        repo.create_article(author.id, input).await?;
    }
    tracing::info!(removed, created = SEED_ARTICLES.len(), "seed articles written");

    Ok(SeedReport {
        author_id: author.id,
        author_created,
        removed,
        created: SEED_ARTICLES.len(),
    })
}
