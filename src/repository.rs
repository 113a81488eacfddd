use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{
    Article, ArticleDetail, ArticleDetailRow, ArticleInput, Author, DEFAULT_INTRODUCTION, NewUser,
    User,
};

/// RepositoryError
///
/// Persistence failures. Unique-key collisions are split out so registration can
/// explain them to the user.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("A user with the given {0} is already registered.")]
    UniqueViolation(&'static str),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Repository Trait
///
/// Abstract contract for all persistence operations. Handlers and guards only see
/// this trait, so the Postgres implementation can be swapped for the in-process
/// one in tests.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---
    async fn create_user(&self, user: NewUser) -> Result<User, RepositoryError>;
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, RepositoryError>;
    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError>;
    // Returns the updated user, or `None` if no such user exists.
    async fn update_introduction(
        &self,
        id: Uuid,
        introduction: &str,
    ) -> Result<Option<User>, RepositoryError>;

    // --- Favorites ---
    // Atomic add-if-absent. `Ok(false)` means the user does not exist.
    async fn add_favorite(&self, user_id: Uuid, article_id: Uuid) -> Result<bool, RepositoryError>;
    // Current favorite ids, or `None` if the user does not exist.
    async fn favorite_ids(&self, user_id: Uuid) -> Result<Option<Vec<Uuid>>, RepositoryError>;
    // Favorites populated into full article records.
    async fn favorite_articles(&self, user_id: Uuid) -> Result<Vec<Article>, RepositoryError>;

    // --- Articles ---
    async fn list_articles(&self) -> Result<Vec<ArticleDetail>, RepositoryError>;
    async fn articles_by_author(&self, author_id: Uuid) -> Result<Vec<Article>, RepositoryError>;
    async fn get_article(&self, id: Uuid) -> Result<Option<Article>, RepositoryError>;
    async fn get_article_detail(&self, id: Uuid) -> Result<Option<ArticleDetail>, RepositoryError>;
    async fn create_article(
        &self,
        author_id: Uuid,
        input: ArticleInput,
    ) -> Result<Article, RepositoryError>;
    async fn update_article(
        &self,
        id: Uuid,
        input: ArticleInput,
    ) -> Result<Option<Article>, RepositoryError>;
    // True if a row was removed.
    async fn delete_article(&self, id: Uuid) -> Result<bool, RepositoryError>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

/// PostgresRepository
///
/// The `Repository` implementation backed by PostgreSQL. Schema lives in `migrations/`.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Maps Postgres `23505` (unique_violation) to [`RepositoryError::UniqueViolation`],
/// naming the column from the violated constraint.
fn map_unique_violation(err: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            let field = match db_err.constraint() {
                Some(c) if c.contains("email") => "email",
                _ => "username",
            };
            return RepositoryError::UniqueViolation(field);
        }
    }
    RepositoryError::Database(err)
}

const ARTICLE_DETAIL_SELECT: &str = r#"
    SELECT a.id, a.title, a.text, a.author_id, u.username AS author_username, a.created_at
    FROM articles a
    JOIN users u ON u.id = a.author_id
"#;

#[async_trait]
impl Repository for PostgresRepository {
    async fn create_user(&self, user: NewUser) -> Result<User, RepositoryError> {
        sqlx::query_as::<_, User>(
            r#"INSERT INTO users (id, username, email, password_hash, introduction)
               VALUES ($1, $2, $3, $4, $5)
               RETURNING id, username, email, password_hash, introduction"#,
        )
        .bind(Uuid::new_v4())
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(DEFAULT_INTRODUCTION)
        .fetch_one(&self.pool)
        .await
        .map_err(map_unique_violation)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, email, password_hash, introduction FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, email, password_hash, introduction FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn update_introduction(
        &self,
        id: Uuid,
        introduction: &str,
    ) -> Result<Option<User>, RepositoryError> {
        let user = sqlx::query_as::<_, User>(
            r#"UPDATE users SET introduction = $2 WHERE id = $1
               RETURNING id, username, email, password_hash, introduction"#,
        )
        .bind(id)
        .bind(introduction)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    /// add_favorite
    ///
    /// Single statement: the insert only happens if the user row exists, and the
    /// composite primary key plus `ON CONFLICT DO NOTHING` keeps it idempotent.
    async fn add_favorite(&self, user_id: Uuid, article_id: Uuid) -> Result<bool, RepositoryError> {
        let user_found: bool = sqlx::query_scalar(
            r#"WITH target AS (SELECT id FROM users WHERE id = $1),
                    inserted AS (
                        INSERT INTO favorite_articles (user_id, article_id)
                        SELECT id, $2 FROM target
                        ON CONFLICT DO NOTHING
                    )
               SELECT EXISTS (SELECT 1 FROM target)"#,
        )
        .bind(user_id)
        .bind(article_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(user_found)
    }

    async fn favorite_ids(&self, user_id: Uuid) -> Result<Option<Vec<Uuid>>, RepositoryError> {
        // No row when the user is missing; an empty array when they have no favorites.
        let ids: Option<Vec<Uuid>> = sqlx::query_scalar(
            r#"SELECT ARRAY(
                   SELECT f.article_id FROM favorite_articles f
                   WHERE f.user_id = u.id ORDER BY f.created_at
               )
               FROM users u WHERE u.id = $1"#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn favorite_articles(&self, user_id: Uuid) -> Result<Vec<Article>, RepositoryError> {
        let articles = sqlx::query_as::<_, Article>(
            r#"SELECT a.id, a.title, a.text, a.author_id, a.created_at
               FROM favorite_articles f
               JOIN articles a ON a.id = f.article_id
               WHERE f.user_id = $1
               ORDER BY f.created_at"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(articles)
    }

    async fn list_articles(&self) -> Result<Vec<ArticleDetail>, RepositoryError> {
        let rows = sqlx::query_as::<_, ArticleDetailRow>(&format!(
            "{ARTICLE_DETAIL_SELECT} ORDER BY a.created_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ArticleDetail::from).collect())
    }

    async fn articles_by_author(&self, author_id: Uuid) -> Result<Vec<Article>, RepositoryError> {
        let articles = sqlx::query_as::<_, Article>(
            r#"SELECT id, title, text, author_id, created_at
               FROM articles WHERE author_id = $1 ORDER BY created_at"#,
        )
        .bind(author_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(articles)
    }

    async fn get_article(&self, id: Uuid) -> Result<Option<Article>, RepositoryError> {
        let article = sqlx::query_as::<_, Article>(
            "SELECT id, title, text, author_id, created_at FROM articles WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(article)
    }

    async fn get_article_detail(&self, id: Uuid) -> Result<Option<ArticleDetail>, RepositoryError> {
        let row = sqlx::query_as::<_, ArticleDetailRow>(&format!(
            "{ARTICLE_DETAIL_SELECT} WHERE a.id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ArticleDetail::from))
    }

    async fn create_article(
        &self,
        author_id: Uuid,
        input: ArticleInput,
    ) -> Result<Article, RepositoryError> {
        let article = sqlx::query_as::<_, Article>(
            r#"INSERT INTO articles (id, title, text, author_id)
               VALUES ($1, $2, $3, $4)
               RETURNING id, title, text, author_id, created_at"#,
        )
        .bind(Uuid::new_v4())
        .bind(&input.title)
        .bind(&input.text)
        .bind(author_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(article)
    }

    async fn update_article(
        &self,
        id: Uuid,
        input: ArticleInput,
    ) -> Result<Option<Article>, RepositoryError> {
        let article = sqlx::query_as::<_, Article>(
            r#"UPDATE articles SET title = $2, text = $3 WHERE id = $1
               RETURNING id, title, text, author_id, created_at"#,
        )
        .bind(id)
        .bind(&input.title)
        .bind(&input.text)
        .fetch_optional(&self.pool)
        .await?;
        Ok(article)
    }

    async fn delete_article(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM articles WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// --- In-Process Implementation ---

#[derive(Default)]
struct MemoryData {
    users: Vec<User>,
    articles: Vec<Article>,
    // Insertion-ordered favorite ids per user.
    favorites: HashMap<Uuid, Vec<Uuid>>,
}

/// MemoryRepository
///
/// In-process implementation used by the test suite and for running the server
/// without Postgres (`APP_STORE=memory`). Every operation holds the lock for its
/// whole read-check-write, so `add_favorite` is atomic here as well.
#[derive(Default)]
pub struct MemoryRepository {
    data: RwLock<MemoryData>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryData>, RepositoryError> {
        self.data
            .read()
            .map_err(|_| RepositoryError::Unavailable("memory store poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemoryData>, RepositoryError> {
        self.data
            .write()
            .map_err(|_| RepositoryError::Unavailable("memory store poisoned".to_string()))
    }
}

fn detail(data: &MemoryData, article: &Article) -> ArticleDetail {
    let username = data
        .users
        .iter()
        .find(|u| u.id == article.author_id)
        .map(|u| u.username.clone())
        .unwrap_or_default();

    ArticleDetail {
        id: article.id,
        title: article.title.clone(),
        text: article.text.clone(),
        author: Author {
            id: article.author_id,
            username,
        },
        created_at: article.created_at,
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create_user(&self, user: NewUser) -> Result<User, RepositoryError> {
        let mut data = self.write()?;
        if data.users.iter().any(|u| u.username == user.username) {
            return Err(RepositoryError::UniqueViolation("username"));
        }
        if data.users.iter().any(|u| u.email == user.email) {
            return Err(RepositoryError::UniqueViolation("email"));
        }

        let created = User {
            id: Uuid::new_v4(),
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            introduction: DEFAULT_INTRODUCTION.to_string(),
        };
        data.users.push(created.clone());
        Ok(created)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        Ok(self.read()?.users.iter().find(|u| u.id == id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .read()?
            .users
            .iter()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn update_introduction(
        &self,
        id: Uuid,
        introduction: &str,
    ) -> Result<Option<User>, RepositoryError> {
        let mut data = self.write()?;
        Ok(data.users.iter_mut().find(|u| u.id == id).map(|u| {
            u.introduction = introduction.to_string();
            u.clone()
        }))
    }

    async fn add_favorite(&self, user_id: Uuid, article_id: Uuid) -> Result<bool, RepositoryError> {
        let mut data = self.write()?;
        if !data.users.iter().any(|u| u.id == user_id) {
            return Ok(false);
        }

        let set = data.favorites.entry(user_id).or_default();
        if !set.contains(&article_id) {
            set.push(article_id);
        }
        Ok(true)
    }

    async fn favorite_ids(&self, user_id: Uuid) -> Result<Option<Vec<Uuid>>, RepositoryError> {
        let data = self.read()?;
        if !data.users.iter().any(|u| u.id == user_id) {
            return Ok(None);
        }
        Ok(Some(data.favorites.get(&user_id).cloned().unwrap_or_default()))
    }

    async fn favorite_articles(&self, user_id: Uuid) -> Result<Vec<Article>, RepositoryError> {
        let data = self.read()?;
        let ids = data.favorites.get(&user_id).cloned().unwrap_or_default();
        // Dangling ids (deleted articles) drop out, matching the FK cascade in Postgres.
        Ok(ids
            .iter()
            .filter_map(|id| data.articles.iter().find(|a| a.id == *id).cloned())
            .collect())
    }

    async fn list_articles(&self) -> Result<Vec<ArticleDetail>, RepositoryError> {
        let data = self.read()?;
        Ok(data.articles.iter().map(|a| detail(&data, a)).collect())
    }

    async fn articles_by_author(&self, author_id: Uuid) -> Result<Vec<Article>, RepositoryError> {
        Ok(self
            .read()?
            .articles
            .iter()
            .filter(|a| a.author_id == author_id)
            .cloned()
            .collect())
    }

    async fn get_article(&self, id: Uuid) -> Result<Option<Article>, RepositoryError> {
        Ok(self.read()?.articles.iter().find(|a| a.id == id).cloned())
    }

    async fn get_article_detail(&self, id: Uuid) -> Result<Option<ArticleDetail>, RepositoryError> {
        let data = self.read()?;
        Ok(data
            .articles
            .iter()
            .find(|a| a.id == id)
            .map(|a| detail(&data, a)))
    }

    async fn create_article(
        &self,
        author_id: Uuid,
        input: ArticleInput,
    ) -> Result<Article, RepositoryError> {
        let article = Article {
            id: Uuid::new_v4(),
            title: input.title,
            text: input.text,
            author_id,
            created_at: Utc::now(),
        };
        self.write()?.articles.push(article.clone());
        Ok(article)
    }

    async fn update_article(
        &self,
        id: Uuid,
        input: ArticleInput,
    ) -> Result<Option<Article>, RepositoryError> {
        let mut data = self.write()?;
        Ok(data.articles.iter_mut().find(|a| a.id == id).map(|a| {
            a.title = input.title;
            a.text = input.text;
            a.clone()
        }))
    }

    async fn delete_article(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let mut data = self.write()?;
        let before = data.articles.len();
        data.articles.retain(|a| a.id != id);
        let removed = data.articles.len() != before;
        if removed {
            for set in data.favorites.values_mut() {
                set.retain(|fav| *fav != id);
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(name: &str) -> NewUser {
        NewUser {
            username: name.to_string(),
            email: format!("{name}@example.com"),
            password_hash: "hash".to_string(),
        }
    }

    fn input(title: &str) -> ArticleInput {
        ArticleInput {
            title: title.to_string(),
            text: "body".to_string(),
        }
    }

    #[tokio::test]
    async fn new_users_get_the_default_introduction() {
        let repo = MemoryRepository::new();
        let user = repo.create_user(new_user("alice")).await.unwrap();
        assert_eq!(user.introduction, DEFAULT_INTRODUCTION);
    }

    #[tokio::test]
    async fn duplicate_username_and_email_are_rejected() {
        let repo = MemoryRepository::new();
        repo.create_user(new_user("alice")).await.unwrap();

        let dup_name = repo.create_user(new_user("alice")).await.unwrap_err();
        assert!(matches!(dup_name, RepositoryError::UniqueViolation("username")));

        let mut other = new_user("bob");
        other.email = "alice@example.com".to_string();
        let dup_email = repo.create_user(other).await.unwrap_err();
        assert!(matches!(dup_email, RepositoryError::UniqueViolation("email")));
    }

    #[tokio::test]
    async fn add_favorite_is_idempotent() {
        let repo = MemoryRepository::new();
        let user = repo.create_user(new_user("alice")).await.unwrap();
        let article = repo.create_article(user.id, input("T")).await.unwrap();

        for _ in 0..5 {
            assert!(repo.add_favorite(user.id, article.id).await.unwrap());
        }

        let ids = repo.favorite_ids(user.id).await.unwrap().unwrap();
        assert_eq!(ids, vec![article.id]);
    }

    #[tokio::test]
    async fn concurrent_favorite_adds_leave_one_entry() {
        let repo = Arc::new(MemoryRepository::new());
        let user = repo.create_user(new_user("alice")).await.unwrap();
        let article = repo.create_article(user.id, input("T")).await.unwrap();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let repo = repo.clone();
                tokio::spawn(async move { repo.add_favorite(user.id, article.id).await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().unwrap());
        }

        assert_eq!(repo.favorite_ids(user.id).await.unwrap().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn add_favorite_for_missing_user_reports_false() {
        let repo = MemoryRepository::new();
        assert!(!repo.add_favorite(Uuid::new_v4(), Uuid::new_v4()).await.unwrap());
        assert!(repo.favorite_ids(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deleting_an_article_drops_it_from_favorites() {
        let repo = MemoryRepository::new();
        let user = repo.create_user(new_user("alice")).await.unwrap();
        let article = repo.create_article(user.id, input("T")).await.unwrap();
        repo.add_favorite(user.id, article.id).await.unwrap();

        assert!(repo.delete_article(article.id).await.unwrap());
        assert!(!repo.delete_article(article.id).await.unwrap());
        assert!(repo.favorite_articles(user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn article_detail_populates_the_author() {
        let repo = MemoryRepository::new();
        let user = repo.create_user(new_user("alice")).await.unwrap();
        let article = repo.create_article(user.id, input("T")).await.unwrap();

        let found = repo.get_article_detail(article.id).await.unwrap().unwrap();
        assert_eq!(found.author.username, "alice");
        assert_eq!(found.author.id, user.id);
    }
}
