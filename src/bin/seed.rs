use article_hub::{
    config::{AppConfig, ConfigError, StoreKind},
    credentials::{Argon2Credentials, CredentialState},
    repository::PostgresRepository,
    seed::{SEED_USERNAME, seed_demo},
};
use sqlx::postgres::PgPoolOptions;
use std::{env, error::Error, sync::Arc};

/// seed
///
/// Loads the demo author and articles into the configured Postgres database.
/// `SEED_PASSWORD` is the demo author's password on first creation.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv::dotenv().ok();
    let config = AppConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "article_hub=info".into()),
        )
        .init();

    if config.store == StoreKind::Memory {
        return Err(ConfigError::Invalid {
            name: "APP_STORE",
            value: "memory".to_string(),
        }
        .into());
    }
    let password = env::var("SEED_PASSWORD").map_err(|_| ConfigError::Missing("SEED_PASSWORD"))?;

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&config.db_url)
        .await?;
    sqlx::migrate!().run(&pool).await?;

    let repo = PostgresRepository::new(pool);
    let credentials = Arc::new(Argon2Credentials::new()) as CredentialState;
    let report = seed_demo(&repo, &credentials, &password).await?;

    tracing::info!(
        author = SEED_USERNAME,
        author_id = %report.author_id,
        author_created = report.author_created,
        removed = report.removed,
        created = report.created,
        "seeding finished"
    );
    Ok(())
}
