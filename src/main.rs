use article_hub::{
    AppState, MemoryRepository,
    config::{AppConfig, Env, StoreKind},
    create_app,
    credentials::{Argon2Credentials, CredentialState},
    repository::{PostgresRepository, RepositoryState},
};
use axum::{ServiceExt, extract::Request};
use sqlx::postgres::PgPoolOptions;
use std::{error::Error, sync::Arc};
use tokio::net::TcpListener;
use tower_sessions::MemoryStore;
use tower_sessions_sqlx_store::PostgresStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Entry point: configuration, logging, persistence and session store, then the
/// HTTP server. Any startup failure ends the process with the error.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // 1. Configuration & Environment Loading (Fail-Fast)
    dotenv::dotenv().ok();
    let config = AppConfig::load()?;

    // 2. Logging Filter Setup
    // RUST_LOG wins; otherwise sensible development defaults.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "article_hub=debug,tower_http=info".into());

    // 3. Log format follows the environment: pretty locally, JSON for aggregators.
    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    let credentials = Arc::new(Argon2Credentials::new()) as CredentialState;
    let port = config.port;

    // 4. Persistence and sessions share one backing store.
    let app = match config.store {
        StoreKind::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(&config.db_url)
                .await?;
            sqlx::migrate!().run(&pool).await?;

            let session_store = PostgresStore::new(pool.clone());
            session_store.migrate().await?;

            let repo = Arc::new(PostgresRepository::new(pool)) as RepositoryState;
            create_app(
                AppState {
                    repo,
                    credentials,
                    config,
                },
                session_store,
            )
        }
        StoreKind::Memory => {
            tracing::warn!("running on the in-process store; all data is lost on restart");
            let repo = Arc::new(MemoryRepository::new()) as RepositoryState;
            create_app(
                AppState {
                    repo,
                    credentials,
                    config,
                },
                MemoryStore::default(),
            )
        }
    };

    // 5. Server Startup
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;

    tracing::info!("Listening on 0.0.0.0:{port}");
    tracing::info!("API Documentation (Swagger UI) available at: http://localhost:{port}/swagger-ui");

    axum::serve(listener, ServiceExt::<Request>::into_make_service(app)).await?;
    Ok(())
}
