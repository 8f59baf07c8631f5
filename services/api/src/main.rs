use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod config;
mod credentials;
mod error;
mod ingest;
mod middleware;
mod models;
mod routes;
mod session;
mod state;

use common::{
    cache::{RedisConfig, RedisPool},
    database::{self, DatabaseConfig, init_pool},
    queue::RedisJobQueue,
    repositories::{FileRepository, UserRepository},
    storage::{BlobStorage, StorageConfig},
};

use crate::{
    config::ServerConfig, credentials::CredentialVerifier, ingest::UploadIngestion,
    session::SessionManager, state::AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting API service");

    let server_config = ServerConfig::from_env()?;

    // Initialize database connection pool
    let db_config = DatabaseConfig::from_env()?;
    let pool = init_pool(&db_config).await?;

    if database::health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }

    database::migrate(&pool).await?;

    let redis = RedisPool::new(&RedisConfig::from_env()?).await?;
    let storage = BlobStorage::new(&StorageConfig::from_env());
    info!(root = %storage.root().display(), "Blob storage ready");

    let cache = Arc::new(redis.clone());
    let users = Arc::new(UserRepository::new(pool.clone()));
    let files = Arc::new(FileRepository::new(pool));
    let queue = Arc::new(RedisJobQueue::new(redis));

    let app_state = AppState {
        cache: cache.clone(),
        users: users.clone(),
        files: files.clone(),
        sessions: SessionManager::new(cache, server_config.session_ttl_seconds),
        credentials: CredentialVerifier::new(users),
        ingestion: UploadIngestion::new(files, storage, queue),
    };

    let app = routes::create_router(app_state);

    let address = server_config.bind_address();
    let listener = TcpListener::bind(&address).await?;
    info!("API service listening on {}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("API service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
