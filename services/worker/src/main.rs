use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod thumbnail_generator;
mod worker;

use common::{
    cache::{RedisConfig, RedisPool},
    database::{self, DatabaseConfig, init_pool},
    queue::{JobQueue, RedisJobQueue},
    repositories::FileRepository,
    storage::{BlobStorage, StorageConfig},
};

use config::WorkerConfig;
use thumbnail_generator::ThumbnailGenerator;
use worker::{ThumbnailWorker, spawn_pool};

/// Dead letters reported at start-up
const DEAD_LETTER_REPORT_LIMIT: usize = 10;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting thumbnail worker");

    let config = WorkerConfig::from_env()?;

    let db_config = DatabaseConfig::from_env()?;
    let pool = init_pool(&db_config).await?;
    database::migrate(&pool).await?;

    let redis = RedisPool::new(&RedisConfig::from_env()?).await?;
    let queue: Arc<dyn JobQueue> = Arc::new(RedisJobQueue::new(redis));

    if config.recover_on_start {
        let moved = queue.recover_in_flight().await?;
        info!("Requeued {} in-flight jobs", moved);
    }

    report_dead_letters(queue.as_ref()).await;

    let storage = BlobStorage::new(&StorageConfig::from_env());
    let generator = ThumbnailGenerator::new(storage, config.widths.clone());
    info!(
        widths = ?generator.widths(),
        concurrency = config.concurrency,
        max_attempts = config.max_attempts,
        "Thumbnail worker configured"
    );

    let worker = Arc::new(ThumbnailWorker::new(
        Arc::new(FileRepository::new(pool)),
        queue,
        generator,
        &config,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = spawn_pool(worker, config.concurrency, shutdown_rx);

    info!("Thumbnail worker started successfully");

    // Keep the service running
    tokio::signal::ctrl_c().await?;
    info!("Shutting down thumbnail worker");

    shutdown_tx.send(true)?;
    for handle in handles {
        if let Err(e) = handle.await {
            error!("Consumer task failed: {}", e);
        }
    }

    Ok(())
}

async fn report_dead_letters(queue: &dyn JobQueue) {
    match queue.dead_letters(DEAD_LETTER_REPORT_LIMIT).await {
        Ok(letters) if letters.is_empty() => info!("No dead-lettered thumbnail jobs"),
        Ok(letters) => {
            for letter in letters {
                warn!(
                    file_id = letter.job.as_ref().map(|job| job.file_id),
                    failed_at = %letter.failed_at,
                    "Dead-lettered thumbnail job: {}",
                    letter.error
                );
            }
        }
        Err(e) => error!("Failed to read dead letters: {}", e),
    }
}
