//! Common library for the files manager
//!
//! This crate provides the store clients and contracts shared by the API
//! server and the thumbnail worker: the Redis-backed key-value store and job
//! queue, the PostgreSQL repositories, blob storage on the local disk and the
//! models exchanged between them.

pub mod cache;
pub mod database;
pub mod error;
pub mod models;
pub mod queue;
pub mod repositories;
pub mod storage;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

/// Example usage of the database module and the file repository
///
/// ```rust,no_run
/// use common::database::{DatabaseConfig, init_pool, migrate};
/// use common::repositories::{FileRepository, FileStore};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = DatabaseConfig::from_env()?;
///     let pool = init_pool(&config).await?;
///     migrate(&pool).await?;
///
///     let files = FileRepository::new(pool);
///     println!("Stored files: {}", files.count().await?);
///     Ok(())
/// }
/// ```
pub fn example_usage() {}
