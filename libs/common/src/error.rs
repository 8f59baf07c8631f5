//! Custom error types for the common library
//!
//! This module defines the errors raised by the document store and the job
//! queue so both services can map them onto their own failure handling.

use sqlx::Error as SqlxError;
use thiserror::Error;

/// Custom error type for database operations
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error occurred during database connection
    #[error("Database connection error: {0}")]
    Connection(#[source] SqlxError),

    /// Error occurred during database query execution
    #[error("Database query error: {0}")]
    Query(#[source] SqlxError),

    /// Error occurred during database migration
    #[error("Database migration error: {0}")]
    Migration(String),

    /// Configuration error
    #[error("Database configuration error: {0}")]
    Configuration(String),

    /// A unique constraint rejected the write
    #[error("Duplicate record: {0}")]
    Duplicate(String),
}

impl DatabaseError {
    /// Classify a query failure, separating unique violations from the rest
    pub fn from_query(err: SqlxError) -> Self {
        let duplicate = err
            .as_database_error()
            .is_some_and(|db_err| db_err.is_unique_violation());

        if duplicate {
            DatabaseError::Duplicate(err.to_string())
        } else {
            DatabaseError::Query(err)
        }
    }
}

/// Type alias for Result with DatabaseError
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Custom error type for job queue operations
#[derive(Error, Debug)]
pub enum QueueError {
    /// The Redis backend rejected the command or was unreachable
    #[error("Queue backend error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A job could not be encoded or decoded
    #[error("Queue serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The queue refused the operation
    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}

/// Type alias for Result with QueueError
pub type QueueResult<T> = Result<T, QueueError>;
