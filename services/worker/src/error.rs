//! Error types for thumbnail jobs

use common::error::DatabaseError;
use std::io;
use thiserror::Error;

/// Failure while rendering derivatives
#[derive(Error, Debug)]
pub enum ThumbnailError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Unrecognised image format")]
    UnknownFormat,

    #[error("Thumbnail {width}px wide would exceed the maximum height")]
    TooTall { width: u32 },

    #[error("Render task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Failure while processing one job
#[derive(Error, Debug)]
pub enum JobError {
    #[error("File {0} not found")]
    FileNotFound(i64),

    #[error("File {file_id} is not owned by user {user_id}")]
    OwnerMismatch { file_id: i64, user_id: i64 },

    #[error("File {0} has no stored blob")]
    MissingBlob(i64),

    #[error(transparent)]
    Thumbnail(#[from] ThumbnailError),

    #[error("Store error: {0}")]
    Store(#[from] DatabaseError),
}

impl JobError {
    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            JobError::Thumbnail(ThumbnailError::TooTall { .. }) => false,
            JobError::Thumbnail(_) | JobError::Store(_) => true,
            _ => false,
        }
    }
}
