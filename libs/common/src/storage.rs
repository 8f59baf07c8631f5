//! Blob storage on the local filesystem
//!
//! Uploaded payloads are written under a configured root with random names,
//! so concurrent uploads never collide and no locking is needed. Thumbnail
//! derivatives live next to their source as `<path>_<width>`.

use std::{
    env,
    ffi::OsString,
    io,
    path::{Path, PathBuf},
};
use tracing::debug;
use uuid::Uuid;

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory receiving uploaded blobs
    pub root: PathBuf,
}

impl StorageConfig {
    /// Create a new StorageConfig from environment variables
    ///
    /// # Environment Variables
    /// - `FOLDER_PATH`: Storage root (default: "/tmp/files_manager")
    pub fn from_env() -> Self {
        let root = env::var("FOLDER_PATH").unwrap_or_else(|_| "/tmp/files_manager".to_string());

        Self {
            root: PathBuf::from(root),
        }
    }
}

/// Writes and reads blobs under the storage root
#[derive(Debug, Clone)]
pub struct BlobStorage {
    root: PathBuf,
}

impl BlobStorage {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            root: config.root.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write a new blob, creating the root if needed, and return its path
    pub async fn write(&self, bytes: &[u8]) -> io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.root).await?;

        let path = self.root.join(Uuid::new_v4().to_string());
        tokio::fs::write(&path, bytes).await?;

        debug!("Stored {} bytes at {}", bytes.len(), path.display());
        Ok(path)
    }

    pub async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }

    pub async fn remove(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }
}

/// Location of the derivative of `source` rendered at `width` pixels
pub fn derivative_path(source: &Path, width: u32) -> PathBuf {
    let mut name = OsString::from(source.as_os_str());
    name.push(format!("_{}", width));
    PathBuf::from(name)
}
