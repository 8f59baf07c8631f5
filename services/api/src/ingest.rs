//! Upload ingestion: validation, blob persistence and thumbnail scheduling

use base64::{Engine, engine::general_purpose::STANDARD};
use std::{io, path::Path, sync::Arc};
use thiserror::Error;
use tracing::{error, info, warn};

use common::{
    error::DatabaseError,
    models::{File, FileType, NewFile, ROOT_PARENT_ID},
    queue::{JobQueue, ThumbnailJob},
    repositories::FileStore,
    storage::BlobStorage,
};

use crate::models::{ParentRef, UploadRequest};

/// Rejected upload; the message is returned to the client verbatim
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing name")]
    MissingName,
    #[error("Missing type")]
    MissingType,
    #[error("Missing data")]
    MissingData,
    #[error("Parent not found")]
    ParentNotFound,
    #[error("Parent is not a folder")]
    ParentNotFolder,
    #[error("Invalid data")]
    InvalidData,
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] io::Error),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Validates uploads, persists them and schedules thumbnails for images
#[derive(Clone)]
pub struct UploadIngestion {
    files: Arc<dyn FileStore>,
    storage: BlobStorage,
    queue: Arc<dyn JobQueue>,
}

impl UploadIngestion {
    pub fn new(files: Arc<dyn FileStore>, storage: BlobStorage, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            files,
            storage,
            queue,
        }
    }

    /// Store an upload for `owner_id`
    ///
    /// Checks run in order and the first failure wins: name, type, data,
    /// parent, data encoding. Nothing is written before all checks pass.
    pub async fn ingest(&self, owner_id: i64, request: UploadRequest) -> Result<File, IngestError> {
        let name = request
            .name
            .filter(|name| !name.is_empty())
            .ok_or(ValidationError::MissingName)?;

        let file_type = request
            .file_type
            .as_deref()
            .and_then(FileType::parse)
            .ok_or(ValidationError::MissingType)?;

        let data = request.data.filter(|data| !data.is_empty());
        if file_type.has_blob() && data.is_none() {
            return Err(ValidationError::MissingData.into());
        }

        let parent_id = self.check_parent(request.parent_id).await?;

        let payload = match data {
            Some(data) if file_type.has_blob() => Some(
                STANDARD
                    .decode(data.as_bytes())
                    .map_err(|_| ValidationError::InvalidData)?,
            ),
            _ => None,
        };

        let local_path = match payload {
            Some(bytes) => Some(self.storage.write(&bytes).await?),
            None => None,
        };

        let new_file = NewFile {
            user_id: owner_id,
            name,
            file_type,
            is_public: request.is_public.unwrap_or(false),
            parent_id,
            local_path: local_path
                .as_ref()
                .map(|path| path.to_string_lossy().into_owned()),
        };

        let file = match self.files.insert(new_file).await {
            Ok(file) => file,
            Err(e) => {
                if let Some(path) = &local_path {
                    self.discard_blob(path).await;
                }
                return Err(e.into());
            }
        };

        info!(
            file_id = file.id,
            user_id = owner_id,
            file_type = %file.file_type,
            "File ingested"
        );

        if file.file_type == FileType::Image {
            self.schedule_thumbnails(&file).await;
        }

        Ok(file)
    }

    async fn check_parent(&self, parent: Option<ParentRef>) -> Result<i64, IngestError> {
        let parent_id = match parent {
            None => return Ok(ROOT_PARENT_ID),
            Some(parent) => parent.id().ok_or(ValidationError::ParentNotFound)?,
        };

        if parent_id == ROOT_PARENT_ID {
            return Ok(ROOT_PARENT_ID);
        }

        let parent = self
            .files
            .find_by_id(parent_id)
            .await?
            .ok_or(ValidationError::ParentNotFound)?;

        if parent.file_type != FileType::Folder {
            return Err(ValidationError::ParentNotFolder.into());
        }

        Ok(parent_id)
    }

    /// Best effort: the upload stands even when the queue refuses the job
    async fn schedule_thumbnails(&self, file: &File) {
        let job = ThumbnailJob::new(file.id, file.user_id);

        if let Err(e) = self.queue.enqueue(&job).await {
            error!(
                file_id = file.id,
                user_id = file.user_id,
                "Failed to enqueue thumbnail job: {}",
                e
            );
        }
    }

    async fn discard_blob(&self, path: &Path) {
        if let Err(e) = self.storage.remove(path).await {
            warn!("Failed to remove orphaned blob {}: {}", path.display(), e);
        }
    }
}
