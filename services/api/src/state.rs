//! Application state shared across handlers

use std::sync::Arc;

use common::{
    cache::KeyValueStore,
    repositories::{FileStore, UserStore},
};

use crate::{credentials::CredentialVerifier, ingest::UploadIngestion, session::SessionManager};

/// Application state shared across handlers
///
/// Every store is an injected handle so tests can substitute in-memory fakes.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<dyn KeyValueStore>,
    pub users: Arc<dyn UserStore>,
    pub files: Arc<dyn FileStore>,
    pub sessions: SessionManager,
    pub credentials: CredentialVerifier,
    pub ingestion: UploadIngestion,
}
