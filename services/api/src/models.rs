//! API models for request and response payloads

use serde::{Deserialize, Serialize};

use common::models::ROOT_PARENT_ID;

/// Request for user registration
#[derive(Debug, Default, Deserialize)]
pub struct CreateUserRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Public view of a user
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub email: String,
}

/// Response for a successful authentication
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

/// Parent folder reference, accepted as a number or a numeric string
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ParentRef {
    Id(i64),
    Text(String),
}

impl ParentRef {
    /// Numeric id, `None` when the reference is not a number
    pub fn id(&self) -> Option<i64> {
        match self {
            ParentRef::Id(id) => Some(*id),
            ParentRef::Text(text) => text.trim().parse().ok(),
        }
    }
}

/// Request for file upload
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub file_type: Option<String>,
    pub parent_id: Option<ParentRef>,
    pub is_public: Option<bool>,
    /// Base64 encoded content, required unless the type is folder
    pub data: Option<String>,
}

/// Query for listing files
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileListQuery {
    pub parent_id: Option<String>,
    pub page: Option<String>,
}

impl FileListQuery {
    /// Unparsable parent ids fall back to the root
    pub fn parent_id(&self) -> i64 {
        self.parent_id
            .as_deref()
            .and_then(|id| id.trim().parse().ok())
            .unwrap_or(ROOT_PARENT_ID)
    }

    /// Zero-based page, unparsable values fall back to the first page
    pub fn page(&self) -> u32 {
        self.page
            .as_deref()
            .and_then(|page| page.trim().parse().ok())
            .unwrap_or(0)
    }
}

/// Response for the status endpoint
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub redis: bool,
    pub db: bool,
}

/// Response for the stats endpoint
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub users: i64,
    pub files: i64,
}
