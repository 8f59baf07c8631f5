//! Models shared by the API server and the thumbnail worker

use serde::{Deserialize, Serialize};
use std::fmt;

/// Parent id marking a file stored at the root of its owner's tree
pub const ROOT_PARENT_ID: i64 = 0;

/// Registered account
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
}

/// Kind of entry stored in the files collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Folder,
    File,
    Image,
}

impl FileType {
    /// Parse the wire representation, `None` for unknown kinds
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "folder" => Some(FileType::Folder),
            "file" => Some(FileType::File),
            "image" => Some(FileType::Image),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Folder => "folder",
            FileType::File => "file",
            FileType::Image => "image",
        }
    }

    /// Folders never carry a blob
    pub fn has_blob(&self) -> bool {
        !matches!(self, FileType::Folder)
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File, folder or image owned by a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct File {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub is_public: bool,
    pub parent_id: i64,
    /// Present iff the file is not a folder
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
}

/// File creation payload
#[derive(Debug, Clone, PartialEq)]
pub struct NewFile {
    pub user_id: i64,
    pub name: String,
    pub file_type: FileType,
    pub is_public: bool,
    pub parent_id: i64,
    pub local_path: Option<String>,
}
