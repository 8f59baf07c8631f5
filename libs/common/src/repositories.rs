//! Document store contracts and their PostgreSQL repositories

use async_trait::async_trait;

use crate::{
    error::DatabaseResult,
    models::{File, NewFile, User},
};

mod files;
mod users;

pub use files::FileRepository;
pub use users::UserRepository;

/// Number of files returned per listing page
pub const FILES_PER_PAGE: u32 = 20;

/// User records
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a user; a taken email yields `DatabaseError::Duplicate`
    async fn create(&self, email: &str, password_hash: &str) -> DatabaseResult<User>;

    async fn find_by_id(&self, id: i64) -> DatabaseResult<Option<User>>;

    async fn find_by_email(&self, email: &str) -> DatabaseResult<Option<User>>;

    async fn count(&self) -> DatabaseResult<i64>;

    /// Check if the backing store is reachable
    async fn health_check(&self) -> DatabaseResult<bool>;
}

/// File records
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn insert(&self, file: NewFile) -> DatabaseResult<File>;

    /// Find a file regardless of its owner
    async fn find_by_id(&self, id: i64) -> DatabaseResult<Option<File>>;

    /// Find a file only when it belongs to `user_id`
    async fn find_owned(&self, id: i64, user_id: i64) -> DatabaseResult<Option<File>>;

    /// One page of the owner's files under `parent_id`, ordered by id
    async fn list(&self, user_id: i64, parent_id: i64, page: u32) -> DatabaseResult<Vec<File>>;

    /// Flip the public flag of an owned file and return the updated record
    async fn set_public(
        &self,
        id: i64,
        user_id: i64,
        is_public: bool,
    ) -> DatabaseResult<Option<File>>;

    async fn count(&self) -> DatabaseResult<i64>;
}
