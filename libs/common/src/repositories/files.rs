//! File repository for database operations

use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};

use super::{FILES_PER_PAGE, FileStore};
use crate::{
    error::{DatabaseError, DatabaseResult},
    models::{File, FileType, NewFile},
};

const FILE_COLUMNS: &str = "id, user_id, name, type, is_public, parent_id, local_path";

/// File repository
#[derive(Clone)]
pub struct FileRepository {
    pool: PgPool,
}

impl FileRepository {
    /// Create a new file repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn from_row(row: &PgRow) -> DatabaseResult<File> {
        let kind: String = row.get("type");
        let file_type = FileType::parse(&kind).ok_or_else(|| {
            DatabaseError::Query(sqlx::Error::Decode(
                format!("unknown file type: {}", kind).into(),
            ))
        })?;

        Ok(File {
            id: row.get("id"),
            user_id: row.get("user_id"),
            name: row.get("name"),
            file_type,
            is_public: row.get("is_public"),
            parent_id: row.get("parent_id"),
            local_path: row.get("local_path"),
        })
    }
}

#[async_trait]
impl FileStore for FileRepository {
    async fn insert(&self, file: NewFile) -> DatabaseResult<File> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO files (user_id, name, type, is_public, parent_id, local_path)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {FILE_COLUMNS}
            "#
        ))
        .bind(file.user_id)
        .bind(&file.name)
        .bind(file.file_type.as_str())
        .bind(file.is_public)
        .bind(file.parent_id)
        .bind(&file.local_path)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_query)?;

        Self::from_row(&row)
    }

    async fn find_by_id(&self, id: i64) -> DatabaseResult<Option<File>> {
        let row = sqlx::query(&format!("SELECT {FILE_COLUMNS} FROM files WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn find_owned(&self, id: i64, user_id: i64) -> DatabaseResult<Option<File>> {
        let row = sqlx::query(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE id = $1 AND user_id = $2"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list(&self, user_id: i64, parent_id: i64, page: u32) -> DatabaseResult<Vec<File>> {
        let limit = i64::from(FILES_PER_PAGE);
        let offset = i64::from(page) * limit;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {FILE_COLUMNS}
            FROM files
            WHERE user_id = $1 AND parent_id = $2
            ORDER BY id
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(user_id)
        .bind(parent_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn set_public(
        &self,
        id: i64,
        user_id: i64,
        is_public: bool,
    ) -> DatabaseResult<Option<File>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE files SET is_public = $3
            WHERE id = $1 AND user_id = $2
            RETURNING {FILE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(user_id)
        .bind(is_public)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn count(&self) -> DatabaseResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM files")
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        Ok(row.get("count"))
    }
}
