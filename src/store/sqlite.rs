//! SQLite-backed catalog and chunk store.
//!
//! Both stores accept their own pool. They may point at the same database
//! (the default deployment) or at different ones.

use super::{ChunkStore, MetadataCatalog, StoreError, StoreResult};
use crate::models::{
    chunk::{ChunkInfo, ChunkRecord},
    file::{FileCompletion, FileRecord},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const INIT_MIGRATION: &str = include_str!("../../migrations/0001_init.sql");

const FILE_COLUMNS: &str = "id, name, content_type, size, upload_date, path, data_path, \
                            chunk_size, chunk_count, md5, download_count, latest_download";

/// Apply the embedded schema. Every statement is idempotent.
pub async fn run_migrations(db: &SqlitePool) -> StoreResult<()> {
    let statements = INIT_MIGRATION
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(())
}

#[derive(Clone)]
pub struct SqliteCatalog {
    db: Arc<SqlitePool>,
}

impl SqliteCatalog {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MetadataCatalog for SqliteCatalog {
    async fn create_file(&self, file: &FileRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO files (
                id, name, content_type, size, upload_date, path, data_path,
                chunk_size, chunk_count, md5, download_count, latest_download
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(file.id)
        .bind(&file.name)
        .bind(&file.content_type)
        .bind(file.size)
        .bind(file.upload_date)
        .bind(&file.path)
        .bind(&file.data_path)
        .bind(file.chunk_size)
        .bind(file.chunk_count)
        .bind(&file.md5)
        .bind(file.download_count)
        .bind(file.latest_download)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn complete_file(
        &self,
        id: Uuid,
        completion: &FileCompletion,
    ) -> StoreResult<FileRecord> {
        let sql = format!(
            "UPDATE files
             SET size = ?, chunk_count = ?, md5 = ?, path = ?, data_path = ?
             WHERE id = ?
             RETURNING {FILE_COLUMNS}"
        );
        sqlx::query_as::<_, FileRecord>(&sql)
            .bind(completion.size)
            .bind(completion.chunk_count)
            .bind(&completion.md5)
            .bind(&completion.path)
            .bind(&completion.data_path)
            .bind(id)
            .fetch_optional(&*self.db)
            .await?
            .ok_or(StoreError::MissingRecord(id))
    }

    async fn get_file(&self, id: Uuid) -> StoreResult<Option<FileRecord>> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?");
        let file = sqlx::query_as::<_, FileRecord>(&sql)
            .bind(id)
            .fetch_optional(&*self.db)
            .await?;
        Ok(file)
    }

    async fn record_download(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<FileRecord>> {
        // Single statement so concurrent downloads never lose an increment.
        let sql = format!(
            "UPDATE files
             SET download_count = download_count + 1, latest_download = ?
             WHERE id = ?
             RETURNING {FILE_COLUMNS}"
        );
        let file = sqlx::query_as::<_, FileRecord>(&sql)
            .bind(at)
            .bind(id)
            .fetch_optional(&*self.db)
            .await?;
        Ok(file)
    }

    async fn list_files(&self, offset: i64, limit: i64) -> StoreResult<Vec<FileRecord>> {
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM files
             ORDER BY upload_date DESC, rowid DESC
             LIMIT ? OFFSET ?"
        );
        let files = sqlx::query_as::<_, FileRecord>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&*self.db)
            .await?;
        Ok(files)
    }

    async fn count_files(&self) -> StoreResult<i64> {
        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM files")
            .fetch_one(&*self.db)
            .await?;
        Ok(total)
    }

    async fn delete_file(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> StoreResult<()> {
        ping(&self.db).await
    }
}

#[derive(Clone)]
pub struct SqliteChunkStore {
    db: Arc<SqlitePool>,
}

impl SqliteChunkStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ChunkStore for SqliteChunkStore {
    async fn insert_chunk(&self, chunk: &ChunkRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO file_chunks (id, file_id, sequence, data_length, data)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(chunk.id)
        .bind(chunk.file_id)
        .bind(chunk.sequence)
        .bind(chunk.data_length)
        .bind(&chunk.data)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn list_chunks(&self, file_id: Uuid) -> StoreResult<Vec<ChunkInfo>> {
        let chunks = sqlx::query_as::<_, ChunkInfo>(
            "SELECT id, file_id, sequence, data_length FROM file_chunks WHERE file_id = ?",
        )
        .bind(file_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(chunks)
    }

    async fn load_chunk(&self, chunk_id: Uuid) -> StoreResult<Option<ChunkRecord>> {
        let chunk = sqlx::query_as::<_, ChunkRecord>(
            "SELECT id, file_id, sequence, data_length, data FROM file_chunks WHERE id = ?",
        )
        .bind(chunk_id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(chunk)
    }

    async fn delete_chunks(&self, file_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM file_chunks WHERE file_id = ?")
            .bind(file_id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> StoreResult<()> {
        ping(&self.db).await
    }
}

async fn ping(db: &SqlitePool) -> StoreResult<()> {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(db).await? {
        1 => Ok(()),
        other => Err(StoreError::Backend(format!("unexpected result: {}", other))),
    }
}
