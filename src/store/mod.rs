//! Persistence seams for the two record kinds.
//!
//! File metadata and chunk payloads are reached through separate traits so
//! they can live in different stores. Nothing here assumes the two share a
//! database, which is why cascading deletes are driven by the service layer.

use crate::models::{
    chunk::{ChunkInfo, ChunkRecord},
    file::{FileCompletion, FileRecord},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[cfg(test)]
pub mod memory;
pub mod sqlite;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record `{0}` does not exist")]
    MissingRecord(Uuid),
    #[error("store unavailable: {0}")]
    Backend(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable storage of chunk records, addressed by chunk id and filtered by file id.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Persist one chunk. Must be durable when this returns.
    async fn insert_chunk(&self, chunk: &ChunkRecord) -> StoreResult<()>;

    /// Descriptors of every chunk belonging to `file_id`, in no particular order.
    async fn list_chunks(&self, file_id: Uuid) -> StoreResult<Vec<ChunkInfo>>;

    /// Load a single chunk with its payload.
    async fn load_chunk(&self, chunk_id: Uuid) -> StoreResult<Option<ChunkRecord>>;

    /// Remove every chunk belonging to `file_id`, returning how many were removed.
    async fn delete_chunks(&self, file_id: Uuid) -> StoreResult<u64>;

    async fn ping(&self) -> StoreResult<()>;
}

/// Durable storage of file records.
#[async_trait]
pub trait MetadataCatalog: Send + Sync {
    async fn create_file(&self, file: &FileRecord) -> StoreResult<()>;

    /// Write the final size, chunk count, digest and paths of an ingested file.
    async fn complete_file(&self, id: Uuid, completion: &FileCompletion)
    -> StoreResult<FileRecord>;

    async fn get_file(&self, id: Uuid) -> StoreResult<Option<FileRecord>>;

    /// Bump the download counter and stamp the download time.
    ///
    /// Returns `None` when the file vanished in the meantime.
    async fn record_download(&self, id: Uuid, at: DateTime<Utc>)
    -> StoreResult<Option<FileRecord>>;

    /// Files ordered newest upload first.
    async fn list_files(&self, offset: i64, limit: i64) -> StoreResult<Vec<FileRecord>>;

    async fn count_files(&self) -> StoreResult<i64>;

    /// Remove a file record. Returns `false` if there was nothing to remove.
    async fn delete_file(&self, id: Uuid) -> StoreResult<bool>;

    async fn ping(&self) -> StoreResult<()>;
}
