//! Represents a logical file whose content lives in chunk records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata for one stored file.
///
/// The `FileRecord` never carries content bytes. Those are held by the
/// [`ChunkRecord`](super::chunk::ChunkRecord)s sharing its `id`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Identifier shared by the record and all of its chunks.
    pub id: Uuid,

    /// Original filename supplied at upload.
    pub name: String,

    /// Content type (MIME type) supplied at upload.
    pub content_type: Option<String>,

    /// Total size in bytes. Holds the declared size until ingest finalizes it.
    pub size: i64,

    /// When the upload started.
    pub upload_date: DateTime<Utc>,

    /// Info path, set once the upload completed.
    pub path: Option<String>,

    /// Data path, set once the upload completed.
    pub data_path: Option<String>,

    /// Bytes per chunk, fixed at creation.
    pub chunk_size: i64,

    /// Number of chunks. `None` while ingest is still running or was interrupted.
    pub chunk_count: Option<i64>,

    /// Hex MD5 of the full content, set once the upload completed.
    pub md5: Option<String>,

    /// Number of completed downloads.
    pub download_count: i64,

    /// When the most recent completed download finished.
    pub latest_download: Option<DateTime<Utc>>,
}

impl FileRecord {
    /// Build the shell persisted before any chunk is written.
    pub fn shell(upload: &NewFile, chunk_size: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: upload.name.clone(),
            content_type: upload.content_type.clone(),
            size: upload.declared_size.unwrap_or(0),
            upload_date: Utc::now(),
            path: None,
            data_path: None,
            chunk_size,
            chunk_count: None,
            md5: None,
            download_count: 0,
            latest_download: None,
        }
    }

    /// Whether ingest ran to completion for this file.
    pub fn is_complete(&self) -> bool {
        self.chunk_count.is_some()
    }
}

/// Caller-supplied description of an upload.
#[derive(Clone, Debug, Default)]
pub struct NewFile {
    pub name: String,
    pub content_type: Option<String>,
    pub declared_size: Option<i64>,
}

/// Values written when ingest finishes.
#[derive(Clone, Debug)]
pub struct FileCompletion {
    pub size: i64,
    pub chunk_count: i64,
    pub md5: String,
    pub path: String,
    pub data_path: String,
}

impl FileCompletion {
    pub fn new(id: Uuid, size: i64, chunk_count: i64, md5: String) -> Self {
        Self {
            size,
            chunk_count,
            md5,
            path: format!("/files/{}", id),
            data_path: format!("/files/data/{}", id),
        }
    }
}

/// One page of files, newest first.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct FilePage {
    pub items: Vec<FileRecord>,
    pub total: i64,
    pub current: u32,
    pub page_size: u32,
}
