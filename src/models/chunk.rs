//! Represents one slice of a file's byte stream.

use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// A persisted chunk of file content.
///
/// Chunks are immutable once written and are only ever removed together
/// with the rest of their file's chunk set.
#[derive(Clone, FromRow, Debug)]
pub struct ChunkRecord {
    /// Own identifier, distinct from the owning file's.
    pub id: Uuid,

    /// Owning file.
    pub file_id: Uuid,

    /// Zero-based position within the file.
    pub sequence: i64,

    /// Length of `data` in bytes.
    pub data_length: i64,

    /// Raw bytes, stored verbatim.
    pub data: Vec<u8>,
}

impl ChunkRecord {
    pub fn new(file_id: Uuid, sequence: i64, data: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_id,
            sequence,
            data_length: data.len() as i64,
            data,
        }
    }

    pub fn info(&self) -> ChunkInfo {
        ChunkInfo {
            id: self.id,
            file_id: self.file_id,
            sequence: self.sequence,
            data_length: self.data_length,
        }
    }
}

/// A chunk without its payload. Lets callers order a file's chunks
/// before loading any bytes.
#[derive(Clone, Copy, FromRow, Serialize, Debug, PartialEq, Eq)]
pub struct ChunkInfo {
    pub id: Uuid,
    pub file_id: Uuid,
    pub sequence: i64,
    pub data_length: i64,
}
