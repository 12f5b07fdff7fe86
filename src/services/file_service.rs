//! src/services/file_service.rs
//!
//! FileService: the chunked storage engine. Uploads are sliced into
//! fixed-size chunk records as they stream in; downloads reassemble the
//! chunks in sequence order into any async sink. File metadata and chunk
//! payloads go through separate stores, so deletes and copies are
//! coordinated here rather than by the database.

use crate::{
    models::{
        chunk::{ChunkInfo, ChunkRecord},
        file::{FileCompletion, FilePage, FileRecord, NewFile},
    },
    store::{
        ChunkStore, MetadataCatalog, StoreError,
        sqlite::{SqliteCatalog, SqliteChunkStore},
    },
};
use chrono::Utc;
use md5::Context;
use sqlx::SqlitePool;
use std::{fmt, io, sync::Arc, time::Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Bytes per chunk when neither the caller nor the configuration says otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024 * 1024;

const DEFAULT_LIST_LIMIT: u32 = 200;
const DEFAULT_PAGE_SIZE: u32 = 10;
const MAX_LIST_LIMIT: u32 = 1000;
const INITIAL_READ_CAPACITY: usize = 64 * 1024;

/// Why an ingest (or a copy, which ingests from existing chunks) stopped early.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("reading upload source: {0}")]
    Read(#[source] io::Error),
    #[error("reading source chunk {sequence}: {source}")]
    ChunkRead {
        sequence: i64,
        #[source]
        source: StoreError,
    },
    #[error("source chunk {sequence} disappeared")]
    ChunkMissing { sequence: i64 },
    #[error("writing chunk {sequence}: {source}")]
    ChunkWrite {
        sequence: i64,
        #[source]
        source: StoreError,
    },
    #[error("finalizing file record: {0}")]
    Finalize(#[source] StoreError),
}

/// Which half of a two-store delete failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStep {
    Metadata,
    Chunks,
}

impl fmt::Display for DeleteStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeleteStep::Metadata => write!(f, "metadata"),
            DeleteStep::Chunks => write!(f, "chunks"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("file `{0}` not found")]
    NotFound(String),
    #[error("chunk size must be positive, got {0}")]
    InvalidChunkSize(usize),
    #[error("ingest of file `{file_id}` failed: {source}")]
    IngestFailure {
        file_id: Uuid,
        #[source]
        source: IngestError,
    },
    #[error("writing file `{file_id}` to the sink failed: {source}")]
    SinkWriteFailure {
        file_id: Uuid,
        #[source]
        source: io::Error,
    },
    #[error("deleting {failed} of file `{file_id}` failed: {source}")]
    PartialDeleteFailure {
        file_id: Uuid,
        failed: DeleteStep,
        #[source]
        source: StoreError,
    },
    #[error("chunk {sequence} of file `{file_id}` is missing")]
    ChunkMissing { file_id: Uuid, sequence: i64 },
    #[error("chunk set of file `{file_id}` is inconsistent: {reason}")]
    CorruptChunkSet { file_id: Uuid, reason: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl StorageError {
    /// The file this error concerns, when a record exists for it.
    pub fn file_id(&self) -> Option<Uuid> {
        match self {
            StorageError::IngestFailure { file_id, .. }
            | StorageError::SinkWriteFailure { file_id, .. }
            | StorageError::PartialDeleteFailure { file_id, .. }
            | StorageError::ChunkMissing { file_id, .. }
            | StorageError::CorruptChunkSet { file_id, .. } => Some(*file_id),
            StorageError::NotFound(_)
            | StorageError::InvalidChunkSize(_)
            | StorageError::Store(_) => None,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Outcome of a completed download.
#[derive(Debug)]
pub struct RetrievalResult {
    /// The file record including this download in its statistics.
    pub file: FileRecord,
    pub bytes_written: u64,
}

/// A file whose chunk set was checked and can be sent.
#[derive(Debug)]
pub struct PreparedRetrieval {
    pub file: FileRecord,
    chunks: Vec<ChunkInfo>,
}

/// What a delete actually removed. Both zero when the file never existed.
#[derive(Debug, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub metadata_removed: bool,
    pub chunks_removed: u64,
}

/// Running totals while chunks are written.
struct ChunkTally {
    count: i64,
    size: i64,
    digest: Context,
}

impl ChunkTally {
    fn new() -> Self {
        Self {
            count: 0,
            size: 0,
            digest: Context::new(),
        }
    }

    fn add(&mut self, data: &[u8]) {
        self.count += 1;
        self.size += data.len() as i64;
        self.digest.consume(data);
    }

    fn completion(self, file_id: Uuid) -> FileCompletion {
        let md5 = format!("{:x}", self.digest.compute());
        FileCompletion::new(file_id, self.size, self.count, md5)
    }
}

/// FileService provides the chunked file operations:
/// - Ingest a byte stream as a sequence of chunk records
/// - Retrieve a file by streaming its chunks in order to a sink
/// - Copy a file under a new identifier with its own chunk copies
/// - Delete a file and all of its chunks
/// - List file records newest first
#[derive(Clone)]
pub struct FileService {
    catalog: Arc<dyn MetadataCatalog>,
    chunks: Arc<dyn ChunkStore>,
    default_chunk_size: usize,
}

impl FileService {
    pub fn new(
        catalog: Arc<dyn MetadataCatalog>,
        chunks: Arc<dyn ChunkStore>,
        default_chunk_size: usize,
    ) -> Self {
        Self {
            catalog,
            chunks,
            default_chunk_size,
        }
    }

    /// Service keeping both file records and chunks in one SQLite database.
    pub fn sqlite(db: Arc<SqlitePool>, default_chunk_size: usize) -> Self {
        Self::new(
            Arc::new(SqliteCatalog::new(db.clone())),
            Arc::new(SqliteChunkStore::new(db)),
            default_chunk_size,
        )
    }

    pub fn default_chunk_size(&self) -> usize {
        self.default_chunk_size
    }

    /// Check both stores, returning the catalog and chunk store results.
    pub async fn ping(&self) -> (Result<(), StoreError>, Result<(), StoreError>) {
        (self.catalog.ping().await, self.chunks.ping().await)
    }

    /// Fetch a file record. Accepts ids carrying an extension suffix.
    pub async fn get_file_info(&self, file_id: &str) -> StorageResult<FileRecord> {
        let id = parse_file_id(file_id).ok_or_else(|| StorageError::NotFound(file_id.into()))?;
        self.catalog
            .get_file(id)
            .await?
            .ok_or_else(|| StorageError::NotFound(file_id.into()))
    }

    /// Files newest first, `limit` per page.
    ///
    /// `offset` selects the page containing that position, so offsets that
    /// are not a multiple of `limit` round down to the start of their page.
    pub async fn list_files(
        &self,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> StorageResult<Vec<FileRecord>> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        let page = offset.unwrap_or(0) / limit;
        let start = i64::from(page) * i64::from(limit);
        Ok(self.catalog.list_files(start, i64::from(limit)).await?)
    }

    /// One page of files newest first, with the total number of files.
    pub async fn page_files(
        &self,
        current: Option<u32>,
        page_size: Option<u32>,
    ) -> StorageResult<FilePage> {
        let current = current.unwrap_or(0);
        let page_size = page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_LIST_LIMIT);
        let start = i64::from(current) * i64::from(page_size);
        let items = self.catalog.list_files(start, i64::from(page_size)).await?;
        let total = self.catalog.count_files().await?;
        Ok(FilePage {
            items,
            total,
            current,
            page_size,
        })
    }

    /// Stream `source` into chunk records of `chunk_size` bytes.
    ///
    /// - Persists the file shell first so the id exists before any chunk.
    /// - Reads at most one chunk into memory at a time; each chunk is
    ///   durable before the next read starts.
    /// - Only the final chunk may be shorter than `chunk_size`.
    /// - Finalizes size, chunk count and MD5 after the source is exhausted.
    ///
    /// Failures after the shell exists come back as `IngestFailure` with the
    /// partial file's id. Nothing is rolled back.
    pub async fn ingest<R>(
        &self,
        upload: NewFile,
        mut source: R,
        chunk_size: Option<usize>,
    ) -> StorageResult<FileRecord>
    where
        R: AsyncRead + Unpin + Send,
    {
        let chunk_size = chunk_size.unwrap_or(self.default_chunk_size);
        let stored_chunk_size = match i64::try_from(chunk_size) {
            Ok(size) if size > 0 => size,
            _ => return Err(StorageError::InvalidChunkSize(chunk_size)),
        };

        let started = Instant::now();
        info!("upload file start: {} chunk_size={}", upload.name, chunk_size);

        let shell = FileRecord::shell(&upload, stored_chunk_size);
        self.catalog.create_file(&shell).await?;
        let file_id = shell.id;

        let result = async {
            let tally = self.write_chunks(file_id, &mut source, chunk_size).await?;
            self.catalog
                .complete_file(file_id, &tally.completion(file_id))
                .await
                .map_err(IngestError::Finalize)
        }
        .await;

        match result {
            Ok(file) => {
                info!(
                    "upload file end: {} fileId: {} chunks: {} bytes: {} spend(ms): {}",
                    file.name,
                    file.id,
                    file.chunk_count.unwrap_or(0),
                    file.size,
                    started.elapsed().as_millis()
                );
                Ok(file)
            }
            Err(source) => {
                error!("upload file error: {} fileId: {}: {}", upload.name, file_id, source);
                Err(StorageError::IngestFailure { file_id, source })
            }
        }
    }

    async fn write_chunks<R>(
        &self,
        file_id: Uuid,
        source: &mut R,
        chunk_size: usize,
    ) -> Result<ChunkTally, IngestError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut tally = ChunkTally::new();
        loop {
            let data = read_chunk(source, chunk_size)
                .await
                .map_err(IngestError::Read)?;
            if data.is_empty() {
                return Ok(tally);
            }

            let sequence = tally.count;
            tally.add(&data);
            let chunk = ChunkRecord::new(file_id, sequence, data);
            self.chunks
                .insert_chunk(&chunk)
                .await
                .map_err(|source| IngestError::ChunkWrite { sequence, source })?;
            debug!(
                "stored chunk {} of file {} ({} bytes)",
                sequence, file_id, chunk.data_length
            );
        }
    }

    /// Stream a file's bytes into `sink` in chunk order.
    ///
    /// The download is only counted once every byte was written and the sink
    /// flushed and shut down. A failed or cancelled transfer leaves the
    /// statistics untouched.
    pub async fn retrieve<W>(&self, file_id: &str, sink: W) -> StorageResult<RetrievalResult>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let prepared = self.prepare_retrieval(file_id).await?;
        self.send(prepared, sink).await
    }

    /// Resolve a file and check its chunk set without touching any payload.
    ///
    /// Everything that can fail before the first byte is written fails here,
    /// so callers can still report a proper error to their client.
    pub async fn prepare_retrieval(&self, file_id: &str) -> StorageResult<PreparedRetrieval> {
        let started = Instant::now();
        let file = self.get_file_info(file_id).await?;
        let chunks = self.ordered_chunks(&file).await?;
        debug!(
            "get file: {} chunk list ({} chunks) in (ms): {}",
            file.id,
            chunks.len(),
            started.elapsed().as_millis()
        );
        Ok(PreparedRetrieval { file, chunks })
    }

    /// Write a prepared file into `sink`, then count the download.
    pub async fn send<W>(
        &self,
        prepared: PreparedRetrieval,
        mut sink: W,
    ) -> StorageResult<RetrievalResult>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let started = Instant::now();
        let PreparedRetrieval { file, chunks } = prepared;

        let bytes_written = match self.stream_chunks(&file, &chunks, &mut sink).await {
            Ok(written) => written,
            Err(err) => {
                let _ = sink.shutdown().await;
                warn!("send file: {} aborted: {}", file.id, err);
                return Err(err);
            }
        };

        let file = match self.catalog.record_download(file.id, Utc::now()).await? {
            Some(updated) => updated,
            None => {
                warn!("file {} was deleted while it was being sent", file.id);
                file
            }
        };

        info!(
            "send file: {} data finish ({} bytes) in (ms): {}",
            file.id,
            bytes_written,
            started.elapsed().as_millis()
        );

        Ok(RetrievalResult {
            file,
            bytes_written,
        })
    }

    async fn stream_chunks<W>(
        &self,
        file: &FileRecord,
        chunks: &[ChunkInfo],
        sink: &mut W,
    ) -> StorageResult<u64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let sink_failed = |source| StorageError::SinkWriteFailure {
            file_id: file.id,
            source,
        };

        let mut written = 0u64;
        for info in chunks {
            let chunk = self
                .chunks
                .load_chunk(info.id)
                .await?
                .ok_or(StorageError::ChunkMissing {
                    file_id: file.id,
                    sequence: info.sequence,
                })?;
            sink.write_all(&chunk.data).await.map_err(sink_failed)?;
            written += chunk.data.len() as u64;
        }
        sink.flush().await.map_err(sink_failed)?;
        sink.shutdown().await.map_err(sink_failed)?;
        Ok(written)
    }

    /// A file's chunk descriptors sorted by sequence, checked for gaps,
    /// duplicates, short chunks anywhere but the tail, and a tail that is
    /// empty or larger than `chunk_size`.
    async fn ordered_chunks(&self, file: &FileRecord) -> StorageResult<Vec<ChunkInfo>> {
        let mut chunks = self.chunks.list_chunks(file.id).await?;
        chunks.sort_by_key(|c| c.sequence);

        let corrupt = |reason: String| StorageError::CorruptChunkSet {
            file_id: file.id,
            reason,
        };

        for (expected, chunk) in chunks.iter().enumerate() {
            if chunk.sequence != expected as i64 {
                return Err(corrupt(format!(
                    "expected sequence {} but found {}",
                    expected, chunk.sequence
                )));
            }
        }
        if let Some((tail, body)) = chunks.split_last() {
            if let Some(short) = body.iter().find(|c| c.data_length != file.chunk_size) {
                return Err(corrupt(format!(
                    "chunk {} holds {} bytes, expected {}",
                    short.sequence, short.data_length, file.chunk_size
                )));
            }
            if tail.data_length <= 0 || tail.data_length > file.chunk_size {
                return Err(corrupt(format!(
                    "last chunk {} holds {} bytes, expected 1 to {}",
                    tail.sequence, tail.data_length, file.chunk_size
                )));
            }
        }
        match file.chunk_count {
            Some(count) if count != chunks.len() as i64 => {
                return Err(corrupt(format!(
                    "record lists {} chunks but {} are stored",
                    count,
                    chunks.len()
                )));
            }
            None => warn!("file {} was never finalized; serving stored chunks", file.id),
            _ => {}
        }

        Ok(chunks)
    }

    /// Duplicate a file under a fresh id.
    ///
    /// Every chunk is re-created with its own copy of the bytes, so either
    /// file can be deleted without touching the other.
    pub async fn copy(&self, file_id: &str) -> StorageResult<FileRecord> {
        let started = Instant::now();
        let source = self.get_file_info(file_id).await?;
        let chunks = self.ordered_chunks(&source).await?;

        let upload = NewFile {
            name: source.name.clone(),
            content_type: source.content_type.clone(),
            declared_size: Some(source.size),
        };
        let shell = FileRecord::shell(&upload, source.chunk_size);
        self.catalog.create_file(&shell).await?;
        let copy_id = shell.id;

        let result = async {
            let mut tally = ChunkTally::new();
            for info in &chunks {
                let sequence = info.sequence;
                let original = self
                    .chunks
                    .load_chunk(info.id)
                    .await
                    .map_err(|source| IngestError::ChunkRead { sequence, source })?
                    .ok_or(IngestError::ChunkMissing { sequence })?;
                tally.add(&original.data);
                let duplicate = ChunkRecord::new(copy_id, sequence, original.data);
                self.chunks
                    .insert_chunk(&duplicate)
                    .await
                    .map_err(|source| IngestError::ChunkWrite { sequence, source })?;
            }
            self.catalog
                .complete_file(copy_id, &tally.completion(copy_id))
                .await
                .map_err(IngestError::Finalize)
        }
        .await;

        match result {
            Ok(copy) => {
                info!(
                    "copied file {} to {} ({} chunks) in (ms): {}",
                    source.id,
                    copy.id,
                    chunks.len(),
                    started.elapsed().as_millis()
                );
                Ok(copy)
            }
            Err(source_err) => {
                error!("copy of file {} to {} failed: {}", source.id, copy_id, source_err);
                Err(StorageError::IngestFailure {
                    file_id: copy_id,
                    source: source_err,
                })
            }
        }
    }

    /// Remove a file record and every chunk referencing it.
    ///
    /// Both deletions are always attempted. Unknown ids are not an error.
    pub async fn delete(&self, file_id: &str) -> StorageResult<DeleteOutcome> {
        info!("delete file: {}", file_id);
        let Some(id) = parse_file_id(file_id) else {
            debug!("delete of malformed id {} is a no-op", file_id);
            return Ok(DeleteOutcome {
                metadata_removed: false,
                chunks_removed: 0,
            });
        };

        let metadata = self.catalog.delete_file(id).await;
        let chunks = self.chunks.delete_chunks(id).await;

        match (metadata, chunks) {
            (Ok(metadata_removed), Ok(chunks_removed)) => {
                debug!(
                    "deleted file {} (record removed: {}, chunks removed: {})",
                    id, metadata_removed, chunks_removed
                );
                Ok(DeleteOutcome {
                    metadata_removed,
                    chunks_removed,
                })
            }
            (Ok(_), Err(source)) => {
                error!("file {} record deleted but chunks remain: {}", id, source);
                Err(StorageError::PartialDeleteFailure {
                    file_id: id,
                    failed: DeleteStep::Chunks,
                    source,
                })
            }
            (Err(source), Ok(_)) => {
                error!("file {} chunks deleted but record remains: {}", id, source);
                Err(StorageError::PartialDeleteFailure {
                    file_id: id,
                    failed: DeleteStep::Metadata,
                    source,
                })
            }
            (Err(metadata_err), Err(chunk_err)) => {
                error!("deleting file {} failed in both stores: chunks: {}", id, chunk_err);
                Err(StorageError::Store(metadata_err))
            }
        }
    }
}

/// Read until `chunk_size` bytes are buffered or the source is exhausted.
///
/// A single `read` may return fewer bytes than asked for, so the buffer is
/// refilled until full. An empty result means end of stream.
async fn read_chunk<R>(source: &mut R, chunk_size: usize) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(chunk_size.min(INITIAL_READ_CAPACITY));
    (&mut *source)
        .take(chunk_size as u64)
        .read_to_end(&mut buf)
        .await?;
    Ok(buf)
}

/// Strip any extension-like suffix (`<id>.pdf`) and parse what is left.
pub fn parse_file_id(raw: &str) -> Option<Uuid> {
    let id = raw.split('.').next().unwrap_or(raw);
    Uuid::parse_str(id).ok()
}
