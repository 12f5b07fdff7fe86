//! In-memory stores with fault injection, for exercising the service layer.
//!
//! `list_chunks` deliberately hands chunks back in descending sequence order
//! so callers that forget to sort are caught.

use super::{ChunkStore, MetadataCatalog, StoreError, StoreResult};
use crate::models::{
    chunk::{ChunkInfo, ChunkRecord},
    file::{FileCompletion, FileRecord},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicI64, Ordering},
    },
};
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryChunkStore {
    chunks: Mutex<HashMap<Uuid, ChunkRecord>>,
    /// Fail the insert of this sequence number (negative disables).
    fail_insert_at: AtomicI64,
    fail_load: AtomicBool,
    fail_delete: AtomicBool,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self {
            fail_insert_at: AtomicI64::new(-1),
            ..Default::default()
        }
    }

    pub fn fail_insert_at(&self, sequence: i64) {
        self.fail_insert_at.store(sequence, Ordering::SeqCst);
    }

    pub fn fail_load(&self, fail: bool) {
        self.fail_load.store(fail, Ordering::SeqCst);
    }

    pub fn fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    /// Drop one chunk behind the service's back.
    pub fn remove_chunk(&self, file_id: Uuid, sequence: i64) {
        self.chunks
            .lock()
            .unwrap()
            .retain(|_, c| !(c.file_id == file_id && c.sequence == sequence));
    }

    /// Insert a chunk without going through the fault hooks.
    pub fn put_raw(&self, chunk: ChunkRecord) {
        self.chunks.lock().unwrap().insert(chunk.id, chunk);
    }

    pub fn chunks_for(&self, file_id: Uuid) -> Vec<ChunkRecord> {
        let mut chunks: Vec<ChunkRecord> = self
            .chunks
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.file_id == file_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.sequence);
        chunks
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn insert_chunk(&self, chunk: &ChunkRecord) -> StoreResult<()> {
        if self.fail_insert_at.load(Ordering::SeqCst) == chunk.sequence {
            return Err(StoreError::Backend("injected chunk write failure".into()));
        }
        self.put_raw(chunk.clone());
        Ok(())
    }

    async fn list_chunks(&self, file_id: Uuid) -> StoreResult<Vec<ChunkInfo>> {
        let mut infos: Vec<ChunkInfo> = self
            .chunks
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.file_id == file_id)
            .map(ChunkRecord::info)
            .collect();
        infos.sort_by_key(|c| std::cmp::Reverse(c.sequence));
        Ok(infos)
    }

    async fn load_chunk(&self, chunk_id: Uuid) -> StoreResult<Option<ChunkRecord>> {
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected chunk read failure".into()));
        }
        Ok(self.chunks.lock().unwrap().get(&chunk_id).cloned())
    }

    async fn delete_chunks(&self, file_id: Uuid) -> StoreResult<u64> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected chunk delete failure".into()));
        }
        let mut chunks = self.chunks.lock().unwrap();
        let before = chunks.len();
        chunks.retain(|_, c| c.file_id != file_id);
        Ok((before - chunks.len()) as u64)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryCatalog {
    files: Mutex<HashMap<Uuid, FileRecord>>,
    fail_delete: AtomicBool,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MetadataCatalog for MemoryCatalog {
    async fn create_file(&self, file: &FileRecord) -> StoreResult<()> {
        self.files.lock().unwrap().insert(file.id, file.clone());
        Ok(())
    }

    async fn complete_file(
        &self,
        id: Uuid,
        completion: &FileCompletion,
    ) -> StoreResult<FileRecord> {
        let mut files = self.files.lock().unwrap();
        let file = files.get_mut(&id).ok_or(StoreError::MissingRecord(id))?;
        file.size = completion.size;
        file.chunk_count = Some(completion.chunk_count);
        file.md5 = Some(completion.md5.clone());
        file.path = Some(completion.path.clone());
        file.data_path = Some(completion.data_path.clone());
        Ok(file.clone())
    }

    async fn get_file(&self, id: Uuid) -> StoreResult<Option<FileRecord>> {
        Ok(self.files.lock().unwrap().get(&id).cloned())
    }

    async fn record_download(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<FileRecord>> {
        let mut files = self.files.lock().unwrap();
        Ok(files.get_mut(&id).map(|file| {
            file.download_count += 1;
            file.latest_download = Some(at);
            file.clone()
        }))
    }

    async fn list_files(&self, offset: i64, limit: i64) -> StoreResult<Vec<FileRecord>> {
        let mut files: Vec<FileRecord> = self.files.lock().unwrap().values().cloned().collect();
        files.sort_by(|a, b| b.upload_date.cmp(&a.upload_date));
        Ok(files
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count_files(&self) -> StoreResult<i64> {
        Ok(self.files.lock().unwrap().len() as i64)
    }

    async fn delete_file(&self, id: Uuid) -> StoreResult<bool> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected metadata delete failure".into()));
        }
        Ok(self.files.lock().unwrap().remove(&id).is_some())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
