//! Core data models for the chunked file server.
//!
//! A file is stored as one `FileRecord` plus any number of `ChunkRecord`s
//! pointing back at it by id. Both map to SQLite tables via
//! `sqlx::FromRow` and serialize as JSON via `serde`.

pub mod chunk;
pub mod file;
