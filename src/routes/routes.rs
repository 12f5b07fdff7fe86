//! Defines routes for all file operations.
//!
//! ## Structure
//! - **Listing**
//!   - `GET    /files`          : page of files (`?current=&pageSize=`)
//!   - `GET    /files/all`      : files by `?limit=&offset=`
//!
//! - **Single file**
//!   - `GET    /files/{id}`     : file metadata
//!   - `GET    /files/data/{id}`: file content (`{id}` may carry an extension)
//!   - `POST   /files/upload`   : multipart upload (`file` field)
//!   - `POST   /files/{id}/copy`: duplicate under a new id
//!   - `DELETE /files/{id}`     : delete file and chunks

use crate::{
    handlers::{
        file_handlers::{
            copy_file, delete_file, file_data, file_info, list_files, page_files, upload_file,
        },
        health_handlers::{healthz, readyz},
    },
    services::file_service::FileService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build and return the router for all file routes.
///
/// The router carries shared state (`FileService`) to all handlers.
/// Upload bodies are capped at `max_upload_bytes`.
pub fn routes(max_upload_bytes: usize) -> Router<FileService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/files", get(page_files))
        .route("/files/all", get(list_files))
        .route(
            "/files/upload",
            post(upload_file).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/files/data/{id}", get(file_data))
        .route("/files/{id}", get(file_info).delete(delete_file))
        .route("/files/{id}/copy", post(copy_file))
}
