//! HTTP handlers for file operations.
//! Uploads and downloads stream through the chunk engine without buffering
//! whole files; everything else is a thin JSON wrapper over `FileService`.

use crate::{
    errors::AppError,
    models::file::{FilePage, FileRecord, NewFile},
    services::file_service::FileService,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use serde::Deserialize;
use serde_json::json;
use std::io;
use tokio_util::io::{ReaderStream, StreamReader};

/// Buffer between the chunk engine and the response body.
const DOWNLOAD_PIPE_BYTES: usize = 64 * 1024;

/// Query params for `GET /files`.
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub current: Option<u32>,
    #[serde(rename = "pageSize")]
    pub page_size: Option<u32>,
}

/// Query params for `POST /files/upload`.
#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    #[serde(rename = "chunkSize")]
    pub chunk_size: Option<usize>,
}

/// Query params for `GET /files/all`.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// GET `/files`: one page of files, newest first.
pub async fn page_files(
    State(service): State<FileService>,
    Query(q): Query<PageQuery>,
) -> Result<Json<FilePage>, AppError> {
    Ok(Json(service.page_files(q.current, q.page_size).await?))
}

/// GET `/files/all`: files newest first by limit/offset.
pub async fn list_files(
    State(service): State<FileService>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<FileRecord>>, AppError> {
    Ok(Json(service.list_files(q.limit, q.offset).await?))
}

/// GET `/files/{id}`: file metadata.
pub async fn file_info(
    State(service): State<FileService>,
    Path(id): Path<String>,
) -> Result<Json<FileRecord>, AppError> {
    Ok(Json(service.get_file_info(&id).await?))
}

/// GET `/files/data/{id}`: stream the file content.
///
/// The chunk set is checked before the response starts, so missing or
/// inconsistent chunks still come back as an error status. The engine then
/// writes into one end of an in-memory pipe while the response body drains
/// the other. A client that disconnects breaks the pipe, which fails the
/// retrieval before the download is counted.
pub async fn file_data(
    State(service): State<FileService>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let prepared = service.prepare_retrieval(&id).await?;
    let meta = prepared.file.clone();

    let (writer, reader) = tokio::io::duplex(DOWNLOAD_PIPE_BYTES);
    tokio::spawn(async move {
        let file_id = prepared.file.id;
        if let Err(err) = service.send(prepared, writer).await {
            tracing::warn!("download of {} did not complete: {}", file_id, err);
        }
    });

    let mut response = Response::new(Body::from_stream(ReaderStream::new(reader)));
    *response.status_mut() = StatusCode::OK;
    set_download_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// POST `/files/upload`: multipart upload, content in the `file` field.
///
/// `?chunkSize=` overrides the configured chunk size for this file.
pub async fn upload_file(
    State(service): State<FileService>,
    Query(q): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::new(e.status(), format!("Multipart error: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let upload = NewFile {
            name: field.file_name().unwrap_or("upload").to_string(),
            content_type: field.content_type().map(str::to_string),
            declared_size: None,
        };
        let source = StreamReader::new(Box::pin(field.map_err(io::Error::other)));
        let file = service.ingest(upload, source, q.chunk_size).await?;
        return Ok((StatusCode::OK, Json(file)));
    }

    Err(AppError::bad_request("multipart field `file` is required"))
}

/// POST `/files/{id}/copy`: duplicate a file under a new id.
pub async fn copy_file(
    State(service): State<FileService>,
    Path(id): Path<String>,
) -> Result<Json<FileRecord>, AppError> {
    Ok(Json(service.copy(&id).await?))
}

/// DELETE `/files/{id}`: remove a file and all of its chunks.
pub async fn delete_file(
    State(service): State<FileService>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    service.delete(&id).await?;
    Ok(Json(json!({
        "code": 0,
        "message": "success",
        "data": id,
    })))
}

fn set_download_headers(headers: &mut HeaderMap, meta: &FileRecord) {
    let content_type = meta
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    // Unfinished uploads only know their declared size.
    if meta.is_complete() {
        if let Ok(value) = HeaderValue::from_str(&meta.size.max(0).to_string()) {
            headers.insert(header::CONTENT_LENGTH, value);
        }
    }

    if let Ok(value) = HeaderValue::from_str(&content_disposition(&meta.name)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    if let Some(md5) = meta.md5.as_ref() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", md5)) {
            headers.insert(header::ETAG, value);
        }
    }
}

/// `attachment` disposition with an RFC 5987 encoded filename.
fn content_disposition(filename: &str) -> String {
    let encoded: String = filename
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'!'
            | b'#'
            | b'$'
            | b'&'
            | b'+'
            | b'-'
            | b'.'
            | b'^'
            | b'_'
            | b'`'
            | b'|'
            | b'~' => String::from(b as char),
            _ => format!("%{b:02X}"),
        })
        .collect();
    format!("attachment; filename*=UTF-8''{encoded}")
}
