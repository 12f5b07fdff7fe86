use crate::services::file_service::{IngestError, StorageError};
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::{fmt, io};
use uuid::Uuid;

/// Error returned by every HTTP handler.
///
/// Carries the file id when a storage failure left (or touched) a specific
/// record, so callers can retry a delete or inspect a partial upload.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub file_id: Option<Uuid>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    status: u16,
    #[serde(rename = "fileId", skip_serializing_if = "Option::is_none")]
    file_id: Option<Uuid>,
}

impl AppError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            file_id: None,
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    fn with_file(mut self, file_id: Uuid) -> Self {
        self.file_id = Some(file_id);
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.file_id {
            Some(id) => write!(f, "{} (file {})", self.message, id),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, file_id = ?self.file_id, "{}", self.message);
        }
        let body = ErrorBody {
            error: &self.message,
            status: self.status.as_u16(),
            file_id: self.file_id,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        let status = match &err {
            StorageError::NotFound(_) => StatusCode::NOT_FOUND,
            StorageError::InvalidChunkSize(_) => StatusCode::BAD_REQUEST,
            StorageError::IngestFailure {
                source: IngestError::Read(read_err),
                ..
            } => rejected_upload_status(read_err).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let mut app_err = AppError::new(status, err.to_string());
        if let Some(file_id) = err.file_id() {
            app_err = app_err.with_file(file_id);
        }
        app_err
    }
}

/// Status of an upload body the multipart layer refused, such as one over
/// the configured body limit.
fn rejected_upload_status(err: &io::Error) -> Option<StatusCode> {
    err.get_ref()?
        .downcast_ref::<MultipartError>()
        .map(MultipartError::status)
}
