use std::io;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;
use thiserror::Error;
use tracing::warn;

/// Errors raised while starting the server.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServerError {
    #[error("PROGRESS_BIND is not a socket address: {raw:?}")]
    InvalidBind { raw: String },
    #[error(transparent)]
    Storage(#[from] SqliteInitError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

/// A failed request, rendered as `{ error, code }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        let status = match &err {
            StorageError::NotFound => StatusCode::NOT_FOUND,
            StorageError::Conflict => StatusCode::CONFLICT,
            err if err.is_unavailable() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!(error = %err, %status, "durable store request failed");
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.message,
            code: self.status.as_u16(),
        };
        (self.status, Json(body)).into_response()
    }
}
