//! HTTP error responses for the local content server.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rangefetch::FetchError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ServerErrorResponse {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ServerError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ServerError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn range_not_satisfiable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::RANGE_NOT_SATISFIABLE,
            "RANGE_NOT_SATISFIABLE",
            message,
        )
    }

    /// Data is not available yet; the player keeps buffering and retries.
    pub fn still_buffering(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "STILL_BUFFERING", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let body = ServerErrorResponse {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<FetchError> for ServerError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::InvalidRange { start, end } => {
                ServerError::bad_request(format!("invalid byte range {start}..{end}"))
            }
            err if err.is_retryable() => ServerError::still_buffering(err.to_string()),
            err => {
                tracing::error!(error = %err, "fetch error while serving request");
                ServerError::internal("fetch failed")
            }
        }
    }
}
