use crate::services::{drive_service::DriveError, object_store::StoreError};
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use std::fmt;

/// Stable machine-readable failure category exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    QuotaExceeded,
    InvalidPath,
    BadRequest,
    UploadFailed,
    StoreError,
    Timeout,
    Internal,
}

impl ErrorCode {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::QuotaExceeded => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCode::InvalidPath | ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCode::UploadFailed | ErrorCode::StoreError => StatusCode::BAD_GATEWAY,
            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A lightweight wrapper for request failures that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific code and message.
    pub fn new(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self {
            code,
            message: msg.into(),
        }
    }

    /// Shortcut for a malformed request.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.code.status();
        if status.is_server_error() {
            tracing::error!(code = ?self.code, "{}", self.message);
        }
        let body = Json(json!({
            "success": false,
            "error": self.message,
            "code": self.code,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<DriveError> for AppError {
    fn from(err: DriveError) -> Self {
        let code = match &err {
            DriveError::NotFound(_) | DriveError::Store(StoreError::NotFound(_)) => {
                ErrorCode::NotFound
            }
            DriveError::QuotaExceeded { .. } => ErrorCode::QuotaExceeded,
            DriveError::InvalidPath(_) | DriveError::Store(StoreError::InvalidKey(_)) => {
                ErrorCode::InvalidPath
            }
            DriveError::Store(StoreError::InvalidToken) => ErrorCode::BadRequest,
            DriveError::Upload {
                source: StoreError::InvalidKey(_),
                ..
            } => ErrorCode::InvalidPath,
            DriveError::Upload { .. } => ErrorCode::UploadFailed,
            DriveError::Timeout { .. } => ErrorCode::Timeout,
            DriveError::Store(_) => ErrorCode::StoreError,
        };
        AppError::new(code, err.to_string())
    }
}

/// Malformed multipart bodies are the client's fault; anything axum reports
/// as a server error while reading the body is ours.
impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        let code = if err.status().is_server_error() {
            ErrorCode::Internal
        } else {
            ErrorCode::BadRequest
        };
        AppError::new(code, err.body_text())
    }
}
