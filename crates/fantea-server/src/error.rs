//! HTTP error types for the Fantea content service.
//!
//! Maps domain errors from `fantea-core` into HTTP responses. Every error
//! produces `{"success": false, "error": "<message>"}`; I/O failures carry
//! the raw underlying message.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use fantea_core::error::{AuthError, StoreError, UploadError};

/// Application-level error returned from HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// Client sent invalid input.
    BadRequest(String),
    /// Login failed.
    Unauthorized(String),
    /// The caller lacks a permission.
    Forbidden(String),
    /// A conditional write lost the race.
    Conflict(String),
    /// The request body exceeds a limit.
    PayloadTooLarge(String),
    /// Disk or storage failure.
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            Self::Internal(msg) => {
                error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = ErrorBody {
            success: false,
            error: message,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidSection { .. } | StoreError::NotAnObject { .. } => {
                Self::BadRequest(err.to_string())
            }
            StoreError::RevisionConflict { .. } => Self::Conflict(err.to_string()),
            StoreError::Corrupt { .. } | StoreError::Backup { .. } | StoreError::Storage(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::InvalidData { .. }
            | UploadError::InvalidFilename { .. }
            | UploadError::InvalidCategory { .. } => Self::BadRequest(err.to_string()),
            UploadError::TooLarge { .. } => Self::PayloadTooLarge(err.to_string()),
            UploadError::Io { .. } => Self::Internal(err.to_string()),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials | AuthError::NotAuthenticated | AuthError::Expired { .. } => {
                Self::Unauthorized(err.to_string())
            }
            AuthError::Forbidden { .. } => Self::Forbidden(err.to_string()),
            AuthError::InvalidCredentialTable { .. } | AuthError::Backend { .. } | AuthError::Storage(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::PayloadTooLarge(rejection.body_text())
        } else {
            Self::BadRequest(rejection.body_text())
        }
    }
}
