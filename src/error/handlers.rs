//! Error handlers
//!
//! Maps storage errors onto HTTP statuses and logs the server-side detail.

use axum::http::StatusCode;
use log::{error, warn};

use crate::error::types::StorageError;

/// Log a failed operation with its full detail
pub fn handle_error(operation: &str, err: &StorageError) {
    if error_to_status(err).is_server_error() {
        error!("{operation} failed: {err}");
    } else {
        warn!("{operation} rejected: {err}");
    }
}

/// Convert error to HTTP status code
pub fn error_to_status(err: &StorageError) -> StatusCode {
    match err {
        StorageError::SourceNotFound(_) => StatusCode::NOT_FOUND,
        StorageError::PathEscape(_) => StatusCode::BAD_REQUEST,
        StorageError::InvalidName(_) => StatusCode::BAD_REQUEST,
        StorageError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        StorageError::NotFound(_) => StatusCode::NOT_FOUND,
        StorageError::NotADirectory(_) => StatusCode::BAD_REQUEST,
        StorageError::IsADirectory(_) => StatusCode::BAD_REQUEST,
        StorageError::AlreadyExists(_) => StatusCode::CONFLICT,
        StorageError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        StorageError::RenameFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        StorageError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        StorageError::PartialMoveFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        StorageError::Unsupported(_) => StatusCode::INTERNAL_SERVER_ERROR,
        StorageError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
