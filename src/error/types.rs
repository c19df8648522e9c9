//! Error types
//!
//! Domain error types for the storage layer and for server startup.

use std::io;
use std::net::AddrParseError;
use thiserror::Error;

/// Errors produced by path resolution and filesystem operations.
///
/// String payloads carry the caller's relative path (or source id). They are
/// safe to echo; raw OS detail lives only in the wrapped `io::Error`.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Source not found or disabled: {0}")]
    SourceNotFound(String),

    #[error("Path escapes source root: {0}")]
    PathEscape(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Is a directory: {0}")]
    IsADirectory(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Rename failed for {path}: {source}")]
    RenameFailed {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Upload exceeds the {limit} byte limit")]
    FileTooLarge { limit: u64 },

    #[error("Copied to {destination} but removing the source failed: {source}")]
    PartialMoveFailure {
        destination: String,
        #[source]
        source: io::Error,
    },

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl StorageError {
    /// Classify an `io::Error` raised while touching `path`
    pub fn io(path: &str, error: io::Error) -> Self {
        match error.kind() {
            // a path running through a regular file names nothing
            io::ErrorKind::NotFound | io::ErrorKind::NotADirectory => {
                StorageError::NotFound(path.to_string())
            }
            io::ErrorKind::PermissionDenied => StorageError::PermissionDenied(path.to_string()),
            io::ErrorKind::AlreadyExists => StorageError::AlreadyExists(path.to_string()),
            _ => StorageError::Io(error),
        }
    }

    /// Short message that is safe to send to clients
    pub fn public_message(&self) -> String {
        match self {
            StorageError::SourceNotFound(id) if id.is_empty() => {
                "No source is configured".to_string()
            }
            StorageError::SourceNotFound(id) => format!("Source not found or disabled: {id}"),
            StorageError::PathEscape(_) => "Invalid path".to_string(),
            StorageError::InvalidName(_) => "Invalid name".to_string(),
            StorageError::InvalidRequest(msg) => msg.clone(),
            StorageError::NotFound(path) => format!("Not found: {path}"),
            StorageError::NotADirectory(path) => format!("Not a directory: {path}"),
            StorageError::IsADirectory(path) => format!("Is a directory: {path}"),
            StorageError::AlreadyExists(path) => format!("Already exists: {path}"),
            StorageError::PermissionDenied(path) => format!("Permission denied: {path}"),
            StorageError::RenameFailed { path, .. } => format!("Failed to rename {path}"),
            StorageError::FileTooLarge { limit } => {
                format!("File too large (limit {limit} bytes)")
            }
            StorageError::PartialMoveFailure { destination, .. } => format!(
                "Copied to {destination} but the source could not be removed"
            ),
            StorageError::Unsupported(what) => format!("Not supported: {what}"),
            StorageError::Io(_) => "Filesystem operation failed".to_string(),
        }
    }
}

/// Errors that stop the server from starting
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid bind address: {0}")]
    Address(#[from] AddrParseError),

    #[error("Source setup failed: {0}")]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
