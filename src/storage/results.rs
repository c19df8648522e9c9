//! Storage result types
//!
//! Defines result structures returned by storage operations.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::storage::resolver::ResolvedPath;

/// One directory entry as the frontend sees it
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
    pub ext: String,
}

impl FileEntry {
    pub fn from_metadata(name: &str, path: String, metadata: &Metadata) -> Self {
        let is_dir = metadata.is_dir();
        let mod_time = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| DateTime::<Utc>::from(UNIX_EPOCH));

        Self {
            name: name.to_string(),
            path,
            is_dir,
            size: if is_dir { 0 } else { metadata.len() },
            mod_time,
            ext: extension_of(name),
        }
    }
}

/// Extension with its leading dot, empty when there is none
pub fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

/// Where a copy or move ended up
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferResult {
    #[serde(rename = "source")]
    pub source_id: String,
    pub path: String,
}

impl From<&ResolvedPath> for TransferResult {
    fn from(resolved: &ResolvedPath) -> Self {
        Self {
            source_id: resolved.source_id().to_string(),
            path: resolved.relative().to_string(),
        }
    }
}

/// Result of preparing an upload: final target plus the temporary file the
/// bytes are streamed into first
#[derive(Debug, Clone)]
pub struct UploadTarget {
    pub target: ResolvedPath,
    pub temp_path: PathBuf,
}

/// A readable regular file, checked before streaming
#[derive(Debug, Clone)]
pub struct RetrieveResult {
    pub file: ResolvedPath,
    pub entry: FileEntry,
}

/// Disk usage for the filesystem holding a source root
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageInfo {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub path: String,
}
