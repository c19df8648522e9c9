//! Inline previews of small text files

use log::debug;
use serde::Serialize;
use std::fs;

use crate::error::StorageError;
use crate::storage::{FileEntry, RetrieveResult};

/// Leading bytes inspected when deciding whether a file is text
const SNIFF_LEN: usize = 512;

#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    pub info: FileEntry,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Text unless a NUL byte shows up in the first 512 bytes
pub fn is_text_content(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(SNIFF_LEN)];
    !head.contains(&0)
}

/// Build the preview for a resolved file. Files at or above `max_bytes`, and
/// binary files, come back with metadata only.
pub fn read_preview(retrieved: RetrieveResult, max_bytes: u64) -> Result<Preview, StorageError> {
    let RetrieveResult { file, entry } = retrieved;

    if entry.size >= max_bytes {
        debug!("{} too large for inline preview", file.relative());
        return Ok(Preview {
            info: entry,
            content: None,
        });
    }

    let bytes = fs::read(file.as_path()).map_err(|e| StorageError::io(file.relative(), e))?;
    let content = if is_text_content(&bytes) {
        Some(String::from_utf8_lossy(&bytes).into_owned())
    } else {
        debug!("{} looks binary, skipping content", file.relative());
        None
    };

    Ok(Preview {
        info: entry,
        content,
    })
}
