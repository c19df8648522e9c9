//! Streaming file transfers
//!
//! Uploads go to a temporary sibling of the target and are renamed over it
//! once the whole body has arrived. Serving and downloading stream the file
//! straight from disk, honouring a single-range `Range` header so media can
//! seek.

use axum::body::Body;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::Response;
use log::{debug, error, info, warn};
use std::io::{self, SeekFrom};
use std::path::PathBuf;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;

use crate::error::StorageError;
use crate::storage::{RetrieveResult, UploadTarget};

/// How a served file should be presented by the browser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Display in place, typed by extension
    Inline,
    /// Typed by extension but saved to disk
    Attachment,
    /// Always `application/octet-stream`, always saved
    Download,
}

/// Portion of a file asked for by a `Range` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// No usable range; send everything
    Full,
    /// Inclusive byte offsets
    Partial { start: u64, end: u64 },
    /// The range lies entirely past the end of the file
    Unsatisfiable,
}

/// Interpret a `Range` header against a file of `length` bytes.
///
/// Only a single `bytes=` range is honoured. Anything malformed, or a
/// multi-range request, is ignored and the whole file is sent.
pub fn parse_range(value: Option<&HeaderValue>, length: u64) -> ByteRange {
    let Some(ranges) = value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().strip_prefix("bytes="))
    else {
        return ByteRange::Full;
    };
    if ranges.contains(',') {
        return ByteRange::Full;
    }
    let Some((first, last)) = ranges.split_once('-') else {
        return ByteRange::Full;
    };
    let (first, last) = (first.trim(), last.trim());

    if first.is_empty() {
        // suffix form: the last N bytes
        return match last.parse::<u64>() {
            Ok(0) => ByteRange::Unsatisfiable,
            Ok(_) if length == 0 => ByteRange::Unsatisfiable,
            Ok(n) => ByteRange::Partial {
                start: length.saturating_sub(n),
                end: length - 1,
            },
            Err(_) => ByteRange::Full,
        };
    }

    let Ok(start) = first.parse::<u64>() else {
        return ByteRange::Full;
    };
    let end = if last.is_empty() {
        u64::MAX
    } else {
        match last.parse::<u64>() {
            Ok(end) if end >= start => end,
            _ => return ByteRange::Full,
        }
    };

    if start >= length {
        ByteRange::Unsatisfiable
    } else {
        ByteRange::Partial {
            start,
            end: end.min(length - 1),
        }
    }
}

/// Writes one upload into its temporary file.
///
/// Dropping the writer before [`UploadWriter::finish`] removes the temporary
/// file, so an aborted request never leaves one behind.
#[derive(Debug)]
pub struct UploadWriter {
    file: Option<File>,
    temp_path: PathBuf,
    upload: UploadTarget,
    written: u64,
    limit: u64,
}

impl UploadWriter {
    /// Open the temporary file. Every upload gets its own temporary, so
    /// uploads of the same name never block each other; the last one to
    /// finish wins.
    pub async fn create(upload: UploadTarget, limit: u64) -> Result<Self, StorageError> {
        let relative = upload.target.relative().to_string();
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&upload.temp_path)
            .await
            .map_err(|e| {
                error!(
                    "Failed to create temporary file {}: {}",
                    upload.temp_path.display(),
                    e
                );
                StorageError::io(&relative, e)
            })?;

        debug!(
            "Receiving upload {} -> {}",
            upload.temp_path.display(),
            upload.target.as_path().display()
        );
        Ok(Self {
            file: Some(file),
            temp_path: upload.temp_path.clone(),
            upload,
            written: 0,
            limit,
        })
    }

    /// Append one chunk, failing fast once the size limit is crossed
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), StorageError> {
        self.written += chunk.len() as u64;
        if self.written > self.limit {
            warn!(
                "Upload of {} exceeds the {} byte limit",
                self.upload.target.relative(),
                self.limit
            );
            return Err(StorageError::FileTooLarge { limit: self.limit });
        }

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::other("upload already finished"))?;
        file.write_all(chunk).await.map_err(|e| {
            error!(
                "Failed to write to temporary file {}: {}",
                self.temp_path.display(),
                e
            );
            StorageError::io(self.upload.target.relative(), e)
        })
    }

    /// Flush and rename the temporary file over the target
    pub async fn finish(mut self) -> Result<u64, StorageError> {
        let relative = self.upload.target.relative().to_string();
        if let Some(mut file) = self.file.take() {
            file.flush()
                .await
                .map_err(|e| StorageError::io(&relative, e))?;
            file.sync_all()
                .await
                .map_err(|e| StorageError::io(&relative, e))?;
        }

        fs::rename(&self.temp_path, self.upload.target.as_path())
            .await
            .map_err(|e| {
                error!(
                    "Failed to rename {} to {}: {}",
                    self.temp_path.display(),
                    self.upload.target.as_path().display(),
                    e
                );
                StorageError::RenameFailed {
                    path: relative.clone(),
                    source: e,
                }
            })?;

        // renamed away; nothing left to clean up
        self.temp_path = PathBuf::new();
        info!(
            "Upload completed: {}:{} ({} bytes)",
            self.upload.target.source_id(),
            relative,
            self.written
        );
        Ok(self.written)
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }
}

impl Drop for UploadWriter {
    fn drop(&mut self) {
        if self.temp_path.as_os_str().is_empty() {
            return;
        }
        drop(self.file.take());
        match std::fs::remove_file(&self.temp_path) {
            Ok(()) => debug!("Discarded temporary upload {}", self.temp_path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Could not remove temporary upload {}: {}",
                self.temp_path.display(),
                e
            ),
        }
    }
}

/// Stream a file back to the client with the headers for `disposition`.
///
/// `range` is the request's `Range` header, if any.
pub async fn file_response(
    retrieved: &RetrieveResult,
    disposition: Disposition,
    range: Option<&HeaderValue>,
    buffer_size: usize,
) -> Result<Response, StorageError> {
    let relative = retrieved.file.relative();
    let mut file = File::open(retrieved.file.as_path())
        .await
        .map_err(|e| StorageError::io(relative, e))?;
    // length from the open handle, in case the file changed since the check
    let length = file
        .metadata()
        .await
        .map_err(|e| StorageError::io(relative, e))?
        .len();

    let name = retrieved.entry.name.as_str();
    let content_type = match disposition {
        Disposition::Download => "application/octet-stream".to_string(),
        Disposition::Inline | Disposition::Attachment => mime_guess::from_path(name)
            .first_raw()
            .unwrap_or("text/plain")
            .to_string(),
    };
    let kind = match disposition {
        Disposition::Inline => "inline",
        Disposition::Attachment | Disposition::Download => "attachment",
    };

    let (status, start, count) = match parse_range(range, length) {
        ByteRange::Full => (StatusCode::OK, 0, length),
        ByteRange::Partial { start, end } => (StatusCode::PARTIAL_CONTENT, start, end - start + 1),
        ByteRange::Unsatisfiable => {
            debug!("Unsatisfiable range for {} ({} bytes)", relative, length);
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
            let headers = response.headers_mut();
            headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
            headers.insert(header::CONTENT_RANGE, content_range(None, length));
            return Ok(response);
        }
    };

    if start > 0 {
        file.seek(SeekFrom::Start(start))
            .await
            .map_err(|e| StorageError::io(relative, e))?;
    }

    info!(
        "Serving {}:{} ({} of {} bytes, {})",
        retrieved.file.source_id(),
        relative,
        count,
        length,
        kind
    );

    let stream = ReaderStream::with_capacity(file.take(count), buffer_size);
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if status == StatusCode::PARTIAL_CONTENT {
        headers.insert(
            header::CONTENT_RANGE,
            content_range(Some((start, start + count - 1)), length),
        );
    }
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_DISPOSITION, content_disposition(kind, name));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(count));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, no-cache, must-revalidate, max-age=0"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );

    Ok(response)
}

/// `bytes 0-99/1000`, or `bytes */1000` when nothing could be served
fn content_range(span: Option<(u64, u64)>, length: u64) -> HeaderValue {
    let value = match span {
        Some((start, end)) => format!("bytes {start}-{end}/{length}"),
        None => format!("bytes */{length}"),
    };
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("bytes */0"))
}

/// `inline; filename="a.txt"`, with an RFC 5987 `filename*` for names that
/// are not plain ASCII
pub fn content_disposition(kind: &str, name: &str) -> HeaderValue {
    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();

    let value = if fallback == name {
        format!("{kind}; filename=\"{name}\"")
    } else {
        format!(
            "{kind}; filename=\"{fallback}\"; filename*=UTF-8''{}",
            percent_encode(name)
        )
    };

    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len() * 3);
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || b"-._~".contains(&byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{Source, SourceRegistry, SourceType};
    use crate::storage::{Storage, StorageOptions};
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tempfile::{TempDir, tempdir};

    fn storage() -> (TempDir, Storage) {
        let temp = tempdir().unwrap();
        let root = dunce::canonicalize(temp.path()).unwrap();
        let registry = SourceRegistry::from_sources(vec![Source {
            id: "files".into(),
            name: "Files".into(),
            path: root,
            kind: SourceType::Local,
            enabled: true,
        }]);
        (temp, Storage::new(Arc::new(registry), StorageOptions::default()))
    }

    #[tokio::test]
    async fn upload_replaces_target_and_removes_temp() {
        let (temp, storage) = storage();
        std::fs::write(temp.path().join("notes.txt"), b"old").unwrap();

        let upload = storage.prepare_upload(None, "/", "notes.txt").unwrap();
        let temp_path = upload.temp_path.clone();
        let mut writer = UploadWriter::create(upload, 1024).await.unwrap();
        writer.write_chunk(b"new ").await.unwrap();
        writer.write_chunk(b"contents").await.unwrap();
        assert_eq!(writer.bytes_written(), 12);
        assert_eq!(writer.finish().await.unwrap(), 12);

        assert_eq!(
            std::fs::read(temp.path().join("notes.txt")).unwrap(),
            b"new contents"
        );
        assert!(!temp_path.exists());
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_and_cleaned_up() {
        let (temp, storage) = storage();
        let upload = storage.prepare_upload(None, "/", "big.bin").unwrap();
        let temp_path = upload.temp_path.clone();

        let mut writer = UploadWriter::create(upload, 8).await.unwrap();
        writer.write_chunk(b"12345").await.unwrap();
        let err = writer.write_chunk(b"67890").await.unwrap_err();
        assert!(matches!(err, StorageError::FileTooLarge { limit: 8 }));
        drop(writer);

        assert!(!temp_path.exists());
        assert!(!temp.path().join("big.bin").exists());
    }

    #[tokio::test]
    async fn abandoned_upload_leaves_target_untouched() {
        let (temp, storage) = storage();
        std::fs::write(temp.path().join("keep.txt"), b"original").unwrap();

        let upload = storage.prepare_upload(None, "/", "keep.txt").unwrap();
        let temp_path = upload.temp_path.clone();
        let mut writer = UploadWriter::create(upload, 1024).await.unwrap();
        writer.write_chunk(b"partial").await.unwrap();
        drop(writer);

        assert!(!temp_path.exists());
        assert_eq!(
            std::fs::read(temp.path().join("keep.txt")).unwrap(),
            b"original"
        );
    }

    #[tokio::test]
    async fn concurrent_uploads_of_same_name_both_complete() {
        let (temp, storage) = storage();
        let first = storage.prepare_upload(None, "/", "same.txt").unwrap();
        let second = storage.prepare_upload(None, "/", "same.txt").unwrap();

        let mut a = UploadWriter::create(first, 1024).await.unwrap();
        let mut b = UploadWriter::create(second, 1024).await.unwrap();
        a.write_chunk(b"first").await.unwrap();
        b.write_chunk(b"second").await.unwrap();
        a.finish().await.unwrap();
        b.finish().await.unwrap();

        assert_eq!(std::fs::read(temp.path().join("same.txt")).unwrap(), b"second");
        let names: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("same.txt")]);
    }

    #[tokio::test]
    async fn leftover_temp_files_do_not_block_uploads() {
        let (temp, storage) = storage();
        std::fs::write(temp.path().join("report.pdf"), b"old").unwrap();
        std::fs::write(temp.path().join("report.pdf.tmp"), b"someone else's file").unwrap();

        let upload = storage.prepare_upload(None, "/", "report.pdf").unwrap();
        let mut writer = UploadWriter::create(upload, 1024).await.unwrap();
        writer.write_chunk(b"new").await.unwrap();
        writer.finish().await.unwrap();

        assert_eq!(std::fs::read(temp.path().join("report.pdf")).unwrap(), b"new");
        assert_eq!(
            std::fs::read(temp.path().join("report.pdf.tmp")).unwrap(),
            b"someone else's file"
        );
    }

    #[tokio::test]
    async fn served_files_carry_headers_and_bytes() {
        let (temp, storage) = storage();
        std::fs::write(temp.path().join("page.html"), b"<p>hi</p>").unwrap();
        let retrieved = storage.prepare_file_retrieval(None, "page.html").unwrap();

        let response = file_response(&retrieved, Disposition::Inline, None, 4096)
            .await
            .unwrap();
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "text/html");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "inline; filename=\"page.html\""
        );
        assert_eq!(headers[header::CONTENT_LENGTH], "9");
        assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"<p>hi</p>");
    }

    #[tokio::test]
    async fn downloads_are_octet_stream_attachments() {
        let (temp, storage) = storage();
        std::fs::write(temp.path().join("data.json"), b"{}").unwrap();
        let retrieved = storage.prepare_file_retrieval(None, "data.json").unwrap();

        let response = file_response(&retrieved, Disposition::Download, None, 4096)
            .await
            .unwrap();
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/octet-stream"
        );
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"data.json\""
        );
    }

    #[tokio::test]
    async fn range_requests_get_partial_content() {
        let (temp, storage) = storage();
        std::fs::write(temp.path().join("clip.mp4"), b"0123456789").unwrap();
        let retrieved = storage.prepare_file_retrieval(None, "clip.mp4").unwrap();

        let range = HeaderValue::from_static("bytes=2-5");
        let response = file_response(&retrieved, Disposition::Inline, Some(&range), 4096)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 2-5/10");
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "4");
        assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"2345");

        let range = HeaderValue::from_static("bytes=20-");
        let response = file_response(&retrieved, Disposition::Inline, Some(&range), 4096)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */10");
    }

    #[test]
    fn range_header_forms() {
        let parse = |v: &'static str, len| parse_range(Some(&HeaderValue::from_static(v)), len);

        assert_eq!(parse_range(None, 10), ByteRange::Full);
        assert_eq!(parse("bytes=0-0", 10), ByteRange::Partial { start: 0, end: 0 });
        assert_eq!(parse("bytes=4-", 10), ByteRange::Partial { start: 4, end: 9 });
        assert_eq!(parse("bytes=-3", 10), ByteRange::Partial { start: 7, end: 9 });
        assert_eq!(parse("bytes=-30", 10), ByteRange::Partial { start: 0, end: 9 });
        assert_eq!(parse("bytes=5-500", 10), ByteRange::Partial { start: 5, end: 9 });
        assert_eq!(parse("bytes=10-", 10), ByteRange::Unsatisfiable);
        assert_eq!(parse("bytes=-0", 10), ByteRange::Unsatisfiable);
        assert_eq!(parse("bytes=-5", 0), ByteRange::Unsatisfiable);
        // ignored rather than rejected
        assert_eq!(parse("bytes=0-1,4-5", 10), ByteRange::Full);
        assert_eq!(parse("bytes=5-2", 10), ByteRange::Full);
        assert_eq!(parse("items=0-1", 10), ByteRange::Full);
        assert_eq!(parse("bytes=abc", 10), ByteRange::Full);
    }

    #[test]
    fn unknown_extensions_fall_back_to_text() {
        assert!(mime_guess::from_path("README").first_raw().is_none());
    }

    #[test]
    fn non_ascii_names_get_encoded_filename() {
        let value = content_disposition("attachment", "résumé \"v2\".pdf");
        assert_eq!(
            value.to_str().unwrap(),
            "attachment; filename=\"r_sum_ _v2_.pdf\"; filename*=UTF-8''r%C3%A9sum%C3%A9%20%22v2%22.pdf"
        );
    }
}
