//! Request handlers
//!
//! One handler per route. Filesystem work runs on the blocking pool; the
//! handlers only translate between HTTP and [`Storage`](crate::storage::Storage)
//! calls.

use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::Response;
use log::{error, warn};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::error::StorageError;
use crate::protocol::extract::{ApiJson, ApiQuery};
use crate::protocol::requests::{
    CreateRequest, DeleteRequest, PathQuery, RenameRequest, ServeQuery, SourceQuery,
    TransferRequest, UploadQuery,
};
use crate::protocol::responses::{ApiError, ApiResponse};
use crate::server::AppState;
use crate::settings::UserSettings;
use crate::sources::Source;
use crate::storage::{FileEntry, StorageInfo, TransferResult};
use crate::transfer::{Disposition, Preview, UploadWriter, file_response, read_preview};

type ApiResult<T> = Result<ApiResponse<T>, ApiError>;

/// Run blocking filesystem work off the async runtime
async fn run_blocking<T, F>(
    state: &Arc<AppState>,
    operation: &'static str,
    work: F,
) -> Result<T, ApiError>
where
    F: FnOnce(&AppState) -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
{
    let state = Arc::clone(state);
    let joined = tokio::task::spawn_blocking(move || work(&state)).await;

    match joined {
        Ok(result) => result.map_err(|e| ApiError::from_storage(operation, e)),
        Err(e) => {
            error!("{operation} task failed: {e}");
            Err(ApiError::internal())
        }
    }
}

pub async fn sources(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Source>> {
    let sources = state.storage.registry().enabled().cloned().collect();
    Ok(ApiResponse::data(sources))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<PathQuery>,
) -> ApiResult<Vec<FileEntry>> {
    let entries = run_blocking(&state, "list", move |state| {
        state
            .storage
            .list_directory(query.source.as_deref(), &query.path)
    })
    .await?;
    Ok(ApiResponse::data(entries))
}

pub async fn info(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<PathQuery>,
) -> ApiResult<FileEntry> {
    let entry = run_blocking(&state, "info", move |state| {
        state.storage.info(query.source.as_deref(), &query.path)
    })
    .await?;
    Ok(ApiResponse::data(entry))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<CreateRequest>,
) -> ApiResult<Value> {
    let is_dir = request.is_dir;
    run_blocking(&state, "create", move |state| {
        state
            .storage
            .create(request.source.as_deref(), &request.path, request.is_dir)
    })
    .await?;

    let message = if is_dir {
        "Folder created successfully"
    } else {
        "File created successfully"
    };
    Ok(ApiResponse::message(message))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<DeleteRequest>,
) -> ApiResult<Value> {
    run_blocking(&state, "delete", move |state| {
        state.storage.delete(request.source.as_deref(), &request.path)
    })
    .await?;
    Ok(ApiResponse::message("Deleted successfully"))
}

pub async fn rename(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<RenameRequest>,
) -> ApiResult<TransferResult> {
    let renamed = run_blocking(&state, "rename", move |state| {
        state.storage.rename(
            request.source.as_deref(),
            &request.path,
            &request.new_name,
        )
    })
    .await?;
    Ok(ApiResponse::data(renamed).with_message("Renamed successfully"))
}

pub async fn copy(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<TransferRequest>,
) -> ApiResult<TransferResult> {
    let copied = run_blocking(&state, "copy", move |state| {
        state.storage.copy(
            request.source_id.as_deref(),
            &request.source_path,
            request.dest_id.as_deref(),
            &request.destination,
        )
    })
    .await?;
    Ok(ApiResponse::data(copied).with_message("Copied successfully"))
}

pub async fn move_item(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<TransferRequest>,
) -> ApiResult<TransferResult> {
    let moved = run_blocking(&state, "move", move |state| {
        state.storage.move_entry(
            request.source_id.as_deref(),
            &request.source_path,
            request.dest_id.as_deref(),
            &request.destination,
        )
    })
    .await?;
    Ok(ApiResponse::data(moved).with_message("Moved successfully"))
}

/// Multipart upload of the `file` field into `?path=`
pub async fn upload(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<UploadQuery>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Value> {
    let mut multipart = multipart.map_err(|rejection| {
        warn!("Rejected upload: {}", rejection.body_text());
        ApiError::invalid_request()
    })?;

    while let Some(mut field) = multipart.next_field().await.map_err(|e| {
        warn!("Malformed multipart body: {e}");
        ApiError::invalid_request()
    })? {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        let source = query.source.clone();
        let dir = query.path.clone();
        let upload = run_blocking(&state, "upload", move |state| {
            state
                .storage
                .prepare_upload(source.as_deref(), &dir, &file_name)
        })
        .await?;

        let path = upload.target.relative().to_string();
        let name = upload.target.file_name().unwrap_or_default().to_string();

        let mut writer = UploadWriter::create(upload, state.config.max_upload_size_bytes())
            .await
            .map_err(|e| ApiError::from_storage("upload", e))?;
        while let Some(chunk) = field.chunk().await.map_err(|e| {
            warn!("Upload of {path} interrupted: {e}");
            ApiError::invalid_request()
        })? {
            writer
                .write_chunk(&chunk)
                .await
                .map_err(|e| ApiError::from_storage("upload", e))?;
        }
        writer
            .finish()
            .await
            .map_err(|e| ApiError::from_storage("upload", e))?;

        return Ok(ApiResponse::data(json!({ "path": path, "name": name }))
            .with_message("File uploaded successfully"));
    }

    Err(ApiError::new(StatusCode::BAD_REQUEST, "No file provided"))
}

pub async fn preview(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<PathQuery>,
) -> ApiResult<Preview> {
    let preview = run_blocking(&state, "preview", move |state| {
        let retrieved = state
            .storage
            .prepare_file_retrieval(query.source.as_deref(), &query.path)
            .map_err(|e| match e {
                StorageError::IsADirectory(_) => {
                    StorageError::InvalidRequest("Cannot preview directory".into())
                }
                other => other,
            })?;
        read_preview(retrieved, state.config.preview_max_bytes)
    })
    .await?;
    Ok(ApiResponse::data(preview))
}

pub async fn serve(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiQuery(query): ApiQuery<ServeQuery>,
) -> Result<Response, ApiError> {
    let disposition = if query.download {
        Disposition::Attachment
    } else {
        Disposition::Inline
    };
    send_file(
        &state,
        "serve",
        query.source,
        query.path,
        disposition,
        headers.get(header::RANGE),
    )
    .await
}

pub async fn download(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiQuery(query): ApiQuery<PathQuery>,
) -> Result<Response, ApiError> {
    send_file(
        &state,
        "download",
        query.source,
        query.path,
        Disposition::Download,
        headers.get(header::RANGE),
    )
    .await
}

async fn send_file(
    state: &Arc<AppState>,
    operation: &'static str,
    source: Option<String>,
    path: String,
    disposition: Disposition,
    range: Option<&HeaderValue>,
) -> Result<Response, ApiError> {
    let retrieved = run_blocking(state, operation, move |state| {
        state
            .storage
            .prepare_file_retrieval(source.as_deref(), &path)
    })
    .await?;

    file_response(&retrieved, disposition, range, state.storage.options().buffer_size)
        .await
        .map_err(|e| ApiError::from_storage(operation, e))
}

pub async fn storage(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<SourceQuery>,
) -> ApiResult<StorageInfo> {
    let usage = run_blocking(&state, "storage", move |state| {
        state.storage.disk_usage(query.source.as_deref())
    })
    .await?;
    Ok(ApiResponse::data(usage))
}

pub async fn get_settings(State(state): State<Arc<AppState>>) -> ApiResult<UserSettings> {
    let settings = run_blocking(&state, "settings", |state| Ok(state.settings.load())).await?;
    Ok(ApiResponse::data(settings))
}

pub async fn save_settings(
    State(state): State<Arc<AppState>>,
    ApiJson(settings): ApiJson<UserSettings>,
) -> ApiResult<UserSettings> {
    run_blocking(&state, "settings", move |state| state.settings.save(&settings)).await?;
    Ok(ApiResponse::data(settings).with_message("Settings saved"))
}

pub async fn not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "Not found")
}
