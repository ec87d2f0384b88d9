use axum::body::Body;
use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::TryStreamExt;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::io::{ReaderStream, StreamReader};

use super::{multipart_error, storage_error};
use crate::api::response::{ApiError, JSend};
use crate::inspect::{self, FileMetadata};
use crate::object_store::ObjectStoreError;
use crate::storage::{generate_key, PRINT_FILE_EXTENSIONS};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    /// Generated object key the file is stored under.
    pub key: String,
    /// Name the client uploaded the file as.
    pub file_name: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Stream the `file` field straight into storage under a generated key.
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<JSend<UploadResponse>>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(&e))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field
            .file_name()
            .map(|s| s.to_string())
            .ok_or_else(|| ApiError::bad_request("file field must carry a file name"))?;

        let key = generate_key(&file_name).ok_or_else(|| {
            ApiError::bad_request(format!(
                "unsupported file type, expected one of: {}",
                PRINT_FILE_EXTENSIONS.join(", ")
            ))
        })?;

        let content = StreamReader::new(Box::pin(field.map_err(std::io::Error::other)));
        state
            .storage
            .store(&key, content)
            .await
            .map_err(upload_error)?;

        tracing::debug!(key = %key, file_name = %file_name, "Uploaded print file");
        return Ok(JSend::success(UploadResponse { key, file_name }));
    }

    Err(ApiError::bad_request("file field is required"))
}

/// Return the preview for the uploaded `file` field without storing it.
pub async fn preview_file(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<JSend<FileMetadata>>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(&e))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        let data = field.bytes().await.map_err(|e| multipart_error(&e))?;

        if data.len() as u64 > state.config.max_upload_size {
            return Err(ApiError::payload_too_large(format!(
                "File exceeds maximum upload size of {} bytes",
                state.config.max_upload_size
            )));
        }

        let metadata = tokio::task::spawn_blocking(move || inspect::inspect(&file_name, &data))
            .await
            .map_err(|e| ApiError::internal(format!("Preview task failed: {e}")))?
            .map_err(|e| ApiError::unprocessable(e.to_string()))?;

        tracing::debug!(file_type = metadata.kind().as_str(), "Built file preview");
        return Ok(JSend::success(metadata));
    }

    Err(ApiError::bad_request("file field is required"))
}

pub async fn download_file(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    let reader = state.storage.fetch(&key).await.map_err(storage_error)?;

    let body = Body::from_stream(ReaderStream::new(reader));
    let mut response = (StatusCode::OK, body).into_response();
    let headers = response.headers_mut();

    let content_type = mime_guess::from_path(&key).first_or_octet_stream();
    if let Ok(value) = HeaderValue::from_str(content_type.essence_str()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{key}\"")) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok(response)
}

pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<JSend<()>>, ApiError> {
    state.storage.delete(&key).await.map_err(storage_error)?;

    tracing::debug!(key = %key, "Deleted print file");
    Ok(JSend::success(()))
}

// ============================================================================
// Helpers
// ============================================================================

/// A failed upload stream surfaces as an IO error wrapping the multipart error.
fn upload_error(e: ObjectStoreError) -> ApiError {
    if let ObjectStoreError::Io(io) = &e {
        if let Some(multipart) = io
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<MultipartError>())
        {
            return multipart_error(multipart);
        }
    }
    storage_error(e)
}
