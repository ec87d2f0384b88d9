mod files;
mod health;

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;

use crate::api::response::ApiError;
use crate::object_store::ObjectStoreError;

pub use files::{delete_file, download_file, preview_file, upload_file};
pub use health::health;

/// Map an ObjectStoreError to an ApiError
fn storage_error(e: ObjectStoreError) -> ApiError {
    match e {
        ObjectStoreError::InvalidKey(e) => ApiError::bad_request(e.to_string()),
        ObjectStoreError::NotFound(_) => ApiError::not_found("File not found"),
        _ => ApiError::internal(format!("Storage failure: {e}")),
    }
}

/// Map a MultipartError to an ApiError, keeping body-limit rejections as 413
fn multipart_error(e: &MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::payload_too_large(format!("Upload exceeds maximum size: {e}"))
    } else {
        ApiError::bad_request(format!("Invalid multipart data: {e}"))
    }
}
