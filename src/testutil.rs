//! Shared test helpers for spool-files unit tests.

use std::sync::Arc;

use crate::config::{Config, StorageConfig, StorageProvider};
use crate::object_store::LocalStore;
use crate::storage::Storage;
use crate::AppState;

/// Create a test AppState backed by a local object store in `temp_dir`.
pub fn test_state(temp_dir: &tempfile::TempDir) -> Arc<AppState> {
    let files_dir = temp_dir.path().join("files");

    let config = Config {
        bind_address: "127.0.0.1:0".to_string(),
        max_upload_size: 10 * 1024 * 1024, // 10MB for tests
        storage: StorageConfig {
            provider: StorageProvider::Local {
                base_path: files_dir.to_string_lossy().to_string(),
            },
        },
    };

    let store = LocalStore::new(&files_dir).expect("Failed to create test object store");

    Arc::new(AppState {
        config,
        storage: Storage::new(Arc::new(store)),
    })
}

/// Build a `multipart/form-data` body with a single file field.
///
/// Returns the `Content-Type` header value and the encoded body.
pub fn multipart_body(field: &str, file_name: &str, data: &[u8]) -> (String, Vec<u8>) {
    let boundary = format!("test-boundary-{}", uuid::Uuid::new_v4().simple());

    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    (format!("multipart/form-data; boundary={boundary}"), body)
}
