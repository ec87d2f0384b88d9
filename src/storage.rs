//! Entry point for storing, fetching and deleting uploaded print files.

use std::sync::Arc;

use tokio::io::AsyncRead;

use crate::config::{StorageConfig, StorageProvider};
use crate::object_store::sniff::{self, OCTET_STREAM};
use crate::object_store::{
    validate_key, GcsStore, LocalStore, ObjectReader, ObjectStore, ObjectStoreError,
};

/// Upload extensions accepted for print files, longest first.
pub const PRINT_FILE_EXTENSIONS: &[&str] = &[".gcode.3mf", ".3mf", ".stl"];

/// Validates keys and sniffs content before handing streams to the backend.
#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn ObjectStore>,
}

impl Storage {
    pub fn new(backend: Arc<dyn ObjectStore>) -> Self {
        Self { backend }
    }

    /// Build the backend selected by configuration.
    pub async fn from_config(config: &StorageConfig) -> Result<Self, anyhow::Error> {
        let backend: Arc<dyn ObjectStore> = match &config.provider {
            StorageProvider::Local { base_path } => {
                let store = LocalStore::new(base_path)?;
                tracing::info!(
                    path = %store.base_path().display(),
                    "Using local storage backend"
                );
                Arc::new(store)
            }
            StorageProvider::Remote {
                bucket_name,
                credentials_file,
                endpoint,
            } => {
                let store = GcsStore::new(
                    bucket_name,
                    credentials_file.as_deref(),
                    endpoint.as_deref(),
                )
                .await?;
                tracing::info!(bucket = %bucket_name, "Using GCS storage backend");
                Arc::new(store)
            }
        };

        Ok(Self::new(backend))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Stream `content` into the backend under `key`, replacing any
    /// existing object.
    pub async fn store<R>(&self, key: &str, content: R) -> Result<(), ObjectStoreError>
    where
        R: AsyncRead + Send + Unpin,
    {
        validate_key(key)?;

        let (sniffed, mut replay) = sniff::sniff(content).await?;
        let content_type = best_guess_content_type(key, sniffed);

        self.backend.put(key, &content_type, &mut replay).await?;
        tracing::info!(key, content_type = %content_type, "Stored object");
        Ok(())
    }

    pub async fn fetch(&self, key: &str) -> Result<ObjectReader, ObjectStoreError> {
        validate_key(key)?;
        self.backend.get(key).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        validate_key(key)?;
        self.backend.delete(key).await?;
        tracing::info!(key, "Deleted object");
        Ok(())
    }
}

/// Prefer the sniffed type; fall back to the key's extension when sniffing
/// could only say "binary".
fn best_guess_content_type(key: &str, sniffed: &str) -> String {
    if sniffed != OCTET_STREAM {
        return sniffed.to_string();
    }

    mime_guess::from_path(key)
        .first()
        .map(|m| m.to_string())
        .unwrap_or_else(|| OCTET_STREAM.to_string())
}

/// The print-file extension of `file_name`, lowercased, if it is one we accept.
pub fn print_file_extension(file_name: &str) -> Option<&'static str> {
    let lower = file_name.to_lowercase();
    PRINT_FILE_EXTENSIONS
        .iter()
        .copied()
        .find(|ext| lower.ends_with(ext) && lower.len() > ext.len())
}

/// Generate a collision-resistant key for an uploaded print file, keeping
/// its extension. Returns `None` for unsupported file types.
pub fn generate_key(file_name: &str) -> Option<String> {
    print_file_extension(file_name).map(|ext| format!("{}{ext}", uuid::Uuid::new_v4()))
}
