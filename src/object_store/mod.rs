mod gcs;
pub mod key;
mod local;
pub mod sniff;

pub use gcs::GcsStore;
pub use key::{validate_key, KeyError};
pub use local::LocalStore;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncRead;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("Invalid object key: {0}")]
    InvalidKey(#[from] KeyError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Readable handle returned by [`ObjectStore::get`].
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Source stream handed to [`ObjectStore::put`].
pub type UploadSource<'a> = &'a mut (dyn AsyncRead + Send + Unpin);

/// Abstraction over object storage backends.
///
/// `put` streams its input and overwrites any object already stored under
/// the key; readers never observe a partially written object. `get` and
/// `delete` report a missing key as [`ObjectStoreError::NotFound`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn name(&self) -> &'static str;
    async fn put(
        &self,
        key: &str,
        content_type: &str,
        data: UploadSource<'_>,
    ) -> Result<(), ObjectStoreError>;
    async fn get(&self, key: &str) -> Result<ObjectReader, ObjectStoreError>;
    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;
}
