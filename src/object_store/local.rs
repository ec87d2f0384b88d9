use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::key::contained_path;
use super::{ObjectReader, ObjectStore, ObjectStoreError, UploadSource};

/// Local filesystem object store rooted at a single directory.
pub struct LocalStore {
    base_path: PathBuf,
}

impl LocalStore {
    /// Create the store, creating `base_path` and its parents if absent.
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(base_path.as_ref())?;
        let base_path = base_path.as_ref().canonicalize()?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, ObjectStoreError> {
        Ok(contained_path(&self.base_path, key)?)
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn put(
        &self,
        key: &str,
        content_type: &str,
        data: UploadSource<'_>,
    ) -> Result<(), ObjectStoreError> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write beside the target and rename, so the key only ever names a
        // complete object. Opened synchronously so the guard owns the file
        // before the first await.
        let (partial, file) = PartialFile::create(partial_path(&path))?;
        let mut file = fs::File::from_std(file);
        let written = tokio::io::copy(data, &mut file).await?;
        file.flush().await?;
        drop(file);

        fs::rename(partial.path(), &path).await?;
        partial.keep();

        tracing::debug!(key, content_type, bytes = written, "Stored object on local disk");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<ObjectReader, ObjectStoreError> {
        let path = self.object_path(key)?;
        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ObjectStoreError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        if !file.metadata().await?.is_file() {
            return Err(ObjectStoreError::NotFound(key.to_string()));
        }

        Ok(Box::new(file))
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let path = self.object_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(ObjectStoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.part", uuid::Uuid::new_v4()))
}

/// Removes an in-progress upload unless [`PartialFile::keep`] is called.
///
/// Covers copy errors as well as a dropped (cancelled) upload future.
struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl PartialFile {
    /// Create the file exclusively with mode 0644.
    fn create(path: PathBuf) -> Result<(Self, std::fs::File), std::io::Error> {
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        std::os::unix::fs::OpenOptionsExt::mode(&mut options, 0o644);

        let file = options.open(&path)?;
        Ok((Self { path, armed: true }, file))
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove partially written object"
            ),
        }
    }
}
