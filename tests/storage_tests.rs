use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use spool_files::object_store::sniff::{sniff, OCTET_STREAM, SNIFF_LEN};
use spool_files::object_store::{
    LocalStore, ObjectReader, ObjectStore, ObjectStoreError, UploadSource,
};
use spool_files::storage::Storage;
use tokio::io::AsyncReadExt;

/// Records every call that reaches the backend.
#[derive(Default)]
struct RecordingStore {
    calls: Mutex<Vec<(String, String, Vec<u8>)>>,
}

#[async_trait]
impl ObjectStore for RecordingStore {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn put(
        &self,
        key: &str,
        content_type: &str,
        data: UploadSource<'_>,
    ) -> Result<(), ObjectStoreError> {
        let mut buf = Vec::new();
        data.read_to_end(&mut buf).await?;
        self.calls
            .lock()
            .unwrap()
            .push((key.to_string(), content_type.to_string(), buf));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<ObjectReader, ObjectStoreError> {
        self.calls
            .lock()
            .unwrap()
            .push((key.to_string(), "get".to_string(), Vec::new()));
        Err(ObjectStoreError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        self.calls
            .lock()
            .unwrap()
            .push((key.to_string(), "delete".to_string(), Vec::new()));
        Err(ObjectStoreError::NotFound(key.to_string()))
    }
}

fn local_storage(dir: &tempfile::TempDir) -> Storage {
    Storage::new(Arc::new(LocalStore::new(dir.path()).unwrap()))
}

async fn fetch_all(storage: &Storage, key: &str) -> Vec<u8> {
    let mut reader = storage.fetch(key).await.unwrap();
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await.unwrap();
    buf
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 256) as u8).collect()
}

#[tokio::test]
async fn test_sniff_empty_stream() {
    let (content_type, mut replay) = sniff(&b""[..]).await.unwrap();
    assert_eq!(content_type, OCTET_STREAM);

    let mut buf = Vec::new();
    replay.read_to_end(&mut buf).await.unwrap();
    assert!(buf.is_empty());
}

#[tokio::test]
async fn test_sniff_replays_input_unchanged() {
    for len in [1, SNIFF_LEN - 1, SNIFF_LEN, SNIFF_LEN + 1, 10 * SNIFF_LEN + 7] {
        let input = pattern(len);
        let (_, mut replay) = sniff(input.as_slice()).await.unwrap();

        let mut output = Vec::new();
        replay.read_to_end(&mut output).await.unwrap();
        assert_eq!(output, input, "length {len}");
    }
}

#[tokio::test]
async fn test_sniff_classifies_png() {
    let mut png = b"\x89PNG\x0D\x0A\x1A\x0A".to_vec();
    png.extend(pattern(2048));

    let (content_type, _) = sniff(png.as_slice()).await.unwrap();
    assert_eq!(content_type, "image/png");
}

#[tokio::test]
async fn test_store_fetch_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let storage = local_storage(&dir);

    for (key, len) in [("a.stl", 0), ("b.stl", 100), ("c.3mf", SNIFF_LEN), ("d.3mf", 70_000)] {
        let data = pattern(len);
        storage.store(key, data.as_slice()).await.unwrap();
        assert_eq!(fetch_all(&storage, key).await, data, "{key}");
    }
}

#[tokio::test]
async fn test_delete_then_fetch_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let storage = local_storage(&dir);

    storage.store("gone.stl", &b"solid"[..]).await.unwrap();
    storage.delete("gone.stl").await.unwrap();

    assert!(matches!(
        storage.fetch("gone.stl").await,
        Err(ObjectStoreError::NotFound(_))
    ));
    assert!(matches!(
        storage.delete("gone.stl").await,
        Err(ObjectStoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_invalid_keys_never_reach_backend() {
    let backend = Arc::new(RecordingStore::default());
    let storage = Storage::new(backend.clone());

    for key in ["", "../x.stl", "/abs.stl", "a<b", "a>b", "a:b", "a\"b", "a|b", "a?b", "a*b"] {
        assert!(matches!(
            storage.store(key, &b"data"[..]).await,
            Err(ObjectStoreError::InvalidKey(_))
        ));
        assert!(matches!(
            storage.fetch(key).await,
            Err(ObjectStoreError::InvalidKey(_))
        ));
        assert!(matches!(
            storage.delete(key).await,
            Err(ObjectStoreError::InvalidKey(_))
        ));
    }

    assert!(backend.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_store_passes_sniffed_content_type() {
    let backend = Arc::new(RecordingStore::default());
    let storage = Storage::new(backend.clone());

    let mut zip = b"PK\x03\x04".to_vec();
    zip.extend(pattern(1000));
    storage.store("part.3mf", zip.as_slice()).await.unwrap();

    let calls = backend.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let (key, content_type, data) = &calls[0];
    assert_eq!(key, "part.3mf");
    assert_eq!(content_type, "application/zip");
    assert_eq!(data, &zip);
}
