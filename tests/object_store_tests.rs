use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use spool_files::object_store::{KeyError, LocalStore, ObjectStore, ObjectStoreError};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

async fn read_all(store: &LocalStore, key: &str) -> Vec<u8> {
    let mut reader = store.get(key).await.unwrap();
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await.unwrap();
    buf
}

fn entries(dir: &std::path::Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect()
}

/// Yields `data` and then fails.
struct FailingReader {
    data: Vec<u8>,
    sent: bool,
}

impl AsyncRead for FailingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if self.sent {
            return Poll::Ready(Err(std::io::Error::other("connection reset")));
        }
        buf.put_slice(&self.data);
        self.sent = true;
        Poll::Ready(Ok(()))
    }
}

/// Yields `data` and then never completes.
struct StalledReader {
    data: Vec<u8>,
    sent: bool,
}

impl AsyncRead for StalledReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if self.sent {
            return Poll::Pending;
        }
        buf.put_slice(&self.data);
        self.sent = true;
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn test_local_store_put_get() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();

    let data = b"hello world".to_vec();
    store
        .put("test-key.stl", "text/plain", &mut data.as_slice())
        .await
        .unwrap();

    assert_eq!(read_all(&store, "test-key.stl").await, data);
}

#[tokio::test]
async fn test_local_store_round_trips_large_object() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();

    let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    store
        .put("nested/dir/model.3mf", "application/zip", &mut data.as_slice())
        .await
        .unwrap();

    assert_eq!(read_all(&store, "nested/dir/model.3mf").await, data);
}

#[tokio::test]
async fn test_local_store_creates_root() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("a").join("b").join("files");

    let store = LocalStore::new(&root).unwrap();
    assert!(root.is_dir());
    assert!(store.base_path().is_absolute());
}

#[tokio::test]
async fn test_local_store_delete() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();

    store
        .put("to-delete", "text/plain", &mut &b"data"[..])
        .await
        .unwrap();
    store.delete("to-delete").await.unwrap();

    let result = store.get("to-delete").await;
    assert!(matches!(result, Err(ObjectStoreError::NotFound(_))));
}

#[tokio::test]
async fn test_local_store_delete_nonexistent() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();

    // Deleting a missing object is an error, not a no-op
    let result = store.delete("nonexistent").await;
    assert!(matches!(result, Err(ObjectStoreError::NotFound(_))));
}

#[tokio::test]
async fn test_local_store_get_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();

    let result = store.get("missing").await;
    assert!(matches!(result, Err(ObjectStoreError::NotFound(_))));
}

#[tokio::test]
async fn test_local_store_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();

    store.put("key", "text/plain", &mut &b"first"[..]).await.unwrap();
    store.put("key", "text/plain", &mut &b"second"[..]).await.unwrap();

    assert_eq!(read_all(&store, "key").await, b"second");
}

#[tokio::test]
async fn test_local_store_rejects_unsafe_keys() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("files");
    let store = LocalStore::new(&root).unwrap();

    for key in ["", "../escape", "/etc/passwd", "a:b", "what?"] {
        let result = store.put(key, "text/plain", &mut &b"data"[..]).await;
        assert!(
            matches!(result, Err(ObjectStoreError::InvalidKey(_))),
            "{key:?} should be rejected"
        );
    }

    assert!(matches!(
        store.delete("../files").await,
        Err(ObjectStoreError::InvalidKey(KeyError::Traversal))
    ));
    assert!(entries(&root).is_empty());
    assert_eq!(entries(dir.path()), vec!["files".to_string()]);
}

#[tokio::test]
async fn test_local_store_failed_copy_leaves_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();

    let mut reader = FailingReader {
        data: vec![7u8; 1024],
        sent: false,
    };
    let result = store.put("broken.stl", "model/stl", &mut reader).await;
    assert!(matches!(result, Err(ObjectStoreError::Io(_))));

    assert!(entries(dir.path()).is_empty());
    assert!(matches!(
        store.get("broken.stl").await,
        Err(ObjectStoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_local_store_cancelled_upload_leaves_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();

    let mut reader = StalledReader {
        data: vec![1u8; 4096],
        sent: false,
    };
    let result = tokio::time::timeout(
        Duration::from_millis(500),
        store.put("stalled.stl", "model/stl", &mut reader),
    )
    .await;
    assert!(result.is_err(), "upload should still be pending");

    assert!(entries(dir.path()).is_empty());
}

#[tokio::test]
async fn test_local_store_upload_cancelled_at_any_point_leaves_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();

    // Cancel at increasing delays so some uploads stop before the temp file
    // is created, some while it is open, and some mid-copy.
    for step in 0..40u64 {
        let mut reader = StalledReader {
            data: vec![2u8; 512],
            sent: false,
        };
        let key = format!("cancel-{step}.stl");
        let _ = tokio::time::timeout(
            Duration::from_micros(step * 25),
            store.put(&key, "model/stl", &mut reader),
        )
        .await;
    }

    // Let any filesystem work still queued on the blocking pool finish.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(entries(dir.path()).is_empty(), "{:?}", entries(dir.path()));
}

#[cfg(unix)]
#[tokio::test]
async fn test_local_store_file_mode() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();
    store.put("mode.stl", "model/stl", &mut &b"x"[..]).await.unwrap();

    let mode = std::fs::metadata(store.base_path().join("mode.stl"))
        .unwrap()
        .permissions()
        .mode();
    // umask can only clear bits
    assert_eq!(mode & 0o133, 0);
}
