use bytes::Bytes;
use std::collections::HashMap;
use tierstore::storage::disk_overflow::DiskOverflowStore;
use tierstore::storage::StorageBackend;
use tierstore::{StorageEntry, StorageError};

fn entry(owner: Option<&str>, name: &str, data: &[u8]) -> StorageEntry {
    StorageEntry::new(owner, name, "audio/webm", data, None, HashMap::new())
}

#[tokio::test]
async fn index_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().to_str().unwrap().to_string();

    let id = {
        let store = DiskOverflowStore::new(&base).await.unwrap();
        let stored = store
            .put(
                entry(Some("bob"), "kept.webm", b"persisted"),
                Bytes::from_static(b"persisted"),
            )
            .await
            .unwrap();
        stored.id
    };

    // Fresh instance over the same directory must recover the index.
    let reopened = DiskOverflowStore::new(&base).await.unwrap();
    let (data, meta) = reopened.get(&id).await.unwrap();
    assert_eq!(&data[..], b"persisted");
    assert_eq!(meta.owner_key.as_deref(), Some("bob"));
    assert_eq!(meta.original_name, "kept.webm");
}

#[tokio::test]
async fn corrupt_index_starts_empty_instead_of_failing() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().to_str().unwrap().to_string();
    std::fs::write(dir.path().join("index.json"), b"{ not json !").unwrap();

    let store = DiskOverflowStore::new(&base).await.unwrap();
    assert!(store.list(None, 100).await.unwrap().is_empty());

    // The store stays usable after discarding the bad index.
    let stored = store
        .put(entry(None, "new.webm", b"x"), Bytes::from_static(b"x"))
        .await
        .unwrap();
    assert!(store.exists(&stored.id).await.unwrap());
}

#[tokio::test]
async fn missing_backing_file_is_pruned_on_read() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().to_str().unwrap().to_string();
    let store = DiskOverflowStore::new(&base).await.unwrap();

    let stored = store
        .put(entry(None, "gone.webm", b"bytes"), Bytes::from_static(b"bytes"))
        .await
        .unwrap();

    // Remove the payload behind the index's back.
    let backing = dir.path().join("shared").join(format!("{}.bin", stored.id));
    std::fs::remove_file(&backing).unwrap();

    assert!(matches!(
        store.get(&stored.id).await.unwrap_err(),
        StorageError::NotFound(_)
    ));
    // The dangling index record is gone too.
    assert!(!store.exists(&stored.id).await.unwrap());
}

#[tokio::test]
async fn restart_after_delete_does_not_resurrect() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().to_str().unwrap().to_string();

    let id = {
        let store = DiskOverflowStore::new(&base).await.unwrap();
        let stored = store
            .put(entry(None, "tmp.webm", b"x"), Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert!(store.delete(&stored.id).await.unwrap());
        stored.id
    };

    let reopened = DiskOverflowStore::new(&base).await.unwrap();
    assert!(!reopened.exists(&id).await.unwrap());
}

#[tokio::test]
async fn recovered_entries_participate_in_sweeps() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().to_str().unwrap().to_string();

    {
        let store = DiskOverflowStore::new(&base).await.unwrap();
        store
            .put(entry(None, "old.webm", b"x"), Bytes::from_static(b"x"))
            .await
            .unwrap();
    }

    let reopened = DiskOverflowStore::new(&base).await.unwrap();
    let removed = reopened
        .sweep_expired(std::time::Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(reopened.list(None, 100).await.unwrap().is_empty());
}
