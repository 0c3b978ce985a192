use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tierstore::storage::disk_overflow::DiskOverflowStore;
use tierstore::storage::memory_cache::{MemoryCache, MemoryCacheConfig};
use tierstore::storage::StorageBackend;
use tierstore::{StorageEntry, StorageError, TierLocation};

fn entry(name: &str, data: &[u8]) -> StorageEntry {
    StorageEntry::new(None, name, "audio/webm", data, None, HashMap::new())
}

async fn disk_store() -> (tempfile::TempDir, Arc<DiskOverflowStore>) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        DiskOverflowStore::new(dir.path().to_str().unwrap())
            .await
            .unwrap(),
    );
    (dir, store)
}

#[tokio::test]
async fn lru_eviction_spills_oldest_to_disk() {
    let (_dir, overflow) = disk_store().await;
    let cache = MemoryCache::with_overflow(
        MemoryCacheConfig {
            capacity_bytes: 1000,
            max_item_bytes: 1000,
            ttl: None,
        },
        Arc::clone(&overflow) as Arc<dyn StorageBackend>,
    );

    let a = cache
        .put(entry("a.webm", &[1u8; 400]), Bytes::from(vec![1u8; 400]))
        .await
        .unwrap();
    let b = cache
        .put(entry("b.webm", &[2u8; 400]), Bytes::from(vec![2u8; 400]))
        .await
        .unwrap();

    // Touch `a` so `b` becomes the least recently used.
    cache.get(&a.id).await.unwrap();

    let c = cache
        .put(entry("c.webm", &[3u8; 400]), Bytes::from(vec![3u8; 400]))
        .await
        .unwrap();

    // `b` is out of memory but readable from the overflow tier.
    assert!(cache.exists(&a.id).await.unwrap());
    assert!(cache.exists(&c.id).await.unwrap());
    assert!(!cache.exists(&b.id).await.unwrap());

    let (data, meta) = overflow.get(&b.id).await.unwrap();
    assert_eq!(&data[..], &[2u8; 400][..]);
    assert_eq!(meta.location, TierLocation::Disk);
}

#[tokio::test]
async fn oversized_item_goes_straight_to_overflow() {
    let (_dir, overflow) = disk_store().await;
    let cache = MemoryCache::with_overflow(
        MemoryCacheConfig {
            capacity_bytes: 1000,
            max_item_bytes: 100,
            ttl: None,
        },
        Arc::clone(&overflow) as Arc<dyn StorageBackend>,
    );

    let stored = cache
        .put(entry("big.webm", &[9u8; 500]), Bytes::from(vec![9u8; 500]))
        .await
        .unwrap();

    assert_eq!(stored.location, TierLocation::Disk);
    assert!(!cache.exists(&stored.id).await.unwrap());
    assert!(overflow.exists(&stored.id).await.unwrap());
}

#[tokio::test]
async fn oversized_item_without_overflow_is_rejected() {
    let cache = MemoryCache::new(MemoryCacheConfig {
        capacity_bytes: 1000,
        max_item_bytes: 100,
        ttl: None,
    });

    let err = cache
        .put(entry("big.webm", &[9u8; 500]), Bytes::from(vec![9u8; 500]))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::CapacityExceeded { .. }));
}

#[tokio::test]
async fn expired_entries_vanish_on_read() {
    let cache = MemoryCache::new(MemoryCacheConfig {
        capacity_bytes: 1000,
        max_item_bytes: 1000,
        ttl: Some(Duration::from_millis(20)),
    });

    let stored = cache
        .put(entry("short.webm", b"x"), Bytes::from_static(b"x"))
        .await
        .unwrap();
    assert!(cache.get(&stored.id).await.is_ok());

    tokio::time::sleep(Duration::from_millis(40)).await;

    assert!(matches!(
        cache.get(&stored.id).await.unwrap_err(),
        StorageError::NotFound(_)
    ));
}

#[tokio::test]
async fn sweep_counts_expired_entries() {
    let cache = MemoryCache::new(MemoryCacheConfig {
        capacity_bytes: 1000,
        max_item_bytes: 1000,
        ttl: Some(Duration::from_millis(10)),
    });

    for i in 0..3 {
        cache
            .put(
                entry(&format!("{i}.webm"), b"x"),
                Bytes::from_static(b"x"),
            )
            .await
            .unwrap();
    }

    tokio::time::sleep(Duration::from_millis(30)).await;
    let removed = cache.sweep_expired(Duration::from_secs(3600)).await.unwrap();
    assert_eq!(removed, 3);
    assert_eq!(cache.stats().await.count, 0);
}

#[tokio::test]
async fn eviction_preserves_payload_and_metadata() {
    let (_dir, overflow) = disk_store().await;
    let cache = MemoryCache::with_overflow(
        MemoryCacheConfig {
            capacity_bytes: 100,
            max_item_bytes: 100,
            ttl: None,
        },
        Arc::clone(&overflow) as Arc<dyn StorageBackend>,
    );

    let mut extra = HashMap::new();
    extra.insert("sample_rate".to_string(), "48000".to_string());
    let first = cache
        .put(
            StorageEntry::new(Some("alice"), "one.webm", "audio/webm", &[1u8; 80], None, extra),
            Bytes::from(vec![1u8; 80]),
        )
        .await
        .unwrap();

    // Second insert forces the first out of memory.
    cache
        .put(entry("two.webm", &[2u8; 80]), Bytes::from(vec![2u8; 80]))
        .await
        .unwrap();

    let (data, meta) = overflow.get(&first.id).await.unwrap();
    assert_eq!(data.len(), 80);
    assert_eq!(meta.owner_key.as_deref(), Some("alice"));
    assert_eq!(meta.original_name, "one.webm");
    assert_eq!(meta.extra_metadata.get("sample_rate").unwrap(), "48000");
    assert_eq!(meta.checksum, first.checksum);
}
