// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Bounded in-memory cache tier.
//!
//! Holds recent blobs under a byte budget with LRU eviction. Items that do
//! not fit (per-item cap or exhausted budget) spill to the disk overflow
//! store when one is wired in. All bookkeeping (entries map, access order,
//! byte accounting) lives behind a single mutex, so mutations of the shared
//! LRU structure are serialized.

use crate::observability::metrics;
use crate::storage::{
    validate_entry, validate_id, StorageBackend, StorageEntry, StorageError, TierLocation,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const DEFAULT_LIST_LIMIT: usize = 1000;

#[derive(Debug, Clone)]
pub struct MemoryCacheConfig {
    pub capacity_bytes: u64,
    pub max_item_bytes: u64,
    /// Entries older than this (since insertion) are treated as expired.
    pub ttl: Option<Duration>,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: 64 * 1024 * 1024,
            max_item_bytes: 8 * 1024 * 1024,
            ttl: Some(Duration::from_secs(3600)),
        }
    }
}

#[derive(Debug)]
struct CacheSlot {
    entry: StorageEntry,
    data: Bytes,
    stored_at: Instant,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CacheSlot>,
    /// Access order, least recently used first.
    access_order: Vec<String>,
    bytes_used: u64,
}

impl CacheInner {
    fn touch(&mut self, id: &str) {
        if let Some(pos) = self.access_order.iter().position(|k| k == id) {
            let key = self.access_order.remove(pos);
            self.access_order.push(key);
        }
    }

    fn remove_slot(&mut self, id: &str) -> Option<CacheSlot> {
        let slot = self.entries.remove(id)?;
        if let Some(pos) = self.access_order.iter().position(|k| k == id) {
            self.access_order.remove(pos);
        }
        self.bytes_used = self.bytes_used.saturating_sub(slot.entry.size_bytes);
        Some(slot)
    }
}

/// Point-in-time usage numbers for the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub count: usize,
    pub bytes_used: u64,
    pub bytes_limit: u64,
}

pub struct MemoryCache {
    config: MemoryCacheConfig,
    overflow: Option<Arc<dyn StorageBackend>>,
    inner: Mutex<CacheInner>,
}

impl MemoryCache {
    pub fn new(config: MemoryCacheConfig) -> Self {
        tracing::debug!(
            capacity_bytes = config.capacity_bytes,
            max_item_bytes = config.max_item_bytes,
            ttl = ?config.ttl,
            "creating memory cache"
        );
        Self {
            config,
            overflow: None,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Cache that spills oversized/evicted entries to the given tier.
    pub fn with_overflow(config: MemoryCacheConfig, overflow: Arc<dyn StorageBackend>) -> Self {
        let mut cache = Self::new(config);
        cache.overflow = Some(overflow);
        cache
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        CacheStats {
            count: inner.entries.len(),
            bytes_used: inner.bytes_used,
            bytes_limit: self.config.capacity_bytes,
        }
    }

    fn slot_expired(&self, slot: &CacheSlot) -> bool {
        if slot.entry.is_expired_at(Utc::now()) {
            return true;
        }
        match self.config.ttl {
            Some(ttl) => slot.stored_at.elapsed() >= ttl,
            None => false,
        }
    }

    /// Drop every expired slot. Cheapest reclaim, run before any eviction.
    fn sweep_expired_locked(&self, inner: &mut CacheInner) -> usize {
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, slot)| self.slot_expired(slot))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            inner.remove_slot(id);
            metrics::increment_cache_eviction("expired");
        }
        expired.len()
    }

    /// Evict the LRU entry, spilling it to overflow best-effort.
    ///
    /// An overflow write failure does not block eviction; the entry is
    /// logged and dropped.
    async fn evict_one(&self, inner: &mut CacheInner) -> bool {
        let Some(victim_id) = inner.access_order.first().cloned() else {
            return false;
        };
        let Some(slot) = inner.remove_slot(&victim_id) else {
            return false;
        };
        metrics::increment_cache_eviction("lru");
        tracing::debug!(id = %victim_id, size = slot.entry.size_bytes, "evicting LRU entry");

        if let Some(overflow) = &self.overflow {
            let mut entry = slot.entry;
            entry.location = TierLocation::Disk;
            if let Err(e) = overflow.put(entry, slot.data).await {
                tracing::warn!(id = %victim_id, error = %e, "overflow write failed, entry dropped");
            }
        }
        true
    }

    /// Delegate a put that memory cannot hold to the overflow tier.
    async fn overflow_put(
        &self,
        mut entry: StorageEntry,
        data: Bytes,
    ) -> Result<StorageEntry, StorageError> {
        let Some(overflow) = &self.overflow else {
            return Err(StorageError::CapacityExceeded {
                needed: entry.size_bytes,
                limit: self.config.capacity_bytes.min(self.config.max_item_bytes),
            });
        };
        entry.location = TierLocation::Disk;
        overflow.put(entry, data).await
    }
}

#[async_trait]
impl StorageBackend for MemoryCache {
    async fn put(&self, mut entry: StorageEntry, data: Bytes) -> Result<StorageEntry, StorageError> {
        validate_entry(&entry)?;
        let size = data.len() as u64;
        entry.size_bytes = size;

        // Oversized items never enter memory.
        if size > self.config.max_item_bytes {
            tracing::debug!(
                id = %entry.id,
                size,
                max_item_bytes = self.config.max_item_bytes,
                "item exceeds per-item cap, delegating to overflow"
            );
            return self.overflow_put(entry, data).await;
        }

        let mut inner = self.inner.lock().await;

        // Write-once ids make a duplicate put a replace of the same payload;
        // drop the old slot so accounting stays correct.
        inner.remove_slot(&entry.id);

        if inner.bytes_used + size > self.config.capacity_bytes {
            self.sweep_expired_locked(&mut inner);

            while inner.bytes_used + size > self.config.capacity_bytes {
                if !self.evict_one(&mut inner).await {
                    break;
                }
            }

            if inner.bytes_used + size > self.config.capacity_bytes {
                // Even an empty cache cannot hold it.
                drop(inner);
                return self.overflow_put(entry, data).await;
            }
        }

        entry.location = TierLocation::Memory;
        inner.bytes_used += size;
        inner.access_order.push(entry.id.clone());
        inner.entries.insert(
            entry.id.clone(),
            CacheSlot {
                entry: entry.clone(),
                data,
                stored_at: Instant::now(),
            },
        );
        metrics::set_cache_bytes_used(inner.bytes_used);
        Ok(entry)
    }

    async fn get(&self, id: &str) -> Result<(Bytes, StorageEntry), StorageError> {
        validate_id(id)?;
        let mut inner = self.inner.lock().await;

        let expired = match inner.entries.get(id) {
            Some(slot) => self.slot_expired(slot),
            None => return Err(StorageError::NotFound(id.to_string())),
        };
        if expired {
            inner.remove_slot(id);
            metrics::increment_cache_eviction("expired");
            return Err(StorageError::NotFound(id.to_string()));
        }

        inner.touch(id);
        match inner.entries.get(id) {
            Some(slot) => Ok((slot.data.clone(), slot.entry.clone())),
            None => Err(StorageError::NotFound(id.to_string())),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        validate_id(id)?;
        let mut inner = self.inner.lock().await;
        let removed = inner.remove_slot(id).is_some();
        metrics::set_cache_bytes_used(inner.bytes_used);
        Ok(removed)
    }

    async fn exists(&self, id: &str) -> Result<bool, StorageError> {
        validate_id(id)?;
        let inner = self.inner.lock().await;
        Ok(inner
            .entries
            .get(id)
            .map(|slot| !self.slot_expired(slot))
            .unwrap_or(false))
    }

    async fn stat(&self, id: &str) -> Result<StorageEntry, StorageError> {
        validate_id(id)?;
        let inner = self.inner.lock().await;
        match inner.entries.get(id) {
            Some(slot) if !self.slot_expired(slot) => Ok(slot.entry.clone()),
            _ => Err(StorageError::NotFound(id.to_string())),
        }
    }

    async fn list(
        &self,
        owner_key: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StorageEntry>, StorageError> {
        let limit = if limit == 0 { DEFAULT_LIST_LIMIT } else { limit };
        let inner = self.inner.lock().await;
        let mut out: Vec<StorageEntry> = inner
            .entries
            .values()
            .filter(|slot| !self.slot_expired(slot))
            .filter(|slot| match owner_key {
                Some(owner) => slot.entry.owner_key.as_deref() == Some(owner),
                None => true,
            })
            .map(|slot| slot.entry.clone())
            .collect();
        // Time-ordered ids give chronological listing.
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out.truncate(limit);
        Ok(out)
    }

    async fn sweep_expired(&self, max_age: Duration) -> Result<usize, StorageError> {
        let mut inner = self.inner.lock().await;
        let mut removed = self.sweep_expired_locked(&mut inner);

        let stale: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, slot)| slot.stored_at.elapsed() >= max_age)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            inner.remove_slot(id);
            metrics::increment_cache_eviction("expired");
        }
        removed += stale.len();

        metrics::set_cache_bytes_used(inner.bytes_used);
        if removed > 0 {
            tracing::info!(removed, remaining = inner.entries.len(), "memory cache sweep");
        }
        Ok(removed)
    }

    async fn public_url(
        &self,
        _id: &str,
        _expires_in: Duration,
    ) -> Result<Option<String>, StorageError> {
        // The memory tier has no directly addressable URL.
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn entry(name: &str, data: &[u8]) -> StorageEntry {
        StorageEntry::new(None, name, "audio/webm", data, None, StdHashMap::new())
    }

    fn cache(capacity: u64, max_item: u64) -> MemoryCache {
        MemoryCache::new(MemoryCacheConfig {
            capacity_bytes: capacity,
            max_item_bytes: max_item,
            ttl: None,
        })
    }

    #[tokio::test]
    async fn put_get_roundtrip() {
        let cache = cache(1000, 1000);
        let e = entry("a.webm", b"hello");
        let stored = cache.put(e.clone(), Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(stored.location, TierLocation::Memory);

        let (data, got) = cache.get(&e.id).await.unwrap();
        assert_eq!(&data[..], b"hello");
        assert_eq!(got.checksum, e.checksum);
    }

    #[tokio::test]
    async fn bytes_used_never_exceeds_capacity() {
        let cache = cache(1000, 1000);
        for i in 0..20 {
            let data = vec![i as u8; 300];
            let e = entry(&format!("{i}.webm"), &data);
            cache.put(e, Bytes::from(data)).await.unwrap();
            let stats = cache.stats().await;
            assert!(stats.bytes_used <= stats.bytes_limit);
        }
    }

    #[tokio::test]
    async fn evicts_in_lru_order() {
        let cache = cache(1000, 1000);
        let a = entry("a", &[0u8; 400]);
        let b = entry("b", &[1u8; 400]);
        let c = entry("c", &[2u8; 400]);

        cache.put(a.clone(), Bytes::from(vec![0u8; 400])).await.unwrap();
        cache.put(b.clone(), Bytes::from(vec![1u8; 400])).await.unwrap();

        // Inserting C must evict A (the least recently used).
        cache.put(c.clone(), Bytes::from(vec![2u8; 400])).await.unwrap();

        assert!(matches!(
            cache.get(&a.id).await.unwrap_err(),
            StorageError::NotFound(_)
        ));
        assert!(cache.get(&b.id).await.is_ok());
        assert!(cache.get(&c.id).await.is_ok());
        assert_eq!(cache.stats().await.bytes_used, 800);
    }

    #[tokio::test]
    async fn get_refreshes_access_order() {
        let cache = cache(1000, 1000);
        let a = entry("a", &[0u8; 400]);
        let b = entry("b", &[1u8; 400]);
        let c = entry("c", &[2u8; 400]);

        cache.put(a.clone(), Bytes::from(vec![0u8; 400])).await.unwrap();
        cache.put(b.clone(), Bytes::from(vec![1u8; 400])).await.unwrap();

        // Touch A so B becomes the LRU end.
        cache.get(&a.id).await.unwrap();

        cache.put(c, Bytes::from(vec![2u8; 400])).await.unwrap();
        assert!(cache.get(&a.id).await.is_ok());
        assert!(matches!(
            cache.get(&b.id).await.unwrap_err(),
            StorageError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn oversized_item_rejected_without_overflow() {
        let cache = cache(1000, 100);
        let e = entry("big", &[0u8; 500]);
        let err = cache.put(e, Bytes::from(vec![0u8; 500])).await.unwrap_err();
        assert!(matches!(err, StorageError::CapacityExceeded { .. }));
        assert_eq!(cache.stats().await.count, 0);
    }

    #[tokio::test]
    async fn oversized_item_spills_to_overflow() {
        let overflow = Arc::new(cache(10_000, 10_000));
        let front = MemoryCache::with_overflow(
            MemoryCacheConfig {
                capacity_bytes: 1000,
                max_item_bytes: 100,
                ttl: None,
            },
            overflow.clone(),
        );

        let e = entry("big", &[7u8; 500]);
        let stored = front.put(e.clone(), Bytes::from(vec![7u8; 500])).await.unwrap();
        assert_eq!(stored.location, TierLocation::Disk);

        // Not in memory, but retrievable from the overflow tier.
        assert!(!front.exists(&e.id).await.unwrap());
        assert!(overflow.get(&e.id).await.is_ok());
    }

    #[tokio::test]
    async fn evicted_entries_land_in_overflow() {
        let overflow = Arc::new(cache(10_000, 10_000));
        let front = MemoryCache::with_overflow(
            MemoryCacheConfig {
                capacity_bytes: 1000,
                max_item_bytes: 1000,
                ttl: None,
            },
            overflow.clone(),
        );

        let a = entry("a", &[0u8; 400]);
        let b = entry("b", &[1u8; 400]);
        let c = entry("c", &[2u8; 400]);
        front.put(a.clone(), Bytes::from(vec![0u8; 400])).await.unwrap();
        front.put(b, Bytes::from(vec![1u8; 400])).await.unwrap();
        front.put(c, Bytes::from(vec![2u8; 400])).await.unwrap();

        let (data, demoted) = overflow.get(&a.id).await.unwrap();
        assert_eq!(data.len(), 400);
        assert_eq!(demoted.location, TierLocation::Disk);
    }

    #[tokio::test]
    async fn ttl_expiry_removes_on_get() {
        let cache = MemoryCache::new(MemoryCacheConfig {
            capacity_bytes: 1000,
            max_item_bytes: 1000,
            ttl: Some(Duration::from_millis(20)),
        });
        let e = entry("a", b"x");
        cache.put(e.clone(), Bytes::from_static(b"x")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(matches!(
            cache.get(&e.id).await.unwrap_err(),
            StorageError::NotFound(_)
        ));
        assert_eq!(cache.stats().await.count, 0);
    }

    #[tokio::test]
    async fn sweep_removes_old_entries() {
        let cache = cache(1000, 1000);
        let e = entry("a", b"x");
        cache.put(e.clone(), Bytes::from_static(b"x")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let removed = cache.sweep_expired(Duration::from_millis(10)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!cache.exists(&e.id).await.unwrap());
    }

    #[tokio::test]
    async fn list_scopes_by_owner() {
        let cache = cache(10_000, 10_000);
        let mut e1 = entry("a", b"x");
        e1.owner_key = Some("alice".into());
        let mut e2 = entry("b", b"y");
        e2.owner_key = Some("bob".into());

        cache.put(e1, Bytes::from_static(b"x")).await.unwrap();
        cache.put(e2, Bytes::from_static(b"y")).await.unwrap();

        let alice = cache.list(Some("alice"), 0).await.unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].owner_key.as_deref(), Some("alice"));

        let all = cache.list(None, 0).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
