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

//! Storage orchestrator: one API over the memory, disk and remote tiers.
//!
//! `store` writes locally and returns as soon as that write lands; the same
//! bytes are then handed to a bounded pool of replication workers (one
//! channel per worker, jobs sharded by id hash) that copy them to the
//! durable remote tier. Remote failures are recorded in the replication
//! ledger and never surface to the original caller.

use crate::config::Config;
use crate::observability::metrics;
use crate::storage::disk_overflow::DiskOverflowStore;
use crate::storage::memory_cache::{CacheStats, MemoryCache, MemoryCacheConfig};
use crate::storage::remote::RemoteStore;
use crate::storage::stats::RemoteStatsSnapshot;
use crate::storage::{StorageBackend, StorageEntry, StorageError};
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

const REPLICATION_QUEUE_DEPTH: usize = 1024;

/// Immediate result of a `store` call. `local_url` is served from the
/// memory/disk tiers and is ephemeral; the durable `remote_url` appears in
/// the replication ledger once replication succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredHandle {
    pub id: String,
    pub local_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

impl ReplicationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReplicationStatus::Succeeded | ReplicationStatus::Failed)
    }
}

/// Ledger record for one entry's asynchronous durable-store write.
/// Terminal records are retained, not deleted, for observability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplicationTask {
    pub entry_id: String,
    pub status: ReplicationStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub remote_url: Option<String>,
}

impl ReplicationTask {
    fn pending(entry_id: &str) -> Self {
        Self {
            entry_id: entry_id.to_string(),
            status: ReplicationStatus::Pending,
            attempts: 0,
            last_error: None,
            remote_url: None,
        }
    }
}

struct ReplicationJob {
    entry: StorageEntry,
    data: Bytes,
}

type TaskLedger = Arc<RwLock<HashMap<String, ReplicationTask>>>;

pub struct StorageOrchestrator {
    cache: Arc<MemoryCache>,
    overflow: Option<Arc<DiskOverflowStore>>,
    remote: Option<Arc<RemoteStore>>,
    tasks: TaskLedger,
    workers: Vec<mpsc::Sender<ReplicationJob>>,
}

impl StorageOrchestrator {
    /// Compose the tiers into one orchestrator. When a remote store is
    /// given, spawns one replication worker per pool slot.
    pub fn new(
        cache: Arc<MemoryCache>,
        overflow: Option<Arc<DiskOverflowStore>>,
        remote: Option<Arc<RemoteStore>>,
    ) -> Arc<Self> {
        let tasks: TaskLedger = Arc::new(RwLock::new(HashMap::new()));
        let mut workers = Vec::new();

        if let Some(remote) = &remote {
            for worker_id in 0..remote.max_connections() {
                let (tx, rx) = mpsc::channel(REPLICATION_QUEUE_DEPTH);
                tokio::spawn(replication_worker(
                    worker_id,
                    rx,
                    Arc::clone(remote),
                    Arc::clone(&tasks),
                ));
                workers.push(tx);
            }
            tracing::info!(workers = workers.len(), "replication workers started");
        }

        Arc::new(Self {
            cache,
            overflow,
            remote,
            tasks,
            workers,
        })
    }

    /// Build the full stack described by `cfg`: memory cache, disk overflow
    /// (when enabled) and the remote store (when enabled).
    pub async fn from_config(cfg: &Config) -> Result<Arc<Self>, StorageError> {
        let overflow = if cfg.disk.overflow_enabled {
            Some(Arc::new(DiskOverflowStore::new(&cfg.disk.base_dir).await?))
        } else {
            None
        };

        let cache_config = MemoryCacheConfig {
            capacity_bytes: cfg.memory.capacity_bytes,
            max_item_bytes: cfg.memory.max_item_bytes,
            ttl: cfg.memory.ttl(),
        };
        let cache = match &overflow {
            Some(overflow) => Arc::new(MemoryCache::with_overflow(
                cache_config,
                Arc::clone(overflow) as Arc<dyn StorageBackend>,
            )),
            None => Arc::new(MemoryCache::new(cache_config)),
        };

        let remote = if cfg.remote.enabled {
            Some(Arc::new(RemoteStore::from_config(&cfg.remote)?))
        } else {
            None
        };

        Ok(Self::new(cache, overflow, remote))
    }

    /// Synchronous local write. Returns once the memory tier (or its disk
    /// overflow) holds the payload; never waits on the remote store.
    pub async fn store(
        &self,
        data: Bytes,
        original_name: &str,
        mime_type: &str,
        owner_key: Option<&str>,
        extra_metadata: HashMap<String, String>,
    ) -> Result<StoredHandle, StorageError> {
        if original_name.is_empty() {
            return Err(StorageError::InvalidInput(
                "original_name must be non-empty".into(),
            ));
        }

        let entry = StorageEntry::new(
            owner_key,
            original_name,
            mime_type,
            &data,
            None,
            extra_metadata,
        );

        let stored = self.cache.put(entry, data.clone()).await.map_err(|e| {
            metrics::increment_error(e.kind(), "store");
            e
        })?;
        metrics::record_tier_op("put", "memory");

        tracing::debug!(
            id = %stored.id,
            size = stored.size_bytes,
            location = %stored.location,
            "stored entry locally"
        );

        self.schedule_replication(&stored, data).await;

        Ok(StoredHandle {
            local_url: format!("/blobs/{}", stored.id),
            id: stored.id,
        })
    }

    /// Enqueue the background durable-store write for an entry. A full
    /// queue marks the task failed rather than blocking the caller.
    pub async fn schedule_replication(&self, entry: &StorageEntry, data: Bytes) {
        if self.remote.is_none() || self.workers.is_empty() {
            return;
        }

        {
            let mut tasks = self.tasks.write().await;
            // At most one in-flight task per entry id.
            if let Some(existing) = tasks.get(&entry.id) {
                if !existing.status.is_terminal() {
                    tracing::debug!(id = %entry.id, "replication already scheduled");
                    return;
                }
            }
            tasks.insert(entry.id.clone(), ReplicationTask::pending(&entry.id));
        }

        let worker = &self.workers[worker_for_id(&entry.id, self.workers.len())];
        let job = ReplicationJob {
            entry: entry.clone(),
            data,
        };

        if let Err(e) = worker.try_send(job) {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "replication queue full",
                mpsc::error::TrySendError::Closed(_) => "replication worker gone",
            };
            tracing::warn!(id = %entry.id, reason, "replication not scheduled");
            metrics::increment_replication("rejected");
            let mut tasks = self.tasks.write().await;
            if let Some(task) = tasks.get_mut(&entry.id) {
                task.status = ReplicationStatus::Failed;
                task.last_error = Some(reason.to_string());
            }
        }
    }

    /// Read an entry's payload: memory, then disk overflow, then remote.
    /// First tier that holds it wins; data is not promoted between tiers.
    pub async fn retrieve(&self, id: &str) -> Result<Bytes, StorageError> {
        match self.cache.get(id).await {
            Ok((data, _)) => {
                metrics::record_tier_hit("memory");
                return Ok(data);
            }
            Err(StorageError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        if let Some(overflow) = &self.overflow {
            match overflow.get(id).await {
                Ok((data, _)) => {
                    metrics::record_tier_hit("disk");
                    return Ok(data);
                }
                Err(StorageError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        if let Some(remote) = &self.remote {
            match remote.get(id).await {
                Ok((data, _)) => {
                    metrics::record_tier_hit("remote");
                    return Ok(data);
                }
                Err(StorageError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Err(StorageError::NotFound(id.to_string()))
    }

    /// Non-blocking view of an entry's replication ledger record.
    pub async fn replication_status(&self, id: &str) -> Option<ReplicationTask> {
        let tasks = self.tasks.read().await;
        tasks.get(id).cloned()
    }

    /// Remove the entry from every tier that reports holding it. A failure
    /// on one tier is logged and does not stop the others.
    pub async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        let mut deleted = false;

        let tiers: Vec<(&str, &dyn StorageBackend)> = {
            let mut v: Vec<(&str, &dyn StorageBackend)> =
                vec![("memory", self.cache.as_ref() as &dyn StorageBackend)];
            if let Some(overflow) = &self.overflow {
                v.push(("disk", overflow.as_ref() as &dyn StorageBackend));
            }
            if let Some(remote) = &self.remote {
                v.push(("remote", remote.as_ref() as &dyn StorageBackend));
            }
            v
        };

        for (tier, backend) in tiers {
            match backend.exists(id).await {
                Ok(true) => match backend.delete(id).await {
                    Ok(removed) => deleted |= removed,
                    Err(e) => {
                        tracing::warn!(id, tier, error = %e, "tier delete failed");
                        metrics::increment_error(e.kind(), "delete");
                    }
                },
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(id, tier, error = %e, "tier exists check failed");
                }
            }
        }

        Ok(deleted)
    }

    /// Delegate an expiry sweep to every tier; returns total entries removed.
    pub async fn sweep(&self, max_age: Duration) -> Result<usize, StorageError> {
        let mut removed = self.cache.sweep_expired(max_age).await?;

        if let Some(overflow) = &self.overflow {
            removed += overflow.sweep_expired(max_age).await?;
        }
        if let Some(remote) = &self.remote {
            match remote.sweep_expired(max_age).await {
                Ok(n) => removed += n,
                Err(e) => {
                    // Remote sweep is best-effort housekeeping.
                    tracing::warn!(error = %e, "remote sweep failed");
                }
            }
        }
        Ok(removed)
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub fn remote_stats(&self) -> Option<RemoteStatsSnapshot> {
        self.remote.as_ref().map(|r| r.stats())
    }
}

/// Shard replication jobs across workers by id hash, so at most one worker
/// ever touches a given entry.
fn worker_for_id(id: &str, workers: usize) -> usize {
    if workers == 1 {
        return 0;
    }
    let hash = id
        .bytes()
        .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
    (hash % workers as u64) as usize
}

async fn replication_worker(
    worker_id: usize,
    mut rx: mpsc::Receiver<ReplicationJob>,
    remote: Arc<RemoteStore>,
    tasks: TaskLedger,
) {
    while let Some(job) = rx.recv().await {
        let id = job.entry.id.clone();

        {
            let mut tasks = tasks.write().await;
            if let Some(task) = tasks.get_mut(&id) {
                task.status = ReplicationStatus::InProgress;
            }
        }

        let (attempts, result) = remote.put_tracked(&job.entry, job.data).await;

        let mut tasks = tasks.write().await;
        let Some(task) = tasks.get_mut(&id) else {
            continue;
        };
        task.attempts = attempts;
        match result {
            Ok(remote_url) => {
                task.status = ReplicationStatus::Succeeded;
                task.remote_url = Some(remote_url);
                metrics::increment_replication("succeeded");
                metrics::record_replication_attempts(attempts);
                tracing::debug!(id = %id, worker_id, attempts, "replication succeeded");
            }
            Err(e) => {
                task.status = ReplicationStatus::Failed;
                task.last_error = Some(e.to_string());
                metrics::increment_replication("failed");
                metrics::record_replication_attempts(attempts);
                tracing::warn!(id = %id, worker_id, attempts, error = %e, "replication failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::remote::MemoryTransport;
    use crate::storage::TierLocation;

    fn cache(capacity: u64) -> Arc<MemoryCache> {
        Arc::new(MemoryCache::new(MemoryCacheConfig {
            capacity_bytes: capacity,
            max_item_bytes: capacity,
            ttl: None,
        }))
    }

    fn remote() -> Arc<RemoteStore> {
        Arc::new(RemoteStore::new(
            Arc::new(MemoryTransport::new()),
            2,
            Duration::from_millis(200),
            3,
            Duration::from_millis(1),
        ))
    }

    async fn wait_terminal(orch: &StorageOrchestrator, id: &str) -> ReplicationTask {
        for _ in 0..200 {
            if let Some(task) = orch.replication_status(id).await {
                if task.status.is_terminal() {
                    return task;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("replication for {id} did not reach a terminal state");
    }

    #[tokio::test]
    async fn store_returns_handle_and_replicates() {
        let orch = StorageOrchestrator::new(cache(10_000), None, Some(remote()));

        let handle = orch
            .store(
                Bytes::from_static(b"recording"),
                "take1.webm",
                "audio/webm",
                Some("alice"),
                HashMap::new(),
            )
            .await
            .unwrap();
        assert_eq!(handle.local_url, format!("/blobs/{}", handle.id));

        let data = orch.retrieve(&handle.id).await.unwrap();
        assert_eq!(&data[..], b"recording");

        let task = wait_terminal(&orch, &handle.id).await;
        assert_eq!(task.status, ReplicationStatus::Succeeded);
        assert_eq!(task.attempts, 1);
        assert!(task.remote_url.is_some());
    }

    #[tokio::test]
    async fn replication_status_absent_without_remote() {
        let orch = StorageOrchestrator::new(cache(10_000), None, None);
        let handle = orch
            .store(
                Bytes::from_static(b"x"),
                "a.webm",
                "audio/webm",
                None,
                HashMap::new(),
            )
            .await
            .unwrap();
        assert!(orch.replication_status(&handle.id).await.is_none());
    }

    #[tokio::test]
    async fn retrieve_prefers_memory_over_remote() {
        let orch = StorageOrchestrator::new(cache(10_000), None, Some(remote()));
        let handle = orch
            .store(
                Bytes::from_static(b"tiered"),
                "a.webm",
                "audio/webm",
                None,
                HashMap::new(),
            )
            .await
            .unwrap();
        wait_terminal(&orch, &handle.id).await;

        // Present in both memory and remote; memory answers.
        let data = orch.retrieve(&handle.id).await.unwrap();
        assert_eq!(&data[..], b"tiered");
    }

    #[tokio::test]
    async fn delete_clears_all_tiers() {
        let orch = StorageOrchestrator::new(cache(10_000), None, Some(remote()));
        let handle = orch
            .store(
                Bytes::from_static(b"doomed"),
                "a.webm",
                "audio/webm",
                None,
                HashMap::new(),
            )
            .await
            .unwrap();
        wait_terminal(&orch, &handle.id).await;

        assert!(orch.delete(&handle.id).await.unwrap());
        assert!(matches!(
            orch.retrieve(&handle.id).await.unwrap_err(),
            StorageError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn duplicate_schedule_is_ignored_while_in_flight() {
        let orch = StorageOrchestrator::new(cache(10_000), None, Some(remote()));
        let entry = StorageEntry::new(None, "a.webm", "audio/webm", b"x", None, HashMap::new());

        orch.schedule_replication(&entry, Bytes::from_static(b"x")).await;
        orch.schedule_replication(&entry, Bytes::from_static(b"x")).await;

        let task = wait_terminal(&orch, &entry.id).await;
        assert_eq!(task.status, ReplicationStatus::Succeeded);
    }

    #[tokio::test]
    async fn worker_sharding_is_stable() {
        let a = worker_for_id("1700000000123456789-abcd1234", 4);
        let b = worker_for_id("1700000000123456789-abcd1234", 4);
        assert_eq!(a, b);
        assert!(a < 4);
    }

    #[tokio::test]
    async fn store_location_follows_overflow() {
        // Cache too small for the payload; without overflow the store fails.
        let orch = StorageOrchestrator::new(cache(4), None, None);
        let err = orch
            .store(
                Bytes::from_static(b"too large"),
                "a.webm",
                "audio/webm",
                None,
                HashMap::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::CapacityExceeded { .. }));
    }

    #[tokio::test]
    async fn entry_metadata_passes_through_verbatim() {
        let orch = StorageOrchestrator::new(cache(10_000), None, None);
        let mut extra = HashMap::new();
        extra.insert("duration_ms".to_string(), "5250".to_string());

        let handle = orch
            .store(
                Bytes::from_static(b"x"),
                "a.webm",
                "audio/webm",
                None,
                extra.clone(),
            )
            .await
            .unwrap();

        let entry = orch.cache.stat(&handle.id).await.unwrap();
        assert_eq!(entry.extra_metadata, extra);
        assert_eq!(entry.location, TierLocation::Memory);
    }
}
