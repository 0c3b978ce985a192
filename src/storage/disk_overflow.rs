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

//! Filesystem-backed overflow tier.
//!
//! Payloads live under `{base_dir}/{owner|shared}/{id}.bin`; the metadata
//! catalogue is one JSON index file rewritten atomically (temp file +
//! rename) under a mutex, so concurrent writers never interleave a partial
//! index. The index is loaded at startup; entries whose backing file has
//! gone missing are pruned lazily on first access.

use crate::observability::metrics;
use crate::storage::{
    validate_entry, validate_id, StorageBackend, StorageEntry, StorageError, TierLocation,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::Mutex;

const INDEX_FILE: &str = "index.json";
const SHARED_NAMESPACE: &str = "shared";
const DEFAULT_LIST_LIMIT: usize = 1000;

#[derive(Debug, Default, Serialize, Deserialize)]
struct DiskIndex {
    entries: HashMap<String, StorageEntry>,
}

#[derive(Debug)]
pub struct DiskOverflowStore {
    base_dir: PathBuf,
    index: Mutex<DiskIndex>,
}

impl DiskOverflowStore {
    /// Open (or create) the store rooted at `base_dir`, recovering the
    /// persisted catalogue.
    pub async fn new<P: AsRef<Path>>(base_dir: P) -> Result<Self, StorageError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir)
            .await
            .map_err(|e| StorageError::WriteFailed(format!("init {:?}: {}", base_dir, e)))?;

        let index_path = base_dir.join(INDEX_FILE);
        let index = match fs::read_to_string(&index_path).await {
            Ok(raw) => match serde_json::from_str::<DiskIndex>(&raw) {
                Ok(index) => {
                    tracing::info!(
                        path = %index_path.display(),
                        entries = index.entries.len(),
                        "recovered disk overflow index"
                    );
                    index
                }
                Err(e) => {
                    tracing::warn!(
                        path = %index_path.display(),
                        error = %e,
                        "corrupt index, starting empty"
                    );
                    DiskIndex::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => DiskIndex::default(),
            Err(e) => {
                return Err(StorageError::Internal(format!(
                    "read index {:?}: {}",
                    index_path, e
                )))
            }
        };

        Ok(Self {
            base_dir,
            index: Mutex::new(index),
        })
    }

    fn index_path(&self) -> PathBuf {
        self.base_dir.join(INDEX_FILE)
    }

    fn data_path(&self, entry: &StorageEntry) -> PathBuf {
        let namespace = entry.owner_key.as_deref().unwrap_or(SHARED_NAMESPACE);
        self.base_dir.join(namespace).join(format!("{}.bin", entry.id))
    }

    /// Rewrite the index file atomically. Callers hold the index lock.
    async fn persist_index(&self, index: &DiskIndex) -> Result<(), StorageError> {
        let path = self.index_path();
        let tmp = path.with_extension("json.tmp");
        let raw = serde_json::to_vec_pretty(index)
            .map_err(|e| StorageError::Internal(format!("encode index: {e}")))?;

        fs::write(&tmp, &raw)
            .await
            .map_err(|e| StorageError::WriteFailed(format!("write {:?}: {}", tmp, e)))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| StorageError::WriteFailed(format!("rename {:?}: {}", path, e)))?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for DiskOverflowStore {
    async fn put(&self, mut entry: StorageEntry, data: Bytes) -> Result<StorageEntry, StorageError> {
        validate_entry(&entry)?;
        entry.size_bytes = data.len() as u64;
        entry.location = TierLocation::Disk;

        let path = self.data_path(&entry);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::WriteFailed(format!("mkdir {:?}: {}", parent, e)))?;
        }

        // Temp file + rename so a reader never sees a partial payload.
        let tmp = path.with_extension("bin.tmp");
        fs::write(&tmp, &data)
            .await
            .map_err(|e| StorageError::WriteFailed(format!("write {:?}: {}", tmp, e)))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| StorageError::WriteFailed(format!("rename {:?}: {}", path, e)))?;

        let mut index = self.index.lock().await;
        index.entries.insert(entry.id.clone(), entry.clone());
        self.persist_index(&index).await?;

        tracing::debug!(id = %entry.id, size = entry.size_bytes, path = %path.display(), "stored overflow entry");
        metrics::record_tier_op("put", "disk");
        Ok(entry)
    }

    async fn get(&self, id: &str) -> Result<(Bytes, StorageEntry), StorageError> {
        validate_id(id)?;
        let mut index = self.index.lock().await;
        let entry = index
            .entries
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;

        let path = self.data_path(&entry);
        match fs::read(&path).await {
            Ok(data) => {
                metrics::record_tier_op("get", "disk");
                Ok((Bytes::from(data), entry))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Backing file gone; prune the stale catalogue entry.
                tracing::warn!(id, path = %path.display(), "backing file missing, pruning index entry");
                index.entries.remove(id);
                self.persist_index(&index).await?;
                Err(StorageError::NotFound(id.to_string()))
            }
            Err(e) => Err(StorageError::Internal(format!("read {:?}: {}", path, e))),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        validate_id(id)?;
        let mut index = self.index.lock().await;
        let Some(entry) = index.entries.remove(id) else {
            return Ok(false);
        };

        let path = self.data_path(&entry);
        if let Err(e) = fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                // Keep the index consistent even if unlink failed.
                tracing::warn!(id, error = %e, "failed to remove backing file");
            }
        }
        self.persist_index(&index).await?;
        tracing::debug!(id, "deleted overflow entry");
        Ok(true)
    }

    async fn exists(&self, id: &str) -> Result<bool, StorageError> {
        validate_id(id)?;
        let index = self.index.lock().await;
        match index.entries.get(id) {
            Some(entry) => {
                let path = self.data_path(entry);
                Ok(fs::try_exists(&path).await.unwrap_or(false))
            }
            None => Ok(false),
        }
    }

    async fn stat(&self, id: &str) -> Result<StorageEntry, StorageError> {
        validate_id(id)?;
        let mut index = self.index.lock().await;
        let entry = index
            .entries
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;

        let path = self.data_path(&entry);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            index.entries.remove(id);
            self.persist_index(&index).await?;
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(entry)
    }

    async fn list(
        &self,
        owner_key: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StorageEntry>, StorageError> {
        let limit = if limit == 0 { DEFAULT_LIST_LIMIT } else { limit };
        let index = self.index.lock().await;
        let mut out: Vec<StorageEntry> = index
            .entries
            .values()
            .filter(|entry| match owner_key {
                Some(owner) => entry.owner_key.as_deref() == Some(owner),
                None => true,
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out.truncate(limit);
        Ok(out)
    }

    async fn sweep_expired(&self, max_age: Duration) -> Result<usize, StorageError> {
        let now = Utc::now();
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| now.checked_sub_signed(age));

        let mut index = self.index.lock().await;
        let doomed: Vec<StorageEntry> = index
            .entries
            .values()
            .filter(|e| {
                e.is_expired_at(now) || cutoff.map(|c| e.created_at <= c).unwrap_or(false)
            })
            .cloned()
            .collect();

        for entry in &doomed {
            index.entries.remove(&entry.id);
            let path = self.data_path(entry);
            if let Err(e) = fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(id = %entry.id, error = %e, "sweep failed to remove file");
                }
            }
        }

        if !doomed.is_empty() {
            self.persist_index(&index).await?;
            tracing::info!(removed = doomed.len(), "disk overflow sweep");
        }
        Ok(doomed.len())
    }

    async fn public_url(
        &self,
        _id: &str,
        _expires_in: Duration,
    ) -> Result<Option<String>, StorageError> {
        // Local files are only reachable through the serving pipeline.
        Ok(None)
    }
}
