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

//! Backend selection from configuration.
//!
//! `BackendKind` is a closed enum, so adding a variant without a
//! construction arm here fails to compile.

use crate::config::{BackendKind, Config};
use crate::storage::disk_overflow::DiskOverflowStore;
use crate::storage::memory_cache::{MemoryCache, MemoryCacheConfig};
use crate::storage::remote::RemoteStore;
use crate::storage::{StorageBackend, StorageError};
use std::sync::Arc;

/// Build a single standalone backend of the configured kind.
///
/// The orchestrator composes tiers itself; this entry point serves callers
/// that want exactly one tier behind the `StorageBackend` trait.
pub async fn create_backend(cfg: &Config) -> Result<Arc<dyn StorageBackend>, StorageError> {
    let backend: Arc<dyn StorageBackend> = match cfg.backend {
        BackendKind::Memory => {
            let cache = MemoryCache::new(MemoryCacheConfig {
                capacity_bytes: cfg.memory.capacity_bytes,
                max_item_bytes: cfg.memory.max_item_bytes,
                ttl: cfg.memory.ttl(),
            });
            Arc::new(cache)
        }
        BackendKind::Disk => Arc::new(DiskOverflowStore::new(&cfg.disk.base_dir).await?),
        BackendKind::Remote => Arc::new(RemoteStore::from_config(&cfg.remote)?),
    };

    tracing::info!(backend = ?cfg.backend, "storage backend created");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::collections::HashMap;

    #[tokio::test]
    async fn creates_memory_backend_by_default() {
        let cfg = Config::default();
        let backend = create_backend(&cfg).await.unwrap();

        let entry = crate::storage::StorageEntry::new(
            None,
            "clip.webm",
            "audio/webm",
            b"payload",
            None,
            HashMap::new(),
        );
        let stored = backend
            .put(entry, Bytes::from_static(b"payload"))
            .await
            .unwrap();
        assert!(backend.exists(&stored.id).await.unwrap());
    }

    #[tokio::test]
    async fn creates_disk_backend() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.backend = BackendKind::Disk;
        cfg.disk.base_dir = dir.path().to_string_lossy().into_owned();

        let backend = create_backend(&cfg).await.unwrap();
        assert!(!backend.exists("missing").await.unwrap());
    }

    #[tokio::test]
    async fn creates_remote_backend() {
        let mut cfg = Config::default();
        cfg.backend = BackendKind::Remote;
        cfg.remote.enabled = true;
        cfg.remote.endpoint = "http://127.0.0.1:9000".to_string();

        // Construction must not touch the network.
        assert!(create_backend(&cfg).await.is_ok());
    }
}
