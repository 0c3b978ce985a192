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

//! Durable remote store tier.
//!
//! `RemoteStore` wraps an `ObjectTransport` (the actual network seam) in a
//! bounded connection pool and a retry-with-backoff executor, and tracks
//! rolling operation statistics. Capacity is treated as unbounded.

use crate::config::RemoteConfig;
use crate::observability::metrics;
use crate::storage::pool::ConnectionPool;
use crate::storage::retry::{execute_with_retry, RetryPolicy};
use crate::storage::stats::{RemoteStats, RemoteStatsSnapshot};
use crate::storage::{
    validate_entry, validate_id, StorageBackend, StorageEntry, StorageError, TierLocation,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures_util::FutureExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

const DEFAULT_LIST_LIMIT: usize = 1000;
const META_HEADER: &str = "x-entry-meta";

/// Network seam for the durable store. One call here is one network attempt;
/// pooling and retries live a layer above in `RemoteStore`.
#[async_trait]
pub trait ObjectTransport: Send + Sync + 'static {
    /// Upload a payload; returns the remote URL of the stored object.
    async fn put(&self, entry: &StorageEntry, data: Bytes) -> Result<String, StorageError>;
    async fn get(&self, id: &str) -> Result<(Bytes, StorageEntry), StorageError>;
    async fn delete(&self, id: &str) -> Result<bool, StorageError>;
    async fn exists(&self, id: &str) -> Result<bool, StorageError>;
    async fn stat(&self, id: &str) -> Result<StorageEntry, StorageError>;
    async fn list(
        &self,
        owner_key: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StorageEntry>, StorageError>;
    async fn signed_url(&self, id: &str, expires_in: Duration) -> Result<String, StorageError>;
}

/// In-process transport. Used by tests and local development where no real
/// object store is reachable; deterministic listing via `BTreeMap`.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    objects: RwLock<BTreeMap<String, (Bytes, StorageEntry)>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn object_url(id: &str) -> String {
        format!("memory://objects/{id}")
    }
}

#[async_trait]
impl ObjectTransport for MemoryTransport {
    async fn put(&self, entry: &StorageEntry, data: Bytes) -> Result<String, StorageError> {
        let mut objects = self.objects.write().await;
        objects.insert(entry.id.clone(), (data, entry.clone()));
        Ok(Self::object_url(&entry.id))
    }

    async fn get(&self, id: &str) -> Result<(Bytes, StorageEntry), StorageError> {
        let objects = self.objects.read().await;
        objects
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        let mut objects = self.objects.write().await;
        Ok(objects.remove(id).is_some())
    }

    async fn exists(&self, id: &str) -> Result<bool, StorageError> {
        let objects = self.objects.read().await;
        Ok(objects.contains_key(id))
    }

    async fn stat(&self, id: &str) -> Result<StorageEntry, StorageError> {
        let objects = self.objects.read().await;
        objects
            .get(id)
            .map(|(_, entry)| entry.clone())
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    async fn list(
        &self,
        owner_key: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StorageEntry>, StorageError> {
        let limit = if limit == 0 { DEFAULT_LIST_LIMIT } else { limit };
        let objects = self.objects.read().await;
        Ok(objects
            .values()
            .filter(|(_, entry)| match owner_key {
                Some(owner) => entry.owner_key.as_deref() == Some(owner),
                None => true,
            })
            .map(|(_, entry)| entry.clone())
            .take(limit)
            .collect())
    }

    async fn signed_url(&self, id: &str, expires_in: Duration) -> Result<String, StorageError> {
        let expires = Utc::now().timestamp() + expires_in.as_secs() as i64;
        Ok(format!("{}?expires={}", Self::object_url(id), expires))
    }
}

/// HTTP transport against an object-store endpoint.
///
/// Objects live at `{endpoint}/objects/{id}`; entry metadata rides in the
/// `x-entry-meta` header as JSON. Signed URLs append an expiry and an
/// md5-based token derived from the shared secret.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    secret: String,
}

impl HttpTransport {
    pub fn new(
        endpoint: impl Into<String>,
        secret: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| StorageError::Internal(format!("build http client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            secret: secret.into(),
        })
    }

    fn object_url(&self, id: &str) -> String {
        format!("{}/objects/{}", self.endpoint, id)
    }

    fn parse_meta(response: &reqwest::Response) -> Result<StorageEntry, StorageError> {
        let raw = response
            .headers()
            .get(META_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| StorageError::Internal("missing entry metadata header".into()))?;
        serde_json::from_str(raw)
            .map_err(|e| StorageError::Internal(format!("decode entry metadata: {e}")))
    }
}

#[async_trait]
impl ObjectTransport for HttpTransport {
    async fn put(&self, entry: &StorageEntry, data: Bytes) -> Result<String, StorageError> {
        let url = self.object_url(&entry.id);
        let meta = serde_json::to_string(entry)
            .map_err(|e| StorageError::Internal(format!("encode entry metadata: {e}")))?;

        let response = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, &entry.mime_type)
            .header(META_HEADER, meta)
            .body(data)
            .send()
            .await
            .map_err(|e| StorageError::WriteFailed(format!("put {}: {}", entry.id, e)))?;

        if !response.status().is_success() {
            return Err(StorageError::WriteFailed(format!(
                "put {}: status {}",
                entry.id,
                response.status()
            )));
        }
        Ok(url)
    }

    async fn get(&self, id: &str) -> Result<(Bytes, StorageEntry), StorageError> {
        let response = self
            .client
            .get(self.object_url(id))
            .send()
            .await
            .map_err(|e| StorageError::Internal(format!("get {id}: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(id.to_string()));
        }
        if !response.status().is_success() {
            return Err(StorageError::Internal(format!(
                "get {id}: status {}",
                response.status()
            )));
        }

        let entry = Self::parse_meta(&response)?;
        let data = response
            .bytes()
            .await
            .map_err(|e| StorageError::Internal(format!("get {id} body: {e}")))?;
        Ok((data, entry))
    }

    async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        let response = self
            .client
            .delete(self.object_url(id))
            .send()
            .await
            .map_err(|e| StorageError::Internal(format!("delete {id}: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(StorageError::Internal(format!(
                "delete {id}: status {}",
                response.status()
            )));
        }
        Ok(true)
    }

    async fn exists(&self, id: &str) -> Result<bool, StorageError> {
        let response = self
            .client
            .head(self.object_url(id))
            .send()
            .await
            .map_err(|e| StorageError::Internal(format!("head {id}: {e}")))?;
        Ok(response.status().is_success())
    }

    async fn stat(&self, id: &str) -> Result<StorageEntry, StorageError> {
        let response = self
            .client
            .head(self.object_url(id))
            .send()
            .await
            .map_err(|e| StorageError::Internal(format!("head {id}: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(id.to_string()));
        }
        if !response.status().is_success() {
            return Err(StorageError::Internal(format!(
                "head {id}: status {}",
                response.status()
            )));
        }
        Self::parse_meta(&response)
    }

    async fn list(
        &self,
        owner_key: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StorageEntry>, StorageError> {
        let limit = if limit == 0 { DEFAULT_LIST_LIMIT } else { limit };
        let mut request = self
            .client
            .get(format!("{}/objects", self.endpoint))
            .query(&[("limit", limit.to_string())]);
        if let Some(owner) = owner_key {
            request = request.query(&[("owner", owner)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StorageError::Internal(format!("list: {e}")))?;
        if !response.status().is_success() {
            return Err(StorageError::Internal(format!(
                "list: status {}",
                response.status()
            )));
        }
        response
            .json::<Vec<StorageEntry>>()
            .await
            .map_err(|e| StorageError::Internal(format!("decode list: {e}")))
    }

    async fn signed_url(&self, id: &str, expires_in: Duration) -> Result<String, StorageError> {
        let expires = Utc::now().timestamp() + expires_in.as_secs() as i64;
        let token = format!("{:x}", md5::compute(format!("{}:{}:{}", self.secret, id, expires)));
        Ok(format!(
            "{}?expires={}&token={}",
            self.object_url(id),
            expires,
            token
        ))
    }
}

/// The durable remote tier. Every operation runs through the connection
/// pool and retry executor; statistics update after every attempt.
pub struct RemoteStore {
    transport: Arc<dyn ObjectTransport>,
    pool: ConnectionPool,
    retry: RetryPolicy,
    stats: Arc<RemoteStats>,
}

impl RemoteStore {
    pub fn new(
        transport: Arc<dyn ObjectTransport>,
        max_connections: usize,
        acquire_timeout: Duration,
        max_attempts: u32,
        backoff_base: Duration,
    ) -> Self {
        Self {
            transport,
            pool: ConnectionPool::new(max_connections, acquire_timeout),
            retry: RetryPolicy::new(max_attempts, backoff_base),
            stats: Arc::new(RemoteStats::new()),
        }
    }

    pub fn from_config(cfg: &RemoteConfig) -> Result<Self, StorageError> {
        let transport = HttpTransport::new(&cfg.endpoint, &cfg.secret, cfg.request_timeout())?;
        Ok(Self::new(
            Arc::new(transport),
            cfg.max_connections,
            cfg.acquire_timeout(),
            cfg.max_attempts,
            cfg.backoff_base(),
        ))
    }

    pub fn stats(&self) -> RemoteStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn max_connections(&self) -> usize {
        self.pool.max_connections()
    }

    /// Upload with full pool/retry semantics, reporting how many attempts
    /// were spent. Used by the replication worker, which records attempt
    /// counts in the task ledger.
    pub async fn put_tracked(
        &self,
        entry: &StorageEntry,
        data: Bytes,
    ) -> (u32, Result<String, StorageError>) {
        let mut entry = entry.clone();
        entry.location = TierLocation::Remote;

        let transport = Arc::clone(&self.transport);
        execute_with_retry(&self.retry, &self.pool, &self.stats, "put", move || {
            let transport = Arc::clone(&transport);
            let entry = entry.clone();
            let data = data.clone();
            async move { transport.put(&entry, data).await }.boxed()
        })
        .await
    }
}

#[async_trait]
impl StorageBackend for RemoteStore {
    async fn put(&self, entry: StorageEntry, data: Bytes) -> Result<StorageEntry, StorageError> {
        validate_entry(&entry)?;
        let mut entry = entry;
        entry.location = TierLocation::Remote;
        let (_, result) = self.put_tracked(&entry, data).await;
        result.map(|_| {
            metrics::record_tier_op("put", "remote");
            entry
        })
    }

    async fn get(&self, id: &str) -> Result<(Bytes, StorageEntry), StorageError> {
        validate_id(id)?;
        let transport = Arc::clone(&self.transport);
        let id_owned = id.to_string();
        let (_, result) = execute_with_retry(&self.retry, &self.pool, &self.stats, "get", move || {
            let transport = Arc::clone(&transport);
            let id = id_owned.clone();
            async move { transport.get(&id).await }.boxed()
        })
        .await;
        if result.is_ok() {
            metrics::record_tier_op("get", "remote");
        }
        result
    }

    async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        validate_id(id)?;
        let transport = Arc::clone(&self.transport);
        let id_owned = id.to_string();
        let (_, result) =
            execute_with_retry(&self.retry, &self.pool, &self.stats, "delete", move || {
                let transport = Arc::clone(&transport);
                let id = id_owned.clone();
                async move { transport.delete(&id).await }.boxed()
            })
            .await;
        result
    }

    async fn exists(&self, id: &str) -> Result<bool, StorageError> {
        validate_id(id)?;
        let transport = Arc::clone(&self.transport);
        let id_owned = id.to_string();
        let (_, result) =
            execute_with_retry(&self.retry, &self.pool, &self.stats, "exists", move || {
                let transport = Arc::clone(&transport);
                let id = id_owned.clone();
                async move { transport.exists(&id).await }.boxed()
            })
            .await;
        result
    }

    async fn stat(&self, id: &str) -> Result<StorageEntry, StorageError> {
        validate_id(id)?;
        let transport = Arc::clone(&self.transport);
        let id_owned = id.to_string();
        let (_, result) =
            execute_with_retry(&self.retry, &self.pool, &self.stats, "stat", move || {
                let transport = Arc::clone(&transport);
                let id = id_owned.clone();
                async move { transport.stat(&id).await }.boxed()
            })
            .await;
        result
    }

    async fn list(
        &self,
        owner_key: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StorageEntry>, StorageError> {
        let transport = Arc::clone(&self.transport);
        let owner = owner_key.map(|s| s.to_string());
        let (_, result) =
            execute_with_retry(&self.retry, &self.pool, &self.stats, "list", move || {
                let transport = Arc::clone(&transport);
                let owner = owner.clone();
                async move { transport.list(owner.as_deref(), limit).await }.boxed()
            })
            .await;
        result
    }

    async fn sweep_expired(&self, max_age: Duration) -> Result<usize, StorageError> {
        let now = Utc::now();
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| now.checked_sub_signed(age));

        let entries = self.list(None, 0).await?;
        let mut removed = 0usize;
        for entry in entries {
            let doomed =
                entry.is_expired_at(now) || cutoff.map(|c| entry.created_at <= c).unwrap_or(false);
            if !doomed {
                continue;
            }
            match self.delete(&entry.id).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(id = %entry.id, error = %e, "remote sweep delete failed");
                }
            }
        }
        if removed > 0 {
            tracing::info!(removed, "remote sweep");
        }
        Ok(removed)
    }

    async fn public_url(
        &self,
        id: &str,
        expires_in: Duration,
    ) -> Result<Option<String>, StorageError> {
        validate_id(id)?;
        let transport = Arc::clone(&self.transport);
        let id_owned = id.to_string();
        let (_, result) =
            execute_with_retry(&self.retry, &self.pool, &self.stats, "signed_url", move || {
                let transport = Arc::clone(&transport);
                let id = id_owned.clone();
                async move { transport.signed_url(&id, expires_in).await }.boxed()
            })
            .await;
        result.map(Some)
    }
}
