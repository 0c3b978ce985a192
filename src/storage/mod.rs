use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub mod disk_overflow;
pub mod factory;
pub mod memory_cache;
pub mod orchestrator;
pub mod pool;
pub mod remote;
pub mod retry;
pub mod stats;
pub mod sweep_executor;

/// Which tier currently holds the primary copy of an entry's payload.
///
/// An entry may exist in more than one tier at a time (e.g. memory plus
/// remote after replication completes); `location` records where the write
/// that produced this metadata landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierLocation {
    Memory,
    Disk,
    Remote,
}

impl std::fmt::Display for TierLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TierLocation::Memory => write!(f, "memory"),
            TierLocation::Disk => write!(f, "disk"),
            TierLocation::Remote => write!(f, "remote"),
        }
    }
}

/// Metadata for one stored blob.
///
/// The payload itself is write-once: the bytes bound to an `id` never change
/// after creation. `extra_metadata` is passed through verbatim and never
/// interpreted by any tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageEntry {
    pub id: String,
    pub owner_key: Option<String>,
    pub size_bytes: u64,
    pub mime_type: String,
    pub original_name: String,
    /// md5 hex digest of the payload, for integrity reporting.
    pub checksum: String,
    pub created_at: DateTime<Utc>,
    /// `None` means the entry never auto-expires.
    pub expires_at: Option<DateTime<Utc>>,
    pub location: TierLocation,
    #[serde(default)]
    pub extra_metadata: HashMap<String, String>,
}

impl StorageEntry {
    /// Build a new entry for a payload about to be stored. Issues a fresh id.
    pub fn new(
        owner_key: Option<&str>,
        original_name: &str,
        mime_type: &str,
        data: &[u8],
        expires_at: Option<DateTime<Utc>>,
        extra_metadata: HashMap<String, String>,
    ) -> Self {
        Self {
            id: generate_entry_id(),
            owner_key: owner_key.map(|s| s.to_string()),
            size_bytes: data.len() as u64,
            mime_type: mime_type.to_string(),
            original_name: original_name.to_string(),
            checksum: format!("{:x}", md5::compute(data)),
            created_at: Utc::now(),
            expires_at,
            location: TierLocation::Memory,
            extra_metadata,
        }
    }

    /// Whether the entry's own expiry deadline has passed.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }
}

/// Generate a unique entry id: time-ordered prefix (so ids sort roughly
/// chronologically) plus a random suffix to avoid collisions.
pub fn generate_entry_id() -> String {
    let now = Utc::now();
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}{:09}-{}",
        now.timestamp(),
        now.timestamp_subsec_nanos(),
        &suffix[..8]
    )
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("entry not found: {0}")]
    NotFound(String),
    #[error("capacity exceeded: need {needed} bytes, limit {limit}")]
    CapacityExceeded { needed: u64, limit: u64 },
    #[error("storage write failed: {0}")]
    WriteFailed(String),
    #[error("pool slot acquisition timed out after {0:?}")]
    AcquireTimeout(Duration),
    #[error("remote unavailable after {attempts} attempts: {last_error}")]
    RemoteUnavailable { attempts: u32, last_error: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("internal storage error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Short label for metrics/error counters.
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::NotFound(_) => "not_found",
            StorageError::CapacityExceeded { .. } => "capacity_exceeded",
            StorageError::WriteFailed(_) => "write_failed",
            StorageError::AcquireTimeout(_) => "acquire_timeout",
            StorageError::RemoteUnavailable { .. } => "remote_unavailable",
            StorageError::InvalidInput(_) => "invalid_input",
            StorageError::Internal(_) => "internal",
        }
    }
}

pub(crate) fn validate_id(id: &str) -> Result<(), StorageError> {
    if id.is_empty() {
        return Err(StorageError::InvalidInput("id must be non-empty".into()));
    }
    Ok(())
}

pub(crate) fn validate_entry(entry: &StorageEntry) -> Result<(), StorageError> {
    validate_id(&entry.id)?;
    if entry.mime_type.is_empty() {
        return Err(StorageError::InvalidInput(
            "mime_type must be non-empty".into(),
        ));
    }
    Ok(())
}

/// Capability contract satisfied by every storage tier: in-memory cache,
/// disk overflow store, and the durable remote store.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Store the payload under `entry.id`. Returns the entry as recorded by
    /// the tier (with `location` updated).
    async fn put(&self, entry: StorageEntry, data: Bytes) -> Result<StorageEntry, StorageError>;

    async fn get(&self, id: &str) -> Result<(Bytes, StorageEntry), StorageError>;

    /// Remove an entry. `Ok(false)` means the tier did not hold it.
    async fn delete(&self, id: &str) -> Result<bool, StorageError>;

    async fn exists(&self, id: &str) -> Result<bool, StorageError>;

    async fn stat(&self, id: &str) -> Result<StorageEntry, StorageError>;

    /// List entries, optionally scoped to one owner. `limit == 0` applies the
    /// tier's default page size.
    async fn list(
        &self,
        owner_key: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StorageEntry>, StorageError>;

    /// Remove entries older than `max_age` (or past their own `expires_at`).
    /// Returns the number removed.
    async fn sweep_expired(&self, max_age: Duration) -> Result<usize, StorageError>;

    /// A directly addressable URL for the entry, if the tier supports one.
    async fn public_url(
        &self,
        id: &str,
        expires_in: Duration,
    ) -> Result<Option<String>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_ids_are_unique_and_time_ordered() {
        let a = generate_entry_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = generate_entry_id();
        assert_ne!(a, b);
        // Timestamp prefix makes later ids sort after earlier ones.
        assert!(b > a);
    }

    #[test]
    fn entry_expiry_checks() {
        let now = Utc::now();
        let mut entry =
            StorageEntry::new(None, "a.webm", "audio/webm", b"xyz", None, HashMap::new());
        assert!(!entry.is_expired_at(now));

        entry.expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(entry.is_expired_at(now));

        entry.expires_at = Some(now + chrono::Duration::seconds(60));
        assert!(!entry.is_expired_at(now));
    }

    #[test]
    fn entry_checksum_matches_payload() {
        let entry =
            StorageEntry::new(Some("u1"), "a.webm", "audio/webm", b"hello", None, HashMap::new());
        assert_eq!(entry.checksum, format!("{:x}", md5::compute(b"hello")));
        assert_eq!(entry.size_bytes, 5);
        assert_eq!(entry.owner_key.as_deref(), Some("u1"));
    }
}
