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

use serde::Deserialize;
use std::time::Duration;

/// Which tier a standalone `StorageBackend` should be built on.
///
/// Deserialized directly from config, so an unknown backend name fails at
/// load time instead of at first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Disk,
    Remote,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Default backend for callers that want a single tier rather than the
    /// full orchestrator.
    #[serde(default = "default_backend")]
    pub backend: BackendKind,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub disk: DiskConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub sweep: SweepConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryConfig {
    /// Total byte budget for the in-memory cache
    #[serde(default = "default_capacity_bytes")]
    pub capacity_bytes: u64,
    /// Items larger than this never enter memory (overflow straight to disk)
    #[serde(default = "default_max_item_bytes")]
    pub max_item_bytes: u64,
    /// Per-entry time-to-live in seconds (0 = no TTL)
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl MemoryConfig {
    pub fn ttl(&self) -> Option<Duration> {
        if self.ttl_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.ttl_secs))
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: default_capacity_bytes(),
            max_item_bytes: default_max_item_bytes(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiskConfig {
    /// Root directory for the disk overflow store
    #[serde(default = "default_base_dir")]
    pub base_dir: String,
    /// Whether memory-cache overflow to disk is enabled
    #[serde(default = "default_overflow_enabled")]
    pub overflow_enabled: bool,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            overflow_enabled: default_overflow_enabled(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Whether asynchronous replication to the remote store is enabled
    #[serde(default)]
    pub enabled: bool,
    /// Base URL of the remote object store, e.g. "http://127.0.0.1:9000"
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Shared secret used to sign public URLs
    #[serde(default)]
    pub secret: String,
    /// Bounded number of concurrent in-flight remote operations
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// How long a caller waits for a pool slot before giving up (ms)
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Retry budget per remote operation
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for exponential backoff between retries (ms)
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Per-attempt network call timeout (ms)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl RemoteConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_endpoint(),
            secret: String::new(),
            max_connections: default_max_connections(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    /// Whether the background expiry sweeper is enabled
    #[serde(default = "default_sweep_enabled")]
    pub enabled: bool,
    /// Interval between sweeps (seconds)
    #[serde(default = "default_sweep_run_interval_secs")]
    pub interval_secs: u64,
    /// Entries older than this are removed by the sweeper (seconds)
    #[serde(default = "default_sweep_max_age_secs")]
    pub max_age_secs: u64,
}

impl SweepConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: default_sweep_enabled(),
            interval_secs: default_sweep_run_interval_secs(),
            max_age_secs: default_sweep_max_age_secs(),
        }
    }
}

impl Config {
    pub fn from_path(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let s = std::fs::read_to_string(path)?;
        let cfg: Config = toml::from_str(&s)?;
        Ok(cfg)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            memory: MemoryConfig::default(),
            disk: DiskConfig::default(),
            remote: RemoteConfig::default(),
            sweep: SweepConfig::default(),
        }
    }
}

fn default_backend() -> BackendKind {
    BackendKind::Memory
}

fn default_capacity_bytes() -> u64 {
    64 * 1024 * 1024 // 64 MB
}

fn default_max_item_bytes() -> u64 {
    8 * 1024 * 1024 // 8 MB
}

fn default_ttl_secs() -> u64 {
    3600 // 1 hour
}

fn default_base_dir() -> String {
    "./overflow".to_string()
}

fn default_overflow_enabled() -> bool {
    true
}

fn default_endpoint() -> String {
    "http://127.0.0.1:9000".to_string()
}

fn default_max_connections() -> usize {
    8
}

fn default_acquire_timeout_ms() -> u64 {
    5_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    100
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_sweep_enabled() -> bool {
    true
}

fn default_sweep_run_interval_secs() -> u64 {
    300 // 5 minutes
}

fn default_sweep_max_age_secs() -> u64 {
    86_400 // 24 hours
}
