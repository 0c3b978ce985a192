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

use crate::observability::metrics;
use crate::storage::orchestrator::StorageOrchestrator;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// Configuration for the expiry sweep executor
#[derive(Debug, Clone)]
pub struct SweepExecutorConfig {
    /// Whether background sweeping is enabled
    pub enabled: bool,
    /// Interval between sweeps (in seconds)
    pub interval_secs: u64,
    /// Entries older than this are removed (in seconds)
    pub max_age_secs: u64,
}

impl Default for SweepExecutorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300, // 5 minutes
            max_age_secs: 86400, // 1 day
        }
    }
}

impl From<&crate::config::SweepConfig> for SweepExecutorConfig {
    fn from(cfg: &crate::config::SweepConfig) -> Self {
        Self {
            enabled: cfg.enabled,
            interval_secs: cfg.interval_secs,
            max_age_secs: cfg.max_age_secs,
        }
    }
}

/// Background executor for expiry sweeps
///
/// Periodically asks the orchestrator to drop entries past their age bound
/// from every tier. Expired entries are also removed lazily on access, so
/// the sweep only bounds how long dead entries can linger.
pub struct SweepExecutor {
    orchestrator: Arc<StorageOrchestrator>,
    config: SweepExecutorConfig,
}

impl SweepExecutor {
    pub fn new(orchestrator: Arc<StorageOrchestrator>, config: SweepExecutorConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    /// Spawn the executor as a background task
    ///
    /// Returns a JoinHandle that can be used to wait for the task or cancel it
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run_loop().await;
        })
    }

    /// Main execution loop - runs periodically based on config
    async fn run_loop(&self) {
        if !self.config.enabled {
            tracing::info!("Sweep executor disabled in config");
            return;
        }

        tracing::info!(
            "Starting sweep executor (interval: {}s, max age: {}s)",
            self.config.interval_secs,
            self.config.max_age_secs
        );

        let mut ticker = interval(Duration::from_secs(self.config.interval_secs));

        loop {
            ticker.tick().await;

            let start_time = std::time::Instant::now();
            match self.sweep_once().await {
                Ok(removed) => {
                    let duration = start_time.elapsed().as_secs_f64();
                    if removed > 0 {
                        tracing::info!(
                            "Sweep completed: {} entries removed, duration: {:.2}s",
                            removed,
                            duration
                        );
                    }
                }
                Err(e) => {
                    tracing::error!("Sweep failed: {}", e);
                    metrics::increment_error(e.kind(), "sweep");
                }
            }
        }
    }

    /// Run one sweep across all tiers; returns entries removed
    async fn sweep_once(&self) -> Result<usize, crate::storage::StorageError> {
        let max_age = Duration::from_secs(self.config.max_age_secs);
        let removed = self.orchestrator.sweep(max_age).await?;
        metrics::record_sweep_removed(removed);
        Ok(removed)
    }
}
