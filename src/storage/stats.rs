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

//! Lock-free rolling statistics for remote operations.
//!
//! Counters and the latency average are updated with atomics only; they feed
//! health reporting and never gate control flow.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct RemoteStats {
    ops_succeeded: AtomicU64,
    ops_failed: AtomicU64,
    /// Exponentially weighted moving average of attempt latency, in micros.
    avg_latency_micros: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteStatsSnapshot {
    pub ops_succeeded: u64,
    pub ops_failed: u64,
    pub avg_latency: Duration,
}

impl RemoteStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, latency: Duration) {
        self.ops_succeeded.fetch_add(1, Ordering::Relaxed);
        self.update_latency(latency);
    }

    pub fn record_failure(&self, latency: Duration) {
        self.ops_failed.fetch_add(1, Ordering::Relaxed);
        self.update_latency(latency);
    }

    fn update_latency(&self, sample: Duration) {
        let sample = sample.as_micros() as u64;
        // Tolerates racing writers; this feeds health output only.
        let prev = self.avg_latency_micros.load(Ordering::Relaxed);
        let next = if prev == 0 {
            sample
        } else {
            (prev * 7 + sample) / 8
        };
        self.avg_latency_micros.store(next, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RemoteStatsSnapshot {
        RemoteStatsSnapshot {
            ops_succeeded: self.ops_succeeded.load(Ordering::Relaxed),
            ops_failed: self.ops_failed.load(Ordering::Relaxed),
            avg_latency: Duration::from_micros(self.avg_latency_micros.load(Ordering::Relaxed)),
        }
    }
}
