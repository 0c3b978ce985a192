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

/// Prometheus metrics definitions for tierstore
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, GaugeVec,
    HistogramVec, TextEncoder,
};

lazy_static! {
    // ============================================================================
    // Tier Metrics
    // ============================================================================

    /// Storage operations per tier
    pub static ref TIER_OPS_TOTAL: CounterVec = register_counter_vec!(
        "tier_operations_total",
        "Total storage operations per tier",
        &["operation", "tier"]
    ).unwrap();

    /// Read hits per tier
    pub static ref TIER_HITS_TOTAL: CounterVec = register_counter_vec!(
        "tier_hits_total",
        "Reads answered per tier",
        &["tier"]
    ).unwrap();

    /// Storage operation duration in seconds
    pub static ref STORAGE_OP_DURATION: HistogramVec = register_histogram_vec!(
        "storage_operation_duration_seconds",
        "Storage operation duration in seconds",
        &["operation", "tier"],
        vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0]
    ).unwrap();

    // ============================================================================
    // Cache Metrics
    // ============================================================================

    /// Cache evictions by reason
    pub static ref CACHE_EVICTIONS_TOTAL: CounterVec = register_counter_vec!(
        "cache_evictions_total",
        "Total cache evictions",
        &["reason"]
    ).unwrap();

    /// Bytes currently held by the memory cache
    pub static ref CACHE_BYTES_USED: GaugeVec = register_gauge_vec!(
        "cache_bytes_used",
        "Bytes currently held by the memory cache",
        &[]
    ).unwrap();

    // ============================================================================
    // Replication Metrics
    // ============================================================================

    /// Replication task outcomes
    pub static ref REPLICATION_TOTAL: CounterVec = register_counter_vec!(
        "replication_total",
        "Replication task outcomes",
        &["outcome"]
    ).unwrap();

    /// Attempts consumed per finished replication task
    pub static ref REPLICATION_ATTEMPTS: HistogramVec = register_histogram_vec!(
        "replication_attempts",
        "Attempts consumed per finished replication task",
        &[],
        vec![1.0, 2.0, 3.0, 4.0, 5.0, 8.0]
    ).unwrap();

    // ============================================================================
    // Sweep Metrics
    // ============================================================================

    /// Entries removed by expiry sweeps
    pub static ref SWEEP_REMOVED_TOTAL: CounterVec = register_counter_vec!(
        "sweep_removed_total",
        "Entries removed by expiry sweeps",
        &[]
    ).unwrap();

    // ============================================================================
    // Error Metrics
    // ============================================================================

    /// Error count by type and component
    pub static ref ERROR_TOTAL: CounterVec = register_counter_vec!(
        "error_total",
        "Total number of errors",
        &["error_type", "component"]
    ).unwrap();
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Increment per-tier operation counter
pub fn record_tier_op(operation: &str, tier: &str) {
    TIER_OPS_TOTAL.with_label_values(&[operation, tier]).inc();
}

/// Increment per-tier read hit counter
pub fn record_tier_hit(tier: &str) {
    TIER_HITS_TOTAL.with_label_values(&[tier]).inc();
}

/// Record storage operation duration
pub fn record_storage_op(operation: &str, tier: &str, duration: f64) {
    STORAGE_OP_DURATION
        .with_label_values(&[operation, tier])
        .observe(duration);
}

/// Increment cache eviction counter
pub fn increment_cache_eviction(reason: &str) {
    CACHE_EVICTIONS_TOTAL.with_label_values(&[reason]).inc();
}

/// Set the cache bytes-used gauge
pub fn set_cache_bytes_used(bytes: u64) {
    CACHE_BYTES_USED.with_label_values(&[]).set(bytes as f64);
}

/// Increment replication outcome counter
pub fn increment_replication(outcome: &str) {
    REPLICATION_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record attempts consumed by a finished replication task
pub fn record_replication_attempts(attempts: u32) {
    REPLICATION_ATTEMPTS
        .with_label_values(&[])
        .observe(attempts as f64);
}

/// Count entries removed by an expiry sweep
pub fn record_sweep_removed(removed: usize) {
    SWEEP_REMOVED_TOTAL
        .with_label_values(&[])
        .inc_by(removed as f64);
}

/// Increment error counter
pub fn increment_error(error_type: &str, component: &str) {
    ERROR_TOTAL
        .with_label_values(&[error_type, component])
        .inc();
}

/// Gather all metrics for Prometheus exposition
pub fn gather_metrics() -> Vec<u8> {
    use prometheus::Encoder;
    let encoder = TextEncoder::new();
    // Use the default registry since our metrics are registered there
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    buffer
}
