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

//! Retry-with-backoff executor for remote operations.
//!
//! Every attempt acquires and releases its own pool slot; a slot is never
//! held across the backoff sleep between attempts.

use crate::storage::pool::ConnectionPool;
use crate::storage::stats::RemoteStats;
use crate::storage::StorageError;
use futures_util::future::BoxFuture;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_base: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the attempt following `attempt`: `base * 2^(attempt-1)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_base * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Run `attempt_fn` up to the policy's attempt budget.
///
/// Returns the number of attempts executed alongside the outcome; after the
/// budget is exhausted the last error surfaces as `RemoteUnavailable`. Stats
/// are updated after every completed attempt.
pub async fn execute_with_retry<T, F>(
    policy: &RetryPolicy,
    pool: &ConnectionPool,
    stats: &RemoteStats,
    op_name: &'static str,
    mut attempt_fn: F,
) -> (u32, Result<T, StorageError>)
where
    T: Send,
    F: FnMut() -> BoxFuture<'static, Result<T, StorageError>> + Send,
{
    let mut last_error: Option<StorageError> = None;

    for attempt in 1..=policy.max_attempts() {
        let started = Instant::now();
        let outcome = match pool.acquire().await {
            Ok(slot) => {
                let result = attempt_fn().await;
                drop(slot);
                result
            }
            Err(e) => Err(e),
        };
        let elapsed = started.elapsed();

        match outcome {
            Ok(value) => {
                stats.record_success(elapsed);
                return (attempt, Ok(value));
            }
            Err(e) => {
                stats.record_failure(elapsed);
                tracing::warn!(
                    op = op_name,
                    attempt,
                    max_attempts = policy.max_attempts(),
                    error = %e,
                    "remote attempt failed"
                );
                last_error = Some(e);

                if attempt < policy.max_attempts() {
                    tokio::time::sleep(policy.backoff_delay(attempt)).await;
                }
            }
        }
    }

    let attempts = policy.max_attempts();
    let last_error = last_error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "no attempts executed".to_string());
    (
        attempts,
        Err(StorageError::RemoteUnavailable {
            attempts,
            last_error,
        }),
    )
}
