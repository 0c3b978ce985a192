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

//! Bounded connection pool for remote operations.
//!
//! A thin wrapper over a FIFO-fair semaphore: acquisition blocks (with a
//! timeout) until a slot frees, and releasing a slot hands it to the next
//! waiter in arrival order.

use crate::storage::StorageError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone)]
pub struct ConnectionPool {
    semaphore: Arc<Semaphore>,
    acquire_timeout: Duration,
    max_connections: usize,
}

/// RAII guard for one pool slot; the slot frees on drop.
pub type PoolSlot = OwnedSemaphorePermit;

impl ConnectionPool {
    pub fn new(max_connections: usize, acquire_timeout: Duration) -> Self {
        let max_connections = max_connections.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_connections)),
            acquire_timeout,
            max_connections,
        }
    }

    /// Wait for a slot, up to the configured timeout.
    pub async fn acquire(&self) -> Result<PoolSlot, StorageError> {
        match tokio::time::timeout(
            self.acquire_timeout,
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(StorageError::Internal("connection pool closed".into())),
            Err(_) => Err(StorageError::AcquireTimeout(self.acquire_timeout)),
        }
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Slots currently free (informational, racy by nature).
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
