pub mod config;
pub mod observability;
pub mod storage;

pub use config::{BackendKind, Config};
pub use storage::orchestrator::{ReplicationStatus, ReplicationTask, StorageOrchestrator, StoredHandle};
pub use storage::sweep_executor::{SweepExecutor, SweepExecutorConfig};
pub use storage::{StorageBackend, StorageEntry, StorageError, TierLocation};
