use std::collections::BTreeMap;
use std::time::Duration;

use thaw_core::{ClusterState, HealthState, SnapshotId, SnapshotRecord};
use thiserror::Error;

/// Failure talking to the cluster.
///
/// `Transient` covers timeouts, connection resets and 5xx answers; the executor retries
/// those. `Permanent` is a rejection the cluster will keep giving.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("transient cluster error: {0}")]
    Transient(String),
    #[error("cluster rejected request: {0}")]
    Permanent(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl ClusterError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ClusterError::Transient(_))
    }
}

pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShardCounts {
    pub data_nodes: u32,
    /// Allocated shards keyed by node name.
    pub per_node: BTreeMap<String, u64>,
}

impl ShardCounts {
    pub fn total(&self) -> u64 {
        self.per_node.values().sum()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StorageInfo {
    pub available_bytes: u64,
    pub total_bytes: u64,
}

/// Returned by `trigger_restore`; passed back to `await_restore`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RestoreHandle {
    pub repository: String,
    pub snapshot_id: SnapshotId,
    pub target_unit: String,
}

pub trait ClusterClient: Send + Sync {
    /// Short label used in logs and history.
    fn name(&self) -> &str;

    /// Returns a version or banner string when the cluster answers.
    fn ping(&self) -> ClusterResult<String>;

    fn health(&self) -> ClusterResult<HealthState>;

    fn shard_counts(&self) -> ClusterResult<ShardCounts>;

    fn storage(&self) -> ClusterResult<StorageInfo>;

    /// Snapshots currently stored in `repository`. `restored` is always false here; the
    /// catalog owns that flag.
    fn list_snapshots(&self, repository: &str) -> ClusterResult<Vec<SnapshotRecord>>;

    /// Ask the cluster to start restoring one snapshot. Returns once the request is accepted.
    fn trigger_restore(&self, repository: &str, snapshot: &SnapshotId, target_unit: &str) -> ClusterResult<RestoreHandle>;

    /// Block until the restored unit is fully allocated, or fail with `Transient` on timeout.
    fn await_restore(&self, handle: &RestoreHandle, timeout: Duration) -> ClusterResult<()>;

    fn delete_snapshot(&self, repository: &str, snapshot: &SnapshotId) -> ClusterResult<()>;

    /// Units the cluster's lifecycle policy reports as sitting in the cold tier.
    fn cold_units(&self) -> ClusterResult<Vec<String>>;

    /// Health, shard and storage signals gathered in one call for the admission gates.
    fn cluster_state(&self) -> ClusterResult<ClusterState> {
        let health = self.health()?;
        let shards = self.shard_counts()?;
        let storage = self.storage()?;
        Ok(ClusterState {
            health,
            data_nodes: shards.data_nodes,
            current_shards: shards.total(),
            available_bytes: storage.available_bytes,
            total_bytes: storage.total_bytes,
        })
    }
}
