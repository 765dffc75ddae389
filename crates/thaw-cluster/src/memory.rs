use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use thaw_core::{HealthState, SnapshotId, SnapshotRecord};

use crate::types::{ClusterClient, ClusterError, ClusterResult, RestoreHandle, ShardCounts, StorageInfo};

/// How a scripted snapshot misbehaves when its restore is awaited.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureScript {
    /// Time out this many times, then succeed.
    Transient { remaining: u32 },
    AlwaysTransient,
    Permanent(String),
}

/// In-process cluster double. Every call is answered from the scripted state and every
/// restore is recorded, so tests can assert on what the orchestrator asked for.
pub struct ScriptedCluster {
    inner: Mutex<Inner>,
}

struct Inner {
    reachable: bool,
    /// Health reads time out while ping still answers.
    health_stalled: bool,
    health: HealthState,
    data_nodes: u32,
    per_node: BTreeMap<String, u64>,
    storage: StorageInfo,
    snapshots: Vec<SnapshotRecord>,
    cold: Vec<String>,
    failures: HashMap<SnapshotId, FailureScript>,
    live: BTreeSet<String>,
    triggered: Vec<SnapshotId>,
    deleted: Vec<SnapshotId>,
}

const GIB: u64 = 1024 * 1024 * 1024;

impl Default for ScriptedCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedCluster {
    /// A green three-node cluster with 10 TiB free of 20 TiB and no snapshots.
    pub fn new() -> Self {
        let per_node = (1..=3).map(|n| (format!("data-{n}"), 0)).collect();
        Self {
            inner: Mutex::new(Inner {
                reachable: true,
                health_stalled: false,
                health: HealthState::Green,
                data_nodes: 3,
                per_node,
                storage: StorageInfo { available_bytes: 10 * 1024 * GIB, total_bytes: 20 * 1024 * GIB },
                snapshots: vec![],
                cold: vec![],
                failures: HashMap::new(),
                live: BTreeSet::new(),
                triggered: vec![],
                deleted: vec![],
            }),
        }
    }

    pub fn with_snapshots(self, records: impl IntoIterator<Item = SnapshotRecord>) -> Self {
        self.inner.lock().unwrap().snapshots.extend(records);
        self
    }

    pub fn with_cold_units(self, units: impl IntoIterator<Item = String>) -> Self {
        self.inner.lock().unwrap().cold.extend(units);
        self
    }

    pub fn set_health(&self, health: HealthState) {
        self.inner.lock().unwrap().health = health;
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.inner.lock().unwrap().reachable = reachable;
    }

    pub fn set_health_stalled(&self, stalled: bool) {
        self.inner.lock().unwrap().health_stalled = stalled;
    }

    /// Spread `total` allocated shards evenly over the data nodes.
    pub fn set_shards(&self, data_nodes: u32, total: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.data_nodes = data_nodes;
        inner.per_node.clear();
        let n = u64::from(data_nodes.max(1));
        for i in 0..data_nodes {
            let extra = if u64::from(i) < total % n { 1 } else { 0 };
            inner.per_node.insert(format!("data-{}", i + 1), total / n + extra);
        }
    }

    pub fn set_storage(&self, available_bytes: u64, total_bytes: u64) {
        self.inner.lock().unwrap().storage = StorageInfo { available_bytes, total_bytes };
    }

    pub fn script_failure(&self, snapshot: &SnapshotId, script: FailureScript) {
        self.inner.lock().unwrap().failures.insert(snapshot.clone(), script);
    }

    /// Snapshots passed to `trigger_restore`, in call order (retries included).
    pub fn triggered(&self) -> Vec<SnapshotId> {
        self.inner.lock().unwrap().triggered.clone()
    }

    pub fn deleted(&self) -> Vec<SnapshotId> {
        self.inner.lock().unwrap().deleted.clone()
    }

    pub fn live_units(&self) -> BTreeSet<String> {
        self.inner.lock().unwrap().live.clone()
    }

    fn guard(&self) -> ClusterResult<std::sync::MutexGuard<'_, Inner>> {
        let inner = self.inner.lock().unwrap();
        if !inner.reachable {
            return Err(ClusterError::Transient("connection refused".into()));
        }
        Ok(inner)
    }
}

impl ClusterClient for ScriptedCluster {
    fn name(&self) -> &str {
        "scripted"
    }

    fn ping(&self) -> ClusterResult<String> {
        self.guard().map(|_| "scripted 8.x".to_string())
    }

    fn health(&self) -> ClusterResult<HealthState> {
        let inner = self.guard()?;
        if inner.health_stalled {
            return Err(ClusterError::Transient("read timed out".into()));
        }
        Ok(inner.health)
    }

    fn shard_counts(&self) -> ClusterResult<ShardCounts> {
        let inner = self.guard()?;
        Ok(ShardCounts { data_nodes: inner.data_nodes, per_node: inner.per_node.clone() })
    }

    fn storage(&self) -> ClusterResult<StorageInfo> {
        Ok(self.guard()?.storage)
    }

    fn list_snapshots(&self, repository: &str) -> ClusterResult<Vec<SnapshotRecord>> {
        let inner = self.guard()?;
        Ok(inner
            .snapshots
            .iter()
            .filter(|s| s.repository == repository)
            .cloned()
            .map(|mut s| {
                s.restored = false;
                s
            })
            .collect())
    }

    fn trigger_restore(&self, repository: &str, snapshot: &SnapshotId, target_unit: &str) -> ClusterResult<RestoreHandle> {
        let mut inner = self.guard()?;
        if !inner.snapshots.iter().any(|s| &s.id == snapshot && s.repository == repository) {
            return Err(ClusterError::NotFound(format!("{}/{}", repository, snapshot)));
        }
        if inner.live.contains(target_unit) {
            return Err(ClusterError::Permanent(format!("an open index named {} already exists", target_unit)));
        }
        inner.triggered.push(snapshot.clone());
        Ok(RestoreHandle {
            repository: repository.to_string(),
            snapshot_id: snapshot.clone(),
            target_unit: target_unit.to_string(),
        })
    }

    fn await_restore(&self, handle: &RestoreHandle, timeout: Duration) -> ClusterResult<()> {
        let mut inner = self.guard()?;
        let timed_out =
            || ClusterError::Transient(format!("{} not green within {}s", handle.target_unit, timeout.as_secs()));
        match inner.failures.get_mut(&handle.snapshot_id) {
            Some(FailureScript::Transient { remaining }) if *remaining > 0 => {
                *remaining -= 1;
                return Err(timed_out());
            }
            Some(FailureScript::AlwaysTransient) => return Err(timed_out()),
            Some(FailureScript::Permanent(reason)) => return Err(ClusterError::Permanent(reason.clone())),
            _ => {}
        }
        inner.live.insert(handle.target_unit.clone());
        Ok(())
    }

    fn delete_snapshot(&self, repository: &str, snapshot: &SnapshotId) -> ClusterResult<()> {
        let mut inner = self.guard()?;
        let before = inner.snapshots.len();
        inner.snapshots.retain(|s| !(&s.id == snapshot && s.repository == repository));
        if inner.snapshots.len() == before {
            return Err(ClusterError::NotFound(format!("{}/{}", repository, snapshot)));
        }
        inner.deleted.push(snapshot.clone());
        Ok(())
    }

    fn cold_units(&self) -> ClusterResult<Vec<String>> {
        Ok(self.guard()?.cold.clone())
    }
}
