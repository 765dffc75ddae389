use anyhow::{anyhow, Context, Result};
use thaw_cluster::ClusterClient;
use thaw_core::format_bytes;
use thaw_storage::Storage;

use crate::util::format_unix;

/// Check that the store opens and the cluster answers. Returns one line per check.
pub fn doctor(store: &dyn Storage, cluster: &dyn ClusterClient, repository: &str, now_unix: i64) -> Result<Vec<String>> {
    let mut lines = Vec::new();

    let lock = store.load_lock().context("read restore lock from store")?;
    if lock.is_free() {
        lines.push("store: ok, restore lock is free".to_string());
    } else {
        let since = lock.acquired_at_unix.map(format_unix).unwrap_or_default();
        let stale = if lock.is_stale(now_unix) { " (STALE, see clear-staged)" } else { "" };
        lines.push(format!("store: ok, restore lock {:?} by {} since {}{}", lock.state, lock.holder(), since, stale));
    }

    let version = cluster
        .ping()
        .map_err(|e| anyhow!("cluster '{}' is unreachable: {}", cluster.name(), e))?;
    lines.push(format!("cluster: {} answered, version {}", cluster.name(), version));

    let state = cluster.cluster_state().context("read cluster state")?;
    lines.push(format!(
        "cluster: {:?}, {} data nodes, {} shards, {} free of {}",
        state.health,
        state.data_nodes,
        state.current_shards,
        format_bytes(state.available_bytes),
        format_bytes(state.total_bytes)
    ));

    let snapshots = cluster.list_snapshots(repository).with_context(|| format!("list repository {}", repository))?;
    lines.push(format!("repository: {} holds {} snapshot(s)", repository, snapshots.len()));
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use thaw_cluster::ScriptedCluster;
    use thaw_storage::InMemoryStorage;

    #[test]
    fn healthy_setup_reports_every_check() {
        let lines = doctor(&InMemoryStorage::new(), &ScriptedCluster::new(), "repo", 0).unwrap();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("lock is free"));
        assert!(lines[1].contains("scripted 8.x"));
        assert!(lines[3].contains("0 snapshot(s)"));
    }

    #[test]
    fn unreachable_cluster_fails() {
        let cluster = ScriptedCluster::new();
        cluster.set_reachable(false);
        let err = doctor(&InMemoryStorage::new(), &cluster, "repo", 0).unwrap_err();
        assert!(err.to_string().contains("unreachable"));
    }
}
