use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::types::ClusterClient;

/// Shared client contract suite. Runs against any client pointed at a repository holding
/// at least one snapshot whose unit is not yet live.
pub fn run_cluster_contract_suite(client: &dyn ClusterClient, repository: &str) -> Result<()> {
    client.ping().context("ping")?;

    let state = client.cluster_state().context("cluster state")?;
    if state.data_nodes == 0 {
        return Err(anyhow!("expected at least one data node"));
    }
    if state.available_bytes > state.total_bytes {
        return Err(anyhow!("available bytes exceed total bytes"));
    }

    let snapshots = client.list_snapshots(repository).context("list snapshots")?;
    let first = snapshots.first().ok_or_else(|| anyhow!("expected a snapshot in {}", repository))?;
    if snapshots.iter().any(|s| s.restored) {
        return Err(anyhow!("clients must not claim snapshots are restored"));
    }
    if snapshots.iter().any(|s| s.repository != repository) {
        return Err(anyhow!("listed snapshot from another repository"));
    }

    let handle = client.trigger_restore(repository, &first.id, &first.source_pattern).context("trigger restore")?;
    if handle.snapshot_id != first.id {
        return Err(anyhow!("handle refers to a different snapshot"));
    }
    client.await_restore(&handle, Duration::from_secs(60)).context("await restore")?;

    match client.list_snapshots("no-such-repository-for-contract") {
        Ok(list) if list.is_empty() => {}
        Ok(_) => return Err(anyhow!("unknown repository returned snapshots")),
        Err(_) => {}
    }
    Ok(())
}
