//! Pure decoding of Elasticsearch responses, kept apart from the HTTP plumbing.

use std::collections::BTreeMap;

use serde_json::Value;
use thaw_cluster::{ClusterError, ClusterResult, ShardCounts, StorageInfo};
use thaw_core::{unit_name, HealthState, SnapshotId, SnapshotRecord};

fn malformed(what: &str) -> ClusterError {
    ClusterError::Permanent(format!("unexpected response shape: {}", what))
}

/// `GET _cluster/health`
pub fn parse_health(v: &Value) -> ClusterResult<HealthState> {
    let status = v.get("status").and_then(Value::as_str).ok_or_else(|| malformed("health.status"))?;
    HealthState::parse(status).ok_or_else(|| malformed(&format!("health status '{}'", status)))
}

/// `GET _cat/shards?format=json`. Unassigned shards have no node and are not counted.
pub fn parse_shards(v: &Value, data_nodes: u32) -> ClusterResult<ShardCounts> {
    let rows = v.as_array().ok_or_else(|| malformed("_cat/shards array"))?;
    let mut per_node: BTreeMap<String, u64> = BTreeMap::new();
    for row in rows {
        if let Some(node) = row.get("node").and_then(Value::as_str) {
            *per_node.entry(node.to_string()).or_default() += 1;
        }
    }
    Ok(ShardCounts { data_nodes, per_node })
}

fn is_data_node(node: &Value) -> bool {
    node.get("roles")
        .and_then(Value::as_array)
        .map(|roles| roles.iter().filter_map(Value::as_str).any(|r| r.starts_with("data")))
        .unwrap_or(false)
}

/// `GET _nodes/stats/fs`, summed over data-role nodes only.
pub fn parse_fs_stats(v: &Value) -> ClusterResult<(u32, StorageInfo)> {
    let nodes = v.get("nodes").and_then(Value::as_object).ok_or_else(|| malformed("_nodes/stats nodes"))?;
    let mut count = 0u32;
    let mut info = StorageInfo::default();
    for node in nodes.values().filter(|n| is_data_node(n)) {
        let total = node.pointer("/fs/total").ok_or_else(|| malformed("fs.total"))?;
        count += 1;
        info.total_bytes += total.get("total_in_bytes").and_then(Value::as_u64).unwrap_or(0);
        info.available_bytes += total.get("available_in_bytes").and_then(Value::as_u64).unwrap_or(0);
    }
    Ok((count, info))
}

/// `GET _snapshot/{repo}/_all?index_details=true`. Only successful snapshots are listed.
pub fn parse_snapshots(repository: &str, v: &Value) -> ClusterResult<Vec<SnapshotRecord>> {
    let snaps = v.get("snapshots").and_then(Value::as_array).ok_or_else(|| malformed("snapshots array"))?;
    let mut out = vec![];
    for s in snaps {
        let Some(name) = s.get("snapshot").and_then(Value::as_str) else {
            continue;
        };
        if s.get("state").and_then(Value::as_str).unwrap_or("SUCCESS") != "SUCCESS" {
            continue;
        }
        let unit = s
            .get("indices")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| unit_name(name).to_string());

        let (mut size, mut shards) = (0u64, 0u32);
        if let Some(details) = s.get("index_details").and_then(Value::as_object) {
            for d in details.values() {
                size += d.get("size_in_bytes").and_then(Value::as_u64).unwrap_or(0);
                shards += d.get("shard_count").and_then(Value::as_u64).unwrap_or(0) as u32;
            }
        }

        out.push(SnapshotRecord {
            id: SnapshotId::from_str(name),
            repository: repository.to_string(),
            source_pattern: unit,
            created_at_unix: s.get("start_time_in_millis").and_then(Value::as_i64).unwrap_or(0) / 1000,
            size_bytes: size,
            shard_count: shards,
            restored: false,
        });
    }
    Ok(out)
}

/// `GET _all/_ilm/explain`: indices whose lifecycle phase is `cold`, sorted.
pub fn parse_cold_units(v: &Value) -> ClusterResult<Vec<String>> {
    let indices = v.get("indices").and_then(Value::as_object).ok_or_else(|| malformed("ilm indices"))?;
    let mut out: Vec<String> = indices
        .iter()
        .filter(|(_, e)| e.get("phase").and_then(Value::as_str) == Some("cold"))
        .map(|(name, _)| name.clone())
        .collect();
    out.sort();
    Ok(out)
}

/// `GET _cluster/health/{index}?wait_for_status=green`
pub fn parse_wait_for_green(index: &str, v: &Value) -> ClusterResult<()> {
    if v.get("timed_out").and_then(Value::as_bool).unwrap_or(false) {
        let status = v.get("status").and_then(Value::as_str).unwrap_or("unknown");
        return Err(ClusterError::Transient(format!("{} still {} when the wait timed out", index, status)));
    }
    match parse_health(v)? {
        HealthState::Green => Ok(()),
        other => Err(ClusterError::Transient(format!("{} is {:?}", index, other))),
    }
}

/// `GET /`
pub fn parse_version(v: &Value) -> String {
    let number = v.pointer("/version/number").and_then(Value::as_str).unwrap_or("unknown");
    let name = v.get("cluster_name").and_then(Value::as_str).unwrap_or("unknown");
    format!("{} (version {})", name, number)
}
