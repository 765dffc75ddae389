use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::StatusCode;
use serde_json::{json, Value};
use thaw_cluster::{ClusterClient, ClusterError, ClusterResult, RestoreHandle, ShardCounts, StorageInfo};
use thaw_core::{HealthState, SnapshotId, SnapshotRecord};
use tracing::{debug, info};

use crate::parse;

/// Connection settings for one Elasticsearch cluster.
#[derive(Clone, Debug)]
pub struct EsEndpoint {
    pub name: String,
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub request_timeout: Duration,
}

pub struct EsClusterClient {
    endpoint: EsEndpoint,
    http: Client,
}

impl EsClusterClient {
    pub fn new(endpoint: EsEndpoint) -> Result<Self> {
        let http = Client::builder()
            .timeout(endpoint.request_timeout)
            .build()
            .context("build HTTP client")?;
        Ok(Self { endpoint, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint.url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    fn auth(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.endpoint.username {
            Some(user) => req.basic_auth(user, self.endpoint.password.as_deref()),
            None => req,
        }
    }

    fn send(&self, req: RequestBuilder, what: &str) -> ClusterResult<Value> {
        let resp = self.auth(req).send().map_err(|e| transport_error(what, e))?;
        let status = resp.status();
        if status.is_success() {
            return resp.json::<Value>().map_err(|e| ClusterError::Permanent(format!("{}: decode body: {}", what, e)));
        }
        let body = resp.text().unwrap_or_default();
        Err(classify_status(what, status, &body))
    }

    fn get(&self, path: &str) -> ClusterResult<Value> {
        debug!(cluster = %self.endpoint.name, path, "GET");
        self.send(self.http.get(self.url(path)), path)
    }

    fn data_nodes_and_storage(&self) -> ClusterResult<(u32, StorageInfo)> {
        parse::parse_fs_stats(&self.get("_nodes/stats/fs")?)
    }
}

fn transport_error(what: &str, e: reqwest::Error) -> ClusterError {
    // Timeouts, refused connections and resets may clear up; a malformed request will not.
    if e.is_builder() {
        ClusterError::Permanent(format!("{}: {}", what, e))
    } else {
        ClusterError::Transient(format!("{}: {}", what, e))
    }
}

/// 5xx, 408 and 429 are worth retrying; 404 is reported as not found; any other 4xx is final.
/// A restore onto an open index of the same name comes back as a 500 but never succeeds.
pub(crate) fn classify_status(what: &str, status: StatusCode, body: &str) -> ClusterError {
    let msg = format!("{}: HTTP {}: {}", what, status.as_u16(), body.chars().take(500).collect::<String>());
    if body.contains("already exists") {
        ClusterError::Permanent(msg)
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS {
        ClusterError::Transient(msg)
    } else if status == StatusCode::NOT_FOUND {
        ClusterError::NotFound(msg)
    } else {
        ClusterError::Permanent(msg)
    }
}

impl ClusterClient for EsClusterClient {
    fn name(&self) -> &str {
        &self.endpoint.name
    }

    fn ping(&self) -> ClusterResult<String> {
        Ok(parse::parse_version(&self.get("")?))
    }

    fn health(&self) -> ClusterResult<HealthState> {
        parse::parse_health(&self.get("_cluster/health")?)
    }

    fn shard_counts(&self) -> ClusterResult<ShardCounts> {
        let (data_nodes, _) = self.data_nodes_and_storage()?;
        parse::parse_shards(&self.get("_cat/shards?format=json&h=index,shard,prirep,node")?, data_nodes)
    }

    fn storage(&self) -> ClusterResult<StorageInfo> {
        Ok(self.data_nodes_and_storage()?.1)
    }

    fn list_snapshots(&self, repository: &str) -> ClusterResult<Vec<SnapshotRecord>> {
        let v = self.get(&format!("_snapshot/{}/_all?index_details=true", repository))?;
        parse::parse_snapshots(repository, &v)
    }

    fn trigger_restore(&self, repository: &str, snapshot: &SnapshotId, target_unit: &str) -> ClusterResult<RestoreHandle> {
        let path = format!("_snapshot/{}/{}/_restore", repository, snapshot);
        let body = json!({
            "indices": target_unit,
            "ignore_unavailable": true,
            "include_global_state": false,
        });
        info!(cluster = %self.endpoint.name, snapshot = %snapshot, unit = target_unit, "trigger restore");
        self.send(self.http.post(self.url(&path)).json(&body), &path)?;
        Ok(RestoreHandle {
            repository: repository.to_string(),
            snapshot_id: snapshot.clone(),
            target_unit: target_unit.to_string(),
        })
    }

    fn await_restore(&self, handle: &RestoreHandle, timeout: Duration) -> ClusterResult<()> {
        let path = format!("_cluster/health/{}?wait_for_status=green&timeout={}s", handle.target_unit, timeout.as_secs());
        // The server holds the request for up to `timeout`; give the socket room beyond that.
        let req = self.http.get(self.url(&path)).timeout(timeout + self.endpoint.request_timeout);
        match self.send(req, &path) {
            Ok(v) => parse::parse_wait_for_green(&handle.target_unit, &v),
            // The unit is not there yet right after the trigger.
            Err(ClusterError::NotFound(msg)) => Err(ClusterError::Transient(msg)),
            Err(e) => Err(e),
        }
    }

    fn delete_snapshot(&self, repository: &str, snapshot: &SnapshotId) -> ClusterResult<()> {
        let path = format!("_snapshot/{}/{}", repository, snapshot);
        info!(cluster = %self.endpoint.name, snapshot = %snapshot, "delete snapshot");
        self.send(self.http.delete(self.url(&path)), &path).map(|_| ())
    }

    fn cold_units(&self) -> ClusterResult<Vec<String>> {
        parse::parse_cold_units(&self.get("_all/_ilm/explain")?)
    }
}
