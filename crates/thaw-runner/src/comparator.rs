use std::collections::HashSet;

use anyhow::{Context, Result};
use regex::Regex;
use thaw_cluster::ClusterClient;
use thaw_storage::Storage;
use tracing::info;

use crate::history::HistoryLog;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Snapshots the repository reported.
    pub listed: usize,
    /// Of those, how many were new to the catalog.
    pub added: usize,
    /// Cold units that no catalog record covers, sorted.
    pub missing_snapshots: Vec<String>,
}

/// Append unseen repository snapshots to the catalog, then report cold units
/// lacking a snapshot. `filter` narrows only the cold-unit report.
pub fn sync_catalog(
    store: &dyn Storage,
    cluster: &dyn ClusterClient,
    history: &HistoryLog,
    repository: &str,
    filter: Option<&Regex>,
) -> Result<SyncReport> {
    let listed = cluster.list_snapshots(repository).with_context(|| format!("list snapshots in {}", repository))?;
    let mut report = SyncReport { listed: listed.len(), ..Default::default() };
    for record in &listed {
        if store.upsert_snapshot(record)? {
            report.added += 1;
        }
    }

    let covered: HashSet<String> =
        store.list_snapshots(Some(repository))?.into_iter().map(|r| r.source_pattern).collect();
    let mut missing: Vec<String> = cluster
        .cold_units()
        .context("list cold units")?
        .into_iter()
        .filter(|u| !covered.contains(u))
        .filter(|u| filter.map(|re| re.is_match(u)).unwrap_or(true))
        .collect();
    missing.sort();
    missing.dedup();
    report.missing_snapshots = missing;

    info!(repository, listed = report.listed, added = report.added, missing = report.missing_snapshots.len(), "catalog synced");
    if report.added > 0 {
        history.info(&format!("Catalog sync added {} snapshot(s) from {}", report.added, repository))?;
    }
    Ok(report)
}
