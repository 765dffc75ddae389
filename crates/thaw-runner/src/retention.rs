use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use thaw_cluster::{ClusterClient, ClusterError};
use thaw_core::{extract_date, SnapshotId, SnapshotRecord, TaskStatus};
use thaw_storage::Storage;
use tracing::info;

use crate::config::RetentionConfig;
use crate::history::HistoryLog;

/// Retention policies with their patterns compiled, in configured order.
pub struct CompiledPolicies {
    policies: Vec<(Regex, u32)>,
    default_max_age_days: Option<u32>,
}

impl CompiledPolicies {
    pub fn new(cfg: &RetentionConfig) -> Result<Self> {
        let mut policies = Vec::with_capacity(cfg.policies.len());
        for p in &cfg.policies {
            let re = Regex::new(&p.name_pattern).with_context(|| format!("retention pattern '{}'", p.name_pattern))?;
            policies.push((re, p.max_age_days));
        }
        Ok(Self { policies, default_max_age_days: cfg.default_max_age_days })
    }

    /// First matching policy wins; `None` means keep forever.
    pub fn max_age_for(&self, unit: &str) -> Option<u32> {
        self.policies
            .iter()
            .find(|(re, _)| re.is_match(unit))
            .map(|(_, days)| *days)
            .or(self.default_max_age_days)
    }
}

/// Age in whole days, from the date in the unit name or else the creation time.
pub fn age_days(record: &SnapshotRecord, today: NaiveDate) -> i64 {
    let born = extract_date(&record.source_pattern).unwrap_or_else(|| {
        DateTime::<Utc>::from_timestamp(record.created_at_unix, 0)
            .map(|dt| dt.date_naive())
            .unwrap_or(today)
    });
    (today - born).num_days()
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub dry_run: bool,
    pub examined: usize,
    /// Expired and deleted (or would be, on a dry run).
    pub expired: Vec<SnapshotId>,
    /// Gone from the cluster already; only the catalog entry was removed.
    pub already_gone: Vec<SnapshotId>,
    /// Expired but referenced by a running task; retried next cycle.
    pub deferred: Vec<SnapshotId>,
    pub failed: Vec<(SnapshotId, String)>,
}

pub struct RetentionManager<'a> {
    pub store: &'a dyn Storage,
    pub cluster: &'a dyn ClusterClient,
    pub history: &'a HistoryLog,
    pub policies: &'a CompiledPolicies,
}

impl RetentionManager<'_> {
    pub fn run(&self, repository: &str, filter: Option<&Regex>, today: NaiveDate, dry_run: bool) -> Result<RetentionReport> {
        let in_progress: HashSet<SnapshotId> = self
            .store
            .latest_plan()?
            .map(|p| {
                p.tasks
                    .into_iter()
                    .filter(|t| t.status == TaskStatus::InProgress)
                    .map(|t| t.snapshot_id)
                    .collect()
            })
            .unwrap_or_default();

        let mut report = RetentionReport { dry_run, ..Default::default() };
        for record in self.store.list_snapshots(Some(repository))? {
            if filter.map(|re| !re.is_match(&record.source_pattern)).unwrap_or(false) {
                continue;
            }
            report.examined += 1;
            let Some(max_age) = self.policies.max_age_for(&record.source_pattern) else {
                continue;
            };
            let age = age_days(&record, today);
            if age < i64::from(max_age) {
                continue;
            }
            if in_progress.contains(&record.id) {
                info!(snapshot = %record.id, "expired snapshot is being restored, deferring");
                report.deferred.push(record.id);
                continue;
            }
            if dry_run {
                report.expired.push(record.id);
                continue;
            }
            match self.cluster.delete_snapshot(repository, &record.id) {
                Ok(()) => {
                    self.store.remove_snapshot(&record.id)?;
                    self.history.info(&format!(
                        "Retention deleted {} ({} days old, limit {})",
                        record.id, age, max_age
                    ))?;
                    report.expired.push(record.id);
                }
                Err(ClusterError::NotFound(_)) => {
                    self.store.remove_snapshot(&record.id)?;
                    self.history.info(&format!("Retention dropped catalog entry {}; snapshot already gone", record.id))?;
                    report.already_gone.push(record.id);
                }
                Err(e) => {
                    self.history.error(&format!("Retention could not delete {}: {}", record.id, e))?;
                    report.failed.push((record.id, e.to_string()));
                }
            }
        }
        Ok(report)
    }
}
