use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{ids::*, model::*};

/// Catalog entry for one snapshot in a repository.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: SnapshotId,
    pub repository: String,
    /// Name of the unit (index) captured by the snapshot.
    pub source_pattern: String,
    pub created_at_unix: i64,
    pub size_bytes: u64,
    pub shard_count: u32,
    pub restored: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreTask {
    pub snapshot_id: SnapshotId,
    pub target_unit: String,
    pub size_bytes: u64,
    pub shard_count: u32,
    pub distance_days: i64,
    pub status: TaskStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Immutable once built; only task status fields move, and only from the executor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestorePlan {
    pub id: PlanId,
    pub repository: String,
    pub pattern: String,
    pub reference_date: NaiveDate,
    pub tasks: Vec<RestoreTask>,
    pub total_units: u32,
    pub total_shards: u64,
    pub total_size_bytes: u64,
    pub created_at_unix: i64,
    pub requested_by: String,
}

impl RestorePlan {
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            plan_id: self.id.clone(),
            pattern: self.pattern.clone(),
            reference_date: self.reference_date,
            total_units: self.total_units,
            total_shards: self.total_shards,
            total_size_bytes: self.total_size_bytes,
            skipped: self.skipped().count() as u32,
            requested_by: self.requested_by.clone(),
        }
    }

    /// Tasks that still need a restore, in plan order.
    pub fn actionable(&self) -> impl Iterator<Item = &RestoreTask> {
        self.tasks.iter().filter(|t| t.status != TaskStatus::Skipped)
    }

    pub fn skipped(&self) -> impl Iterator<Item = &RestoreTask> {
        self.tasks.iter().filter(|t| t.status == TaskStatus::Skipped)
    }

    pub fn has_work(&self) -> bool {
        self.total_units > 0
    }

    pub fn count_status(&self, status: TaskStatus) -> u32 {
        self.tasks.iter().filter(|t| t.status == status).count() as u32
    }
}

/// Denormalized copy of a plan's headline numbers, stored on the lock for display.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub plan_id: PlanId,
    pub pattern: String,
    pub reference_date: NaiveDate,
    pub total_units: u32,
    pub total_shards: u64,
    pub total_size_bytes: u64,
    pub skipped: u32,
    pub requested_by: String,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "pattern={} date={} units={} shards={} size={} (requested by {})",
            self.pattern,
            self.reference_date.format(crate::DATE_FORMAT),
            self.total_units,
            self.total_shards,
            crate::format_bytes(self.total_size_bytes),
            self.requested_by
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreLock {
    pub state: LockState,
    pub held_by: Option<String>,
    pub campaign: Option<PlanId>,
    pub acquired_at_unix: Option<i64>,
    pub expires_at_unix: Option<i64>,
    pub plan_summary: Option<PlanSummary>,
}

impl RestoreLock {
    pub fn free() -> Self {
        Self {
            state: LockState::Free,
            held_by: None,
            campaign: None,
            acquired_at_unix: None,
            expires_at_unix: None,
            plan_summary: None,
        }
    }

    pub fn is_free(&self) -> bool {
        self.state == LockState::Free
    }

    /// A held lock whose lease ran out: the holder stopped heartbeating.
    pub fn is_stale(&self, now_unix: i64) -> bool {
        !self.is_free() && self.expires_at_unix.map(|e| e <= now_unix).unwrap_or(true)
    }

    pub fn holder(&self) -> &str {
        self.held_by.as_deref().unwrap_or("<unknown>")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub name_pattern: String,
    pub max_age_days: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub timestamp_unix: i64,
    pub actor: String,
    pub level: HistoryLevel,
    pub message: String,
}

/// What an operator asked the planner for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlanRequest {
    pub repository: String,
    pub pattern: String,
    pub reference_date: NaiveDate,
    pub requested_by: String,
    pub tie_break: TieBreak,
}
