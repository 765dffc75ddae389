use std::collections::BTreeMap;
use std::sync::Mutex;

use thaw_core::{
    HistoryEntry, HistoryLevel, LockState, PlanId, PlanSummary, RestoreLock, RestorePlan, SnapshotId, SnapshotRecord,
    TaskStatus,
};

use crate::traits::{StageAttempt, Storage};

/// In-memory storage for tests. Not durable, but keeps the same lock semantics as the
/// SQLite store so scenario tests can run against either.
#[derive(Default)]
pub struct InMemoryStorage {
    inner: Mutex<Inner>,
}

struct Inner {
    snapshots: BTreeMap<SnapshotId, SnapshotRecord>,
    plans: Vec<RestorePlan>,
    lock: RestoreLock,
    history: Vec<HistoryEntry>,
    next_history_id: i64,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            snapshots: BTreeMap::new(),
            plans: vec![],
            lock: RestoreLock::free(),
            history: vec![],
            next_history_id: 1,
        }
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for InMemoryStorage {
    fn upsert_snapshot(&self, record: &SnapshotRecord) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        if inner.snapshots.contains_key(&record.id) {
            return Ok(false);
        }
        inner.snapshots.insert(record.id.clone(), record.clone());
        Ok(true)
    }

    fn get_snapshot(&self, id: &SnapshotId) -> anyhow::Result<Option<SnapshotRecord>> {
        Ok(self.inner.lock().unwrap().snapshots.get(id).cloned())
    }

    fn list_snapshots(&self, repository: Option<&str>) -> anyhow::Result<Vec<SnapshotRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .snapshots
            .values()
            .filter(|r| repository.map(|repo| r.repository == repo).unwrap_or(true))
            .cloned()
            .collect())
    }

    fn mark_restored(&self, id: &SnapshotId) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        match inner.snapshots.get_mut(id) {
            Some(r) if !r.restored => {
                r.restored = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn remove_snapshot(&self, id: &SnapshotId) -> anyhow::Result<bool> {
        Ok(self.inner.lock().unwrap().snapshots.remove(id).is_some())
    }

    fn save_plan(&self, plan: &RestorePlan) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.plans.iter_mut().find(|p| p.id == plan.id) {
            Some(existing) => *existing = plan.clone(),
            None => inner.plans.push(plan.clone()),
        }
        Ok(())
    }

    fn load_plan(&self, id: &PlanId) -> anyhow::Result<Option<RestorePlan>> {
        Ok(self.inner.lock().unwrap().plans.iter().find(|p| &p.id == id).cloned())
    }

    fn latest_plan(&self) -> anyhow::Result<Option<RestorePlan>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .plans
            .iter()
            .enumerate()
            .max_by_key(|(i, p)| (p.created_at_unix, *i))
            .map(|(_, p)| p.clone()))
    }

    fn set_task_status(
        &self,
        plan_id: &PlanId,
        snapshot_id: &SnapshotId,
        status: TaskStatus,
        attempts: u32,
        last_error: Option<&str>,
    ) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let plan = inner
            .plans
            .iter_mut()
            .find(|p| &p.id == plan_id)
            .ok_or_else(|| anyhow::anyhow!("unknown plan {}", plan_id))?;
        let task = plan
            .tasks
            .iter_mut()
            .find(|t| &t.snapshot_id == snapshot_id)
            .ok_or_else(|| anyhow::anyhow!("plan {} has no task for {}", plan_id, snapshot_id))?;
        task.status = status;
        task.attempts = attempts;
        task.last_error = last_error.map(str::to_string);
        Ok(())
    }

    fn load_lock(&self) -> anyhow::Result<RestoreLock> {
        Ok(self.inner.lock().unwrap().lock.clone())
    }

    fn try_stage(&self, holder: &str, summary: &PlanSummary, now_unix: i64, lease_secs: i64) -> anyhow::Result<StageAttempt> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.lock.is_free() {
            return Ok(StageAttempt::Held(inner.lock.clone()));
        }
        inner.lock = RestoreLock {
            state: LockState::Staged,
            held_by: Some(holder.to_string()),
            campaign: Some(summary.plan_id.clone()),
            acquired_at_unix: Some(now_unix),
            expires_at_unix: Some(now_unix + lease_secs),
            plan_summary: Some(summary.clone()),
        };
        Ok(StageAttempt::Acquired(inner.lock.clone()))
    }

    fn transition_lock(
        &self,
        campaign: &PlanId,
        from: LockState,
        to: LockState,
        now_unix: i64,
        lease_secs: i64,
    ) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        if inner.lock.state != from || inner.lock.campaign.as_ref() != Some(campaign) || from == LockState::Free {
            return Ok(false);
        }
        inner.lock.state = to;
        inner.lock.expires_at_unix = Some(now_unix + lease_secs);
        Ok(true)
    }

    fn release_lock(&self, campaign: &PlanId) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        if inner.lock.campaign.as_ref() != Some(campaign) {
            return Ok(false);
        }
        inner.lock = RestoreLock::free();
        Ok(true)
    }

    fn force_reset_lock(&self) -> anyhow::Result<RestoreLock> {
        let mut inner = self.inner.lock().unwrap();
        Ok(std::mem::replace(&mut inner.lock, RestoreLock::free()))
    }

    fn append_history(&self, timestamp_unix: i64, actor: &str, level: HistoryLevel, message: &str) -> anyhow::Result<i64> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_history_id;
        inner.next_history_id += 1;
        inner.history.push(HistoryEntry {
            id,
            timestamp_unix,
            actor: actor.to_string(),
            level,
            message: message.to_string(),
        });
        Ok(id)
    }

    fn list_history(&self, limit: usize, search: Option<&str>) -> anyhow::Result<Vec<HistoryEntry>> {
        let inner = self.inner.lock().unwrap();
        let needle = search.map(|s| s.to_lowercase());
        let matching: Vec<&HistoryEntry> = inner
            .history
            .iter()
            .filter(|e| match &needle {
                Some(n) => e.message.to_lowercase().contains(n) || e.actor.to_lowercase().contains(n),
                None => true,
            })
            .collect();
        let skip = matching.len().saturating_sub(limit);
        Ok(matching.into_iter().skip(skip).cloned().collect())
    }

    fn purge_history(&self, before_unix: i64) -> anyhow::Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.history.len();
        inner.history.retain(|e| e.timestamp_unix >= before_unix);
        Ok(before - inner.history.len())
    }
}
