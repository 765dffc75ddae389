use thaw_core::{
    HistoryEntry, HistoryLevel, LockState, PlanId, PlanSummary, RestoreLock, RestorePlan, SnapshotId, SnapshotRecord,
    TaskStatus,
};

/// Result of a staging attempt against the single restore lock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageAttempt {
    /// The lock moved `Free -> Staged` for this caller.
    Acquired(RestoreLock),
    /// Somebody else holds it; this is their lock as found.
    Held(RestoreLock),
}

pub trait Storage: Send + Sync {
    /// Insert the record if its id is unknown. Existing records, including their
    /// `restored` flag, are left alone. Returns whether a row was added.
    fn upsert_snapshot(&self, record: &SnapshotRecord) -> anyhow::Result<bool>;
    fn get_snapshot(&self, id: &SnapshotId) -> anyhow::Result<Option<SnapshotRecord>>;
    /// Records sorted by id, optionally limited to one repository.
    fn list_snapshots(&self, repository: Option<&str>) -> anyhow::Result<Vec<SnapshotRecord>>;
    /// Compare-and-set `restored` false -> true. Returns false if it was already set
    /// or the record is gone.
    fn mark_restored(&self, id: &SnapshotId) -> anyhow::Result<bool>;
    fn remove_snapshot(&self, id: &SnapshotId) -> anyhow::Result<bool>;

    fn save_plan(&self, plan: &RestorePlan) -> anyhow::Result<()>;
    fn load_plan(&self, id: &PlanId) -> anyhow::Result<Option<RestorePlan>>;
    /// Most recently created plan, if any.
    fn latest_plan(&self) -> anyhow::Result<Option<RestorePlan>>;
    fn set_task_status(
        &self,
        plan_id: &PlanId,
        snapshot_id: &SnapshotId,
        status: TaskStatus,
        attempts: u32,
        last_error: Option<&str>,
    ) -> anyhow::Result<()>;

    fn load_lock(&self) -> anyhow::Result<RestoreLock>;
    /// Atomic `Free -> Staged`. Never waits on another holder.
    fn try_stage(&self, holder: &str, summary: &PlanSummary, now_unix: i64, lease_secs: i64) -> anyhow::Result<StageAttempt>;
    /// Compare-and-set between two held states for the owning campaign; also pushes the
    /// lease deadline out. `from == to` is a plain heartbeat.
    fn transition_lock(
        &self,
        campaign: &PlanId,
        from: LockState,
        to: LockState,
        now_unix: i64,
        lease_secs: i64,
    ) -> anyhow::Result<bool>;
    /// Back to `Free`, only if `campaign` still holds the lock.
    fn release_lock(&self, campaign: &PlanId) -> anyhow::Result<bool>;
    /// Unconditional reset. Returns the lock as it was before.
    fn force_reset_lock(&self) -> anyhow::Result<RestoreLock>;

    fn append_history(&self, timestamp_unix: i64, actor: &str, level: HistoryLevel, message: &str) -> anyhow::Result<i64>;
    /// The newest `limit` entries, returned oldest first. `search` is a case-insensitive
    /// substring match on actor or message.
    fn list_history(&self, limit: usize, search: Option<&str>) -> anyhow::Result<Vec<HistoryEntry>>;
    /// Delete entries strictly older than `before_unix`. Returns how many went.
    fn purge_history(&self, before_unix: i64) -> anyhow::Result<usize>;
}
