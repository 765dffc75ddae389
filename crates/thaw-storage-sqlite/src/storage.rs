use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use thaw_core::{
    parse_reference_date, HistoryEntry, HistoryLevel, LockState, PlanId, PlanSummary, RestoreLock, RestorePlan,
    RestoreTask, SnapshotId, SnapshotRecord, TaskStatus, DATE_FORMAT,
};
use thaw_storage::{StageAttempt, Storage};

/// Operators on the same host share one database file; writers queue on it for this long.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(db_path).with_context(|| format!("open sqlite db {}", db_path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let init_sql = include_str!("../migrations/0001_init.sql");
        conn.execute_batch(init_sql).context("apply schema")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Run `f` inside `BEGIN IMMEDIATE`, so the write lock is taken up front and
    /// contending processes wait on the busy timeout instead of deadlocking.
    fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    fn status_to_str(s: &TaskStatus) -> &'static str {
        match s {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Restored => "restored",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        }
    }

    fn str_to_status(s: &str) -> TaskStatus {
        match s {
            "in_progress" => TaskStatus::InProgress,
            "restored" => TaskStatus::Restored,
            "failed" => TaskStatus::Failed,
            "skipped" => TaskStatus::Skipped,
            _ => TaskStatus::Pending,
        }
    }

    fn lock_state_to_str(s: LockState) -> &'static str {
        match s {
            LockState::Free => "free",
            LockState::Staged => "staged",
            LockState::Confirmed => "confirmed",
            LockState::Executing => "executing",
        }
    }

    fn str_to_lock_state(s: &str) -> LockState {
        match s {
            "staged" => LockState::Staged,
            "confirmed" => LockState::Confirmed,
            "executing" => LockState::Executing,
            _ => LockState::Free,
        }
    }

    fn level_to_str(l: HistoryLevel) -> &'static str {
        match l {
            HistoryLevel::Info => "info",
            HistoryLevel::Error => "error",
        }
    }

    fn str_to_level(s: &str) -> HistoryLevel {
        match s {
            "error" => HistoryLevel::Error,
            _ => HistoryLevel::Info,
        }
    }
}

fn read_lock(conn: &Connection) -> Result<RestoreLock> {
    let row = conn.query_row(
        "SELECT state, held_by, campaign, acquired_at, expires_at, summary_json FROM restore_lock WHERE id = 1",
        [],
        |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, Option<String>>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, Option<i64>>(3)?,
                r.get::<_, Option<i64>>(4)?,
                r.get::<_, Option<String>>(5)?,
            ))
        },
    )?;
    let (state, held_by, campaign, acquired_at, expires_at, summary_json) = row;
    let plan_summary: Option<PlanSummary> = match summary_json {
        Some(j) => Some(serde_json::from_str(&j).context("decode lock plan summary")?),
        None => None,
    };
    Ok(RestoreLock {
        state: SqliteStorage::str_to_lock_state(&state),
        held_by,
        campaign: campaign.map(PlanId::from_str),
        acquired_at_unix: acquired_at,
        expires_at_unix: expires_at,
        plan_summary,
    })
}

fn read_plan(conn: &Connection, id: &str) -> Result<Option<RestorePlan>> {
    let head = conn
        .query_row(
            "SELECT repository, pattern, reference_date, total_units, total_shards, total_size_bytes, created_at, requested_by
             FROM restore_plans WHERE id = ?1",
            params![id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, i64>(3)?,
                    r.get::<_, i64>(4)?,
                    r.get::<_, i64>(5)?,
                    r.get::<_, i64>(6)?,
                    r.get::<_, String>(7)?,
                ))
            },
        )
        .optional()?;
    let Some((repository, pattern, date, units, shards, size, created_at, requested_by)) = head else {
        return Ok(None);
    };

    let mut tasks = vec![];
    {
        let mut stmt = conn.prepare(
            "SELECT snapshot_id, target_unit, size_bytes, shard_count, distance_days, status, attempts, last_error
             FROM restore_tasks WHERE plan_id = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map(params![id], |r| {
            Ok(RestoreTask {
                snapshot_id: SnapshotId::from_str(r.get::<_, String>(0)?),
                target_unit: r.get(1)?,
                size_bytes: r.get::<_, i64>(2)? as u64,
                shard_count: r.get::<_, i64>(3)? as u32,
                distance_days: r.get(4)?,
                status: SqliteStorage::str_to_status(&r.get::<_, String>(5)?),
                attempts: r.get::<_, i64>(6)? as u32,
                last_error: r.get(7)?,
            })
        })?;
        for row in rows {
            tasks.push(row?);
        }
    }

    Ok(Some(RestorePlan {
        id: PlanId::from_str(id),
        repository,
        pattern,
        reference_date: parse_reference_date(&date).map_err(|e| anyhow!("plan {}: {}", id, e))?,
        tasks,
        total_units: units as u32,
        total_shards: shards as u64,
        total_size_bytes: size as u64,
        created_at_unix: created_at,
        requested_by,
    }))
}

fn row_to_snapshot(r: &rusqlite::Row<'_>) -> rusqlite::Result<SnapshotRecord> {
    Ok(SnapshotRecord {
        id: SnapshotId::from_str(r.get::<_, String>(0)?),
        repository: r.get(1)?,
        source_pattern: r.get(2)?,
        created_at_unix: r.get(3)?,
        size_bytes: r.get::<_, i64>(4)? as u64,
        shard_count: r.get::<_, i64>(5)? as u32,
        restored: r.get::<_, i64>(6)? != 0,
    })
}

impl Storage for SqliteStorage {
    fn upsert_snapshot(&self, record: &SnapshotRecord) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "INSERT OR IGNORE INTO snapshots(id, repository, source_pattern, created_at, size_bytes, shard_count, restored)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id.as_str(),
                record.repository,
                record.source_pattern,
                record.created_at_unix,
                record.size_bytes as i64,
                record.shard_count as i64,
                record.restored as i64
            ],
        )?;
        Ok(n == 1)
    }

    fn get_snapshot(&self, id: &SnapshotId) -> Result<Option<SnapshotRecord>> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT id, repository, source_pattern, created_at, size_bytes, shard_count, restored
                 FROM snapshots WHERE id = ?1",
                params![id.as_str()],
                row_to_snapshot,
            )
            .optional()?)
    }

    fn list_snapshots(&self, repository: Option<&str>) -> Result<Vec<SnapshotRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, repository, source_pattern, created_at, size_bytes, shard_count, restored
             FROM snapshots WHERE ?1 IS NULL OR repository = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![repository], row_to_snapshot)?;
        let mut out = vec![];
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn mark_restored(&self, id: &SnapshotId) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("UPDATE snapshots SET restored = 1 WHERE id = ?1 AND restored = 0", params![id.as_str()])?;
        Ok(n == 1)
    }

    fn remove_snapshot(&self, id: &SnapshotId) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM snapshots WHERE id = ?1", params![id.as_str()])?;
        Ok(n == 1)
    }

    fn save_plan(&self, plan: &RestorePlan) -> Result<()> {
        self.write(|tx| {
            tx.execute("DELETE FROM restore_tasks WHERE plan_id = ?1", params![plan.id.as_str()])?;
            tx.execute(
                "INSERT OR REPLACE INTO restore_plans(id, repository, pattern, reference_date, total_units, total_shards, total_size_bytes, created_at, requested_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    plan.id.as_str(),
                    plan.repository,
                    plan.pattern,
                    plan.reference_date.format(DATE_FORMAT).to_string(),
                    plan.total_units as i64,
                    plan.total_shards as i64,
                    plan.total_size_bytes as i64,
                    plan.created_at_unix,
                    plan.requested_by
                ],
            )?;
            for (pos, t) in plan.tasks.iter().enumerate() {
                tx.execute(
                    "INSERT INTO restore_tasks(plan_id, position, snapshot_id, target_unit, size_bytes, shard_count, distance_days, status, attempts, last_error)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        plan.id.as_str(),
                        pos as i64,
                        t.snapshot_id.as_str(),
                        t.target_unit,
                        t.size_bytes as i64,
                        t.shard_count as i64,
                        t.distance_days,
                        Self::status_to_str(&t.status),
                        t.attempts as i64,
                        t.last_error
                    ],
                )?;
            }
            Ok(())
        })
    }

    fn load_plan(&self, id: &PlanId) -> Result<Option<RestorePlan>> {
        let conn = self.conn.lock().unwrap();
        read_plan(&conn, id.as_str())
    }

    fn latest_plan(&self) -> Result<Option<RestorePlan>> {
        let conn = self.conn.lock().unwrap();
        let id: Option<String> = conn
            .query_row("SELECT id FROM restore_plans ORDER BY created_at DESC, rowid DESC LIMIT 1", [], |r| r.get(0))
            .optional()?;
        match id {
            Some(id) => read_plan(&conn, &id),
            None => Ok(None),
        }
    }

    fn set_task_status(
        &self,
        plan_id: &PlanId,
        snapshot_id: &SnapshotId,
        status: TaskStatus,
        attempts: u32,
        last_error: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE restore_tasks SET status = ?1, attempts = ?2, last_error = ?3 WHERE plan_id = ?4 AND snapshot_id = ?5",
            params![Self::status_to_str(&status), attempts as i64, last_error, plan_id.as_str(), snapshot_id.as_str()],
        )?;
        if n == 0 {
            return Err(anyhow!("plan {} has no task for {}", plan_id, snapshot_id));
        }
        Ok(())
    }

    fn load_lock(&self) -> Result<RestoreLock> {
        let conn = self.conn.lock().unwrap();
        read_lock(&conn)
    }

    fn try_stage(&self, holder: &str, summary: &PlanSummary, now_unix: i64, lease_secs: i64) -> Result<StageAttempt> {
        let summary_json = serde_json::to_string(summary)?;
        self.write(|tx| {
            let n = tx.execute(
                "UPDATE restore_lock
                 SET state = 'staged', held_by = ?1, campaign = ?2, acquired_at = ?3, expires_at = ?4, summary_json = ?5
                 WHERE id = 1 AND state = 'free'",
                params![holder, summary.plan_id.as_str(), now_unix, now_unix + lease_secs, summary_json],
            )?;
            let lock = read_lock(tx)?;
            Ok(if n == 1 { StageAttempt::Acquired(lock) } else { StageAttempt::Held(lock) })
        })
    }

    fn transition_lock(
        &self,
        campaign: &PlanId,
        from: LockState,
        to: LockState,
        now_unix: i64,
        lease_secs: i64,
    ) -> Result<bool> {
        if from == LockState::Free {
            return Ok(false);
        }
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE restore_lock SET state = ?1, expires_at = ?2 WHERE id = 1 AND state = ?3 AND campaign = ?4",
            params![
                Self::lock_state_to_str(to),
                now_unix + lease_secs,
                Self::lock_state_to_str(from),
                campaign.as_str()
            ],
        )?;
        Ok(n == 1)
    }

    fn release_lock(&self, campaign: &PlanId) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE restore_lock
             SET state = 'free', held_by = NULL, campaign = NULL, acquired_at = NULL, expires_at = NULL, summary_json = NULL
             WHERE id = 1 AND campaign = ?1",
            params![campaign.as_str()],
        )?;
        Ok(n == 1)
    }

    fn force_reset_lock(&self) -> Result<RestoreLock> {
        self.write(|tx| {
            let previous = read_lock(tx)?;
            tx.execute(
                "UPDATE restore_lock
                 SET state = 'free', held_by = NULL, campaign = NULL, acquired_at = NULL, expires_at = NULL, summary_json = NULL
                 WHERE id = 1",
                [],
            )?;
            Ok(previous)
        })
    }

    fn append_history(&self, timestamp_unix: i64, actor: &str, level: HistoryLevel, message: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO history(ts, actor, level, message) VALUES (?1, ?2, ?3, ?4)",
            params![timestamp_unix, actor, Self::level_to_str(level), message],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn list_history(&self, limit: usize, search: Option<&str>) -> Result<Vec<HistoryEntry>> {
        let conn = self.conn.lock().unwrap();
        let needle = search.map(|s| s.to_lowercase());
        let mut stmt = conn.prepare(
            "SELECT id, ts, actor, level, message FROM history
             WHERE ?1 IS NULL OR instr(lower(message), ?1) > 0 OR instr(lower(actor), ?1) > 0
             ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![needle, limit as i64], |r| {
            Ok(HistoryEntry {
                id: r.get(0)?,
                timestamp_unix: r.get(1)?,
                actor: r.get(2)?,
                level: Self::str_to_level(&r.get::<_, String>(3)?),
                message: r.get(4)?,
            })
        })?;
        let mut out = vec![];
        for row in rows {
            out.push(row?);
        }
        out.reverse();
        Ok(out)
    }

    fn purge_history(&self, before_unix: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.execute("DELETE FROM history WHERE ts < ?1", params![before_unix])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use tempfile::tempdir;

    fn record(unit: &str) -> SnapshotRecord {
        SnapshotRecord {
            id: SnapshotId::from_str(format!("snapshot_{unit}")),
            repository: "repo".into(),
            source_pattern: unit.into(),
            created_at_unix: 1_700_000_000,
            size_bytes: 3_196_171_607,
            shard_count: 1,
            restored: false,
        }
    }

    fn plan(created: i64) -> RestorePlan {
        let r = record("logs-a-2024.01.18-000051");
        RestorePlan {
            id: PlanId::new(),
            repository: "repo".into(),
            pattern: "logs".into(),
            reference_date: parse_reference_date("2024.01.18").unwrap(),
            tasks: vec![RestoreTask {
                snapshot_id: r.id,
                target_unit: r.source_pattern,
                size_bytes: r.size_bytes,
                shard_count: 1,
                distance_days: 0,
                status: TaskStatus::Pending,
                attempts: 0,
                last_error: None,
            }],
            total_units: 1,
            total_shards: 1,
            total_size_bytes: 3_196_171_607,
            created_at_unix: created,
            requested_by: "alice".into(),
        }
    }

    #[test]
    fn sqlite_open_and_migrate() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("thaw.db");
        let store = SqliteStorage::open(&db_path).unwrap();
        assert!(store.load_lock().unwrap().is_free());
        // Reopening must not reset anything.
        drop(store);
        let store = SqliteStorage::open(&db_path).unwrap();
        assert!(store.load_lock().unwrap().is_free());
    }

    #[test]
    fn catalog_insert_if_absent_and_restored_cas() {
        let dir = tempdir().unwrap();
        let store = SqliteStorage::open(&dir.path().join("thaw.db")).unwrap();
        let r = record("logs-a-2024.01.18-000051");
        assert!(store.upsert_snapshot(&r).unwrap());
        assert!(!store.upsert_snapshot(&r).unwrap());
        assert!(store.mark_restored(&r.id).unwrap());
        assert!(!store.mark_restored(&r.id).unwrap());
        let got = store.get_snapshot(&r.id).unwrap().unwrap();
        assert!(got.restored);
        assert_eq!(got.size_bytes, 3_196_171_607);
        assert!(store.remove_snapshot(&r.id).unwrap());
        assert!(store.list_snapshots(Some("repo")).unwrap().is_empty());
    }

    #[test]
    fn plan_round_trips_with_task_updates() {
        let dir = tempdir().unwrap();
        let store = SqliteStorage::open(&dir.path().join("thaw.db")).unwrap();
        let p = plan(10);
        store.save_plan(&p).unwrap();
        store.save_plan(&plan(5)).unwrap();
        let sid = p.tasks[0].snapshot_id.clone();
        store.set_task_status(&p.id, &sid, TaskStatus::Restored, 2, None).unwrap();

        let latest = store.latest_plan().unwrap().unwrap();
        assert_eq!(latest.id, p.id);
        assert_eq!(latest.reference_date, p.reference_date);
        assert_eq!(latest.tasks[0].status, TaskStatus::Restored);
        assert_eq!(latest.tasks[0].attempts, 2);

        let err = store.set_task_status(&p.id, &SnapshotId::from_str("nope"), TaskStatus::Failed, 1, None);
        assert!(err.is_err());
    }

    #[test]
    fn lock_cas_and_release_by_campaign_only() {
        let dir = tempdir().unwrap();
        let store = SqliteStorage::open(&dir.path().join("thaw.db")).unwrap();
        let p = plan(1);
        let StageAttempt::Acquired(lock) = store.try_stage("alice@h:1", &p.summary(), 100, 300).unwrap() else {
            panic!("expected to acquire a free lock");
        };
        assert_eq!(lock.state, LockState::Staged);
        assert_eq!(lock.plan_summary.as_ref().unwrap().total_units, 1);

        assert!(store.transition_lock(&p.id, LockState::Staged, LockState::Confirmed, 110, 300).unwrap());
        assert!(!store.transition_lock(&p.id, LockState::Staged, LockState::Executing, 110, 300).unwrap());
        assert!(!store.release_lock(&PlanId::new()).unwrap());
        assert_eq!(store.load_lock().unwrap().state, LockState::Confirmed);
        assert!(store.release_lock(&p.id).unwrap());
        assert!(store.load_lock().unwrap().is_free());
    }

    #[test]
    fn lock_is_exclusive_across_connections() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("thaw.db");
        SqliteStorage::open(&db_path).unwrap();

        let workers = 8;
        let barrier = Arc::new(Barrier::new(workers));
        let handles: Vec<_> = (0..workers)
            .map(|i| {
                let db_path = db_path.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    let store = SqliteStorage::open(&db_path).unwrap();
                    barrier.wait();
                    let holder = format!("op{i}@host:{i}");
                    (holder.clone(), store.try_stage(&holder, &plan(i as i64).summary(), 100, 300).unwrap())
                })
            })
            .collect();

        let results: Vec<(String, StageAttempt)> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners: Vec<&String> = results
            .iter()
            .filter_map(|(h, a)| matches!(a, StageAttempt::Acquired(_)).then_some(h))
            .collect();
        assert_eq!(winners.len(), 1);
        for (_, attempt) in &results {
            if let StageAttempt::Held(lock) = attempt {
                assert_eq!(lock.holder(), winners[0].as_str());
            }
        }
    }

    #[test]
    fn force_reset_reports_previous_holder() {
        let dir = tempdir().unwrap();
        let store = SqliteStorage::open(&dir.path().join("thaw.db")).unwrap();
        store.try_stage("alice@h:1", &plan(1).summary(), 100, 300).unwrap();
        let prev = store.force_reset_lock().unwrap();
        assert_eq!(prev.holder(), "alice@h:1");
        assert!(store.load_lock().unwrap().is_free());
    }

    #[test]
    fn history_search_limit_and_purge() {
        let dir = tempdir().unwrap();
        let store = SqliteStorage::open(&dir.path().join("thaw.db")).unwrap();
        store.append_history(1, "alice", HistoryLevel::Info, "Plan staged").unwrap();
        store.append_history(2, "bob", HistoryLevel::Error, "Restore of x failed").unwrap();
        store.append_history(3, "alice", HistoryLevel::Info, "User cancelled restore operations!").unwrap();

        let all = store.list_history(50, None).unwrap();
        assert_eq!(all.iter().map(|e| e.timestamp_unix).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(store.list_history(1, None).unwrap()[0].timestamp_unix, 3);
        let hits = store.list_history(50, Some("RESTORE")).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].level, HistoryLevel::Error);

        assert_eq!(store.purge_history(3).unwrap(), 2);
        assert_eq!(store.list_history(50, None).unwrap().len(), 1);
    }
}
