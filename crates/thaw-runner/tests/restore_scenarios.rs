use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use tempfile::tempdir;
use thaw_cluster::{
    ClusterClient, ClusterResult, FailureScript, RestoreHandle, ScriptedCluster, ShardCounts, StorageInfo,
};
use thaw_core::{
    parse_reference_date, CampaignOutcome, GateName, HealthState, HistoryLevel, LockState, ManualClock, PlanId,
    PlanSummary, SnapshotId, SnapshotRecord, TaskStatus, ThawError,
};
use thaw_hitl::{await_answer, Confirmer, Decision, ScriptedConfirmer, CANCELLED_MESSAGE};
use thaw_runner::{ClearOutcome, Config, RestoreRequest, Runner};
use thaw_storage::{InMemoryStorage, StageAttempt, Storage};
use thaw_storage_sqlite::SqliteStorage;

const REPO: &str = "aex20-repo";
// 2024-01-18 00:00:00 UTC
const NOW: i64 = 1_705_536_000;

fn k8s_access_catalog() -> Vec<SnapshotRecord> {
    let apps = ["gpn", "gas", "jwl", "avp", "ams", "iad", "sjc", "lab", "ops"];
    let mut out = vec![];
    for (i, app) in apps.iter().enumerate() {
        for (day, gen) in [("2024.01.05", 40), ("2024.01.18", 51), ("2024.02.02", 60)] {
            let unit = format!(".ds-aex20-c01-logs-{}-k8s-access-{}-0000{}", app, day, gen);
            out.push(SnapshotRecord {
                id: SnapshotId::from_str(format!("snapshot_{}", unit)),
                repository: REPO.into(),
                source_pattern: unit,
                created_at_unix: 1_700_000_000 + i as i64,
                size_bytes: if i == 8 { 3_196_171_609 } else { 3_196_171_607 },
                shard_count: 1,
                restored: false,
            });
        }
    }
    out
}

fn snapshot_for(app: &str) -> SnapshotId {
    SnapshotId::from_str(format!("snapshot_.ds-aex20-c01-logs-{}-k8s-access-2024.01.18-000051", app))
}

fn request() -> RestoreRequest {
    RestoreRequest { pattern: "k8s-access".into(), date: "2024.01.18".into(), ..Default::default() }
}

fn seeded(store: &dyn Storage) {
    for r in k8s_access_catalog() {
        store.upsert_snapshot(&r).unwrap();
    }
}

fn runner(
    root: &Path,
    store: Arc<dyn Storage>,
    cluster: Arc<dyn ClusterClient>,
    confirmer: Arc<dyn Confirmer>,
    clock: Arc<ManualClock>,
) -> Runner {
    let mut cfg = Config::default_for_dir(root);
    cfg.clusters[0].repository = REPO.into();
    let target = cfg.clusters[0].clone();
    Runner::with_parts(root.to_path_buf(), cfg, target, store, cluster, confirmer, clock, "alice@jump01:4242")
}

struct Harness {
    store: Arc<InMemoryStorage>,
    cluster: Arc<ScriptedCluster>,
    confirmer: Arc<ScriptedConfirmer>,
    clock: Arc<ManualClock>,
    runner: Runner,
    _dir: tempfile::TempDir,
}

fn harness(decisions: impl IntoIterator<Item = Decision>) -> Harness {
    let dir = tempdir().unwrap();
    let store = Arc::new(InMemoryStorage::new());
    seeded(store.as_ref());
    let cluster = Arc::new(ScriptedCluster::new().with_snapshots(k8s_access_catalog()));
    let confirmer = Arc::new(ScriptedConfirmer::new(decisions));
    let clock = Arc::new(ManualClock::at(NOW));
    let runner = runner(dir.path(), store.clone(), cluster.clone(), confirmer.clone(), clock.clone());
    Harness { store, cluster, confirmer, clock, runner, _dir: dir }
}

fn history_messages(store: &dyn Storage) -> Vec<String> {
    store.list_history(1000, None).unwrap().into_iter().map(|e| e.message).collect()
}

fn other_holder_summary() -> PlanSummary {
    PlanSummary {
        plan_id: PlanId::new(),
        pattern: "audit".into(),
        reference_date: parse_reference_date("2024.01.10").unwrap(),
        total_units: 2,
        total_shards: 4,
        total_size_bytes: 1024,
        skipped: 0,
        requested_by: "bob@jump02:77".into(),
    }
}

#[test]
fn confirmed_campaign_restores_every_unit() {
    let h = harness([Decision::Accepted]);

    let outcome = h.runner.restore(&request()).unwrap();
    let CampaignOutcome::Completed { plan, summary } = outcome else {
        panic!("expected a completed campaign");
    };
    assert_eq!(plan.tasks.len(), 9);
    assert_eq!(summary.restored, 9);
    assert_eq!(summary.failed, 0);
    assert!(summary.to_string().starts_with("9 Restored, 0 Failed, 0 Skipped"));

    let prompts = h.confirmer.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("9 units / 9 shards / 26.79 GB"));
    assert!(prompts[0].contains("Proceed with restore?"));

    assert!(h.store.load_lock().unwrap().is_free());
    assert_eq!(h.cluster.triggered().len(), 9);
    assert_eq!(h.runner.list_restored().unwrap().len(), 9);

    let saved = h.store.latest_plan().unwrap().unwrap();
    assert_eq!(saved.id, plan.id);
    assert!(saved.tasks.iter().all(|t| t.status == TaskStatus::Restored && t.attempts == 1));

    let messages = history_messages(h.store.as_ref());
    assert!(messages.iter().any(|m| m.starts_with("Restore confirmed")));
    assert!(messages.iter().any(|m| m.contains("finished: 9 Restored, 0 Failed")));
}

#[test]
fn transient_failures_are_retried_until_attempts_run_out() {
    let h = harness([Decision::Accepted]);
    h.cluster.script_failure(&snapshot_for("gpn"), FailureScript::AlwaysTransient);
    h.cluster.script_failure(&snapshot_for("ams"), FailureScript::Transient { remaining: 1 });

    let CampaignOutcome::Completed { plan, summary } = h.runner.restore(&request()).unwrap() else {
        panic!("expected a completed campaign");
    };
    assert_eq!(summary.restored, 8);
    assert_eq!(summary.failed, 1);
    // one retry for ams, two for gpn
    assert_eq!(h.clock.sleeps(), vec![Duration::from_secs(30); 3]);

    let gpn = plan.tasks.iter().find(|t| t.snapshot_id == snapshot_for("gpn")).unwrap();
    assert_eq!(gpn.status, TaskStatus::Failed);
    assert_eq!(gpn.attempts, 3);
    assert!(gpn.last_error.as_deref().unwrap_or_default().contains("not green"));
    let ams = plan.tasks.iter().find(|t| t.snapshot_id == snapshot_for("ams")).unwrap();
    assert_eq!(ams.status, TaskStatus::Restored);
    assert_eq!(ams.attempts, 2);

    // accepted triggers are awaited again, never re-issued
    assert_eq!(h.cluster.triggered().len(), 9);
    assert!(!h.store.get_snapshot(&snapshot_for("gpn")).unwrap().unwrap().restored);
    assert!(h.store.load_lock().unwrap().is_free());

    let errors: Vec<_> =
        h.store.list_history(100, None).unwrap().into_iter().filter(|e| e.level == HistoryLevel::Error).collect();
    assert_eq!(errors.len(), 2, "task failure and campaign summary");
}

#[test]
fn permanent_failure_is_not_retried() {
    let h = harness([Decision::Accepted]);
    h.cluster.script_failure(&snapshot_for("lab"), FailureScript::Permanent("snapshot is corrupt".into()));

    let CampaignOutcome::Completed { plan, summary } = h.runner.restore(&request()).unwrap() else {
        panic!("expected a completed campaign");
    };
    assert_eq!((summary.restored, summary.failed), (8, 1));
    assert!(h.clock.sleeps().is_empty());
    let lab = plan.tasks.iter().find(|t| t.snapshot_id == snapshot_for("lab")).unwrap();
    assert_eq!(lab.attempts, 1);
    assert_eq!(lab.last_error.as_deref(), Some("cluster rejected request: snapshot is corrupt"));
}

#[test]
fn confirmation_timeout_cancels_without_touching_the_cluster() {
    let h = harness([Decision::TimedOut]);

    let outcome = h.runner.restore(&request()).unwrap();
    assert!(matches!(outcome, CampaignOutcome::TimedOut { .. }));
    assert!(h.store.load_lock().unwrap().is_free());
    assert!(h.cluster.triggered().is_empty());
    assert!(h.store.latest_plan().unwrap().is_none());
    assert!(history_messages(h.store.as_ref()).iter().any(|m| m.starts_with(CANCELLED_MESSAGE)));
}

#[test]
fn declined_confirmation_logs_cancellation() {
    let h = harness([Decision::Declined]);

    assert!(matches!(h.runner.restore(&request()).unwrap(), CampaignOutcome::Declined { .. }));
    assert!(h.store.load_lock().unwrap().is_free());
    assert!(history_messages(h.store.as_ref()).contains(&CANCELLED_MESSAGE.to_string()));
}

#[test]
fn held_lock_rejects_a_second_campaign() {
    let h = harness([Decision::Accepted]);
    let staged = h.store.try_stage("bob@jump02:77", &other_holder_summary(), NOW, 7200).unwrap();
    assert!(matches!(staged, StageAttempt::Acquired(_)));

    let outcome = h.runner.restore(&request()).unwrap();
    assert!(outcome.is_rejection());
    let CampaignOutcome::Rejected { reason: ThawError::LockHeld { holder, summary }, .. } = outcome else {
        panic!("expected LockHeld");
    };
    assert_eq!(holder, "bob@jump02:77");
    assert_eq!(summary.unwrap().pattern, "audit");

    assert!(h.confirmer.prompts().is_empty());
    assert!(h.cluster.triggered().is_empty());
    let lock = h.store.load_lock().unwrap();
    assert_eq!(lock.state, LockState::Staged);
    assert_eq!(lock.holder(), "bob@jump02:77");
}

#[test]
fn expired_lease_is_reported_as_corruption_not_reclaimed() {
    let h = harness([Decision::Accepted]);
    h.store.try_stage("bob@jump02:77", &other_holder_summary(), NOW - 10_000, 7200).unwrap();

    let outcome = h.runner.restore(&request()).unwrap();
    assert!(matches!(outcome, CampaignOutcome::Rejected { reason: ThawError::LockCorruption { .. }, .. }));
    assert_eq!(h.store.load_lock().unwrap().holder(), "bob@jump02:77");
    assert!(h.runner.status().unwrap().stale);
}

#[test]
fn unhealthy_cluster_fails_the_health_gate() {
    let h = harness([Decision::Accepted]);
    h.cluster.set_health(HealthState::Yellow);

    let outcome = h.runner.restore(&request()).unwrap();
    assert!(matches!(
        outcome,
        CampaignOutcome::Rejected { reason: ThawError::GateFailure { gate: GateName::ClusterHealth, .. }, .. }
    ));
    assert!(h.store.load_lock().unwrap().is_free());
    assert!(h.confirmer.prompts().is_empty());
}

#[test]
fn unreadable_cluster_state_after_staging_is_a_recorded_rejection() {
    let h = harness([Decision::Accepted]);
    h.cluster.set_health_stalled(true);

    let outcome = h.runner.restore(&request()).unwrap();
    let CampaignOutcome::Rejected { reason: ThawError::GateFailure { gate, detail }, .. } = outcome else {
        panic!("expected a gate rejection");
    };
    assert_eq!(gate, GateName::ClusterHealth);
    assert!(detail.contains("cluster state unavailable"), "{detail}");
    assert!(detail.contains("read timed out"), "{detail}");
    assert!(h.store.load_lock().unwrap().is_free());
    assert!(h.confirmer.prompts().is_empty());

    let entries = h.store.list_history(10, Some("cluster state unavailable")).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].level, HistoryLevel::Error);
}

#[test]
fn shard_limit_override_applies_to_the_gate() {
    let h = harness([Decision::Accepted]);
    let req = RestoreRequest { max_shards_per_node: Some(2), ..request() };

    let outcome = h.runner.restore(&req).unwrap();
    assert!(matches!(
        outcome,
        CampaignOutcome::Rejected { reason: ThawError::GateFailure { gate: GateName::ShardHeadroom, .. }, .. }
    ));
    assert!(h.store.load_lock().unwrap().is_free());
}

#[test]
fn dry_run_reports_checks_and_releases() {
    let h = harness([]);
    let req = RestoreRequest { dry_run: true, ..request() };

    let CampaignOutcome::DryRun { plan, cluster, checks } = h.runner.restore(&req).unwrap() else {
        panic!("expected a dry run");
    };
    assert_eq!(plan.total_units, 9);
    assert_eq!(cluster.health, HealthState::Green);
    assert_eq!(cluster.data_nodes, 3);
    assert_eq!(checks.len(), 3);
    assert!(h.confirmer.prompts().is_empty());
    assert!(h.cluster.triggered().is_empty());
    assert!(h.store.load_lock().unwrap().is_free());
}

#[test]
fn second_run_finds_nothing_to_restore() {
    let h = harness([Decision::Accepted, Decision::Accepted]);
    assert!(matches!(h.runner.restore(&request()).unwrap(), CampaignOutcome::Completed { .. }));

    let outcome = h.runner.restore(&request()).unwrap();
    let CampaignOutcome::NothingToRestore { plan } = outcome else {
        panic!("expected nothing to restore");
    };
    assert!(plan.tasks.iter().all(|t| t.status == TaskStatus::Skipped));
    assert_eq!(h.confirmer.prompts().len(), 1);
    assert_eq!(h.cluster.triggered().len(), 9);
}

#[test]
fn unmatched_pattern_is_a_clean_no_op() {
    let h = harness([]);
    let req = RestoreRequest { pattern: "no-such-series".into(), ..request() };
    assert!(matches!(h.runner.restore(&req).unwrap(), CampaignOutcome::NoMatch { .. }));
    assert!(h.store.load_lock().unwrap().is_free());
}

#[test]
fn bad_input_and_unreachable_cluster_are_errors() {
    let h = harness([]);
    assert!(h.runner.restore(&RestoreRequest { date: "18-01-2024".into(), ..request() }).is_err());
    assert!(h.runner.restore(&RestoreRequest { pattern: "k8s[".into(), ..request() }).is_err());
    assert!(h.runner.restore(&RestoreRequest { batch_size: Some(0), ..request() }).is_err());

    h.cluster.set_reachable(false);
    let err = h.runner.restore(&request()).unwrap_err();
    assert!(err.to_string().contains("unreachable"));
    assert!(h.store.load_lock().unwrap().is_free());
}

/// Raises the cancel flag once the first restore completes.
struct CancelAfterFirstRestore {
    inner: ScriptedCluster,
    flag: Mutex<Option<Arc<AtomicBool>>>,
}

impl ClusterClient for CancelAfterFirstRestore {
    fn name(&self) -> &str {
        self.inner.name()
    }
    fn ping(&self) -> ClusterResult<String> {
        self.inner.ping()
    }
    fn health(&self) -> ClusterResult<HealthState> {
        self.inner.health()
    }
    fn shard_counts(&self) -> ClusterResult<ShardCounts> {
        self.inner.shard_counts()
    }
    fn storage(&self) -> ClusterResult<StorageInfo> {
        self.inner.storage()
    }
    fn list_snapshots(&self, repository: &str) -> ClusterResult<Vec<SnapshotRecord>> {
        self.inner.list_snapshots(repository)
    }
    fn trigger_restore(&self, repository: &str, snapshot: &SnapshotId, target_unit: &str) -> ClusterResult<RestoreHandle> {
        self.inner.trigger_restore(repository, snapshot, target_unit)
    }
    fn await_restore(&self, handle: &RestoreHandle, timeout: Duration) -> ClusterResult<()> {
        let res = self.inner.await_restore(handle, timeout);
        if let Some(flag) = self.flag.lock().unwrap().as_ref() {
            flag.store(true, Ordering::SeqCst);
        }
        res
    }
    fn delete_snapshot(&self, repository: &str, snapshot: &SnapshotId) -> ClusterResult<()> {
        self.inner.delete_snapshot(repository, snapshot)
    }
    fn cold_units(&self) -> ClusterResult<Vec<String>> {
        self.inner.cold_units()
    }
}

#[test]
fn cancellation_stops_between_batches() {
    let dir = tempdir().unwrap();
    let store = Arc::new(InMemoryStorage::new());
    seeded(store.as_ref());
    let cluster = Arc::new(CancelAfterFirstRestore {
        inner: ScriptedCluster::new().with_snapshots(k8s_access_catalog()),
        flag: Mutex::new(None),
    });
    let confirmer = Arc::new(ScriptedConfirmer::new([Decision::Accepted]));
    let r = runner(dir.path(), store.clone(), cluster.clone(), confirmer, Arc::new(ManualClock::at(NOW)));
    *cluster.flag.lock().unwrap() = Some(r.cancel_flag());

    let CampaignOutcome::Completed { plan, summary } = r.restore(&request()).unwrap() else {
        panic!("expected a completed campaign");
    };
    // the whole first batch still finishes
    assert_eq!(summary.restored, 3);
    assert_eq!(summary.pending, 6);
    assert!(summary.cancelled);
    assert_eq!(plan.count_status(TaskStatus::Pending), 6);
    assert!(store.load_lock().unwrap().is_free());
    assert!(history_messages(store.as_ref()).iter().any(|m| m.contains("cancelled before batch 2/3")));
}

/// Ctrl-C arrives while the prompt is still waiting for a reply.
struct InterruptedPrompt;

impl Confirmer for InterruptedPrompt {
    fn confirm(&self, _prompt: &str, timeout: Duration, cancel: &AtomicBool) -> Decision {
        let (_tx, rx) = mpsc::channel();
        std::thread::scope(|s| {
            s.spawn(|| {
                std::thread::sleep(Duration::from_millis(20));
                cancel.store(true, Ordering::SeqCst);
            });
            await_answer(&rx, timeout, cancel)
        })
    }
}

#[test]
fn interrupt_at_the_prompt_frees_the_lock() {
    let dir = tempdir().unwrap();
    let store = Arc::new(InMemoryStorage::new());
    seeded(store.as_ref());
    let cluster = Arc::new(ScriptedCluster::new().with_snapshots(k8s_access_catalog()));
    let r = runner(dir.path(), store.clone(), cluster.clone(), Arc::new(InterruptedPrompt), Arc::new(ManualClock::at(NOW)));

    let outcome = r.restore(&request()).unwrap();
    assert!(matches!(outcome, CampaignOutcome::Declined { .. }));
    assert!(r.cancel_flag().load(Ordering::SeqCst));
    assert!(store.load_lock().unwrap().is_free());
    assert!(cluster.triggered().is_empty());
    assert!(store.latest_plan().unwrap().is_none());
    assert!(history_messages(store.as_ref())
        .iter()
        .any(|m| m.starts_with(CANCELLED_MESSAGE) && m.contains("interrupted")));
}

#[test]
fn interrupt_racing_a_yes_still_cancels() {
    let h = harness([Decision::Accepted]);
    h.runner.cancel_flag().store(true, Ordering::SeqCst);

    assert!(matches!(h.runner.restore(&request()).unwrap(), CampaignOutcome::Declined { .. }));
    assert_eq!(h.confirmer.prompts().len(), 1);
    assert!(h.cluster.triggered().is_empty());
    assert!(h.store.load_lock().unwrap().is_free());
}

#[test]
fn force_reset_frees_the_lock_and_names_the_holder() {
    let h = harness([]);
    h.store.try_stage("bob@jump02:77", &other_holder_summary(), NOW, 7200).unwrap();

    let ClearOutcome::Reset(previous) = h.runner.clear_staged(true).unwrap() else {
        panic!("expected a reset");
    };
    assert_eq!(previous.state, LockState::Staged);
    assert_eq!(previous.holder(), "bob@jump02:77");
    assert!(h.store.load_lock().unwrap().is_free());
    assert!(h.confirmer.prompts().is_empty());

    let resets = h.store.list_history(10, Some("force reset")).unwrap();
    assert_eq!(resets.len(), 1);
    assert_eq!(resets[0].level, HistoryLevel::Error);
    assert!(resets[0].message.contains("bob@jump02:77"));

    assert_eq!(h.runner.clear_staged(true).unwrap(), ClearOutcome::AlreadyFree);
}

#[test]
fn refused_force_reset_keeps_the_lock() {
    let h = harness([Decision::Declined]);
    h.store.try_stage("bob@jump02:77", &other_holder_summary(), NOW, 7200).unwrap();

    assert_eq!(h.runner.clear_staged(false).unwrap(), ClearOutcome::Refused);
    assert_eq!(h.confirmer.prompts().len(), 1);
    assert_eq!(h.store.load_lock().unwrap().state, LockState::Staged);
}

#[test]
fn operator_views_reflect_the_catalog_and_history() {
    let h = harness([Decision::Accepted, Decision::Accepted]);
    assert_eq!(h.runner.list(None).unwrap().len(), 27);
    assert_eq!(h.runner.list(Some("gpn")).unwrap().len(), 3);
    assert!(h.runner.list(Some("(")).is_err());

    let status = h.runner.status().unwrap();
    assert!(status.lock.is_free());
    assert!(status.latest_plan.is_none());

    h.runner.restore(&request()).unwrap();
    let status = h.runner.status().unwrap();
    assert_eq!(status.latest_plan.unwrap().count_status(TaskStatus::Restored), 9);

    let recent = h.runner.list_history(3, None).unwrap();
    assert_eq!(recent.len(), 3);
    assert!(recent.windows(2).all(|w| w[0].id < w[1].id));
    assert!(recent.iter().all(|e| e.actor == "alice@jump01:4242"));

    h.clock.advance(Duration::from_secs(40 * 86_400));
    let before = history_messages(h.store.as_ref()).len();
    assert_eq!(h.runner.purge_history(30, true).unwrap(), Some(before));
    let left = history_messages(h.store.as_ref());
    assert_eq!(left.len(), 1);
    assert!(left[0].starts_with("Purged"));
    assert_eq!(h.runner.purge_history(30, false).unwrap(), Some(0));
}

#[test]
fn sync_and_retention_run_through_the_runner() {
    let dir = tempdir().unwrap();
    let store = Arc::new(InMemoryStorage::new());
    let cluster = Arc::new(
        ScriptedCluster::new()
            .with_snapshots(k8s_access_catalog())
            .with_cold_units([".ds-aex20-c01-logs-new-k8s-access-2024.01.18-000051".to_string()]),
    );
    let clock = Arc::new(ManualClock::at(NOW));
    let r = runner(dir.path(), store.clone(), cluster.clone(), Arc::new(ScriptedConfirmer::default()), clock);

    let report = r.sync_catalog(Some("k8s")).unwrap();
    assert_eq!((report.listed, report.added), (27, 27));
    assert_eq!(report.missing_snapshots.len(), 1);

    // default policy keeps k8s-access for 90 days; 2024.01.05 etc. are younger
    let report = r.retention(false, None).unwrap();
    assert!(report.expired.is_empty());
    assert_eq!(report.examined, 27);
    assert!(cluster.deleted().is_empty());
}

#[test]
fn sqlite_backed_campaign_survives_reopen() {
    let dir = tempdir().unwrap();
    let db = dir.path().join(".thaw/thaw.db");
    let store = Arc::new(SqliteStorage::open(&db).unwrap());
    seeded(store.as_ref());
    let cluster = Arc::new(ScriptedCluster::new().with_snapshots(k8s_access_catalog()));
    let confirmer = Arc::new(ScriptedConfirmer::new([Decision::Accepted]));
    let r = runner(dir.path(), store, cluster, confirmer, Arc::new(ManualClock::at(NOW)));

    let CampaignOutcome::Completed { plan, summary } = r.restore(&request()).unwrap() else {
        panic!("expected a completed campaign");
    };
    assert_eq!(summary.restored, 9);
    drop(r);

    let reopened = SqliteStorage::open(&db).unwrap();
    assert!(reopened.load_lock().unwrap().is_free());
    let saved = reopened.latest_plan().unwrap().unwrap();
    assert_eq!(saved.id, plan.id);
    assert!(saved.tasks.iter().all(|t| t.status == TaskStatus::Restored));
    assert_eq!(reopened.list_snapshots(Some(REPO)).unwrap().iter().filter(|s| s.restored).count(), 9);
}

#[test]
fn init_writes_config_and_schema_once() {
    let dir = tempdir().unwrap();
    let cfg_path = Runner::init(dir.path()).unwrap();
    assert!(cfg_path.exists());
    let cfg = Config::load_from(&cfg_path).unwrap();
    let db = cfg.db_path(dir.path());
    assert!(db.exists());
    assert!(SqliteStorage::open(&db).unwrap().load_lock().unwrap().is_free());

    // a second init keeps the existing config
    let before = std::fs::read_to_string(&cfg_path).unwrap();
    assert_eq!(Runner::init(dir.path()).unwrap(), cfg_path);
    assert_eq!(std::fs::read_to_string(&cfg_path).unwrap(), before);
}
