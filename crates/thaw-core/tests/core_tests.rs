use thaw_core::{
    build_plan, format_bytes, parse_reference_date, LockState, PlanId, PlanRequest, RestoreLock, SnapshotId, SnapshotRecord,
    TaskStatus, TieBreak,
};

fn k8s_access_catalog() -> Vec<SnapshotRecord> {
    let apps = ["gpn", "gas", "jwl", "avp", "ams", "iad", "sjc", "lab", "ops"];
    let mut out = vec![];
    for (i, app) in apps.iter().enumerate() {
        for (day, gen) in [("2024.01.05", 40), ("2024.01.18", 51), ("2024.02.02", 60)] {
            let unit = format!(".ds-aex20-c01-logs-{}-k8s-access-{}-0000{}", app, day, gen);
            out.push(SnapshotRecord {
                id: SnapshotId::from_str(format!("snapshot_{}", unit)),
                repository: "aex20-repo".into(),
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

#[test]
fn plans_one_task_per_series_with_expected_cost() {
    let req = PlanRequest {
        repository: "aex20-repo".into(),
        pattern: "k8s-access".into(),
        reference_date: parse_reference_date("2024.01.18").unwrap(),
        requested_by: "alice".into(),
        tie_break: TieBreak::MostRecent,
    };
    let plan = build_plan(&k8s_access_catalog(), &req, PlanId::new(), 0).unwrap();
    assert_eq!(plan.tasks.len(), 9);
    assert!(plan.tasks.iter().all(|t| t.target_unit.contains("2024.01.18")));
    assert!(plan.tasks.iter().all(|t| t.status == TaskStatus::Pending));
    assert_eq!(plan.total_units, 9);
    assert_eq!(plan.total_shards, 9);
    assert_eq!(format_bytes(plan.total_size_bytes), "26.79 GB");
}

#[test]
fn summary_mirrors_plan_totals() {
    let req = PlanRequest {
        repository: "aex20-repo".into(),
        pattern: "gpn-k8s-access".into(),
        reference_date: parse_reference_date("2024.01.30").unwrap(),
        requested_by: "bob".into(),
        tie_break: TieBreak::MostRecent,
    };
    let plan = build_plan(&k8s_access_catalog(), &req, PlanId::new(), 0).unwrap();
    let summary = plan.summary();
    assert_eq!(summary.total_units, 1);
    assert_eq!(summary.requested_by, "bob");
    // 2024.02.02 is 3 days away, 2024.01.18 is 12
    assert!(plan.tasks[0].target_unit.contains("2024.02.02"));
}

#[test]
fn fresh_lock_is_free_and_never_stale() {
    let lock = RestoreLock::free();
    assert_eq!(lock.state, LockState::Free);
    assert!(!lock.is_stale(i64::MAX));
}

#[test]
fn held_lock_goes_stale_after_its_lease() {
    let mut lock = RestoreLock::free();
    lock.state = LockState::Executing;
    lock.held_by = Some("alice@jump01:4242".into());
    lock.expires_at_unix = Some(1_000);
    assert!(!lock.is_stale(999));
    assert!(lock.is_stale(1_000));
}
