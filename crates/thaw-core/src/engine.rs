use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::NaiveDate;
use regex::Regex;

use crate::{
    extract_date, series_key, PlanId, PlanRequest, RestorePlan, RestoreTask, SnapshotRecord, TaskStatus, ThawError,
    TieBreak, DATE_FORMAT,
};

/// A catalog record that matched the request, with its distance to the reference date.
#[derive(Clone, Debug)]
pub struct Candidate<'a> {
    pub record: &'a SnapshotRecord,
    pub distance_days: i64,
}

/// Whether `a` should win over `b` for the same series.
fn prefer(a: &Candidate<'_>, b: &Candidate<'_>, tie_break: TieBreak) -> bool {
    match a.distance_days.cmp(&b.distance_days) {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => {
            let by_created = match tie_break {
                TieBreak::MostRecent => a.record.created_at_unix.cmp(&b.record.created_at_unix),
                TieBreak::Oldest => b.record.created_at_unix.cmp(&a.record.created_at_unix),
            };
            // Names as a last resort so planning stays deterministic.
            by_created.then_with(|| a.record.id.cmp(&b.record.id)) == Ordering::Greater
        }
    }
}

/// Pick the closest snapshot per rotation series.
///
/// Records without an embedded date cannot be ranked and are ignored. The result is
/// keyed by series so callers get a stable order.
pub fn closest_per_series<'a>(
    records: impl IntoIterator<Item = &'a SnapshotRecord>,
    reference: NaiveDate,
    tie_break: TieBreak,
) -> BTreeMap<String, Candidate<'a>> {
    let mut best: BTreeMap<String, Candidate<'a>> = BTreeMap::new();
    for record in records {
        let Some(date) = extract_date(&record.source_pattern) else {
            continue;
        };
        let cand = Candidate { record, distance_days: (date - reference).num_days().abs() };
        let series = series_key(&record.source_pattern);
        let replace = best.get(&series).map(|current| prefer(&cand, current, tie_break)).unwrap_or(true);
        if replace {
            best.insert(series, cand);
        }
    }
    best
}

/// Build an immutable restore plan from the catalog.
///
/// Units whose chosen snapshot is already restored stay in the plan as `Skipped` and do
/// not count towards the totals.
pub fn build_plan(
    records: &[SnapshotRecord],
    req: &PlanRequest,
    plan_id: PlanId,
    now_unix: i64,
) -> Result<RestorePlan, ThawError> {
    let re = Regex::new(&req.pattern)
        .map_err(|e| ThawError::InvalidPattern { pattern: req.pattern.clone(), reason: e.to_string() })?;

    let matching = records
        .iter()
        .filter(|r| r.repository == req.repository && re.is_match(&r.source_pattern));
    let chosen = closest_per_series(matching, req.reference_date, req.tie_break);

    if chosen.is_empty() {
        return Err(ThawError::NoMatch {
            pattern: req.pattern.clone(),
            date: req.reference_date.format(DATE_FORMAT).to_string(),
        });
    }

    let mut tasks: Vec<RestoreTask> = chosen
        .into_values()
        .map(|c| RestoreTask {
            snapshot_id: c.record.id.clone(),
            target_unit: c.record.source_pattern.clone(),
            size_bytes: c.record.size_bytes,
            shard_count: c.record.shard_count,
            distance_days: c.distance_days,
            status: if c.record.restored { TaskStatus::Skipped } else { TaskStatus::Pending },
            attempts: 0,
            last_error: None,
        })
        .collect();
    tasks.sort_by(|a, b| a.target_unit.cmp(&b.target_unit));

    let (mut units, mut shards, mut size) = (0u32, 0u64, 0u64);
    for t in tasks.iter().filter(|t| t.status != TaskStatus::Skipped) {
        units += 1;
        shards += u64::from(t.shard_count);
        size += t.size_bytes;
    }

    Ok(RestorePlan {
        id: plan_id,
        repository: req.repository.clone(),
        pattern: req.pattern.clone(),
        reference_date: req.reference_date,
        tasks,
        total_units: units,
        total_shards: shards,
        total_size_bytes: size,
        created_at_unix: now_unix,
        requested_by: req.requested_by.clone(),
    })
}
