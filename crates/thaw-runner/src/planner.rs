use anyhow::Result;
use thaw_core::{build_plan, PlanId, PlanRequest, RestorePlan, ThawError};
use thaw_storage::Storage;

/// What planning produced. An empty match is a normal answer, not an error.
#[derive(Clone, Debug)]
pub enum Planned {
    Plan(RestorePlan),
    NoMatch { pattern: String, date: String },
}

/// Build a plan from the catalog for `req.repository`. Bad patterns surface as errors.
pub fn plan_from_catalog(store: &dyn Storage, req: &PlanRequest, now_unix: i64) -> Result<Planned> {
    let records = store.list_snapshots(Some(&req.repository))?;
    match build_plan(&records, req, PlanId::new(), now_unix) {
        Ok(plan) => Ok(Planned::Plan(plan)),
        Err(ThawError::NoMatch { pattern, date }) => Ok(Planned::NoMatch { pattern, date }),
        Err(e) => Err(e.into()),
    }
}
