use crate::{ClusterState, GateCheck, PlanId, RestorePlan, ThawError};

/// Result of running one restore task to completion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    Restored { attempts: u32 },
    Skipped,
    Failed { attempts: u32, error: String },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CampaignSummary {
    pub plan_id: Option<PlanId>,
    pub restored: u32,
    pub failed: u32,
    pub skipped: u32,
    /// Tasks never started because the campaign was cancelled between batches.
    pub pending: u32,
    pub elapsed_secs: i64,
    pub cancelled: bool,
}

impl CampaignSummary {
    pub fn record(&mut self, outcome: &TaskOutcome) {
        match outcome {
            TaskOutcome::Restored { .. } => self.restored += 1,
            TaskOutcome::Skipped => self.skipped += 1,
            TaskOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

impl std::fmt::Display for CampaignSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} Restored, {} Failed, {} Skipped", self.restored, self.failed, self.skipped)?;
        if self.pending > 0 {
            write!(f, ", {} not started", self.pending)?;
        }
        write!(f, " in {}s", self.elapsed_secs)?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}

/// How a plan-and-restore invocation ended. Every variant is a handled result; only
/// store and connectivity failures travel as errors.
#[derive(Clone, Debug)]
pub enum CampaignOutcome {
    NoMatch { pattern: String, date: String },
    /// Every matched unit is already restored.
    NothingToRestore { plan: RestorePlan },
    /// Lock held, stale lock, or a failed gate.
    Rejected { reason: ThawError, plan: Option<RestorePlan> },
    /// Gates passed against `cluster`; nothing was staged past admission.
    DryRun { plan: RestorePlan, cluster: ClusterState, checks: Vec<GateCheck> },
    Declined { plan: RestorePlan },
    TimedOut { plan: RestorePlan },
    Completed { plan: RestorePlan, summary: CampaignSummary },
}

impl CampaignOutcome {
    pub fn is_rejection(&self) -> bool {
        matches!(self, CampaignOutcome::Rejected { .. })
    }
}
