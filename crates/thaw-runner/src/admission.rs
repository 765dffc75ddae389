use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use thaw_cluster::ClusterClient;
use thaw_core::{
    evaluate_gates, AdmissionLimits, CampaignOutcome, Clock, ClusterState, GateCheck, GateName, LockState, PlanCost,
    PlanId, RestorePlan, ThawError,
};
use thaw_hitl::{format_plan, Confirmer, Decision, CANCELLED_MESSAGE};
use thaw_storage::{StageAttempt, Storage};
use tracing::{debug, info, warn};

use crate::history::HistoryLog;

/// Holds the restore lock for one campaign and frees it when dropped, whatever the exit path.
pub struct LockGuard {
    store: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    campaign: PlanId,
    lease_secs: i64,
    released: bool,
}

impl LockGuard {
    fn new(store: Arc<dyn Storage>, clock: Arc<dyn Clock>, campaign: PlanId, lease_secs: i64) -> Self {
        Self { store, clock, campaign, lease_secs, released: false }
    }

    pub fn campaign(&self) -> &PlanId {
        &self.campaign
    }

    /// Move the lock between held states; fails if someone reset it underneath us.
    pub fn transition(&self, from: LockState, to: LockState) -> Result<()> {
        let moved = self.store.transition_lock(&self.campaign, from, to, self.clock.now_unix(), self.lease_secs)?;
        if !moved {
            return Err(anyhow!(
                "restore lock for campaign {} is no longer {:?}; it was reset by another operator",
                self.campaign,
                from
            ));
        }
        debug!(campaign = %self.campaign, ?from, ?to, "lock transition");
        Ok(())
    }

    /// Push the lease deadline out without changing state.
    pub fn heartbeat(&self, state: LockState) -> Result<()> {
        self.transition(state, state)
    }

    pub fn release(mut self) -> Result<bool> {
        self.released = true;
        self.store.release_lock(&self.campaign)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match self.store.release_lock(&self.campaign) {
            Ok(true) => debug!(campaign = %self.campaign, "restore lock released"),
            Ok(false) => warn!(campaign = %self.campaign, "restore lock was already released or reset"),
            Err(e) => warn!(campaign = %self.campaign, error = %e, "failed to release restore lock"),
        }
    }
}

/// A campaign that passed every gate and was confirmed; the lock is `Executing`.
pub struct Admitted {
    pub guard: LockGuard,
    pub cluster: ClusterState,
    pub checks: Vec<GateCheck>,
}

pub enum Admission {
    Admitted(Admitted),
    /// Finished without executing: rejection, dry run, decline or timeout.
    Done(CampaignOutcome),
}

pub struct AdmissionController {
    pub store: Arc<dyn Storage>,
    pub cluster: Arc<dyn ClusterClient>,
    pub confirmer: Arc<dyn Confirmer>,
    pub clock: Arc<dyn Clock>,
    pub history: HistoryLog,
    pub limits: AdmissionLimits,
    pub lease_secs: i64,
    pub confirm_timeout: Duration,
    /// Raised by Ctrl-C; ends the confirmation wait as a decline.
    pub cancel: Arc<AtomicBool>,
}

impl AdmissionController {
    /// Stage `plan` under the lock, run the gates, and ask the operator.
    pub fn admit(&self, plan: &RestorePlan, dry_run: bool) -> Result<Admission> {
        let now = self.clock.now_unix();
        let summary = plan.summary();
        let guard = match self.store.try_stage(self.history.actor(), &summary, now, self.lease_secs)? {
            StageAttempt::Acquired(_) => {
                LockGuard::new(self.store.clone(), self.clock.clone(), plan.id.clone(), self.lease_secs)
            }
            StageAttempt::Held(lock) => {
                let reason = if lock.is_stale(now) {
                    ThawError::LockCorruption {
                        holder: lock.holder().to_string(),
                        since: lock.acquired_at_unix.unwrap_or_default(),
                    }
                } else {
                    ThawError::LockHeld { holder: lock.holder().to_string(), summary: lock.plan_summary.clone() }
                };
                let detail = match &lock.plan_summary {
                    Some(s) => format!("Restore rejected: {} [{}]", reason, s),
                    None => format!("Restore rejected: {}", reason),
                };
                self.history.error(&detail)?;
                return Ok(Admission::Done(CampaignOutcome::Rejected { reason, plan: Some(plan.clone()) }));
            }
        };
        info!(campaign = %plan.id, units = plan.total_units, "restore lock staged");

        let cost = PlanCost { shards: plan.total_shards, size_bytes: plan.total_size_bytes };
        let gated = match self.cluster.cluster_state() {
            Ok(state) => evaluate_gates(&state, cost, &self.limits).map(|checks| (state, checks)),
            // lock is staged from here on: reject and record, never abort
            Err(e) => Err(ThawError::GateFailure {
                gate: GateName::ClusterHealth,
                detail: format!("cluster state unavailable: {}", e),
            }),
        };
        let (state, checks) = match gated {
            Ok(gated) => gated,
            Err(reason) => {
                self.history.error(&format!("Restore rejected for {}: {}", plan.id, reason))?;
                guard.release()?;
                return Ok(Admission::Done(CampaignOutcome::Rejected { reason, plan: Some(plan.clone()) }));
            }
        };

        if dry_run {
            self.history.info(&format!("Dry run for {}: all gates pass [{}]", plan.id, summary))?;
            guard.release()?;
            return Ok(Admission::Done(CampaignOutcome::DryRun { plan: plan.clone(), cluster: state, checks }));
        }

        guard.transition(LockState::Staged, LockState::Confirmed)?;
        let prompt = format!("{}\nProceed with restore?", format_plan(plan, Some(&state), &checks));
        let decision = match self.confirmer.confirm(&prompt, self.confirm_timeout, &self.cancel) {
            // Ctrl-C raced the answer
            Decision::Accepted if self.cancel.load(Ordering::SeqCst) => Decision::Declined,
            decision => decision,
        };
        match decision {
            Decision::Accepted => {
                guard.transition(LockState::Confirmed, LockState::Executing)?;
                self.history.info(&format!("Restore confirmed for {} [{}]", plan.id, summary))?;
                Ok(Admission::Admitted(Admitted { guard, cluster: state, checks }))
            }
            Decision::Declined => {
                if self.cancel.load(Ordering::SeqCst) {
                    self.history.info(&format!("{} (interrupted)", CANCELLED_MESSAGE))?;
                } else {
                    self.history.info(CANCELLED_MESSAGE)?;
                }
                guard.release()?;
                Ok(Admission::Done(CampaignOutcome::Declined { plan: plan.clone() }))
            }
            Decision::TimedOut => {
                self.history.info(&format!(
                    "{} (no answer within {}s)",
                    CANCELLED_MESSAGE,
                    self.confirm_timeout.as_secs()
                ))?;
                guard.release()?;
                Ok(Admission::Done(CampaignOutcome::TimedOut { plan: plan.clone() }))
            }
        }
    }
}
