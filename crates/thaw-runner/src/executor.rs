use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use thaw_cluster::{ClusterClient, ClusterError, RestoreHandle};
use thaw_core::{CampaignSummary, Clock, LockState, RestorePlan, RetryPolicy, TaskOutcome, TaskStatus};
use thaw_storage::Storage;
use tracing::{info, warn};

use crate::admission::LockGuard;
use crate::history::HistoryLog;

/// Runs the non-skipped tasks of a confirmed plan in bounded batches.
pub struct BatchExecutor {
    pub store: Arc<dyn Storage>,
    pub cluster: Arc<dyn ClusterClient>,
    pub clock: Arc<dyn Clock>,
    pub history: HistoryLog,
    pub policy: RetryPolicy,
    pub batch_size: usize,
    pub restore_timeout: Duration,
    pub cancel: Arc<AtomicBool>,
}

/// Where a task stands after its trigger call.
enum InFlight {
    Accepted(RestoreHandle),
    NotAccepted(ClusterError),
}

impl BatchExecutor {
    pub fn execute(&self, plan: &mut RestorePlan, guard: &LockGuard) -> Result<CampaignSummary> {
        let started = self.clock.now_unix();
        let mut summary = CampaignSummary { plan_id: Some(plan.id.clone()), ..Default::default() };
        summary.skipped = plan.count_status(TaskStatus::Skipped);

        let todo: Vec<usize> = plan
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.status.is_terminal())
            .map(|(i, _)| i)
            .collect();
        let batches: Vec<&[usize]> = todo.chunks(self.batch_size.max(1)).collect();

        for (n, batch) in batches.iter().enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                summary.cancelled = true;
                summary.pending = batches[n..].iter().map(|b| b.len() as u32).sum();
                self.history.info(&format!(
                    "Restore {} cancelled before batch {}/{}; {} task(s) left pending",
                    plan.id,
                    n + 1,
                    batches.len(),
                    summary.pending
                ))?;
                break;
            }
            guard.heartbeat(LockState::Executing)?;
            info!(campaign = %plan.id, batch = n + 1, of = batches.len(), tasks = batch.len(), "starting batch");
            self.run_batch(plan, batch, &mut summary)?;
        }

        summary.elapsed_secs = self.clock.now_unix() - started;
        let line = format!("Restore {} finished: {}", plan.id, summary);
        if summary.failed > 0 {
            self.history.error(&line)?;
        } else {
            self.history.info(&line)?;
        }
        Ok(summary)
    }

    fn run_batch(&self, plan: &mut RestorePlan, batch: &[usize], summary: &mut CampaignSummary) -> Result<()> {
        // Everything in the batch goes in flight before the first wait.
        let mut in_flight = Vec::with_capacity(batch.len());
        for &i in batch {
            self.set_status(plan, i, TaskStatus::InProgress, 1, None)?;
            in_flight.push((i, self.trigger(plan, i)));
        }

        for (i, first) in in_flight {
            let outcome = self.drive(plan, i, first)?;
            match &outcome {
                TaskOutcome::Restored { attempts } => {
                    self.set_status(plan, i, TaskStatus::Restored, *attempts, None)?;
                    let task = &plan.tasks[i];
                    if !self.store.mark_restored(&task.snapshot_id)? {
                        warn!(snapshot = %task.snapshot_id, "catalog record was already marked restored");
                    }
                    self.history.info(&format!(
                        "Restored {} from {} (attempt {})",
                        task.target_unit, task.snapshot_id, attempts
                    ))?;
                }
                TaskOutcome::Failed { attempts, error } => {
                    self.set_status(plan, i, TaskStatus::Failed, *attempts, Some(error.as_str()))?;
                    let task = &plan.tasks[i];
                    self.history.error(&format!(
                        "Restore of {} from {} failed after {} attempt(s): {}",
                        task.target_unit, task.snapshot_id, attempts, error
                    ))?;
                }
                TaskOutcome::Skipped => {}
            }
            summary.record(&outcome);
        }
        Ok(())
    }

    fn trigger(&self, plan: &RestorePlan, i: usize) -> InFlight {
        let task = &plan.tasks[i];
        match self.cluster.trigger_restore(&plan.repository, &task.snapshot_id, &task.target_unit) {
            Ok(h) => InFlight::Accepted(h),
            Err(e) => InFlight::NotAccepted(e),
        }
    }

    /// Wait for one task, retrying transient failures per the policy. A trigger the
    /// cluster never accepted is re-issued; an accepted one is only awaited again.
    fn drive(&self, plan: &mut RestorePlan, i: usize, first: InFlight) -> Result<TaskOutcome> {
        let mut attempts = 1u32;
        let mut state = first;
        loop {
            let result = match &state {
                InFlight::Accepted(h) => self.cluster.await_restore(h, self.restore_timeout),
                InFlight::NotAccepted(e) => Err(e.clone()),
            };
            let err = match result {
                Ok(()) => return Ok(TaskOutcome::Restored { attempts }),
                Err(e) => e,
            };
            if !err.is_transient() {
                return Ok(TaskOutcome::Failed { attempts, error: err.to_string() });
            }
            let Some(delay) = self.policy.next_delay(attempts) else {
                return Ok(TaskOutcome::Failed { attempts, error: err.to_string() });
            };

            warn!(
                unit = %plan.tasks[i].target_unit,
                attempt = attempts,
                delay_secs = delay.as_secs(),
                error = %err,
                "transient restore failure, retrying"
            );
            self.clock.sleep(delay);
            attempts += 1;
            let last = err.to_string();
            self.set_status(plan, i, TaskStatus::InProgress, attempts, Some(&last))?;
            if let InFlight::NotAccepted(_) = state {
                state = self.trigger(plan, i);
            }
        }
    }

    fn set_status(
        &self,
        plan: &mut RestorePlan,
        i: usize,
        status: TaskStatus,
        attempts: u32,
        last_error: Option<&str>,
    ) -> Result<()> {
        let task = &mut plan.tasks[i];
        task.status = status;
        task.attempts = attempts;
        task.last_error = last_error.map(str::to_string);
        self.store.set_task_status(&plan.id, &task.snapshot_id, status, attempts, last_error)
    }
}
