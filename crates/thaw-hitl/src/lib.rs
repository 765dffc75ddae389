use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use thaw_core::{format_bytes, ClusterState, GateCheck, RestorePlan, TaskStatus, DATE_FORMAT};

/// The exact message recorded when a staged campaign is not confirmed.
pub const CANCELLED_MESSAGE: &str = "User cancelled restore operations!";

/// How often a waiting prompt looks at the cancel flag.
const CANCEL_POLL: Duration = Duration::from_millis(200);

/// One-line view of the live cluster as the gates saw it.
pub fn format_cluster_line(state: &ClusterState) -> String {
    let avg = if state.data_nodes == 0 { 0.0 } else { state.current_shards as f64 / f64::from(state.data_nodes) };
    format!(
        "Cluster: {:?}, {} data nodes, {:.2} avg shards/node, {} available of {}",
        state.health,
        state.data_nodes,
        avg,
        format_bytes(state.available_bytes),
        format_bytes(state.total_bytes)
    )
}

/// Plan packet shown before the yes/no question (markdown).
pub fn format_plan(plan: &RestorePlan, cluster: Option<&ClusterState>, checks: &[GateCheck]) -> String {
    let mut s = String::new();
    s.push_str(&format!(
        "# RESTORE PLAN: '{}' near {}\n\n",
        plan.pattern,
        plan.reference_date.format(DATE_FORMAT)
    ));
    s.push_str(&format!("**Requested by:** {}\n\n", plan.requested_by));
    if let Some(state) = cluster {
        s.push_str(&format_cluster_line(state));
        s.push_str("\n\n");
    }

    s.push_str("## Units to restore\n");
    for (i, t) in plan.actionable().enumerate() {
        s.push_str(&format!(
            "- [{}] {} ({}, {} shards, {} days off)\n",
            i + 1,
            t.target_unit,
            format_bytes(t.size_bytes),
            t.shard_count,
            t.distance_days
        ));
    }
    let skipped: Vec<_> = plan.tasks.iter().filter(|t| t.status == TaskStatus::Skipped).collect();
    if !skipped.is_empty() {
        s.push_str("\n## Already restored (skipped)\n");
        for t in skipped {
            s.push_str(&format!("- {}\n", t.target_unit));
        }
    }

    if !checks.is_empty() {
        s.push_str("\n## Admission checks\n");
        for c in checks {
            s.push_str(&format!("- {:?}: {}\n", c.gate, c.detail));
        }
    }

    s.push_str(&format!(
        "\n**Total:** {} units / {} shards / {}\n",
        plan.total_units,
        plan.total_shards,
        format_bytes(plan.total_size_bytes)
    ));
    s
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Accepted,
    Declined,
    TimedOut,
}

/// `y`/`yes` accepts, `n`/`no`/empty declines; anything else is not an answer.
pub fn parse_answer(line: &str) -> Option<bool> {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "" | "n" | "no" => Some(false),
        _ => None,
    }
}

/// Asks an operator a yes/no question with a hard deadline.
///
/// A raised `cancel` flag (Ctrl-C) ends the wait with `Declined`.
pub trait Confirmer: Send + Sync {
    fn confirm(&self, prompt: &str, timeout: Duration, cancel: &AtomicBool) -> Decision;
}

/// Wait for one answer on `rx` until `timeout`, in short slices so a raised
/// `cancel` flag is noticed while the operator has not typed anything.
pub fn await_answer(rx: &Receiver<Option<bool>>, timeout: Duration, cancel: &AtomicBool) -> Decision {
    let deadline = Instant::now() + timeout;
    loop {
        if cancel.load(Ordering::SeqCst) {
            tracing::warn!("confirmation interrupted");
            return Decision::Declined;
        }
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            tracing::warn!(timeout_secs = timeout.as_secs(), "confirmation timed out");
            return Decision::TimedOut;
        }
        match rx.recv_timeout(left.min(CANCEL_POLL)) {
            Ok(Some(true)) => return Decision::Accepted,
            Ok(Some(false)) | Ok(None) => return Decision::Declined,
            Err(RecvTimeoutError::Timeout) => continue,
            // reader thread is gone; nobody can answer any more
            Err(RecvTimeoutError::Disconnected) => return Decision::Declined,
        }
    }
}

/// Terminal confirmer. Reads one line from stdin on a helper thread so the
/// deadline holds even if nobody types anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdinConfirmer;

impl Confirmer for StdinConfirmer {
    fn confirm(&self, prompt: &str, timeout: Duration, cancel: &AtomicBool) -> Decision {
        print!("{} [y/N] ({}s) ", prompt, timeout.as_secs());
        let _ = std::io::stdout().flush();

        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let mut line = String::new();
            let read = std::io::stdin().read_line(&mut line);
            // EOF or a read error counts as "no".
            let answer = match read {
                Ok(0) | Err(_) => Some(false),
                Ok(_) => parse_answer(&line),
            };
            let _ = tx.send(answer);
        });

        let decision = await_answer(&rx, timeout, cancel);
        if decision == Decision::TimedOut || cancel.load(Ordering::SeqCst) {
            println!();
        }
        decision
    }
}

/// Replays canned decisions in order, then declines. Prompts are kept for assertions.
#[derive(Default)]
pub struct ScriptedConfirmer {
    inner: Mutex<(VecDeque<Decision>, Vec<String>)>,
}

impl ScriptedConfirmer {
    pub fn new(decisions: impl IntoIterator<Item = Decision>) -> Self {
        Self { inner: Mutex::new((decisions.into_iter().collect(), vec![])) }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.inner.lock().unwrap().1.clone()
    }
}

impl Confirmer for ScriptedConfirmer {
    fn confirm(&self, prompt: &str, _timeout: Duration, _cancel: &AtomicBool) -> Decision {
        let mut inner = self.inner.lock().unwrap();
        inner.1.push(prompt.to_string());
        inner.0.pop_front().unwrap_or(Decision::Declined)
    }
}
