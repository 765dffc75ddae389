use thiserror::Error;

use crate::{GateName, PlanSummary};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ThawError {
    #[error("no snapshots match pattern '{pattern}' near {date}")]
    NoMatch { pattern: String, date: String },

    #[error("another restore job is running (held by {holder})")]
    LockHeld { holder: String, summary: Option<PlanSummary> },

    #[error("restore lock held by {holder} since {since} is stale; run `thaw clear-staged` after confirming the holder is gone")]
    LockCorruption { holder: String, since: i64 },

    #[error("{gate:?} gate failed: {detail}")]
    GateFailure { gate: GateName, detail: String },

    #[error("invalid date '{0}', expected YYYY.MM.DD")]
    InvalidDate(String),

    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}
