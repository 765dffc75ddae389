use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Restored,
    Failed,
    Skipped,
}

impl TaskStatus {
    /// Terminal statuses are never revisited by the executor.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Restored | TaskStatus::Failed | TaskStatus::Skipped)
    }
}

/// State of the single restore lock row.
///
/// `Confirmed` means all admission gates passed and the campaign is waiting
/// on the operator's yes/no.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LockState {
    Free,
    Staged,
    Confirmed,
    Executing,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum HealthState {
    Green,
    Yellow,
    Red,
}

impl HealthState {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "green" => Some(HealthState::Green),
            "yellow" => Some(HealthState::Yellow),
            "red" => Some(HealthState::Red),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum HistoryLevel {
    Info,
    Error,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum GateName {
    ClusterHealth,
    ShardHeadroom,
    StorageHeadroom,
}

/// How the planner picks between two candidates at the same day distance.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    #[default]
    MostRecent,
    Oldest,
}
