use serde::{Deserialize, Serialize};

use crate::{format_bytes, GateName, HealthState, ThawError};

/// Live cluster signals the admission gates are evaluated against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterState {
    pub health: HealthState,
    pub data_nodes: u32,
    pub current_shards: u64,
    pub available_bytes: u64,
    pub total_bytes: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionLimits {
    pub max_shards_per_node: u64,
    /// Share of total capacity that must stay free after the restore.
    pub storage_safety_margin_pct: u8,
}

impl Default for AdmissionLimits {
    fn default() -> Self {
        Self { max_shards_per_node: 1000, storage_safety_margin_pct: 20 }
    }
}

/// Aggregate cost of the work being admitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlanCost {
    pub shards: u64,
    pub size_bytes: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GateCheck {
    pub gate: GateName,
    pub detail: String,
}

pub fn check_health(state: &ClusterState) -> Result<GateCheck, ThawError> {
    match state.health {
        HealthState::Green => Ok(GateCheck { gate: GateName::ClusterHealth, detail: "cluster is green".into() }),
        other => Err(ThawError::GateFailure {
            gate: GateName::ClusterHealth,
            detail: format!("cluster is {:?}, restores need Green; retry once it recovers", other),
        }),
    }
}

pub fn check_shards(state: &ClusterState, cost: PlanCost, limits: &AdmissionLimits) -> Result<GateCheck, ThawError> {
    let ceiling = limits.max_shards_per_node.saturating_mul(u64::from(state.data_nodes));
    let after = state.current_shards.saturating_add(cost.shards);
    let detail = format!(
        "{} current + {} planned = {} shards, ceiling {} ({} per node x {} data nodes)",
        state.current_shards, cost.shards, after, ceiling, limits.max_shards_per_node, state.data_nodes
    );
    if after <= ceiling {
        Ok(GateCheck { gate: GateName::ShardHeadroom, detail })
    } else {
        Err(ThawError::GateFailure {
            gate: GateName::ShardHeadroom,
            detail: format!("{}; over by {}", detail, after - ceiling),
        })
    }
}

pub fn storage_margin_bytes(state: &ClusterState, limits: &AdmissionLimits) -> u64 {
    ((u128::from(state.total_bytes) * u128::from(limits.storage_safety_margin_pct)) / 100) as u64
}

pub fn check_storage(state: &ClusterState, cost: PlanCost, limits: &AdmissionLimits) -> Result<GateCheck, ThawError> {
    let margin = storage_margin_bytes(state, limits);
    let headroom = i128::from(state.available_bytes) - i128::from(cost.size_bytes) - i128::from(margin);
    if headroom >= 0 {
        Ok(GateCheck {
            gate: GateName::StorageHeadroom,
            detail: format!(
                "{} available, {} planned, {} reserved; {} left",
                format_bytes(state.available_bytes),
                format_bytes(cost.size_bytes),
                format_bytes(margin),
                format_bytes(headroom as u64)
            ),
        })
    } else {
        Err(ThawError::GateFailure {
            gate: GateName::StorageHeadroom,
            detail: format!(
                "{} available, {} planned, {} reserved ({}% of {}); short by {}",
                format_bytes(state.available_bytes),
                format_bytes(cost.size_bytes),
                format_bytes(margin),
                limits.storage_safety_margin_pct,
                format_bytes(state.total_bytes),
                format_bytes(headroom.unsigned_abs() as u64)
            ),
        })
    }
}

/// Run the three admission gates in their fixed order, stopping at the first failure.
pub fn evaluate_gates(state: &ClusterState, cost: PlanCost, limits: &AdmissionLimits) -> Result<Vec<GateCheck>, ThawError> {
    Ok(vec![check_health(state)?, check_shards(state, cost, limits)?, check_storage(state, cost, limits)?])
}
