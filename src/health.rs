//! Health snapshot over the orchestrator's own components.
//!
//! Cheap to compute: everything here reads state the components already
//! maintain. Consumed by the API layer's health endpoint.

use serde::Serialize;

use crate::circuit::{CircuitSnapshot, CircuitState};
use crate::cost::CostUsage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: Vec<ComponentHealth>,
}

/// Roll individual component states up into one report. Worst component
/// wins.
pub fn evaluate(
    circuits: &[CircuitSnapshot],
    cost: &CostUsage,
    internal_errors: u64,
) -> HealthReport {
    let mut components = Vec::new();

    let open = circuits
        .iter()
        .filter(|c| c.state == CircuitState::Open)
        .count();
    let circuit_status = if circuits.is_empty() || open == 0 {
        HealthStatus::Healthy
    } else if open * 2 >= circuits.len() {
        HealthStatus::Unhealthy
    } else {
        HealthStatus::Degraded
    };
    components.push(ComponentHealth {
        name: "circuits".to_string(),
        status: circuit_status,
        message: format!("{open} of {} circuits open", circuits.len()),
    });

    let cost_status = if cost.exceeded.any() {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };
    components.push(ComponentHealth {
        name: "cost".to_string(),
        status: cost_status,
        message: if cost.exceeded.any() {
            "an hourly ceiling is exhausted".to_string()
        } else {
            "within ceilings".to_string()
        },
    });

    let bug_status = if internal_errors == 0 {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    };
    components.push(ComponentHealth {
        name: "internal".to_string(),
        status: bug_status,
        message: format!("{internal_errors} internal errors"),
    });

    let status = components
        .iter()
        .map(|c| c.status)
        .max_by_key(|s| match s {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 2,
        })
        .unwrap_or(HealthStatus::Healthy);

    HealthReport { status, components }
}
