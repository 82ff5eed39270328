//! Patching-status health publication and starvation diagnostics (§4.1 steps 1 and 6).

use crate::error::Result;
use crate::platform::{Clock, HealthBus, HealthFact, HealthState};
use crate::types::RepairTask;
use std::collections::HashSet;
use std::time::Duration;
use tracing::warn;

/// The service name the coordinator publishes its own health facts against.
pub const COORDINATOR_SERVICE: &str = "PatchCoordinatorService";

/// Property key for the platform-readiness fact (§4.1 step 1).
pub const PROPERTY_PLATFORM_READINESS: &str = "PlatformReadiness";
/// Property key for the claimed/processing node-set summary (§4.1 step 6).
pub const PROPERTY_RM_TASK_UPDATE: &str = "RMTaskUpdate";
/// Property key prefix for per-node operation-status facts (§4.1 step 6).
pub const PROPERTY_WU_STATUS_PREFIX: &str = "WUOperationStatusUpdate-";
/// Property key for the approval-stall warning (§4.1 "Starvation/back-pressure").
pub const PROPERTY_STARVATION: &str = "ApprovalStarvation";

/// Publish (or clear) the platform-readiness fact for this tick (§4.1 step 1).
pub async fn publish_platform_readiness(
    health_bus: &dyn HealthBus,
    clock: &dyn Clock,
    available: bool,
) -> Result<()> {
    let (state, ttl, description) = if available {
        (
            HealthState::Ok,
            Duration::from_secs(5 * 60),
            "repair registry reachable".to_string(),
        )
    } else {
        (
            HealthState::Warning,
            Duration::from_secs(30 * 60),
            "repair registry unreachable; skipping this tick".to_string(),
        )
    };
    health_bus
        .publish(HealthFact {
            service: COORDINATOR_SERVICE.to_string(),
            property: PROPERTY_PLATFORM_READINESS.to_string(),
            description,
            state,
            ttl,
            published_at: clock.now(),
        })
        .await
}

/// Publish the claimed-vs-processing node-set summary fact (§4.1 step 6, `RMTaskUpdate`).
pub async fn publish_rm_task_update(
    health_bus: &dyn HealthBus,
    clock: &dyn Clock,
    tasks: &[RepairTask],
) -> Result<()> {
    let claimed: Vec<&str> = tasks
        .iter()
        .filter(|t| matches!(t.state, crate::types::RepairTaskState::Claimed))
        .map(|t| t.target.as_str())
        .collect();
    let processing: Vec<&str> = tasks
        .iter()
        .filter(|t| t.is_disrupting())
        .map(|t| t.target.as_str())
        .collect();
    health_bus
        .publish(HealthFact {
            service: COORDINATOR_SERVICE.to_string(),
            property: PROPERTY_RM_TASK_UPDATE.to_string(),
            description: format!("claimed={claimed:?} processing={processing:?}"),
            state: HealthState::Ok,
            ttl: Duration::from_secs(5 * 60),
            published_at: clock.now(),
        })
        .await
}

/// Publish one per-node `WUOperationStatusUpdate-<node>` fact for every known node, and
/// expire orphaned per-node facts whose node no longer exists (§4.1 step 6).
pub async fn publish_per_node_status(
    health_bus: &dyn HealthBus,
    clock: &dyn Clock,
    known_nodes: &[String],
    tasks: &[RepairTask],
) -> Result<()> {
    let known: HashSet<&str> = known_nodes.iter().map(String::as_str).collect();
    for node in known_nodes {
        let status = tasks
            .iter()
            .find(|t| &t.target == node && t.is_active())
            .map(|t| t.state.to_string())
            .unwrap_or_else(|| "Idle".to_string());
        health_bus
            .publish(HealthFact {
                service: COORDINATOR_SERVICE.to_string(),
                property: format!("{PROPERTY_WU_STATUS_PREFIX}{node}"),
                description: format!("node {node}: {status}"),
                state: HealthState::Ok,
                ttl: Duration::from_secs(10 * 60),
                published_at: clock.now(),
            })
            .await?;
    }
    for fact in health_bus.list(COORDINATOR_SERVICE).await? {
        let Some(node) = fact.property.strip_prefix(PROPERTY_WU_STATUS_PREFIX) else {
            continue;
        };
        if !known.contains(node) {
            warn!(node, "expiring orphaned per-node status fact");
            health_bus.expire(COORDINATOR_SERVICE, &fact.property).await?;
        }
    }
    Ok(())
}

/// Whether the starvation counter should raise a warning this tick: claimed tasks exist
/// but nothing has been processing for `threshold_ticks` consecutive ticks.
pub fn is_starved(claimed_exists: bool, processing_exists: bool, consecutive_stalled_ticks: u32, threshold_ticks: u32) -> bool {
    claimed_exists && !processing_exists && consecutive_stalled_ticks >= threshold_ticks
}

/// Publish the starvation warning, with wording that depends on overall cluster health
/// (§4.1 "Starvation/back-pressure diagnostics").
pub async fn publish_starvation_warning(
    health_bus: &dyn HealthBus,
    clock: &dyn Clock,
    cluster_healthy: bool,
) -> Result<()> {
    let description = if cluster_healthy {
        "claimed tasks are waiting but approval has stalled even though the cluster is \
         healthy; check the approval policy and node disable path"
            .to_string()
    } else {
        "claimed tasks are waiting but approval is withheld because the cluster is unhealthy"
            .to_string()
    };
    health_bus
        .publish(HealthFact {
            service: COORDINATOR_SERVICE.to_string(),
            property: PROPERTY_STARVATION.to_string(),
            description,
            state: HealthState::Warning,
            ttl: Duration::from_secs(15 * 60),
            published_at: clock.now(),
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starvation_requires_claimed_and_no_processing_and_threshold() {
        assert!(!is_starved(false, false, 100, 60));
        assert!(!is_starved(true, true, 100, 60));
        assert!(!is_starved(true, false, 10, 60));
        assert!(is_starved(true, false, 60, 60));
    }
}
