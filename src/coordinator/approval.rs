//! Claimed-task selection and the two approval policies (§4.1 "Approval pass").

use crate::config::TaskApprovalPolicy;
use crate::error::Result;
use crate::platform::{NodeDirectory, RepairRegistry};
use crate::types::{Impact, Node, NodeMembership, RepairTask, RepairTaskState};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// A claimed task rejected during selection, and why.
pub enum Rejection {
    /// Target node no longer exists, or the task targets more than one node: cancel it.
    Orphan,
    /// `InstallOnUpNodesOnly` is set and the node is not `Up`: skip for this tick only.
    NodeNotUp,
}

/// Partition claimed tasks owned by this executor into eligible and rejected sets
/// (§4.1 "Claimed-task selection").
pub fn select_claimed(
    tasks: &[RepairTask],
    nodes: &HashMap<String, Node>,
    install_on_up_nodes_only: bool,
) -> (Vec<RepairTask>, Vec<(RepairTask, Rejection)>) {
    let mut eligible = Vec::new();
    let mut rejected = Vec::new();
    for task in tasks {
        if !matches!(task.state, RepairTaskState::Claimed) {
            continue;
        }
        match nodes.get(&task.target) {
            None => rejected.push((task.clone(), Rejection::Orphan)),
            Some(node) => {
                if install_on_up_nodes_only && node.membership != NodeMembership::Up {
                    rejected.push((task.clone(), Rejection::NodeNotUp));
                } else {
                    eligible.push(task.clone());
                }
            }
        }
    }
    (eligible, rejected)
}

/// Cancel every orphaned claimed task.
pub async fn cancel_orphans(
    registry: &dyn RepairRegistry,
    rejected: &[(RepairTask, Rejection)],
) -> Result<()> {
    for (task, reason) in rejected {
        if matches!(reason, Rejection::Orphan) {
            warn!(task_id = %task.task_id, node = %task.target, "cancelling orphaned claimed task");
            registry.cancel(&task.task_id).await?;
        }
    }
    Ok(())
}

/// Whether any task already occupies a disruption slot (`Preparing | Approved | Executing
/// | Restoring`).
fn disrupting_task(tasks: &[RepairTask]) -> Option<&RepairTask> {
    tasks.iter().find(|t| t.is_disrupting())
}

/// The update domain `UpgradeDomainWise` is currently fanning out into: the UD of whatever
/// task already occupies the disruption slot, or else the UD of the oldest eligible claimed
/// task if none does yet. First-observed-wins with no global ordering guarantee across a
/// topology change mid-tick (§9 open question); the caller is responsible for noticing when
/// this drifts from the previous tick's answer.
fn current_upgrade_domain<'a>(
    all_tasks: &'a [RepairTask],
    eligible_claimed: &'a [RepairTask],
    node_ud: &'a HashMap<String, String>,
) -> Option<&'a str> {
    disrupting_task(all_tasks)
        .and_then(|t| node_ud.get(&t.target))
        .or_else(|| {
            eligible_claimed
                .iter()
                .min_by_key(|t| t.created_at)
                .and_then(|t| node_ud.get(&t.target))
        })
        .map(String::as_str)
}

/// Select which claimed tasks to promote to `Preparing` this tick, per the configured
/// policy (§4.1 "Approval pass"). Does not perform the promotion itself.
pub fn tasks_to_promote<'a>(
    policy: TaskApprovalPolicy,
    all_tasks: &'a [RepairTask],
    eligible_claimed: &'a [RepairTask],
    node_ud: &HashMap<String, String>,
) -> Vec<&'a RepairTask> {
    match policy {
        TaskApprovalPolicy::NodeWise => {
            if disrupting_task(all_tasks).is_some() {
                return Vec::new();
            }
            match eligible_claimed.iter().min_by_key(|t| t.created_at) {
                Some(oldest) => vec![oldest],
                None => Vec::new(),
            }
        }
        TaskApprovalPolicy::UpgradeDomainWise => match current_upgrade_domain(all_tasks, eligible_claimed, node_ud) {
            None => Vec::new(),
            Some(ud) => eligible_claimed
                .iter()
                .filter(|t| node_ud.get(&t.target).map(String::as_str) == Some(ud))
                .collect(),
        },
    }
}

/// Track the active update domain across ticks and warn when it drifts without having first
/// drained (topology changed mid-fan-out). Returns the UD observed this tick, if any, so the
/// caller can store it for the next call.
pub fn note_upgrade_domain_drift(
    all_tasks: &[RepairTask],
    eligible_claimed: &[RepairTask],
    node_ud: &HashMap<String, String>,
    last_ud: Option<&str>,
) -> Option<String> {
    let current = current_upgrade_domain(all_tasks, eligible_claimed, node_ud);
    if let (Some(last), Some(current)) = (last_ud, current) {
        if last != current {
            warn!(from = last, to = current, "upgrade domain changed mid-fan-out; proceeding with first-observed UD");
        }
    }
    current.map(str::to_string)
}

/// Promote a task to `Preparing`, per the three-step atomic sequence in §4.1: refresh the
/// version, set the disruption fields, write back.
pub async fn promote_to_preparing(registry: &dyn RepairRegistry, task_id: &str) -> Result<()> {
    let current = registry
        .get(task_id)
        .await?
        .ok_or_else(|| crate::error::CoordError::InvalidArgument(format!("no such task {task_id}")))?;
    let mut next = current;
    next.impact = Some(Impact::Restart(next.target.clone()));
    next.perform_preparing_health_check = true;
    next.state = RepairTaskState::Preparing;
    info!(task_id = %next.task_id, node = %next.target, "promoting claimed task to Preparing");
    registry.update(next).await?;
    Ok(())
}
