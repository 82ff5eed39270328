//! Timeout pass: reclaim tasks stuck in `Approved | Executing` past their install budget
//! plus grace period, so a wedged install never blocks the next node's approval.

use crate::error::Result;
use crate::platform::RepairRegistry;
use crate::types::{ExecutorSubState, RepairTask, RepairTaskState, ResultStatus};
use std::time::Duration;
use tracing::{info, warn};

/// What the timeout pass should do about one over-budget task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Not over budget; leave it alone.
    WithinBudget,
    /// Over budget but late in the post-install sequence: warn, don't cancel. Cancelling a
    /// task that has already restarted (or is about to) would orphan the reboot in flight.
    SlowProgress,
    /// Over budget and still mid-install (or earlier): cancel so the next node can proceed.
    Cancel,
}

/// Pure decision function for one task (§4.1 "Timeout pass", §8 property 8).
pub fn decide(elapsed: Duration, budget: Duration, sub_state: ExecutorSubState) -> Decision {
    if elapsed <= budget {
        return Decision::WithinBudget;
    }
    match sub_state {
        ExecutorSubState::RestartRequested
        | ExecutorSubState::RestartCompleted
        | ExecutorSubState::InstallationCompleted => Decision::SlowProgress,
        _ => Decision::Cancel,
    }
}

/// A slow-progress warning worth surfacing as a health fact.
pub struct SlowProgressWarning {
    /// Node whose task is taking longer than its budget to finish post-install work.
    pub node: String,
    /// Human-readable detail for the health fact.
    pub description: String,
}

/// Run the timeout pass over every task currently in `Approved | Executing` (§4.1).
///
/// Returns the slow-progress warnings to surface as health facts; cancellations are
/// applied directly to the registry.
pub async fn run(
    registry: &dyn RepairRegistry,
    now: std::time::SystemTime,
    grace: Duration,
    tasks: &[RepairTask],
) -> Result<Vec<SlowProgressWarning>> {
    let mut warnings = Vec::new();
    for task in tasks {
        if !matches!(task.state, RepairTaskState::Approved | RepairTaskState::Executing) {
            continue;
        }
        let Some(approved_at) = task.approved_timestamp else {
            continue;
        };
        let data = task.executor_data()?;
        let elapsed = now.duration_since(approved_at).unwrap_or_default();
        let budget = Duration::from_secs(data.executor_timeout_in_minutes as u64 * 60) + grace;
        match decide(elapsed, budget, data.sub_state) {
            Decision::WithinBudget => {}
            Decision::SlowProgress => {
                warn!(
                    task_id = %task.task_id,
                    node = %task.target,
                    elapsed_secs = elapsed.as_secs(),
                    budget_secs = budget.as_secs(),
                    sub_state = ?data.sub_state,
                    "task past timeout budget but in late post-install phase; not cancelling"
                );
                warnings.push(SlowProgressWarning {
                    node: task.target.clone(),
                    description: format!(
                        "node {} is past its install budget ({}s elapsed, {}s budget) but in \
                         sub-state {:?}; waiting for reboot/finalization rather than cancelling",
                        task.target,
                        elapsed.as_secs(),
                        budget.as_secs(),
                        data.sub_state
                    ),
                });
            }
            Decision::Cancel => {
                info!(
                    task_id = %task.task_id,
                    node = %task.target,
                    elapsed_secs = elapsed.as_secs(),
                    budget_secs = budget.as_secs(),
                    "cancelling task that exceeded its install timeout budget"
                );
                let mut next = task.clone();
                next.state = RepairTaskState::Restoring;
                next.result_status = ResultStatus::Cancelled;
                registry.update(next).await?;
            }
        }
    }
    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_budget_is_left_alone() {
        let decision = decide(
            Duration::from_secs(10),
            Duration::from_secs(60),
            ExecutorSubState::InstallationInProgress,
        );
        assert_eq!(decision, Decision::WithinBudget);
    }

    #[test]
    fn over_budget_mid_install_is_cancelled() {
        let decision = decide(
            Duration::from_secs(120),
            Duration::from_secs(60),
            ExecutorSubState::InstallationInProgress,
        );
        assert_eq!(decision, Decision::Cancel);
    }

    #[test]
    fn over_budget_post_install_warns_instead_of_cancelling() {
        for sub_state in [
            ExecutorSubState::RestartRequested,
            ExecutorSubState::RestartCompleted,
            ExecutorSubState::InstallationCompleted,
        ] {
            let decision = decide(Duration::from_secs(120), Duration::from_secs(60), sub_state);
            assert_eq!(decision, Decision::SlowProgress, "sub_state={sub_state:?}");
        }
    }
}
