//! The cluster-level control loop (§4.1): approves claimed repair tasks per policy,
//! enforces execution timeouts, prunes orphans, and publishes health summaries.
//!
//! `Coordinator` holds no durable state of its own — every decision is derived fresh each
//! tick from the repair registry and node directory, so a coordinator restart is
//! indistinguishable from a normal tick. The one piece of process-local state, the
//! consecutive-stalled-tick counter used for starvation diagnostics, only ever affects a
//! warning, never correctness (§4.1.1).

pub mod approval;
pub mod health;
pub mod timeout;

use crate::config::CoordinatorConfig;
use crate::error::Result;
use crate::platform::{Clock, HealthBus, NodeDirectory, RepairRegistry};
use crate::store::ResultStore;
use crate::types::{Node, NodeMembership, RepairTaskState, EXECUTOR, TASK_ID_PREFIX};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::watch;
use tracing::{info, info_span, Instrument};

/// The cluster-level control loop.
pub struct Coordinator {
    node_directory: Arc<dyn NodeDirectory>,
    repair_registry: Arc<dyn RepairRegistry>,
    health_bus: Arc<dyn HealthBus>,
    results: Arc<ResultStore>,
    clock: Arc<dyn Clock>,
    config: CoordinatorConfig,
    stalled_ticks: AtomicU32,
    tick_count: AtomicU32,
    /// Wall-clock time of the last promotion to `Preparing`, used to enforce
    /// `min_wait_time_between_nodes` (§6 `MinWaitTimeBetweenNodes`). Process-local like
    /// `stalled_ticks`: losing it across a restart only delays one promotion by at most
    /// the configured wait, never a correctness violation.
    last_promotion: Mutex<Option<SystemTime>>,
    /// Update domain the `UpgradeDomainWise` policy fanned out into on the previous tick,
    /// used only to log drift (§9 open question). Losing it across a restart just skips
    /// one drift warning, never a correctness violation.
    last_ud: Mutex<Option<String>>,
}

impl Coordinator {
    /// Construct a coordinator over the given platform handles.
    pub fn new(
        node_directory: Arc<dyn NodeDirectory>,
        repair_registry: Arc<dyn RepairRegistry>,
        health_bus: Arc<dyn HealthBus>,
        results: Arc<ResultStore>,
        clock: Arc<dyn Clock>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            node_directory,
            repair_registry,
            health_bus,
            results,
            clock,
            config,
            stalled_ticks: AtomicU32::new(0),
            tick_count: AtomicU32::new(0),
            last_promotion: Mutex::new(None),
            last_ud: Mutex::new(None),
        }
    }

    /// Run the control loop until `shutdown` reports `true`, ticking at
    /// `config.polling_frequency`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut interval = tokio::time::interval(self.config.polling_frequency);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.tick().await {
                        tracing::error!(error = %err, "coordinator tick failed; retrying next interval");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("coordinator shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Run exactly one control-loop tick (§4.1, steps 1-6). Exposed directly so tests can
    /// drive the coordinator deterministically without real timers.
    pub async fn tick(&self) -> Result<()> {
        let tick_no = self.tick_count.fetch_add(1, Ordering::SeqCst);
        let span = info_span!("coordinator_tick", tick = tick_no);
        self.run_tick().instrument(span).await
    }

    async fn run_tick(&self) -> Result<()> {
        // Step 1: platform readiness check.
        let available = self.repair_registry.is_available().await.unwrap_or(false);
        health::publish_platform_readiness(self.health_bus.as_ref(), self.clock.as_ref(), available)
            .await?;
        if !available {
            tracing::warn!("repair registry unavailable; skipping remainder of tick");
            return Ok(());
        }

        let all_tasks = self.repair_registry.list_by_prefix(TASK_ID_PREFIX).await?;
        let our_tasks: Vec<_> = all_tasks.into_iter().filter(|t| t.executor == EXECUTOR).collect();

        // Step 2: diagnostic dump.
        for task in &our_tasks {
            info!(
                task_id = %task.task_id,
                node = %task.target,
                state = %task.state,
                "repair task"
            );
        }

        let nodes = self.node_directory.list_nodes().await?;
        let nodes_by_name: HashMap<String, Node> =
            nodes.iter().map(|n| (n.name.clone(), n.clone())).collect();
        let node_ud: HashMap<String, String> =
            nodes.iter().map(|n| (n.name.clone(), n.update_domain.clone())).collect();

        // Step 3: approval pass.
        let (eligible, rejected) =
            approval::select_claimed(&our_tasks, &nodes_by_name, self.config.install_on_up_nodes_only);
        approval::cancel_orphans(self.repair_registry.as_ref(), &rejected).await?;
        if self.config.task_approval_policy == crate::config::TaskApprovalPolicy::UpgradeDomainWise {
            let mut last_ud = self.last_ud.lock();
            let observed = approval::note_upgrade_domain_drift(
                &our_tasks,
                &eligible,
                &node_ud,
                last_ud.as_deref(),
            );
            if observed.is_some() {
                *last_ud = observed;
            }
        }
        let since_last_promotion = {
            let last = *self.last_promotion.lock();
            last.map(|at| self.clock.now().duration_since(at).unwrap_or_default())
        };
        let within_min_wait = since_last_promotion
            .map(|elapsed| elapsed < self.config.min_wait_time_between_nodes)
            .unwrap_or(false);
        if within_min_wait {
            info!("skipping promotion pass; still within min_wait_time_between_nodes");
        } else {
            let to_promote =
                approval::tasks_to_promote(self.config.task_approval_policy, &our_tasks, &eligible, &node_ud);
            let promote_ids: Vec<String> = to_promote.iter().map(|t| t.task_id.clone()).collect();
            for task_id in &promote_ids {
                approval::promote_to_preparing(self.repair_registry.as_ref(), task_id).await?;
            }
            if !promote_ids.is_empty() {
                *self.last_promotion.lock() = Some(self.clock.now());
            }
        }

        // Step 4: timeout pass.
        if self.config.manage_repair_tasks_on_timeout {
            let warnings = timeout::run(
                self.repair_registry.as_ref(),
                self.clock.now(),
                self.config.grace_time_for_nt_service,
                &our_tasks,
            )
            .await?;
            for warning in warnings {
                self.health_bus
                    .publish(crate::platform::HealthFact {
                        service: health::COORDINATOR_SERVICE.to_string(),
                        property: format!("SlowProgress-{}", warning.node),
                        description: warning.description,
                        state: crate::platform::HealthState::Warning,
                        ttl: std::time::Duration::from_secs(15 * 60),
                        published_at: self.clock.now(),
                    })
                    .await?;
            }
        }

        // Step 5: result-store trim. `ResultStore::append` enforces the FIFO bound on every
        // insert, so there is nothing left to trim here; this phase exists to mirror the
        // source's explicit per-tick trim step (§4.1, §4.4) even though our store is
        // already self-bounding.

        // Step 6: patching-status publication.
        health::publish_rm_task_update(self.health_bus.as_ref(), self.clock.as_ref(), &our_tasks).await?;
        let node_names: Vec<String> = nodes.iter().map(|n| n.name.clone()).collect();
        health::publish_per_node_status(
            self.health_bus.as_ref(),
            self.clock.as_ref(),
            &node_names,
            &our_tasks,
        )
        .await?;

        // Starvation/back-pressure diagnostics.
        let claimed_exists = our_tasks.iter().any(|t| matches!(t.state, RepairTaskState::Claimed));
        let processing_exists = our_tasks.iter().any(|t| t.is_disrupting());
        let stalled = if claimed_exists && !processing_exists {
            self.stalled_ticks.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            self.stalled_ticks.store(0, Ordering::SeqCst);
            0
        };
        if health::is_starved(claimed_exists, processing_exists, stalled, self.config.starvation_warning_ticks) {
            let cluster_healthy = !nodes.is_empty() && nodes.iter().all(|n| n.membership == NodeMembership::Up);
            health::publish_starvation_warning(self.health_bus.as_ref(), self.clock.as_ref(), cluster_healthy)
                .await?;
        }

        Ok(())
    }

    /// The result store this coordinator's RPC service shares with the control loop.
    pub fn results(&self) -> &Arc<ResultStore> {
        &self.results
    }
}
