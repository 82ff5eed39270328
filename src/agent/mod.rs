//! Per-node update agent (§4.2): the outer bootstrap sequence, the 5-minute scheduling
//! loop, and the search → download → approve → install → reboot update-cycle state
//! machine, all driven through the [`crate::rpc::AgentCoordinatorRpc`] boundary and the
//! platform traits in [`crate::platform`].
//!
//! Every piece of mutable state the agent depends on across a process restart is either
//! read back from the coordinator (`GetWuOperationState`) or from one of the files under
//! its work directory (`checkpoint`, `settings`) — nothing the agent needs to resume
//! correctly lives only in memory.

pub mod atomic_file;
pub mod checkpoint;
pub mod schedule;
pub mod settings;

use crate::config::AgentRuntimeConfig;
use crate::error::{CoordError, Result};
use crate::platform::{Clock, DeploymentDirectory, HealthState, OsPolicy, UpdateCandidate, UpdateEngine};
use crate::rpc::{AgentCoordinatorRpc, ExecutorBudget};
use crate::types::{
    CheckpointFileData, ExecutorSubState, NodeSettings, OperationOutcome, OperationResult,
    OperationType, UpdateDetail, UpdateResultCode,
};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tracing::{info, info_span, warn, Instrument};

/// Health property the agent publishes its own status against (§4.2 outer-loop step 6).
const PROPERTY_WU_OPERATION_STATUS: &str = "WUOperationStatus";

/// File paths this agent owns under its work directory (§6 "Persisted files").
#[derive(Debug, Clone)]
struct Paths {
    settings: PathBuf,
    settings_copy: PathBuf,
    checkpoint: PathBuf,
    operation_start: PathBuf,
    executor_budget: PathBuf,
    temp_dir: PathBuf,
}

impl Paths {
    fn new(work_dir: &Path) -> Self {
        Self {
            settings: work_dir.join("Settings.xml"),
            settings_copy: work_dir.join("Data/CopyOfSettings.xml"),
            checkpoint: work_dir.join("Data/TimerCheckPoint.txt"),
            operation_start: work_dir.join("Data/LastUpdateOperationStartTimeStampFile.txt"),
            executor_budget: work_dir.join("Data/ExecutorDataForNtService.json"),
            temp_dir: work_dir.join("TempDir"),
        }
    }
}

/// Outcome of one pass through the update-cycle state machine, telling the scheduling loop
/// how to update the on-disk checkpoint.
enum CycleOutcome {
    /// The cycle finished (successfully or not) and is not pending a reboot; the checkpoint
    /// should advance to the next scheduled time.
    Completed,
    /// The cycle could not make progress and should be retried after the settings'
    /// reschedule delay.
    Rescheduled,
    /// A reboot was requested. The real process would exit here; we leave the checkpoint
    /// untouched so the next scheduling tick re-derives state from `GetWuOperationState`
    /// exactly as it would after a real restart (§8 scenario b).
    Rebooting,
}

/// Whether the scheduling loop should keep running after a tick.
enum ControlFlow {
    Continue,
    TearDown,
}

/// The per-node update agent.
pub struct Agent {
    node_name: String,
    application_uri: String,
    paths: Paths,
    settings: RwLock<NodeSettings>,
    rpc: Arc<dyn AgentCoordinatorRpc>,
    update_engine: Arc<dyn UpdateEngine>,
    os_policy: Arc<dyn OsPolicy>,
    deployment: Arc<dyn DeploymentDirectory>,
    clock: Arc<dyn Clock>,
    config: AgentRuntimeConfig,
}

impl Agent {
    /// Construct an agent rooted at `work_dir`, targeting `node_name`/`application_uri`.
    pub fn new(
        node_name: impl Into<String>,
        application_uri: impl Into<String>,
        work_dir: impl Into<PathBuf>,
        rpc: Arc<dyn AgentCoordinatorRpc>,
        update_engine: Arc<dyn UpdateEngine>,
        os_policy: Arc<dyn OsPolicy>,
        deployment: Arc<dyn DeploymentDirectory>,
        clock: Arc<dyn Clock>,
        config: AgentRuntimeConfig,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            application_uri: application_uri.into(),
            paths: Paths::new(&work_dir.into()),
            settings: RwLock::new(NodeSettings::default()),
            rpc,
            update_engine,
            os_policy,
            deployment,
            clock,
            config,
        }
    }

    /// Run the agent's bootstrap sequence followed by the scheduling loop, until
    /// `shutdown` reports `true` (§4.2 outer loop + scheduling loop).
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.wait_for_settings_file(&mut shutdown).await?;
        if *shutdown.borrow() {
            return Ok(());
        }
        self.clear_temp_dir().await?;

        let settings = self.load_settings_with_fallback().await?;
        *self.settings.write() = settings.clone();

        if settings.disable_auto_update_setting_in_os {
            self.apply_os_update_policy().await?;
        }

        let checkpoint = checkpoint::read(&self.paths.checkpoint).await?;
        self.publish_status(checkpoint.as_ref()).await?;

        let mut interval = tokio::time::interval(self.config.scheduler_tick);
        let mut tick_no: u64 = 0;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let span = info_span!("agent_scheduling_tick", node = %self.node_name, tick = tick_no);
                    tick_no += 1;
                    match self.scheduling_tick().instrument(span).await {
                        Ok(ControlFlow::Continue) => {}
                        Ok(ControlFlow::TearDown) => {
                            info!(node = %self.node_name, "application no longer deployed; agent tearing down");
                            return Ok(());
                        }
                        Err(err) => {
                            warn!(node = %self.node_name, error = %err, "scheduling tick failed; retrying next interval");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(node = %self.node_name, "agent shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Block until `Settings.xml` first appears, or `shutdown` fires (§4.2 outer-loop
    /// step 1: "wait for the settings file to exist").
    async fn wait_for_settings_file(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        loop {
            if tokio::fs::try_exists(&self.paths.settings).await.unwrap_or(false) {
                return Ok(());
            }
            if *shutdown.borrow() {
                return Ok(());
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.settings_poll_interval) => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                return Ok(());
            }
        }
    }

    /// Recreate an empty temp working directory (§4.2 outer-loop step 2).
    async fn clear_temp_dir(&self) -> Result<()> {
        let _ = tokio::fs::remove_dir_all(&self.paths.temp_dir).await;
        tokio::fs::create_dir_all(&self.paths.temp_dir).await?;
        Ok(())
    }

    /// Load settings, falling back to the last validated copy and finally to defaults if
    /// both the live file and the copy fail to parse (§4.2 outer-loop step 3, §7
    /// "Configuration errors").
    async fn load_settings_with_fallback(&self) -> Result<NodeSettings> {
        let live = atomic_file::read_if_exists(&self.paths.settings).await?;

        if let Some(content) = &live {
            if let Ok(parsed) = settings::parse(content) {
                atomic_file::write_atomic(&self.paths.settings_copy, content).await?;
                return Ok(parsed);
            }
            warn!(node = %self.node_name, "live settings file failed to parse; falling back to last validated copy");
        }

        let copy = atomic_file::read_if_exists(&self.paths.settings_copy).await?;
        if let Some(content) = &copy {
            if let Ok(parsed) = settings::parse(content) {
                if live.is_some() {
                    warn!(node = %self.node_name, "restoring live settings file from the last validated copy");
                    atomic_file::write_atomic(&self.paths.settings, content).await?;
                }
                return Ok(parsed);
            }
        }

        // Both the live file and the validated copy are unusable. Resync the copy to the
        // (unparseable) live content so the hot-swap hash comparison in the scheduling loop
        // doesn't keep re-triggering a reload every tick on the same broken file, then fall
        // back to defaults until an operator fixes it.
        warn!(node = %self.node_name, "settings file and validated copy both failed to parse; falling back to defaults");
        if let Some(content) = &live {
            atomic_file::write_atomic(&self.paths.settings_copy, content).await?;
        }
        let _ = self
            .rpc
            .report_health(
                &self.application_uri,
                "SettingsParseError",
                "Settings.xml and its validated copy both failed to parse; using defaults",
                HealthState::Warning,
                Duration::from_secs(60 * 60),
                self.config.health_report_deadline,
            )
            .await;
        Ok(NodeSettings::default())
    }

    /// Disable the OS's own automatic-update mechanism, retrying a fixed number of times on
    /// transient failure (§4.2 outer-loop step 4).
    async fn apply_os_update_policy(&self) -> Result<()> {
        crate::retry::fixed_delay(3, self.config.transient_retry_wait, || async {
            self.os_policy.disable_automatic_updates().await
        })
        .await
    }

    /// Publish the agent's own `WUOperationStatus` health fact (§4.2 outer-loop step 6).
    async fn publish_status(&self, checkpoint: Option<&CheckpointFileData>) -> Result<()> {
        let description = match checkpoint {
            Some(cp) => format!(
                "next scheduled: {:?}, last attempted: {:?}, reschedule count: {}",
                cp.scheduling_date_time, cp.last_attempted_update_time, cp.reschedule_count
            ),
            None => "no checkpoint yet; first cycle pending".to_string(),
        };
        self.rpc
            .report_health(
                &self.application_uri,
                PROPERTY_WU_OPERATION_STATUS,
                &description,
                HealthState::Ok,
                Duration::from_secs(15 * 60),
                self.config.health_report_deadline,
            )
            .await
    }

    /// One pass of the scheduling loop (§4.2 scheduling loop, steps a-g). Exposed
    /// privately only; driven by `run`'s interval.
    async fn scheduling_tick(&self) -> Result<ControlFlow> {
        // a. Tear down if the application has been undeployed. Only `ApplicationNotFound`
        // means that; any other error (e.g. a transient backend failure) falls through to
        // the normal retry-next-tick path instead of tearing the agent down permanently.
        match self.rpc.get_application_deployed_status(&self.application_uri).await {
            Ok(()) => {}
            Err(CoordError::ApplicationNotFound(_)) => {
                let _ = self.os_policy.stop_platform_services().await;
                return Ok(ControlFlow::TearDown);
            }
            Err(err) => return Err(err),
        }

        // b. Read the coordinator-side sub-state and persist the approval/timeout snapshot.
        let state = self.rpc.get_wu_operation_state(&self.node_name).await?;
        if let Some(budget) = state.budget {
            self.write_budget_snapshot(budget).await?;
        }

        // c. A reboot has been requested but not yet observed: nothing to do this tick.
        if state.sub_state == ExecutorSubState::RestartRequested {
            return Ok(ControlFlow::Continue);
        }

        // d. The reboot has completed: finalize the task and reschedule.
        if state.sub_state == ExecutorSubState::RestartCompleted {
            self.rpc
                .update_installation_status(
                    &self.node_name,
                    &self.application_uri,
                    ExecutorSubState::OperationCompleted,
                    None,
                )
                .await?;
            let next = schedule::next_scheduled_time(self.settings.read().wu_frequency, self.clock.now());
            checkpoint::write(&self.paths.checkpoint, &CheckpointFileData::fresh(next)).await?;
            return Ok(ControlFlow::Continue);
        }

        // e. Checkpoint reschedule bookkeeping.
        let mut cp = match checkpoint::read(&self.paths.checkpoint).await? {
            Some(cp) => cp,
            None => {
                let next = schedule::next_scheduled_time(self.settings.read().wu_frequency, self.clock.now());
                CheckpointFileData::fresh(next)
            }
        };
        if cp.reschedule_needed {
            let settings = self.settings.read().clone();
            cp.reschedule_count += 1;
            if cp.reschedule_count > settings.wu_reschedule_count {
                warn!(node = %self.node_name, "reschedule count exceeded; resetting the local machine");
                self.os_policy.request_restart().await?;
                cp.scheduling_date_time = schedule::next_scheduled_time(settings.wu_frequency, self.clock.now());
                cp.reschedule_count = 0;
            } else {
                cp.scheduling_date_time =
                    self.clock.now() + Duration::from_secs(settings.wu_reschedule_time_in_minutes as u64 * 60);
            }
            cp.reschedule_needed = false;
            checkpoint::write(&self.paths.checkpoint, &cp).await?;
        }

        // f. Hot-swap detection: a changed, successfully-parsed live file replaces the
        // in-effect settings and resets the schedule.
        if let Some(new_settings) = self.detect_settings_change().await? {
            *self.settings.write() = new_settings.clone();
            let next = schedule::next_scheduled_time(new_settings.wu_frequency, self.clock.now());
            cp = CheckpointFileData::fresh(next);
            checkpoint::write(&self.paths.checkpoint, &cp).await?;
        }

        // g. Run the update cycle if it's due.
        if cp.scheduling_date_time != SystemTime::UNIX_EPOCH && cp.scheduling_date_time <= self.clock.now() {
            self.record_operation_start(self.clock.now()).await?;
            match self.run_update_cycle(state.sub_state).await {
                Ok(CycleOutcome::Completed) => {
                    let next = schedule::next_scheduled_time(self.settings.read().wu_frequency, self.clock.now());
                    let fresh = CheckpointFileData {
                        scheduling_date_time: next,
                        reschedule_count: 0,
                        reschedule_needed: false,
                        last_attempted_update_time: Some(self.clock.now()),
                    };
                    checkpoint::write(&self.paths.checkpoint, &fresh).await?;
                }
                Ok(CycleOutcome::Rescheduled) => {
                    cp.reschedule_needed = true;
                    cp.last_attempted_update_time = Some(self.clock.now());
                    checkpoint::write(&self.paths.checkpoint, &cp).await?;
                }
                Ok(CycleOutcome::Rebooting) => {
                    info!(node = %self.node_name, "reboot requested; checkpoint left untouched pending restart");
                }
                Err(err) => {
                    warn!(node = %self.node_name, error = %err, "update cycle failed; scheduling a reschedule");
                    cp.reschedule_needed = true;
                    cp.last_attempted_update_time = Some(self.clock.now());
                    checkpoint::write(&self.paths.checkpoint, &cp).await?;
                }
            }
        }

        self.publish_status(Some(&cp)).await?;
        Ok(ControlFlow::Continue)
    }

    /// Detect a live settings file whose content hash differs from the saved copy and, if
    /// it parses, return the new settings (§4.2 scheduling-loop step f).
    async fn detect_settings_change(&self) -> Result<Option<NodeSettings>> {
        let Some(live) = atomic_file::read_if_exists(&self.paths.settings).await? else {
            return Ok(None);
        };
        let copy = atomic_file::read_if_exists(&self.paths.settings_copy).await?.unwrap_or_default();
        if settings::content_hash(&live) == settings::content_hash(&copy) {
            return Ok(None);
        }
        match settings::parse(&live) {
            Ok(parsed) => {
                atomic_file::write_atomic(&self.paths.settings_copy, &live).await?;
                Ok(Some(parsed))
            }
            Err(err) => {
                warn!(node = %self.node_name, error = %err, "hot-swapped settings file failed to parse; keeping previous settings");
                Ok(None)
            }
        }
    }

    /// Run one pass of the update-cycle state machine, dispatching on the sub-state read
    /// from the coordinator (§4.2 "Update cycle").
    async fn run_update_cycle(&self, sub_state: ExecutorSubState) -> Result<CycleOutcome> {
        let settings = self.settings.read().clone();
        match sub_state {
            ExecutorSubState::None | ExecutorSubState::OperationCompleted => {
                self.cycle_from_search(&settings).await
            }
            ExecutorSubState::DownloadCompleted => self.cycle_wait_for_approval(&settings).await,
            ExecutorSubState::InstallationApproved => self.cycle_install(&settings, None).await,
            ExecutorSubState::InstallationInProgress => {
                // Resuming after a process restart mid-install: re-derive the candidate set
                // rather than trust any in-memory state, which did not survive the restart.
                let candidates = self.search_and_filter(&settings).await?;
                if candidates.is_empty() {
                    info!(node = %self.node_name, "no candidates found resuming an in-progress install; treating as complete");
                    return Ok(CycleOutcome::Completed);
                }
                self.cycle_install(&settings, Some(candidates)).await
            }
            other => Err(CoordError::RepairTaskInvalidState {
                node: self.node_name.clone(),
                state: format!("{other:?}"),
            }),
        }
    }

    /// Search, filter, and download; then either resolve the cycle (nothing to do) or wait
    /// for installation approval (§4.2 "Search and download").
    async fn cycle_from_search(&self, settings: &NodeSettings) -> Result<CycleOutcome> {
        let start = self.read_operation_start().await;
        let candidates = self.search_and_filter(settings).await?;
        let frequency = settings::format_frequency(&settings.wu_frequency);

        if candidates.is_empty() {
            let result = OperationResult::no_updates_found(&self.node_name, &settings.wu_query, &frequency, start);
            self.rpc
                .update_search_and_download_status(
                    &self.node_name,
                    &self.application_uri,
                    ExecutorSubState::OperationCompleted,
                    Some(result),
                    Duration::from_secs(settings.wu_operation_timeout_in_minutes as u64 * 60),
                )
                .await?;
            return Ok(CycleOutcome::Completed);
        }

        let details = self.download(settings, &candidates).await?;
        let reboot_required = candidates.iter().any(|c| c.requires_reboot);
        let result = OperationResult {
            node_name: self.node_name.clone(),
            operation_time: self.clock.now(),
            operation_start_time: start,
            operation_type: OperationType::SearchAndDownload,
            operation_result: outcome_from_details(&details),
            update_details: details,
            windows_update_query: settings.wu_query.clone(),
            windows_update_frequency: frequency,
            reboot_required,
        };
        self.rpc
            .update_search_and_download_status(
                &self.node_name,
                &self.application_uri,
                ExecutorSubState::DownloadCompleted,
                Some(result),
                Duration::from_secs(settings.wu_operation_timeout_in_minutes as u64 * 60),
            )
            .await?;

        self.cycle_wait_for_approval(settings).await
    }

    /// Poll `GetWuOperationState` until the coordinator approves installation or aborts the
    /// operation (§4.2 "Waiting for approval").
    async fn cycle_wait_for_approval(&self, settings: &NodeSettings) -> Result<CycleOutcome> {
        loop {
            let state = self.rpc.get_wu_operation_state(&self.node_name).await?;
            if let Some(budget) = state.budget {
                self.write_budget_snapshot(budget).await?;
            }
            match state.sub_state {
                ExecutorSubState::InstallationApproved => {
                    return self.cycle_install(settings, None).await;
                }
                ExecutorSubState::None | ExecutorSubState::OperationCompleted => {
                    return Err(CoordError::ProcessTerminated(
                        "installation approval wait aborted by coordinator".to_string(),
                    ));
                }
                _ => {
                    tokio::time::sleep(Duration::from_secs(
                        settings.wu_delay_between_retries_in_minutes as u64 * 60,
                    ))
                    .await;
                }
            }
        }
    }

    /// Install the (possibly re-derived) candidate set, then run reboot handling
    /// (§4.2 "Installation", "Reboot handling").
    async fn cycle_install(
        &self,
        settings: &NodeSettings,
        candidates: Option<Vec<UpdateCandidate>>,
    ) -> Result<CycleOutcome> {
        let start = self.read_operation_start().await;
        self.rpc
            .update_installation_status(
                &self.node_name,
                &self.application_uri,
                ExecutorSubState::InstallationInProgress,
                None,
            )
            .await?;

        let candidates = match candidates {
            Some(c) => c,
            None => self.search_and_filter(settings).await?,
        };
        let budget = self.remaining_install_budget().await;

        let (outcome, details, reboot_required) = crate::retry::fixed_delay(
            settings.wu_operation_retry_count,
            Duration::from_secs(settings.wu_delay_between_retries_in_minutes as u64 * 60),
            || async { self.update_engine.install(&candidates, budget).await },
        )
        .await?;

        let result = OperationResult {
            node_name: self.node_name.clone(),
            operation_time: self.clock.now(),
            operation_start_time: start,
            operation_type: OperationType::Installation,
            operation_result: outcome,
            update_details: details,
            windows_update_query: settings.wu_query.clone(),
            windows_update_frequency: settings::format_frequency(&settings.wu_frequency),
            reboot_required,
        };
        self.rpc
            .update_installation_status(
                &self.node_name,
                &self.application_uri,
                ExecutorSubState::InstallationCompleted,
                Some(result),
            )
            .await?;

        let cycle_outcome = if outcome.avoids_reschedule() {
            CycleOutcome::Completed
        } else {
            CycleOutcome::Rescheduled
        };

        if reboot_required {
            self.rpc
                .update_installation_status(
                    &self.node_name,
                    &self.application_uri,
                    ExecutorSubState::RestartRequested,
                    None,
                )
                .await?;
            self.os_policy.stop_platform_services().await?;
            self.os_policy.request_restart().await?;
            Ok(CycleOutcome::Rebooting)
        } else {
            self.rpc
                .update_installation_status(
                    &self.node_name,
                    &self.application_uri,
                    ExecutorSubState::RestartNotNeeded,
                    None,
                )
                .await?;
            self.rpc
                .update_installation_status(
                    &self.node_name,
                    &self.application_uri,
                    ExecutorSubState::OperationCompleted,
                    None,
                )
                .await?;
            Ok(cycle_outcome)
        }
    }

    /// Search for updates, retrying on transient failure, then filter by category
    /// whitelist and accept EULAs where configured (§4.2 "EULA and category filtering").
    async fn search_and_filter(&self, settings: &NodeSettings) -> Result<Vec<UpdateCandidate>> {
        let timeout = Duration::from_secs(settings.wu_operation_timeout_in_minutes as u64 * 60);
        let candidates = crate::retry::fixed_delay(
            settings.wu_operation_retry_count,
            Duration::from_secs(settings.wu_delay_between_retries_in_minutes as u64 * 60),
            || async {
                match tokio::time::timeout(timeout, self.update_engine.search(&settings.wu_query)).await {
                    Ok(inner) => inner,
                    Err(_) => Err(CoordError::Timeout(timeout)),
                }
            },
        )
        .await?;

        let whitelist = settings.effective_category_whitelist();
        let mut eligible = Vec::new();
        for candidate in candidates {
            if !candidate.matches_category_whitelist(&whitelist) {
                continue;
            }
            if settings.accept_windows_update_eula && !candidate.eula_accepted {
                self.update_engine.accept_eula(&candidate.id).await?;
            }
            eligible.push(candidate);
        }
        Ok(eligible)
    }

    /// Download the given candidates, retrying on transient failure.
    async fn download(&self, settings: &NodeSettings, candidates: &[UpdateCandidate]) -> Result<Vec<UpdateDetail>> {
        let timeout = Duration::from_secs(settings.wu_operation_timeout_in_minutes as u64 * 60);
        crate::retry::fixed_delay(
            settings.wu_operation_retry_count,
            Duration::from_secs(settings.wu_delay_between_retries_in_minutes as u64 * 60),
            || async {
                match tokio::time::timeout(timeout, self.update_engine.download(candidates)).await {
                    Ok(inner) => inner,
                    Err(_) => Err(CoordError::Timeout(timeout)),
                }
            },
        )
        .await
    }

    /// Compute the remaining installation budget from the persisted approval/timeout
    /// snapshot, or zero if none has been recorded yet.
    async fn remaining_install_budget(&self) -> Duration {
        let Ok(Some(budget)) = self.read_budget_snapshot().await else {
            return Duration::ZERO;
        };
        let total = Duration::from_secs(budget.executor_timeout_in_minutes as u64 * 60);
        let elapsed = self
            .clock
            .now()
            .duration_since(budget.approved_timestamp)
            .unwrap_or_default();
        total.checked_sub(elapsed).unwrap_or(Duration::ZERO)
    }

    /// Persist the approval/timeout snapshot so `remaining_install_budget` survives a
    /// process restart mid-install (§9 open question: use the full elapsed duration here,
    /// not a truncated whole-minutes field, to avoid under-reporting elapsed time).
    async fn write_budget_snapshot(&self, budget: ExecutorBudget) -> Result<()> {
        let json = serde_json::to_string(&budget)?;
        atomic_file::write_atomic(&self.paths.executor_budget, &json).await
    }

    async fn read_budget_snapshot(&self) -> Result<Option<ExecutorBudget>> {
        match atomic_file::read_if_exists(&self.paths.executor_budget).await? {
            Some(content) => Ok(Some(serde_json::from_str(&content)?)),
            None => Ok(None),
        }
    }

    /// Record the wall-clock time an operation started, so `OperationResult::operation_start_time`
    /// survives a process restart mid-cycle (§6 `LastUpdateOperationStartTimeStampFile.txt`).
    async fn record_operation_start(&self, at: SystemTime) -> Result<()> {
        atomic_file::write_atomic(&self.paths.operation_start, &checkpoint::format_timestamp(at)).await
    }

    /// Read back the last recorded operation-start time, falling back to "now" if the file
    /// is missing or corrupt (a fresh cycle starting right now is the least surprising
    /// default when this bookkeeping file itself didn't survive).
    async fn read_operation_start(&self) -> SystemTime {
        match atomic_file::read_if_exists(&self.paths.operation_start).await {
            Ok(Some(content)) => checkpoint::parse_timestamp(content.trim()).unwrap_or_else(|| self.clock.now()),
            _ => self.clock.now(),
        }
    }
}

/// Derive the overall outcome of a set of per-update results (§4.2: all succeeded, some
/// failed, or all failed).
fn outcome_from_details(details: &[UpdateDetail]) -> OperationOutcome {
    if details.is_empty() {
        return OperationOutcome::Succeeded;
    }
    let failed = details.iter().filter(|d| d.result_code == UpdateResultCode::Failed).count();
    if failed == 0 {
        OperationOutcome::Succeeded
    } else if failed < details.len() {
        OperationOutcome::SucceededWithErrors
    } else {
        OperationOutcome::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::clock::FakeClock;
    use crate::platform::deployment::InMemoryDeploymentDirectory;
    use crate::platform::os_policy::InMemoryOsPolicy;
    use crate::platform::update_engine::FakeUpdateEngine;
    use crate::rpc::WuOperationState;
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    /// Minimal scripted RPC fake: enough to drive the agent through a single update cycle
    /// without a full `CoordinatorRpcService`/registry stack.
    struct ScriptedRpc {
        sub_states: StdMutex<Vec<ExecutorSubState>>,
        budget: Option<ExecutorBudget>,
        reported: StdMutex<Vec<(String, ExecutorSubState)>>,
        deployed: bool,
    }

    impl ScriptedRpc {
        fn new(sub_states: Vec<ExecutorSubState>, deployed: bool) -> Self {
            Self {
                sub_states: StdMutex::new(sub_states),
                budget: None,
                reported: StdMutex::new(Vec::new()),
                deployed,
            }
        }

        fn with_budget(sub_states: Vec<ExecutorSubState>, budget: ExecutorBudget) -> Self {
            Self {
                sub_states: StdMutex::new(sub_states),
                budget: Some(budget),
                reported: StdMutex::new(Vec::new()),
                deployed: true,
            }
        }
    }

    #[async_trait::async_trait]
    impl AgentCoordinatorRpc for ScriptedRpc {
        async fn get_wu_operation_state(&self, _node_name: &str) -> Result<WuOperationState> {
            let mut states = self.sub_states.lock().unwrap();
            let sub_state = if states.len() > 1 { states.remove(0) } else { states[0] };
            Ok(WuOperationState { sub_state, budget: self.budget })
        }

        async fn update_search_and_download_status(
            &self,
            node_name: &str,
            _application_uri: &str,
            new_sub_state: ExecutorSubState,
            _result: Option<OperationResult>,
            _installation_timeout: Duration,
        ) -> Result<()> {
            self.reported.lock().unwrap().push((node_name.to_string(), new_sub_state));
            Ok(())
        }

        async fn update_installation_status(
            &self,
            node_name: &str,
            _application_uri: &str,
            new_sub_state: ExecutorSubState,
            _result: Option<OperationResult>,
        ) -> Result<()> {
            self.reported.lock().unwrap().push((node_name.to_string(), new_sub_state));
            Ok(())
        }

        async fn update_wu_operation_result(&self, _result: OperationResult) -> Result<()> {
            Ok(())
        }

        async fn report_health(
            &self,
            _application_uri: &str,
            _property: &str,
            _description: &str,
            _state: HealthState,
            _ttl: Duration,
            _deadline: Duration,
        ) -> Result<()> {
            Ok(())
        }

        async fn get_application_deployed_status(&self, _application_uri: &str) -> Result<()> {
            if self.deployed {
                Ok(())
            } else {
                Err(CoordError::ApplicationNotFound("gone".to_string()))
            }
        }
    }

    fn new_agent(rpc: Arc<dyn AgentCoordinatorRpc>, engine: Arc<dyn UpdateEngine>, work_dir: PathBuf) -> Agent {
        Agent::new(
            "node-a",
            "fabric:/PatchAgent",
            work_dir,
            rpc,
            engine,
            InMemoryOsPolicy::new(),
            InMemoryDeploymentDirectory::new(["fabric:/PatchAgent".to_string()]),
            Arc::new(FakeClock::new(SystemTime::UNIX_EPOCH + Duration::from_secs(1_750_000_000))),
            AgentRuntimeConfig::default(),
        )
    }

    #[tokio::test]
    async fn search_with_no_candidates_reports_operation_completed() {
        let dir = tempdir().unwrap();
        let rpc = Arc::new(ScriptedRpc::new(vec![ExecutorSubState::None], true));
        let engine = FakeUpdateEngine::new();
        let agent = new_agent(rpc.clone(), engine, dir.path().to_path_buf());

        let outcome = agent.cycle_from_search(&NodeSettings::default()).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Completed));
        let reported = rpc.reported.lock().unwrap();
        assert_eq!(reported.last().unwrap().1, ExecutorSubState::OperationCompleted);
    }

    #[tokio::test]
    async fn search_with_candidates_downloads_and_waits_for_approval() {
        let dir = tempdir().unwrap();
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_750_000_000);
        let budget = ExecutorBudget { approved_timestamp: now, executor_timeout_in_minutes: 90 };
        let rpc = Arc::new(ScriptedRpc::with_budget(
            vec![ExecutorSubState::DownloadCompleted, ExecutorSubState::InstallationApproved],
            budget,
        ));
        let engine = FakeUpdateEngine::new();
        engine.set_available_updates(vec![UpdateCandidate {
            id: "update-1".to_string(),
            title: "A patch".to_string(),
            description: "".to_string(),
            category_path: Vec::new(),
            eula_accepted: true,
            requires_reboot: false,
        }]);
        let agent = new_agent(rpc.clone(), engine, dir.path().to_path_buf());

        let outcome = agent.cycle_from_search(&NodeSettings::default()).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Completed));
        let reported = rpc.reported.lock().unwrap().clone();
        assert!(reported.iter().any(|(_, s)| *s == ExecutorSubState::DownloadCompleted));
        assert!(reported.iter().any(|(_, s)| *s == ExecutorSubState::RestartNotNeeded));
        assert!(
            reported.iter().any(|(_, s)| *s == ExecutorSubState::OperationCompleted),
            "a no-reboot install must report OperationCompleted so the task leaves Executing"
        );
    }

    #[tokio::test]
    async fn install_requiring_reboot_requests_restart_and_defers_checkpoint() {
        let dir = tempdir().unwrap();
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_750_000_000);
        let budget = ExecutorBudget { approved_timestamp: now, executor_timeout_in_minutes: 90 };
        let rpc = Arc::new(ScriptedRpc::with_budget(vec![ExecutorSubState::InstallationApproved], budget));
        let engine = FakeUpdateEngine::new();
        engine.set_available_updates(vec![UpdateCandidate {
            id: "update-1".to_string(),
            title: "Needs reboot".to_string(),
            description: "".to_string(),
            category_path: Vec::new(),
            eula_accepted: true,
            requires_reboot: true,
        }]);
        let agent = new_agent(rpc.clone(), engine, dir.path().to_path_buf());
        agent.write_budget_snapshot(budget).await.unwrap();

        let outcome = agent.cycle_install(&NodeSettings::default(), None).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Rebooting));
        let reported = rpc.reported.lock().unwrap().clone();
        assert!(reported.iter().any(|(_, s)| *s == ExecutorSubState::RestartRequested));
    }

    #[tokio::test]
    async fn scheduling_tick_tears_down_when_undeployed() {
        let dir = tempdir().unwrap();
        let rpc = Arc::new(ScriptedRpc::new(vec![ExecutorSubState::None], false));
        let engine = FakeUpdateEngine::new();
        let agent = new_agent(rpc, engine, dir.path().to_path_buf());

        let flow = agent.scheduling_tick().await.unwrap();
        assert!(matches!(flow, ControlFlow::TearDown));
    }

    #[test]
    fn budget_accounts_for_elapsed_time_since_approval() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(2_000_000);
        let approved = now - Duration::from_secs(30 * 60);
        let total = Duration::from_secs(90 * 60);
        let elapsed = now.duration_since(approved).unwrap();
        assert_eq!(total.checked_sub(elapsed).unwrap(), Duration::from_secs(60 * 60));
    }

    #[test]
    fn outcome_from_details_is_partial_on_mixed_results() {
        let details = vec![
            UpdateDetail {
                update_id: "a".to_string(),
                title: "a".to_string(),
                description: "".to_string(),
                result_code: UpdateResultCode::Succeeded,
                hresult: 0,
            },
            UpdateDetail {
                update_id: "b".to_string(),
                title: "b".to_string(),
                description: "".to_string(),
                result_code: UpdateResultCode::Failed,
                hresult: -1,
            },
        ];
        assert_eq!(outcome_from_details(&details), OperationOutcome::SucceededWithErrors);
    }
}
