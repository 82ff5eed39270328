//! `CoordinatorRpcService`: the in-process implementation of [`AgentCoordinatorRpc`],
//! backed by the same registry/health-bus/result-store handles the control loop uses
//! (§4.3.4).

use crate::error::{CoordError, Result};
use crate::platform::{Clock, HealthBus, HealthFact, HealthState, RepairRegistry};
use crate::rpc::contract::{AgentCoordinatorRpc, ExecutorBudget, WuOperationState};
use crate::store::ResultStore;
use crate::types::{
    ExecutorData, ExecutorSubState, OperationResult, RepairTask, RepairTaskState, ResultStatus,
    TASK_ID_PREFIX, EXECUTOR,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Shared implementation of the six Coordinator↔Agent operations.
pub struct CoordinatorRpcService {
    registry: Arc<dyn RepairRegistry>,
    health_bus: Arc<dyn HealthBus>,
    results: Arc<ResultStore>,
    clock: Arc<dyn Clock>,
    deployment: Arc<dyn crate::platform::DeploymentDirectory>,
}

impl CoordinatorRpcService {
    /// Construct a service over the given platform handles.
    pub fn new(
        registry: Arc<dyn RepairRegistry>,
        health_bus: Arc<dyn HealthBus>,
        results: Arc<ResultStore>,
        clock: Arc<dyn Clock>,
        deployment: Arc<dyn crate::platform::DeploymentDirectory>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            health_bus,
            results,
            clock,
            deployment,
        })
    }

    /// The oldest still-active repair task targeting `node_name`, if any.
    async fn oldest_active_task(&self, node_name: &str) -> Result<Option<RepairTask>> {
        let tasks = self.registry.list_by_prefix(TASK_ID_PREFIX).await?;
        Ok(tasks
            .into_iter()
            .filter(|t| t.target == node_name && t.is_active())
            .min_by_key(|t| t.created_at))
    }

    async fn enqueue_if_present(&self, result: Option<OperationResult>) {
        if let Some(result) = result {
            self.results.append(result).await;
        }
    }
}

#[async_trait]
impl AgentCoordinatorRpc for CoordinatorRpcService {
    async fn get_wu_operation_state(&self, node_name: &str) -> Result<WuOperationState> {
        let task = match self.oldest_active_task(node_name).await? {
            Some(task) => task,
            None => {
                return Ok(WuOperationState {
                    sub_state: ExecutorSubState::None,
                    budget: None,
                })
            }
        };
        let budget = task.approved_timestamp.map(|approved_timestamp| {
            let timeout = task
                .executor_data()
                .map(|d| d.executor_timeout_in_minutes)
                .unwrap_or(0);
            ExecutorBudget {
                approved_timestamp,
                executor_timeout_in_minutes: timeout,
            }
        });
        let sub_state = match task.state {
            RepairTaskState::Claimed | RepairTaskState::Preparing => {
                ExecutorSubState::DownloadCompleted
            }
            RepairTaskState::Approved => ExecutorSubState::InstallationApproved,
            RepairTaskState::Executing => {
                let data = task.executor_data()?;
                if data.sub_state == ExecutorSubState::RestartRequested {
                    if let Some(requested_at) = data.restart_requested_time {
                        if self.clock.boot_time() >= requested_at {
                            let mut next = task.clone();
                            let mut next_data = data;
                            next_data.sub_state = ExecutorSubState::RestartCompleted;
                            next.executor_data_blob = next_data.to_blob()?;
                            self.registry.update(next).await?;
                            return Ok(WuOperationState {
                                sub_state: ExecutorSubState::RestartCompleted,
                                budget,
                            });
                        }
                    }
                }
                data.sub_state
            }
            RepairTaskState::Completed | RepairTaskState::Restoring => {
                ExecutorSubState::OperationCompleted
            }
            RepairTaskState::Created => {
                return Err(CoordError::RepairTaskInvalidState {
                    node: node_name.to_string(),
                    state: task.state.to_string(),
                })
            }
        };
        Ok(WuOperationState { sub_state, budget })
    }

    async fn update_search_and_download_status(
        &self,
        node_name: &str,
        _application_uri: &str,
        new_sub_state: ExecutorSubState,
        result: Option<OperationResult>,
        installation_timeout: Duration,
    ) -> Result<()> {
        match new_sub_state {
            ExecutorSubState::DownloadCompleted => {
                let timeout_minutes = (installation_timeout.as_secs() / 60) as u32;
                let task = RepairTask {
                    task_id: format!("{TASK_ID_PREFIX}_{node_name}_{}", uuid::Uuid::new_v4()),
                    target: node_name.to_string(),
                    state: RepairTaskState::Claimed,
                    result_status: ResultStatus::Pending,
                    executor: EXECUTOR.to_string(),
                    executor_data_blob: ExecutorData::claimed(timeout_minutes).to_blob()?,
                    approved_timestamp: None,
                    impact: None,
                    perform_preparing_health_check: false,
                    created_at: self.clock.now(),
                    version: 0,
                };
                self.registry.create(task).await?;
                self.enqueue_if_present(result).await;
                Ok(())
            }
            ExecutorSubState::OperationCompleted => {
                self.enqueue_if_present(result).await;
                Ok(())
            }
            ExecutorSubState::OperationAborted => {
                if let Some(task) = self.oldest_active_task(node_name).await? {
                    let mut next = task;
                    next.state = RepairTaskState::Completed;
                    next.result_status = ResultStatus::Failed;
                    self.registry.update(next).await?;
                }
                self.enqueue_if_present(result).await;
                Ok(())
            }
            other => Err(CoordError::InvalidArgument(format!(
                "UpdateSearchAndDownloadStatus does not accept sub-state {other:?}"
            ))),
        }
    }

    async fn update_installation_status(
        &self,
        node_name: &str,
        _application_uri: &str,
        new_sub_state: ExecutorSubState,
        result: Option<OperationResult>,
    ) -> Result<()> {
        if !matches!(
            new_sub_state,
            ExecutorSubState::InstallationInProgress
                | ExecutorSubState::InstallationCompleted
                | ExecutorSubState::RestartRequested
                | ExecutorSubState::RestartNotNeeded
                | ExecutorSubState::RestartCompleted
                | ExecutorSubState::OperationCompleted
        ) {
            return Err(CoordError::InvalidArgument(format!(
                "UpdateInstallationStatus does not accept sub-state {new_sub_state:?}"
            )));
        }
        let task = self.oldest_active_task(node_name).await?.ok_or_else(|| {
            CoordError::RepairTaskInvalidState {
                node: node_name.to_string(),
                state: "no active task".to_string(),
            }
        })?;
        let mut next = task.clone();
        let mut data = task.executor_data()?;
        data.sub_state = new_sub_state;
        if new_sub_state == ExecutorSubState::RestartRequested {
            data.restart_requested_time = Some(self.clock.now());
        }
        next.executor_data_blob = data.to_blob()?;
        if new_sub_state == ExecutorSubState::OperationCompleted {
            next.state = RepairTaskState::Restoring;
            next.result_status = ResultStatus::Succeeded;
        }
        self.registry.update(next).await?;
        self.enqueue_if_present(result).await;
        Ok(())
    }

    async fn update_wu_operation_result(&self, result: OperationResult) -> Result<()> {
        self.results.append(result).await;
        Ok(())
    }

    async fn report_health(
        &self,
        application_uri: &str,
        property: &str,
        description: &str,
        state: HealthState,
        ttl: Duration,
        deadline: Duration,
    ) -> Result<()> {
        crate::retry::wait_linear_backoff(
            self.clock.as_ref(),
            deadline,
            Duration::from_millis(200),
            || async { self.health_bus.service_exists(application_uri).await },
        )
        .await?;
        self.health_bus
            .publish(HealthFact {
                service: application_uri.to_string(),
                property: property.to_string(),
                description: description.to_string(),
                state,
                ttl,
                published_at: self.clock.now(),
            })
            .await
    }

    async fn get_application_deployed_status(&self, application_uri: &str) -> Result<()> {
        if self.deployment.is_deployed(application_uri).await? {
            Ok(())
        } else {
            Err(CoordError::ApplicationNotFound(application_uri.to_string()))
        }
    }
}
