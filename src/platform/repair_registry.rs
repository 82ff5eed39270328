//! Durable repair-task registry (§2, §3, §5 "optimistic concurrency").

use crate::error::{CoordError, Result};
use crate::types::RepairTask;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::{atomic::{AtomicU64, Ordering}, Arc};

/// The platform's repair-task registry.
///
/// All mutations go through `update`'s optimistic-concurrency check (§5): a caller must
/// supply the version it last observed, and a stale write is rejected so the coordinator
/// never silently clobbers a concurrent change (e.g. the platform's own
/// `Preparing -> Approved` transition racing the coordinator's timeout pass).
#[async_trait]
pub trait RepairRegistry: Send + Sync {
    /// List every task whose `task_id` starts with `prefix`.
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<RepairTask>>;

    /// Fetch a single task by id.
    async fn get(&self, task_id: &str) -> Result<Option<RepairTask>>;

    /// Create a new task. Fails if a task with the same id already exists.
    async fn create(&self, task: RepairTask) -> Result<RepairTask>;

    /// Write back a task, using the version the caller last read. Returns the task with
    /// its version incremented on success, or `CoordError::VersionConflict` if the stored
    /// version no longer matches.
    async fn update(&self, task: RepairTask) -> Result<RepairTask>;

    /// Cancel (mark `Completed`/`Failed`) a task unconditionally, e.g. for orphan pruning.
    async fn cancel(&self, task_id: &str) -> Result<()>;

    /// Whether the registry's backing platform service is currently reachable (§4.1 step 1).
    async fn is_available(&self) -> Result<bool>;
}

/// In-memory reference implementation of [`RepairRegistry`].
#[derive(Debug, Default)]
pub struct InMemoryRepairRegistry {
    tasks: DashMap<String, RepairTask>,
    available: std::sync::atomic::AtomicBool,
    next_seq: AtomicU64,
}

impl InMemoryRepairRegistry {
    /// Construct an empty, available registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tasks: DashMap::new(),
            available: std::sync::atomic::AtomicBool::new(true),
            next_seq: AtomicU64::new(0),
        })
    }

    /// Simulate the platform's repair-registry service becoming unreachable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Monotonic sequence number, useful for constructing deterministic `created_at`
    /// orderings in tests without relying on `SystemTime` resolution.
    pub fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl RepairRegistry for InMemoryRepairRegistry {
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<RepairTask>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(CoordError::Retryable("repair registry unavailable".into()));
        }
        Ok(self
            .tasks
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.value().clone())
            .collect())
    }

    async fn get(&self, task_id: &str) -> Result<Option<RepairTask>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(CoordError::Retryable("repair registry unavailable".into()));
        }
        Ok(self.tasks.get(task_id).map(|e| e.value().clone()))
    }

    async fn create(&self, task: RepairTask) -> Result<RepairTask> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(CoordError::Retryable("repair registry unavailable".into()));
        }
        if self.tasks.contains_key(&task.task_id) {
            return Err(CoordError::InvalidArgument(format!(
                "task {} already exists",
                task.task_id
            )));
        }
        self.tasks.insert(task.task_id.clone(), task.clone());
        Ok(task)
    }

    async fn update(&self, task: RepairTask) -> Result<RepairTask> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(CoordError::Retryable("repair registry unavailable".into()));
        }
        let mut entry = self
            .tasks
            .get_mut(&task.task_id)
            .ok_or_else(|| CoordError::InvalidArgument(format!("no such task {}", task.task_id)))?;
        if entry.version != task.version {
            return Err(CoordError::VersionConflict {
                task_id: task.task_id.clone(),
                expected: task.version,
                found: entry.version,
            });
        }
        let mut next = task;
        next.version += 1;
        *entry = next.clone();
        Ok(next)
    }

    async fn cancel(&self, task_id: &str) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(CoordError::Retryable("repair registry unavailable".into()));
        }
        if let Some(mut entry) = self.tasks.get_mut(task_id) {
            entry.state = crate::types::RepairTaskState::Completed;
            entry.result_status = crate::types::ResultStatus::Cancelled;
            entry.version += 1;
        }
        Ok(())
    }

    async fn is_available(&self) -> Result<bool> {
        Ok(self.available.load(Ordering::SeqCst))
    }
}
