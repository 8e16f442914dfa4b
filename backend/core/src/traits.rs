use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{HandlerError, SchedulerError};
use crate::types::{
    HandlerOutcome, RunRecord, RunStats, RunStatus, Task, TaskConfig, TaskFilter, TaskId,
    TaskPatch,
};

/// Durable storage for task definitions, run-state and statistics.
///
/// Shared by the polling loop and every concurrent executor, so implementations
/// must be cheap to call from many tasks at once.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Tasks matching the filter, oldest first.
    async fn query(&self, filter: &TaskFilter) -> Result<Vec<Task>, SchedulerError>;

    async fn get(&self, id: TaskId) -> Result<Option<Task>, SchedulerError>;

    async fn insert(&self, task: Task) -> Result<Task, SchedulerError>;

    /// Apply a partial update and return the new row. Unknown ids yield `NotFound`.
    async fn update(&self, id: TaskId, patch: TaskPatch) -> Result<Task, SchedulerError>;

    /// Returns whether a row was removed.
    async fn delete(&self, id: TaskId) -> Result<bool, SchedulerError>;

    /// Atomically bump `total_runs` plus the counter matching `status`.
    async fn increment_run_counters(
        &self,
        id: TaskId,
        status: RunStatus,
    ) -> Result<RunStats, SchedulerError>;

    /// Conditional claim: set `is_running = true, last_run_at = now` only if the
    /// task is not already running. Returns whether this caller won.
    async fn try_claim(&self, id: TaskId, now: DateTime<Utc>) -> Result<bool, SchedulerError>;

    async fn count(&self, filter: &TaskFilter) -> Result<u64, SchedulerError> {
        Ok(self.query(filter).await?.len() as u64)
    }
}

/// Business logic bound to one task type.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn execute(&self, config: &TaskConfig) -> Result<HandlerOutcome, HandlerError>;
}

/// Append-only log of execution attempts.
#[async_trait]
pub trait RunHistory: Send + Sync {
    async fn record(&self, entry: &RunRecord) -> Result<(), SchedulerError>;

    /// Most recent entries for a task, newest first.
    async fn recent(&self, task_id: TaskId, limit: usize) -> Result<Vec<RunRecord>, SchedulerError>;

    /// Drop entries that started before `cutoff`; returns how many were removed.
    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize, SchedulerError>;
}
