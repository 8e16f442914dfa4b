//! In-process task store and run history, used by tests and the HTTP router tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use pacer_core::{
    RunHistory, RunRecord, RunStats, RunStatus, SchedulerError, Task, TaskFilter, TaskId,
    TaskPatch, TaskStore,
};

#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn query(&self, filter: &TaskFilter) -> Result<Vec<Task>, SchedulerError> {
        let tasks = self.tasks.read().await;
        let mut matched: Vec<Task> = tasks.values().filter(|t| filter.matches(t)).cloned().collect();
        matched.sort_by_key(|t| t.created_at);
        Ok(matched)
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, SchedulerError> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn insert(&self, task: Task) -> Result<Task, SchedulerError> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(SchedulerError::Store(format!("duplicate task id {}", task.id)));
        }
        tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn update(&self, id: TaskId, patch: TaskPatch) -> Result<Task, SchedulerError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&id).ok_or(SchedulerError::NotFound(id))?;
        patch.apply(task);
        Ok(task.clone())
    }

    async fn delete(&self, id: TaskId) -> Result<bool, SchedulerError> {
        Ok(self.tasks.write().await.remove(&id).is_some())
    }

    async fn increment_run_counters(
        &self,
        id: TaskId,
        status: RunStatus,
    ) -> Result<RunStats, SchedulerError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&id).ok_or(SchedulerError::NotFound(id))?;
        task.stats.record(status);
        Ok(task.stats)
    }

    async fn try_claim(&self, id: TaskId, now: DateTime<Utc>) -> Result<bool, SchedulerError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&id).ok_or(SchedulerError::NotFound(id))?;
        if task.is_running {
            return Ok(false);
        }
        TaskPatch::claim(now).apply(task);
        Ok(true)
    }
}

#[derive(Default)]
pub struct MemoryRunHistory {
    entries: RwLock<Vec<RunRecord>>,
}

impl MemoryRunHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunHistory for MemoryRunHistory {
    async fn record(&self, entry: &RunRecord) -> Result<(), SchedulerError> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }

    async fn recent(&self, task_id: TaskId, limit: usize) -> Result<Vec<RunRecord>, SchedulerError> {
        let entries = self.entries.read().await;
        let mut matched: Vec<RunRecord> = entries
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        matched.truncate(limit);
        Ok(matched)
    }

    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize, SchedulerError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.started_at >= cutoff);
        Ok(before - entries.len())
    }
}
