//! Task executor: owns one execution attempt from claim to completion.
//!
//! Claim and completion are separate store writes. A crash in between leaves
//! `is_running = true` behind; nothing here detects or repairs that, the
//! operator clears it with `pacer unlock`.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use uuid::Uuid;

use pacer_core::{
    HandlerError, HandlerOutcome, RunHistory, RunRecord, RunStats, RunStatus, RunTrigger,
    SchedulerError, Task, TaskId, TaskPatch, TaskStore,
};
use pacer_logging::{redact_sensitive_data, RunEvent, RunEventLogger};

use crate::evaluator::next_run_after;
use crate::registry::HandlerRegistry;

/// How the executor marks a task as held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStrategy {
    /// Unconditional write of `is_running = true`. Two callers holding the same
    /// not-running snapshot can both claim and both run the handler.
    Advisory,
    /// Single conditional update; exactly one concurrent caller wins.
    #[default]
    CompareAndSet,
}

impl FromStr for ClaimStrategy {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "advisory" => Ok(ClaimStrategy::Advisory),
            "compare_and_set" => Ok(ClaimStrategy::CompareAndSet),
            other => Err(SchedulerError::Configuration(format!(
                "unknown claim strategy: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The claim was lost; the handler did not run.
    Skipped,
    Succeeded(HandlerOutcome),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub task_id: TaskId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: ExecutionOutcome,
    pub next_run_at: Option<DateTime<Utc>>,
    pub stats: Option<RunStats>,
}

impl ExecutionReport {
    pub fn status(&self) -> RunStatus {
        match self.outcome {
            ExecutionOutcome::Skipped => RunStatus::None,
            ExecutionOutcome::Succeeded(_) => RunStatus::Success,
            ExecutionOutcome::Failed(_) => RunStatus::Failed,
        }
    }
}

pub struct TaskExecutor {
    store: Arc<dyn TaskStore>,
    registry: Arc<HandlerRegistry>,
    history: Option<Arc<dyn RunHistory>>,
    claim_strategy: ClaimStrategy,
}

impl TaskExecutor {
    pub fn new(store: Arc<dyn TaskStore>, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            store,
            registry,
            history: None,
            claim_strategy: ClaimStrategy::default(),
        }
    }

    pub fn with_history(mut self, history: Arc<dyn RunHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_claim_strategy(mut self, strategy: ClaimStrategy) -> Self {
        self.claim_strategy = strategy;
        self
    }

    pub fn claim_strategy(&self) -> ClaimStrategy {
        self.claim_strategy
    }

    pub fn history(&self) -> Option<&Arc<dyn RunHistory>> {
        self.history.as_ref()
    }

    /// Mark `task` as running and stamp the attempt time. Returns whether this
    /// caller now holds the task.
    pub async fn claim(&self, task: &Task, now: DateTime<Utc>) -> Result<bool, SchedulerError> {
        match self.claim_strategy {
            ClaimStrategy::Advisory => {
                self.store.update(task.id, TaskPatch::claim(now)).await?;
                Ok(true)
            }
            ClaimStrategy::CompareAndSet => self.store.try_claim(task.id, now).await,
        }
    }

    /// Run one attempt: claim, dispatch to the handler, persist the outcome.
    ///
    /// Handler failures are recorded on the task and reported as
    /// `ExecutionOutcome::Failed`; only store errors come back as `Err`.
    pub async fn execute(&self, task: Task) -> Result<ExecutionReport, SchedulerError> {
        self.execute_as(task, RunTrigger::Scheduled).await
    }

    /// [`Self::execute`] with the trigger recorded in the run log.
    pub async fn execute_as(
        &self,
        task: Task,
        trigger: RunTrigger,
    ) -> Result<ExecutionReport, SchedulerError> {
        let started_at = Utc::now();

        if !self.claim(&task, started_at).await? {
            debug!(task_id = %task.id, task = %task.name, "Claim lost; another executor holds the task");
            RunEventLogger::log(
                task.id,
                &task.name,
                RunEvent::Skipped {
                    reason: "already running".into(),
                },
            );
            return Ok(ExecutionReport {
                task_id: task.id,
                started_at,
                finished_at: started_at,
                outcome: ExecutionOutcome::Skipped,
                next_run_at: task.next_run_at,
                stats: None,
            });
        }
        RunEventLogger::log(task.id, &task.name, RunEvent::Claimed);

        let result = self.dispatch(&task).await;
        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds();

        let (status, message, outcome) = match result {
            Ok(outcome) => {
                let message = redact_sensitive_data(&outcome.message);
                RunEventLogger::log(
                    task.id,
                    &task.name,
                    RunEvent::Succeeded {
                        message: message.clone(),
                        duration_ms,
                    },
                );
                (RunStatus::Success, message, ExecutionOutcome::Succeeded(outcome))
            }
            Err(e) => {
                let message = redact_sensitive_data(&failure_message(&e));
                RunEventLogger::log(
                    task.id,
                    &task.name,
                    RunEvent::Failed {
                        error: message.clone(),
                        duration_ms,
                    },
                );
                (RunStatus::Failed, message.clone(), ExecutionOutcome::Failed(message))
            }
        };

        let next_run_at = next_run_after(&task.schedule, finished_at);
        let stats = self.complete(&task, status, &message, next_run_at).await?;

        if let Some(history) = &self.history {
            let counts = match &outcome {
                ExecutionOutcome::Succeeded(o) => (o.processed, o.inserted, o.updated),
                _ => (0, 0, 0),
            };
            let entry = RunRecord {
                id: Uuid::new_v4(),
                task_id: task.id,
                task_name: task.name.clone(),
                started_at,
                finished_at,
                status,
                trigger,
                processed: counts.0,
                inserted: counts.1,
                updated: counts.2,
                message: Some(message),
            };
            if let Err(e) = history.record(&entry).await {
                error!(task_id = %task.id, error = %e, "Failed to append run log entry");
            }
        }

        Ok(ExecutionReport {
            task_id: task.id,
            started_at,
            finished_at,
            outcome,
            next_run_at,
            stats: Some(stats),
        })
    }

    async fn dispatch(&self, task: &Task) -> Result<HandlerOutcome, SchedulerError> {
        let handler = self.registry.resolve(&task.task_type)?;
        debug!(task_id = %task.id, handler = handler.name(), "Dispatching task");

        match AssertUnwindSafe(handler.execute(&task.config))
            .catch_unwind()
            .await
        {
            Ok(result) => result.map_err(SchedulerError::Handler),
            Err(panic) => Err(SchedulerError::Handler(HandlerError::new(format!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            )))),
        }
    }

    async fn complete(
        &self,
        task: &Task,
        status: RunStatus,
        message: &str,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<RunStats, SchedulerError> {
        let patch = TaskPatch::completion(status, message, next_run_at);
        if let Err(e) = self.store.update(task.id, patch).await {
            error!(
                task_id = %task.id,
                task = %task.name,
                error = %e,
                "Failed to persist completion; task stays marked running"
            );
            return Err(e);
        }
        self.store.increment_run_counters(task.id, status).await
    }
}

fn failure_message(err: &SchedulerError) -> String {
    match err {
        SchedulerError::Handler(e) => e.message.clone(),
        other => other.to_string(),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use pacer_core::{Schedule, TaskConfig, TaskHandler, TaskType};
    use tokio::sync::Semaphore;

    use crate::evaluator::evaluate;
    use crate::memory_store::{MemoryRunHistory, MemoryTaskStore};

    struct OkHandler;

    #[async_trait]
    impl TaskHandler for OkHandler {
        fn name(&self) -> &str {
            "ok"
        }

        async fn execute(&self, _config: &TaskConfig) -> Result<HandlerOutcome, HandlerError> {
            Ok(HandlerOutcome {
                processed: 3,
                inserted: 1,
                updated: 2,
                message: "Processed 3 meetings".into(),
            })
        }
    }

    struct FailHandler(&'static str);

    #[async_trait]
    impl TaskHandler for FailHandler {
        fn name(&self) -> &str {
            "fail"
        }

        async fn execute(&self, _config: &TaskConfig) -> Result<HandlerOutcome, HandlerError> {
            Err(HandlerError::new(self.0))
        }
    }

    struct PanicHandler;

    #[async_trait]
    impl TaskHandler for PanicHandler {
        fn name(&self) -> &str {
            "panic"
        }

        async fn execute(&self, _config: &TaskConfig) -> Result<HandlerOutcome, HandlerError> {
            panic!("upstream returned garbage")
        }
    }

    /// Counts calls, then parks until the test hands out a permit.
    struct GatedHandler {
        calls: AtomicUsize,
        gate: Semaphore,
    }

    #[async_trait]
    impl TaskHandler for GatedHandler {
        fn name(&self) -> &str {
            "gated"
        }

        async fn execute(&self, _config: &TaskConfig) -> Result<HandlerOutcome, HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| HandlerError::new(e.to_string()))?;
            permit.forget();
            Ok(HandlerOutcome::message("done"))
        }
    }

    fn registry(handler: Arc<dyn TaskHandler>) -> Arc<HandlerRegistry> {
        Arc::new(
            HandlerRegistry::new()
                .with(TaskType::MeetingsImport, handler.clone())
                .with(TaskType::RatingsCheck, handler),
        )
    }

    async fn seeded(schedule: Schedule) -> (Arc<MemoryTaskStore>, Task) {
        let store = Arc::new(MemoryTaskStore::new());
        let task = store
            .insert(Task::new("import", TaskType::MeetingsImport, schedule))
            .await
            .unwrap();
        (store, task)
    }

    fn interval() -> Schedule {
        Schedule::Interval { interval_minutes: 30 }
    }

    fn daily() -> Schedule {
        Schedule::Cron {
            cron_expression: "0 6 * * *".into(),
        }
    }

    #[tokio::test]
    async fn success_persists_outcome_and_counters() {
        let (store, task) = seeded(interval()).await;
        let history = Arc::new(MemoryRunHistory::new());
        let executor = TaskExecutor::new(store.clone(), registry(Arc::new(OkHandler)))
            .with_history(history.clone());

        let report = executor.execute(task.clone()).await.unwrap();
        assert_eq!(report.status(), RunStatus::Success);

        let stored = store.get(task.id).await.unwrap().unwrap();
        assert!(!stored.is_running);
        assert_eq!(stored.last_run_status, RunStatus::Success);
        assert_eq!(stored.last_run_message.as_deref(), Some("Processed 3 meetings"));
        assert_eq!(stored.stats.successful_runs, 1);
        assert_eq!(stored.stats.total_runs, 1);
        assert!(stored.next_run_at.unwrap() > stored.last_run_at.unwrap());

        let runs = history.recent(task.id, 5).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].inserted, 1);
        assert_eq!(runs[0].updated, 2);
    }

    #[tokio::test]
    async fn failure_keeps_recurring_schedule_alive() {
        for schedule in [interval(), daily()] {
            let (store, task) = seeded(schedule).await;
            let executor =
                TaskExecutor::new(store.clone(), registry(Arc::new(FailHandler("upstream 503"))));

            let report = executor.execute(task.clone()).await.unwrap();
            assert_eq!(report.outcome, ExecutionOutcome::Failed("upstream 503".into()));

            let stored = store.get(task.id).await.unwrap().unwrap();
            assert!(!stored.is_running);
            assert_eq!(stored.last_run_status, RunStatus::Failed);
            assert_eq!(stored.last_run_message.as_deref(), Some("upstream 503"));
            assert_eq!(stored.stats.failed_runs, 1);
            let last = stored.last_run_at.unwrap();
            assert!(stored.next_run_at.unwrap() > last, "schedule {}", stored.schedule);
        }
    }

    #[tokio::test]
    async fn one_time_task_is_consumed_even_on_failure() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let (store, task) = seeded(Schedule::OneTime { scheduled_time: at }).await;
        let executor = TaskExecutor::new(store.clone(), registry(Arc::new(FailHandler("nope"))));

        executor.execute(task.clone()).await.unwrap();

        let stored = store.get(task.id).await.unwrap().unwrap();
        assert!(stored.last_run_at.is_some());
        assert_eq!(stored.next_run_at, None);
        let far_future = Utc.with_ymd_and_hms(2035, 1, 1, 0, 0, 0).unwrap();
        assert!(!evaluate(&stored, far_future).unwrap());
    }

    #[tokio::test]
    async fn unknown_task_type_fails_as_configuration_error() {
        let store = Arc::new(MemoryTaskStore::new());
        let mut task = Task::new("legacy", TaskType::MeetingsImport, interval());
        task.task_type = "form_scrape".into();
        let task = store.insert(task).await.unwrap();
        let executor = TaskExecutor::new(store.clone(), registry(Arc::new(OkHandler)));

        let report = executor.execute(task.clone()).await.unwrap();
        match report.outcome {
            ExecutionOutcome::Failed(msg) => assert!(msg.contains("configuration error")),
            other => panic!("expected failure, got {other:?}"),
        }
        let stored = store.get(task.id).await.unwrap().unwrap();
        assert_eq!(stored.stats.failed_runs, 1);
    }

    #[tokio::test]
    async fn panicking_handler_is_recorded_as_failure() {
        let (store, task) = seeded(interval()).await;
        let executor = TaskExecutor::new(store.clone(), registry(Arc::new(PanicHandler)));

        let report = executor.execute(task.clone()).await.unwrap();
        assert_eq!(report.status(), RunStatus::Failed);
        let stored = store.get(task.id).await.unwrap().unwrap();
        assert!(!stored.is_running);
        assert!(stored
            .last_run_message
            .unwrap()
            .contains("upstream returned garbage"));
    }

    #[tokio::test]
    async fn failure_message_is_redacted() {
        let (store, task) = seeded(interval()).await;
        let executor = TaskExecutor::new(
            store.clone(),
            registry(Arc::new(FailHandler(
                "error sending request for url (https://api.example.com/v2?apiKey=s3cr3t)",
            ))),
        );
        executor.execute(task.clone()).await.unwrap();
        let stored = store.get(task.id).await.unwrap().unwrap();
        assert!(!stored.last_run_message.unwrap().contains("s3cr3t"));
    }

    #[tokio::test]
    async fn totals_stay_consistent_across_mixed_runs() {
        let (store, task) = seeded(interval()).await;
        let ok = TaskExecutor::new(store.clone(), registry(Arc::new(OkHandler)));
        let bad = TaskExecutor::new(store.clone(), registry(Arc::new(FailHandler("x"))));

        for i in 0..7 {
            let current = store.get(task.id).await.unwrap().unwrap();
            if i % 3 == 0 {
                bad.execute(current).await.unwrap();
            } else {
                ok.execute(current).await.unwrap();
            }
        }
        let stats = store.get(task.id).await.unwrap().unwrap().stats;
        assert_eq!(stats.total_runs, 7);
        assert_eq!(stats.failed_runs, 3);
        assert_eq!(stats.total_runs, stats.successful_runs + stats.failed_runs);
    }

    /// Start an execution from `snapshot`, wait until its handler is parked,
    /// then start a second one from the same stale snapshot.
    async fn race(strategy: ClaimStrategy) -> (usize, ExecutionOutcome) {
        let (store, task) = seeded(interval()).await;
        let handler = Arc::new(GatedHandler {
            calls: AtomicUsize::new(0),
            gate: Semaphore::new(0),
        });
        let executor = Arc::new(
            TaskExecutor::new(store.clone(), registry(handler.clone()))
                .with_claim_strategy(strategy),
        );

        let first = {
            let executor = executor.clone();
            let snapshot = task.clone();
            tokio::spawn(async move { executor.execute(snapshot).await })
        };
        tokio::time::timeout(Duration::from_secs(5), async {
            while handler.calls.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let second = {
            let executor = executor.clone();
            let snapshot = task.clone();
            tokio::spawn(async move { executor.execute(snapshot).await })
        };
        if strategy == ClaimStrategy::Advisory {
            tokio::time::timeout(Duration::from_secs(5), async {
                while handler.calls.load(Ordering::SeqCst) < 2 {
                    tokio::task::yield_now().await;
                }
            })
            .await
            .unwrap();
        }
        handler.gate.add_permits(2);

        let second = second.await.unwrap().unwrap();
        first.await.unwrap().unwrap();
        (handler.calls.load(Ordering::SeqCst), second.outcome)
    }

    #[tokio::test]
    async fn advisory_claim_permits_double_invocation() {
        let (calls, second) = race(ClaimStrategy::Advisory).await;
        assert_eq!(calls, 2);
        assert!(matches!(second, ExecutionOutcome::Succeeded(_)));
    }

    #[tokio::test]
    async fn compare_and_set_claim_closes_the_race() {
        let (calls, second) = race(ClaimStrategy::CompareAndSet).await;
        assert_eq!(calls, 1);
        assert_eq!(second, ExecutionOutcome::Skipped);
    }

    #[test]
    fn claim_strategy_parses_config_names() {
        assert_eq!("advisory".parse::<ClaimStrategy>().unwrap(), ClaimStrategy::Advisory);
        assert_eq!(
            "compare_and_set".parse::<ClaimStrategy>().unwrap(),
            ClaimStrategy::CompareAndSet
        );
        assert!("optimistic".parse::<ClaimStrategy>().unwrap_err().is_client_error());
    }
}
