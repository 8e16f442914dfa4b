use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use pacer_core::{
    RunHistory, RunTrigger, SchedulerError, SchedulerStatus, Task, TaskFilter, TaskId, TaskStore,
};

use crate::evaluator::ScheduleEvaluator;
use crate::executor::{ExecutionReport, TaskExecutor};

/// Polling loop settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between dispatch cycles.
    pub poll_interval: Duration,
    /// How long run log entries are kept. `None` keeps everything.
    pub run_log_retention_days: Option<u32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            run_log_retention_days: Some(30),
        }
    }
}

const PRUNE_EVERY: Duration = Duration::from_secs(60 * 60);

struct Worker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Fixed-cadence dispatcher over the task store.
///
/// Each cycle loads active, not-running tasks, evaluates them and spawns one
/// executor per due task. The cycle does not wait for executions to finish.
pub struct Scheduler {
    store: Arc<dyn TaskStore>,
    evaluator: ScheduleEvaluator,
    executor: Arc<TaskExecutor>,
    config: SchedulerConfig,
    worker: Mutex<Option<Worker>>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn TaskStore>, executor: TaskExecutor, config: SchedulerConfig) -> Self {
        Self {
            store,
            evaluator: ScheduleEvaluator::new(),
            executor: Arc::new(executor),
            config,
            worker: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn history(&self) -> Option<&Arc<dyn RunHistory>> {
        self.executor.history()
    }

    /// Start the polling loop. Returns `false` if it was already running.
    pub async fn start(self: &Arc<Self>) -> bool {
        let mut worker = self.worker.lock().await;
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            debug!("Scheduler already running");
            return false;
        }

        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(self).run_loop(rx));
        *worker = Some(Worker { shutdown, handle });

        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            claim_strategy = ?self.executor.claim_strategy(),
            "Scheduler started"
        );
        true
    }

    /// Stop the polling loop and wait for it to exit. In-flight executions
    /// are detached and keep running.
    pub async fn stop(&self) {
        let Some(worker) = self.worker.lock().await.take() else {
            return;
        };
        let _ = worker.shutdown.send(true);
        if let Err(e) = worker.handle.await {
            error!(error = %e, "Scheduler loop ended abnormally");
        }
        info!("Scheduler stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    pub async fn status(&self) -> Result<SchedulerStatus, SchedulerError> {
        Ok(SchedulerStatus {
            running: self.is_running().await,
            active_tasks_count: self.store.count(&TaskFilter::active()).await?,
            running_tasks_count: self.store.count(&TaskFilter::running()).await?,
        })
    }

    async fn run_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut prune_ticker = time::interval(PRUNE_EVERY);
        prune_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(dispatched) if !dispatched.is_empty() => {
                            debug!(dispatched = dispatched.len(), "Cycle dispatched tasks");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Scheduler cycle failed; retrying next tick"),
                    }
                }
                _ = prune_ticker.tick() => self.prune_history().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// One dispatch pass. Returns the spawned executions; dropping the handles
    /// detaches them.
    pub async fn run_cycle(
        &self,
    ) -> Result<Vec<JoinHandle<Option<ExecutionReport>>>, SchedulerError> {
        let now = Utc::now();
        let candidates = self.store.query(&TaskFilter::dispatchable()).await?;
        let considered = candidates.len();

        let handles: Vec<_> = candidates
            .into_iter()
            .filter(|task| self.evaluator.is_due(task, now))
            .map(|task| self.spawn_execution(task, RunTrigger::Scheduled))
            .collect();

        debug!(considered, due = handles.len(), "Scheduler cycle evaluated");
        Ok(handles)
    }

    /// Dispatch a task immediately, outside its schedule.
    ///
    /// The running check is a fast rejection for callers; the executor's claim
    /// still decides who runs.
    pub async fn run_now(
        &self,
        id: TaskId,
    ) -> Result<JoinHandle<Option<ExecutionReport>>, SchedulerError> {
        let task = self
            .store
            .get(id)
            .await?
            .ok_or(SchedulerError::NotFound(id))?;
        if task.is_running {
            return Err(SchedulerError::AlreadyRunning(id));
        }
        info!(task_id = %id, task = %task.name, "Manual run requested");
        Ok(self.spawn_execution(task, RunTrigger::Manual))
    }

    fn spawn_execution(
        &self,
        task: Task,
        trigger: RunTrigger,
    ) -> JoinHandle<Option<ExecutionReport>> {
        let executor = Arc::clone(&self.executor);
        tokio::spawn(async move {
            let (id, name) = (task.id, task.name.clone());
            match executor.execute_as(task, trigger).await {
                Ok(report) => Some(report),
                Err(e) => {
                    error!(task_id = %id, task = %name, error = %e, "Task execution aborted");
                    None
                }
            }
        })
    }

    async fn prune_history(&self) {
        let (Some(history), Some(days)) =
            (self.executor.history(), self.config.run_log_retention_days)
        else {
            return;
        };
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
        match history.prune(cutoff).await {
            Ok(0) => {}
            Ok(n) => info!(removed = n, retention_days = days, "Pruned run log"),
            Err(e) => warn!(error = %e, "Run log pruning failed"),
        }
    }
}
