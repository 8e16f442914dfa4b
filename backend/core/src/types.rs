use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SchedulerError;

pub type TaskId = Uuid;

/// Opaque key/value bag handed verbatim to a task's handler.
pub type TaskConfig = serde_json::Map<String, serde_json::Value>;

/// The closed set of task types the scheduler knows how to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Refresh meeting data for a target date.
    MeetingsImport,
    /// Poll upstream for ratings changes and optionally re-import.
    RatingsCheck,
}

impl TaskType {
    pub const ALL: [TaskType; 2] = [TaskType::MeetingsImport, TaskType::RatingsCheck];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::MeetingsImport => "meetings_import",
            TaskType::RatingsCheck => "ratings_check",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| SchedulerError::Configuration(format!("unknown task type: {s}")))
    }
}

/// When a task fires. Exactly one parameter set exists per schedule type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "schedule_type", rename_all = "snake_case")]
pub enum Schedule {
    /// Calendar expression, e.g. "0 6 * * *"
    Cron { cron_expression: String },
    /// Fixed spacing measured from the previous attempt
    Interval { interval_minutes: u32 },
    /// Fires once at or after the given instant
    OneTime { scheduled_time: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Cron,
    Interval,
    OneTime,
}

impl ScheduleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleType::Cron => "cron",
            ScheduleType::Interval => "interval",
            ScheduleType::OneTime => "one_time",
        }
    }
}

impl Schedule {
    pub fn kind(&self) -> ScheduleType {
        match self {
            Schedule::Cron { .. } => ScheduleType::Cron,
            Schedule::Interval { .. } => ScheduleType::Interval,
            Schedule::OneTime { .. } => ScheduleType::OneTime,
        }
    }

    /// Human-readable summary for listings.
    pub fn describe(&self) -> String {
        match self {
            Schedule::Cron { cron_expression } => match cron_expression.trim() {
                "0 6 * * *" | "0 0 6 * * *" => "Daily at 6:00 AM".to_string(),
                "0 * * * *" | "0 0 * * * *" => "Every hour".to_string(),
                "0 */6 * * *" | "0 0 */6 * * *" => "Every 6 hours".to_string(),
                "0 0 * * 0" | "0 0 0 * * 0" => "Weekly on Sunday at midnight".to_string(),
                other => format!("Cron: {other}"),
            },
            Schedule::Interval { interval_minutes: 1 } => "Every minute".to_string(),
            Schedule::Interval { interval_minutes } => format!("Every {interval_minutes} minutes"),
            Schedule::OneTime { scheduled_time } => format!("Once at {}", scheduled_time.to_rfc3339()),
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Cron { cron_expression } => write!(f, "cron({cron_expression})"),
            Schedule::Interval { interval_minutes } => write!(f, "every {interval_minutes}m"),
            Schedule::OneTime { scheduled_time } => write!(f, "once({})", scheduled_time.to_rfc3339()),
        }
    }
}

/// Outcome of the most recent attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    None,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::None => "none",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(RunStatus::None),
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            other => Err(SchedulerError::Store(format!("unknown run status: {other}"))),
        }
    }
}

/// What started an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    /// Dispatched by the polling loop.
    #[default]
    Scheduled,
    /// Requested through `run_now`.
    Manual,
}

impl RunTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunTrigger::Scheduled => "scheduled",
            RunTrigger::Manual => "manual",
        }
    }
}

impl FromStr for RunTrigger {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(RunTrigger::Scheduled),
            "manual" => Ok(RunTrigger::Manual),
            other => Err(SchedulerError::Store(format!("unknown run trigger: {other}"))),
        }
    }
}

/// Run counters. `total_runs` always equals `successful_runs + failed_runs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
}

impl RunStats {
    pub fn record(&mut self, status: RunStatus) {
        match status {
            RunStatus::Success => self.successful_runs += 1,
            RunStatus::Failed => self.failed_runs += 1,
            RunStatus::None => return,
        }
        self.total_runs += 1;
    }
}

/// A persisted task definition with its run-state and statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    /// Kept as the raw persisted string so rows with a retired or unknown type
    /// still load and fail loudly at dispatch.
    pub task_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub schedule: Schedule,
    #[serde(default)]
    pub config: TaskConfig,
    pub is_active: bool,
    #[serde(default)]
    pub is_running: bool,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_run_status: RunStatus,
    #[serde(default)]
    pub last_run_message: Option<String>,
    #[serde(default)]
    pub next_run_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub stats: RunStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(name: impl Into<String>, task_type: TaskType, schedule: Schedule) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            task_type: task_type.as_str().to_string(),
            description: None,
            schedule,
            config: TaskConfig::new(),
            is_active: true,
            is_running: false,
            last_run_at: None,
            last_run_status: RunStatus::None,
            last_run_message: None,
            next_run_at: None,
            stats: RunStats::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_config(mut self, config: TaskConfig) -> Self {
        self.config = config;
        self
    }

    pub fn kind(&self) -> Result<TaskType, SchedulerError> {
        self.task_type.parse()
    }
}

/// Row selector for [`crate::TaskStore::query`]. `None` fields match anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub is_active: Option<bool>,
    pub is_running: Option<bool>,
}

impl TaskFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Active tasks not currently held by an executor.
    pub fn dispatchable() -> Self {
        Self {
            is_active: Some(true),
            is_running: Some(false),
        }
    }

    pub fn active() -> Self {
        Self {
            is_active: Some(true),
            is_running: None,
        }
    }

    pub fn running() -> Self {
        Self {
            is_active: None,
            is_running: Some(true),
        }
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.is_active.is_none_or(|v| v == task.is_active)
            && self.is_running.is_none_or(|v| v == task.is_running)
    }
}

/// Partial update. Outer `None` leaves a field untouched; for nullable columns
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<TaskConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_running: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_status: Option<RunStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_message: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<Option<DateTime<Utc>>>,
}

impl TaskPatch {
    /// The claim write: running flag plus attempt timestamp.
    pub fn claim(now: DateTime<Utc>) -> Self {
        Self {
            is_running: Some(true),
            last_run_at: Some(Some(now)),
            ..Default::default()
        }
    }

    /// The completion write. Counters are bumped separately.
    pub fn completion(
        status: RunStatus,
        message: impl Into<String>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            is_running: Some(false),
            last_run_status: Some(status),
            last_run_message: Some(Some(message.into())),
            next_run_at: Some(next_run_at),
            ..Default::default()
        }
    }

    /// Clears a stale running flag without touching anything else.
    pub fn release() -> Self {
        Self {
            is_running: Some(false),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, task: &mut Task) {
        if let Some(name) = &self.name {
            task.name = name.clone();
        }
        if let Some(task_type) = &self.task_type {
            task.task_type = task_type.clone();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(schedule) = &self.schedule {
            task.schedule = schedule.clone();
        }
        if let Some(config) = &self.config {
            task.config = config.clone();
        }
        if let Some(is_active) = self.is_active {
            task.is_active = is_active;
        }
        if let Some(is_running) = self.is_running {
            task.is_running = is_running;
        }
        if let Some(last_run_at) = self.last_run_at {
            task.last_run_at = last_run_at;
        }
        if let Some(status) = self.last_run_status {
            task.last_run_status = status;
        }
        if let Some(message) = &self.last_run_message {
            task.last_run_message = message.clone();
        }
        if let Some(next_run_at) = self.next_run_at {
            task.next_run_at = next_run_at;
        }
        task.updated_at = Utc::now();
    }
}

/// Structured result a handler returns on success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerOutcome {
    pub processed: u64,
    pub inserted: u64,
    pub updated: u64,
    pub message: String,
}

impl HandlerOutcome {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

/// One entry in the run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub task_id: TaskId,
    pub task_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    #[serde(default)]
    pub trigger: RunTrigger,
    pub processed: u64,
    pub inserted: u64,
    pub updated: u64,
    pub message: Option<String>,
}

impl RunRecord {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Snapshot exposed by the management surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub active_tasks_count: u64,
    pub running_tasks_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn task_serializes_flat_schedule_fields() {
        let task = Task::new(
            "daily import",
            TaskType::MeetingsImport,
            Schedule::Cron {
                cron_expression: "0 6 * * *".into(),
            },
        );
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["schedule_type"], "cron");
        assert_eq!(json["cron_expression"], "0 6 * * *");
        assert_eq!(json["task_type"], "meetings_import");
        assert_eq!(json["total_runs"], 0);

        let back: Task = serde_json::from_value(json).unwrap();
        assert_eq!(back.schedule, task.schedule);
    }

    #[test]
    fn unknown_task_type_is_a_configuration_error() {
        let err = "tide_sync".parse::<TaskType>().unwrap_err();
        assert!(matches!(err, SchedulerError::Configuration(_)));
        assert_eq!("ratings_check".parse::<TaskType>().unwrap(), TaskType::RatingsCheck);
    }

    #[test]
    fn stats_keep_total_consistent() {
        let mut stats = RunStats::default();
        for status in [RunStatus::Success, RunStatus::Failed, RunStatus::Success, RunStatus::None] {
            stats.record(status);
        }
        assert_eq!(stats.total_runs, 3);
        assert_eq!(stats.total_runs, stats.successful_runs + stats.failed_runs);
    }

    #[test]
    fn filter_matches_dispatchable_only() {
        let mut task = Task::new(
            "poll",
            TaskType::RatingsCheck,
            Schedule::Interval { interval_minutes: 30 },
        );
        assert!(TaskFilter::dispatchable().matches(&task));
        task.is_running = true;
        assert!(!TaskFilter::dispatchable().matches(&task));
        assert!(TaskFilter::running().matches(&task));
        task.is_active = false;
        assert!(!TaskFilter::active().matches(&task));
        assert!(TaskFilter::all().matches(&task));
    }

    #[test]
    fn patch_can_clear_nullable_fields() {
        let mut task = Task::new(
            "once",
            TaskType::MeetingsImport,
            Schedule::OneTime {
                scheduled_time: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            },
        );
        task.next_run_at = Some(Utc::now());
        TaskPatch::completion(RunStatus::Failed, "boom", None).apply(&mut task);
        assert_eq!(task.next_run_at, None);
        assert_eq!(task.last_run_status, RunStatus::Failed);
        assert_eq!(task.last_run_message.as_deref(), Some("boom"));
        assert!(!task.is_running);
    }

    #[test]
    fn schedule_descriptions() {
        let cron = Schedule::Cron {
            cron_expression: "0 0 6 * * *".into(),
        };
        assert_eq!(cron.describe(), "Daily at 6:00 AM");
        assert_eq!(
            Schedule::Interval { interval_minutes: 15 }.describe(),
            "Every 15 minutes"
        );
        assert_eq!(cron.to_string(), "cron(0 0 6 * * *)");
    }
}
