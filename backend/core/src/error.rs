use std::fmt;

use thiserror::Error;

use crate::types::TaskId;

/// Top-level error type for the Pacer scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Missing settings, unknown task type, unregistered handler.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// The task store could not be reached or rejected a statement.
    #[error("task store error: {0}")]
    Store(String),

    #[error("handler failed: {0}")]
    Handler(#[from] HandlerError),

    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("task already running: {0}")]
    AlreadyRunning(TaskId),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SchedulerError {
    pub fn store(err: impl fmt::Display) -> Self {
        SchedulerError::Store(err.to_string())
    }

    /// Errors caused by the caller's input rather than the runtime.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SchedulerError::Configuration(_)
                | SchedulerError::InvalidCron { .. }
                | SchedulerError::InvalidSchedule(_)
        )
    }
}

/// Failure reported by a task handler. The message is persisted verbatim
/// (after redaction) as the task's `last_run_message`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        // `{:#}` keeps the context chain on one line
        Self::new(format!("{err:#}"))
    }
}
