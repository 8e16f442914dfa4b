//! Shared types, traits and errors for the Pacer task scheduler.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{HandlerError, SchedulerError};
pub use traits::{RunHistory, TaskHandler, TaskStore};
pub use types::{
    HandlerOutcome, RunRecord, RunStats, RunStatus, RunTrigger, Schedule, ScheduleType, SchedulerStatus, Task,
    TaskConfig, TaskFilter, TaskId, TaskPatch, TaskType,
};
