pub mod cron_parser;
pub mod evaluator;
pub mod executor;
pub mod memory_store;
pub mod registry;
pub mod run_log;
pub mod scheduler;
pub mod task_store;

pub use cron_parser::{parse_cron, upcoming, validate_cron, CronSchedule};
pub use evaluator::{evaluate, next_run_after, validate_schedule, ScheduleEvaluator};
pub use executor::{ClaimStrategy, ExecutionOutcome, ExecutionReport, TaskExecutor};
pub use memory_store::{MemoryRunHistory, MemoryTaskStore};
pub use registry::HandlerRegistry;
pub use run_log::SqliteRunLog;
pub use scheduler::{Scheduler, SchedulerConfig};
pub use task_store::SqliteTaskStore;
