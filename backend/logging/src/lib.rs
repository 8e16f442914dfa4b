//! Structured logging for Pacer.
//!
//! Console plus daily-rolling JSON file output, secret redaction, and the
//! `task_runs` event stream emitted by the executor.

pub mod logger;
pub mod redact;
pub mod run_events;

pub use logger::{init_logger, LoggerGuard};
pub use redact::redact_sensitive_data;
pub use run_events::{RunEvent, RunEventLogger};
