//! Task run events
//!
//! One structured line per lifecycle step of an execution attempt, emitted on
//! the `task_runs` target so it can be filtered or routed separately.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::redact::redact_sensitive_data;

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Claimed,
    /// Another executor held the task; nothing ran.
    Skipped { reason: String },
    Succeeded { message: String, duration_ms: i64 },
    Failed { error: String, duration_ms: i64 },
}

#[derive(Debug, Serialize)]
pub struct RunEventEntry<'a> {
    pub task_id: Uuid,
    pub task_name: &'a str,
    pub timestamp: DateTime<Utc>,
    pub event: RunEvent,
}

pub struct RunEventLogger;

impl RunEventLogger {
    /// Redacts message text and writes the event through `tracing`.
    pub fn log(task_id: Uuid, task_name: &str, mut event: RunEvent) {
        match &mut event {
            RunEvent::Succeeded { message, .. } => *message = redact_sensitive_data(message),
            RunEvent::Failed { error, .. } => *error = redact_sensitive_data(error),
            RunEvent::Claimed | RunEvent::Skipped { .. } => {}
        }

        let failed = matches!(event, RunEvent::Failed { .. });
        let entry = RunEventEntry {
            task_id,
            task_name,
            timestamp: Utc::now(),
            event,
        };
        let payload = serde_json::to_string(&entry).unwrap_or_default();

        if failed {
            warn!(target: "task_runs", task_id = %task_id, event = %payload, "Task run event");
        } else {
            info!(target: "task_runs", task_id = %task_id, event = %payload, "Task run event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let entry = RunEventEntry {
            task_id: Uuid::nil(),
            task_name: "import",
            timestamp: Utc::now(),
            event: RunEvent::Failed {
                error: "timeout".into(),
                duration_ms: 30_000,
            },
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["event"]["type"], "failed");
        assert_eq!(json["event"]["error"], "timeout");
    }
}
