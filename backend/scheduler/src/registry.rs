use std::collections::HashMap;
use std::sync::Arc;

use pacer_core::{SchedulerError, TaskHandler, TaskType};

/// Registry of task handlers, looked up by task type.
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Bind a handler to a task type, replacing any previous binding.
    pub fn register(&mut self, task_type: TaskType, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(task_type, handler);
    }

    pub fn with(mut self, task_type: TaskType, handler: Arc<dyn TaskHandler>) -> Self {
        self.register(task_type, handler);
        self
    }

    /// Resolve a persisted type string to its handler.
    ///
    /// Unknown strings and known-but-unregistered types are configuration
    /// errors, never a silent skip.
    pub fn resolve(&self, task_type: &str) -> Result<Arc<dyn TaskHandler>, SchedulerError> {
        let kind: TaskType = task_type.parse()?;
        self.handlers.get(&kind).cloned().ok_or_else(|| {
            SchedulerError::Configuration(format!("no handler registered for task type {kind}"))
        })
    }

    /// Registered task types.
    pub fn list(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self.handlers.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
