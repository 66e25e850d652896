//! Handler lookup by task type.

use crate::error::{JobError, JobResult};
use crate::handlers::TaskHandler;
use crate::messaging::TaskType;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("registered", &self.registered_types())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own task type, replacing any previous one
    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        let task_type = handler.task_type();
        debug!(task_type = %task_type, "Registering task handler");
        self.handlers.insert(task_type, handler);
    }

    pub fn get(&self, task_type: TaskType) -> JobResult<Arc<dyn TaskHandler>> {
        self.handlers
            .get(&task_type)
            .cloned()
            .ok_or_else(|| JobError::handler_not_found(task_type))
    }

    pub fn handler_available(&self, task_type: TaskType) -> bool {
        self.handlers.contains_key(&task_type)
    }

    /// Registered task types in declaration order
    pub fn registered_types(&self) -> Vec<TaskType> {
        TaskType::ALL
            .into_iter()
            .filter(|t| self.handlers.contains_key(t))
            .collect()
    }
}
