//! # Web API Application State

use crate::messaging::QueueStore;
use crate::producer::JobProducer;
use crate::status::StatusQueryService;
use std::sync::Arc;
use std::time::Instant;

/// Shared state for every request handler
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn QueueStore>,
    pub producer: JobProducer,
    pub status: StatusQueryService,
    pub environment: String,
    pub started_at: Instant,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("environment", &self.environment)
            .finish_non_exhaustive()
    }
}

impl AppState {
    pub fn new(store: Arc<dyn QueueStore>, environment: impl Into<String>) -> Self {
        Self {
            producer: JobProducer::new(store.clone()),
            status: StatusQueryService::new(store.clone()),
            store,
            environment: environment.into(),
            started_at: Instant::now(),
        }
    }
}
