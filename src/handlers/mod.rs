//! # Task Handlers
//!
//! One handler per [`TaskType`]. A handler turns an envelope payload into one
//! or more backend calls and decides which follow-on envelopes to enqueue
//! from the result. Handlers never retry on their own: backend failures are
//! logged with the task context and returned, and the dispatcher's retry
//! policy takes over.
//!
//! Payload shapes live next to their handlers. [`validate_payload`] parses a
//! raw payload against the shape for a task type so producers can reject bad
//! input before it reaches a queue.

pub mod alert;
pub mod cleanup;
pub mod due_diligence;
pub mod entity_resolution;
pub mod network;
pub mod risk_scoring;
pub mod screening;
pub mod transaction_analysis;

pub use alert::{AlertHandler, AlertPayload};
pub use cleanup::{CleanupHandler, RetentionPolicy};
pub use due_diligence::{EnhancedDueDiligenceHandler, EnhancedDueDiligencePayload};
pub use entity_resolution::{
    EntityResolutionHandler, EntityResolutionPayload, EntityResolutionSyncHandler,
};
pub use network::{
    NetworkAnalysisHandler, NetworkAnalysisPayload, NetworkGenerationHandler,
    NetworkGenerationPayload, NetworkRefreshHandler,
};
pub use risk_scoring::{BatchScoringHandler, EntityBatchPayload, RiskScoringHandler, RiskScoringPayload};
pub use screening::{BatchScreeningHandler, WatchlistSyncHandler, WatchlistSyncPayload};
pub use transaction_analysis::{TransactionAnalysisHandler, TransactionAnalysisPayload};

use crate::alerts::Notifier;
use crate::backend::{BackendApi, BackendError};
use crate::dispatch::HandlerRegistry;
use crate::error::{JobError, JobResult};
use crate::messaging::{EnqueueRequest, QueueStore, TaskEnvelope, TaskType};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::error;

/// Result of a successful handler run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerOutcome {
    /// Recorded in the completed-job log
    pub result: Value,
    /// Enqueued atomically with completion
    pub follow_ups: Vec<EnqueueRequest>,
}

impl HandlerOutcome {
    pub fn new(result: Value) -> Self {
        Self {
            result,
            follow_ups: Vec::new(),
        }
    }

    pub fn with_follow_ups(mut self, follow_ups: Vec<EnqueueRequest>) -> Self {
        self.follow_ups.extend(follow_ups);
        self
    }
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn task_type(&self) -> TaskType;

    async fn handle(&self, envelope: &TaskEnvelope) -> JobResult<HandlerOutcome>;
}

/// Payload for jobs that take no input; any object is accepted
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NoPayload {}

/// Deserialize an envelope payload into the handler's input shape
pub fn parse_payload<T: DeserializeOwned>(task_type: TaskType, payload: &Value) -> JobResult<T> {
    T::deserialize(payload).map_err(|e| JobError::invalid_payload(task_type, e))
}

/// Check `payload` against the input shape of `task_type`
pub fn validate_payload(task_type: TaskType, payload: &Value) -> JobResult<()> {
    match task_type {
        TaskType::EntityResolution => {
            parse_payload::<EntityResolutionPayload>(task_type, payload).map(drop)
        }
        TaskType::NetworkAnalysis => {
            parse_payload::<NetworkAnalysisPayload>(task_type, payload).map(drop)
        }
        TaskType::NetworkGeneration => {
            parse_payload::<NetworkGenerationPayload>(task_type, payload).map(drop)
        }
        TaskType::RiskScoring => parse_payload::<RiskScoringPayload>(task_type, payload).map(drop),
        TaskType::BatchScoring | TaskType::BatchScreening => {
            parse_payload::<EntityBatchPayload>(task_type, payload).map(drop)
        }
        TaskType::WatchlistSync => {
            parse_payload::<WatchlistSyncPayload>(task_type, payload).map(drop)
        }
        TaskType::TransactionAnalysis => {
            TransactionAnalysisPayload::parse(payload).map(drop)
        }
        TaskType::EnhancedDueDiligence => {
            parse_payload::<EnhancedDueDiligencePayload>(task_type, payload).map(drop)
        }
        TaskType::Alert => parse_payload::<AlertPayload>(task_type, payload).map(drop),
        TaskType::EntityResolutionSync | TaskType::NetworkRefresh | TaskType::Cleanup => {
            parse_payload::<NoPayload>(task_type, payload).map(drop)
        }
    }
}

/// Log a backend failure with task context, then hand it to the dispatcher
pub(crate) fn backend_failure<'a>(
    task_type: TaskType,
    context: &'a str,
) -> impl FnOnce(BackendError) -> JobError + 'a {
    move |err| {
        error!(
            task_type = %task_type,
            context = context,
            status = err.status(),
            transient = err.is_transient(),
            error = %err,
            "Backend call failed"
        );
        JobError::Backend(err)
    }
}

/// Required field of a backend response
pub(crate) fn required<'v>(body: &'v Value, path: &str, field: &str) -> JobResult<&'v Value> {
    body.get(field)
        .ok_or_else(|| BackendError::invalid_response(path, format!("missing `{field}`")).into())
}

/// Array field of a backend response, empty when absent
pub(crate) fn array_field<'v>(body: &'v Value, field: &str) -> &'v [Value] {
    body.get(field)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Registry holding every production handler
pub fn default_registry(
    backend: Arc<dyn BackendApi>,
    store: Arc<dyn QueueStore>,
    notifier: Arc<dyn Notifier>,
    retention: RetentionPolicy,
) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(EntityResolutionHandler::new(backend.clone())));
    registry.register(Arc::new(EntityResolutionSyncHandler::new(backend.clone())));
    registry.register(Arc::new(NetworkAnalysisHandler::new(backend.clone())));
    registry.register(Arc::new(NetworkGenerationHandler::new(backend.clone())));
    registry.register(Arc::new(NetworkRefreshHandler::new(backend.clone())));
    registry.register(Arc::new(RiskScoringHandler::new(backend.clone())));
    registry.register(Arc::new(BatchScoringHandler::new(backend.clone())));
    registry.register(Arc::new(BatchScreeningHandler::new(backend.clone())));
    registry.register(Arc::new(WatchlistSyncHandler::new(backend.clone())));
    registry.register(Arc::new(TransactionAnalysisHandler::new(backend.clone())));
    registry.register(Arc::new(EnhancedDueDiligenceHandler::new()));
    registry.register(Arc::new(AlertHandler::new(backend, notifier)));
    registry.register(Arc::new(CleanupHandler::new(store, retention)));
    registry
}
