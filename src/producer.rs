//! Producer API: validate a job request and place it on its queue.
//!
//! Used by the HTTP routes and the scheduler. Enqueueing never waits on
//! handler execution.

use crate::error::{JobError, JobResult};
use crate::handlers::validate_payload;
use crate::messaging::{EnqueueRequest, QueueName, QueueStore, TaskId, TaskType};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Acknowledgement returned to a producer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnqueuedJob {
    pub task_id: TaskId,
    pub status: &'static str,
    pub task_type: TaskType,
    pub queue: QueueName,
}

#[derive(Clone)]
pub struct JobProducer {
    store: Arc<dyn QueueStore>,
}

impl std::fmt::Debug for JobProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobProducer").finish_non_exhaustive()
    }
}

impl JobProducer {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    /// Validate `payload` against the handler input and enqueue on the default queue
    pub async fn enqueue(&self, task_type: TaskType, payload: Value) -> JobResult<EnqueuedJob> {
        self.submit(EnqueueRequest::new(task_type, payload)).await
    }

    /// Enqueue by job kind (`risk-scoring`, `alerts`, ...)
    pub async fn enqueue_kind(&self, kind: &str, payload: Value) -> JobResult<EnqueuedJob> {
        let task_type =
            TaskType::from_job_kind(kind).ok_or_else(|| JobError::handler_not_found(kind))?;
        self.enqueue(task_type, payload).await
    }

    pub async fn submit(&self, request: EnqueueRequest) -> JobResult<EnqueuedJob> {
        validate_payload(request.task_type, &request.payload)?;

        let task_type = request.task_type;
        let queue = request.queue;
        let task_id = self.store.enqueue(request).await?;

        info!(
            task_id = %task_id,
            task_type = %task_type,
            queue = %queue,
            "Job queued"
        );

        Ok(EnqueuedJob {
            task_id,
            status: "queued",
            task_type,
            queue,
        })
    }
}
