//! # Messaging Module
//!
//! Durable named queues of task envelopes. The [`QueueStore`] trait is the
//! single source of truth for envelope state; the dispatcher, the producer
//! API and the status service all go through it.
//!
//! Two backends implement it:
//!
//! - [`PostgresQueueStore`]: durable, claims with `FOR UPDATE SKIP LOCKED`
//! - [`MemoryQueueStore`]: mutex-guarded state machine for tests and local runs
//!
//! ## Lifecycle
//!
//! ```text
//! enqueue ──► pending ──dequeue──► in_flight ──complete──► completed-job log
//!                ▲                    │  │
//!                │   requeue_with_delay  └──kill──► dead ──replay──► pending
//!                └──── retrying ◄─────┘
//! ```

pub mod envelope;
pub mod errors;
pub mod memory_store;
pub mod postgres_store;

pub use envelope::{
    max_attempts_for, Claim, CompletionRecord, EnqueueRequest, EnvelopeState, PurgeCounts,
    QueueDepth, QueueName, StoredEnvelope, TaskEnvelope, TaskId, TaskType,
};
pub use errors::{MessagingError, MessagingResult};
pub use memory_store::MemoryQueueStore;
pub use postgres_store::PostgresQueueStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Age limits applied by a retention pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetentionCutoffs {
    /// Completed-job log rows older than this are deleted
    pub job_log_before: DateTime<Utc>,
    /// Completed-job results older than this are cleared
    pub results_before: DateTime<Utc>,
    /// Dead envelopes that died before this are deleted
    pub dead_before: DateTime<Utc>,
}

/// Durable queue storage for task envelopes
///
/// Settlement calls (`requeue_with_delay`, `kill`, `complete`) must carry the
/// claim returned by `dequeue`. A claim that is no longer current is rejected
/// with [`MessagingError::LeaseLost`].
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Persist a new pending envelope and return its id
    async fn enqueue(&self, request: EnqueueRequest) -> MessagingResult<TaskId>;

    /// Atomically claim one eligible envelope from `queue`
    ///
    /// Eligible means pending or retrying with `run_at` in the past, or in
    /// flight with an expired lease.
    async fn dequeue(&self, queue: QueueName, worker_id: &str)
        -> MessagingResult<Option<TaskEnvelope>>;

    /// Push a claimed envelope's lease expiry one full lease past now
    ///
    /// Called while the handler is still running so a slow handler keeps its
    /// claim. Fails with [`MessagingError::LeaseLost`] once another worker holds it.
    async fn extend_lease(&self, envelope: &TaskEnvelope) -> MessagingResult<()>;

    /// Move a claimed envelope to the retry set, eligible again after `delay`
    async fn requeue_with_delay(
        &self,
        envelope: &TaskEnvelope,
        delay: Duration,
        error: &str,
    ) -> MessagingResult<()>;

    /// Move a claimed envelope to the dead set
    async fn kill(&self, envelope: &TaskEnvelope, error: &str) -> MessagingResult<()>;

    /// Remove a claimed envelope, log its completion and enqueue follow-ups atomically
    async fn complete(
        &self,
        envelope: &TaskEnvelope,
        completion: CompletionRecord,
        follow_ups: Vec<EnqueueRequest>,
    ) -> MessagingResult<Vec<TaskId>>;

    async fn find(&self, task_id: TaskId) -> MessagingResult<Option<StoredEnvelope>>;

    async fn find_completion(&self, task_id: TaskId) -> MessagingResult<Option<CompletionRecord>>;

    /// Dead envelopes, most recently died first
    async fn list_dead(&self, limit: usize) -> MessagingResult<Vec<StoredEnvelope>>;

    /// Move a dead envelope back to pending with a fresh attempt budget
    ///
    /// Returns `false` when `task_id` is not in the dead set.
    async fn replay_dead(&self, task_id: TaskId) -> MessagingResult<bool>;

    async fn queue_depths(&self) -> MessagingResult<Vec<QueueDepth>>;

    async fn purge_expired(&self, cutoffs: RetentionCutoffs) -> MessagingResult<PurgeCounts>;

    /// Verify the store is reachable
    async fn health_check(&self) -> MessagingResult<()>;
}
