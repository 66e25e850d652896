//! # Dispatcher
//!
//! Claims envelopes in priority order, runs the matching handler and settles
//! the envelope with the store:
//!
//! - success: `complete` with the handler's follow-ups (one atomic step)
//! - failure with attempts left: `requeue_with_delay` using the backoff
//! - failure on the last attempt: `kill`
//!
//! Handler panics are caught and treated as failures so a bad payload cannot
//! take a worker down.
//!
//! While a handler runs its lease is extended every `lease_renewal`, so only
//! a worker that stops making progress loses its claim.

use super::backoff::BackoffCalculator;
use super::ordering::{QueueOrdering, StrictPriority};
use super::registry::HandlerRegistry;
use crate::constants::DEFAULT_LEASE_SECONDS;
use crate::error::{JobError, JobResult};
use crate::handlers::HandlerOutcome;
use crate::messaging::{
    CompletionRecord, MessagingResult, QueueStore, TaskEnvelope, TaskId, TaskType,
};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// How an execution was settled
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed {
        task_id: TaskId,
        task_type: TaskType,
        follow_ups: Vec<TaskId>,
    },
    Retrying {
        task_id: TaskId,
        task_type: TaskType,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    Dead {
        task_id: TaskId,
        task_type: TaskType,
        attempt: u32,
        error: String,
    },
}

impl ExecutionOutcome {
    pub fn task_id(&self) -> TaskId {
        match self {
            ExecutionOutcome::Completed { task_id, .. }
            | ExecutionOutcome::Retrying { task_id, .. }
            | ExecutionOutcome::Dead { task_id, .. } => *task_id,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            ExecutionOutcome::Completed { .. } => "completed",
            ExecutionOutcome::Retrying { .. } => "retrying",
            ExecutionOutcome::Dead { .. } => "dead",
        }
    }
}

pub struct Dispatcher {
    store: Arc<dyn QueueStore>,
    registry: Arc<HandlerRegistry>,
    backoff: BackoffCalculator,
    ordering: Arc<dyn QueueOrdering>,
    lease_renewal: Duration,
    claims: AtomicU64,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("ordering", &self.ordering)
            .field("lease_renewal", &self.lease_renewal)
            .field("claims", &self.claims.load(Ordering::Relaxed))
            .finish()
    }
}

impl Dispatcher {
    pub fn new(store: Arc<dyn QueueStore>, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            store,
            registry,
            backoff: BackoffCalculator::default(),
            ordering: Arc::new(StrictPriority),
            lease_renewal: Duration::from_secs(DEFAULT_LEASE_SECONDS / 3),
            claims: AtomicU64::new(0),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffCalculator) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_ordering(mut self, ordering: Arc<dyn QueueOrdering>) -> Self {
        self.ordering = ordering;
        self
    }

    /// Interval between lease extensions; keep it well under the store's lease
    pub fn with_lease_renewal(mut self, interval: Duration) -> Self {
        self.lease_renewal = interval.max(Duration::from_millis(1));
        self
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    /// Claim the first eligible envelope, scanning queues by descending weight
    pub async fn claim_next(&self, worker_id: &str) -> MessagingResult<Option<TaskEnvelope>> {
        let cycle = self.claims.load(Ordering::Relaxed);
        for queue in self.ordering.scan_order(cycle) {
            if let Some(envelope) = self.store.dequeue(queue, worker_id).await? {
                self.claims.fetch_add(1, Ordering::Relaxed);
                debug!(
                    worker_id = worker_id,
                    task_id = %envelope.task_id,
                    queue = %queue,
                    "Claimed envelope"
                );
                return Ok(Some(envelope));
            }
        }
        Ok(None)
    }

    /// Run the handler for a claimed envelope and settle it
    pub async fn execute(&self, envelope: TaskEnvelope) -> JobResult<ExecutionOutcome> {
        let started = Instant::now();
        info!(
            task_id = %envelope.task_id,
            task_type = %envelope.task_type,
            queue = %envelope.queue,
            attempt = envelope.attempts + 1,
            max_attempts = envelope.max_attempts,
            "Task execution started"
        );

        let result = self.run_with_lease(&envelope).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(outcome) => self.settle_success(envelope, outcome, duration_ms).await,
            Err(err) => self.settle_failure(envelope, err, duration_ms).await,
        }
    }

    /// Claim and execute one envelope; `None` when every queue is idle
    pub async fn process_next(&self, worker_id: &str) -> JobResult<Option<ExecutionOutcome>> {
        match self.claim_next(worker_id).await? {
            Some(envelope) => self.execute(envelope).await.map(Some),
            None => Ok(None),
        }
    }

    /// Run the handler, extending the claim's lease until it returns
    async fn run_with_lease(&self, envelope: &TaskEnvelope) -> JobResult<HandlerOutcome> {
        let handler = self.run_handler(envelope);
        tokio::pin!(handler);

        let mut renewal = tokio::time::interval_at(
            tokio::time::Instant::now() + self.lease_renewal,
            self.lease_renewal,
        );
        renewal.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                result = &mut handler => return result,
                _ = renewal.tick() => {
                    match self.store.extend_lease(envelope).await {
                        Ok(()) => debug!(task_id = %envelope.task_id, "Lease extended"),
                        Err(e) => warn!(
                            task_id = %envelope.task_id,
                            error = %e,
                            "Lease extension failed"
                        ),
                    }
                }
            }
        }
    }

    async fn run_handler(&self, envelope: &TaskEnvelope) -> JobResult<HandlerOutcome> {
        let handler = self.registry.get(envelope.task_type)?;
        match AssertUnwindSafe(handler.handle(envelope)).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(JobError::handler_failed(
                envelope.task_type,
                "handler panicked",
            )),
        }
    }

    async fn settle_success(
        &self,
        envelope: TaskEnvelope,
        outcome: HandlerOutcome,
        duration_ms: u64,
    ) -> JobResult<ExecutionOutcome> {
        let completion = CompletionRecord::for_envelope(&envelope, duration_ms, outcome.result);
        let follow_ups = self
            .store
            .complete(&envelope, completion, outcome.follow_ups)
            .await?;

        info!(
            task_id = %envelope.task_id,
            task_type = %envelope.task_type,
            queue = %envelope.queue,
            duration_ms = duration_ms,
            follow_ups = follow_ups.len(),
            status = "completed",
            "Task execution finished"
        );

        Ok(ExecutionOutcome::Completed {
            task_id: envelope.task_id,
            task_type: envelope.task_type,
            follow_ups,
        })
    }

    async fn settle_failure(
        &self,
        mut envelope: TaskEnvelope,
        err: JobError,
        duration_ms: u64,
    ) -> JobResult<ExecutionOutcome> {
        envelope.attempts += 1;
        let attempt = envelope.attempts;
        let error = err.to_string();

        if envelope.attempts < envelope.max_attempts {
            let delay = self.backoff.delay_for(attempt);
            self.store
                .requeue_with_delay(&envelope, delay, &error)
                .await?;

            warn!(
                task_id = %envelope.task_id,
                task_type = %envelope.task_type,
                queue = %envelope.queue,
                attempt = attempt,
                max_attempts = envelope.max_attempts,
                delay_seconds = delay.as_secs(),
                duration_ms = duration_ms,
                status = "retrying",
                error = %error,
                "Task execution failed, scheduled for retry"
            );

            Ok(ExecutionOutcome::Retrying {
                task_id: envelope.task_id,
                task_type: envelope.task_type,
                attempt,
                delay,
                error,
            })
        } else {
            self.store.kill(&envelope, &error).await?;

            error!(
                task_id = %envelope.task_id,
                task_type = %envelope.task_type,
                queue = %envelope.queue,
                attempt = attempt,
                duration_ms = duration_ms,
                status = "dead",
                error = %error,
                "Task execution failed, attempts exhausted; moved to dead set"
            );

            Ok(ExecutionOutcome::Dead {
                task_id: envelope.task_id,
                task_type: envelope.task_type,
                attempt,
                error,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::BackoffConfig;
    use crate::handlers::TaskHandler;
    use crate::messaging::{EnqueueRequest, EnvelopeState, MemoryQueueStore, QueueName};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    struct ScriptedHandler {
        task_type: TaskType,
        fail: bool,
        calls: AtomicU32,
    }

    impl ScriptedHandler {
        fn new(task_type: TaskType, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                task_type,
                fail,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl TaskHandler for ScriptedHandler {
        fn task_type(&self) -> TaskType {
            self.task_type
        }

        async fn handle(&self, _envelope: &TaskEnvelope) -> JobResult<HandlerOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(JobError::handler_failed(self.task_type, "scripted failure"));
            }
            Ok(HandlerOutcome::new(json!({"ok": true})).with_follow_ups(vec![
                EnqueueRequest::new(TaskType::Alert, json!({"alert_type": "other"})),
            ]))
        }
    }

    fn dispatcher(store: Arc<MemoryQueueStore>, handlers: Vec<Arc<ScriptedHandler>>) -> Dispatcher {
        let mut registry = HandlerRegistry::new();
        for handler in handlers {
            registry.register(handler);
        }
        Dispatcher::new(store, Arc::new(registry)).with_backoff(BackoffCalculator::new(
            BackoffConfig {
                base_delay_seconds: 0,
                jitter_seconds_per_attempt: 0,
            },
        ))
    }

    #[tokio::test]
    async fn test_success_completes_and_enqueues_follow_ups() {
        let store = Arc::new(MemoryQueueStore::new());
        let handler = ScriptedHandler::new(TaskType::RiskScoring, false);
        let dispatcher = dispatcher(store.clone(), vec![handler.clone()]);

        let task_id = store
            .enqueue(EnqueueRequest::new(TaskType::RiskScoring, json!({"entity_id": "e"})))
            .await
            .unwrap();

        let outcome = dispatcher.process_next("w").await.unwrap().unwrap();
        let ExecutionOutcome::Completed { follow_ups, .. } = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(follow_ups.len(), 1);
        assert!(store.find(task_id).await.unwrap().is_none());
        assert!(store.find_completion(task_id).await.unwrap().is_some());
        assert_eq!(
            store.find(follow_ups[0]).await.unwrap().unwrap().envelope.queue,
            QueueName::Critical
        );
    }

    #[tokio::test]
    async fn test_failure_retries_then_dies() {
        let store = Arc::new(MemoryQueueStore::new());
        let handler = ScriptedHandler::new(TaskType::RiskScoring, true);
        let dispatcher = dispatcher(store.clone(), vec![handler.clone()]);

        let task_id = store
            .enqueue(EnqueueRequest::new(TaskType::RiskScoring, json!({"entity_id": "e"})))
            .await
            .unwrap();

        let first = dispatcher.process_next("w").await.unwrap().unwrap();
        assert!(matches!(first, ExecutionOutcome::Retrying { attempt: 1, .. }));
        store.make_due(task_id);
        let second = dispatcher.process_next("w").await.unwrap().unwrap();
        assert!(matches!(second, ExecutionOutcome::Retrying { attempt: 2, .. }));
        store.make_due(task_id);
        let third = dispatcher.process_next("w").await.unwrap().unwrap();
        assert!(matches!(third, ExecutionOutcome::Dead { attempt: 3, .. }));

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        let stored = store.find(task_id).await.unwrap().unwrap();
        assert_eq!(stored.state, EnvelopeState::Dead);
        assert_eq!(stored.envelope.attempts, 3);
        assert!(stored.last_error.unwrap().contains("scripted failure"));

        store.make_due(task_id);
        assert!(dispatcher.process_next("w").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_handler_is_a_failure() {
        let store = Arc::new(MemoryQueueStore::new());
        let dispatcher = dispatcher(store.clone(), vec![]);
        store
            .enqueue(EnqueueRequest::new(TaskType::Cleanup, json!({})))
            .await
            .unwrap();

        let outcome = dispatcher.process_next("w").await.unwrap().unwrap();
        let ExecutionOutcome::Retrying { error, .. } = outcome else {
            panic!("expected retry, got {outcome:?}");
        };
        assert!(error.contains("No handler registered"));
    }

    /// Sleeps well past the store lease before succeeding
    struct SlowHandler {
        calls: AtomicU32,
    }

    #[async_trait]
    impl TaskHandler for SlowHandler {
        fn task_type(&self) -> TaskType {
            TaskType::NetworkAnalysis
        }

        async fn handle(&self, _envelope: &TaskEnvelope) -> JobResult<HandlerOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(HandlerOutcome::new(json!({"done": true})))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_handler_keeps_its_claim() {
        let store = Arc::new(MemoryQueueStore::new().with_lease(Duration::from_millis(100)));
        let handler = Arc::new(SlowHandler {
            calls: AtomicU32::new(0),
        });
        let mut registry = HandlerRegistry::new();
        registry.register(handler.clone());
        let dispatcher = Arc::new(
            Dispatcher::new(store.clone(), Arc::new(registry))
                .with_lease_renewal(Duration::from_millis(30)),
        );
        let task_id = store
            .enqueue(EnqueueRequest::new(
                TaskType::NetworkAnalysis,
                json!({"entity_id": "e"}),
            ))
            .await
            .unwrap();

        let first = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.process_next("w1").await }
        });
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(dispatcher.process_next("w2").await.unwrap().is_none());

        let outcome = first.await.unwrap().unwrap().unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Completed { .. }));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert!(store.find_completion(task_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_claims_critical_before_low() {
        let store = Arc::new(MemoryQueueStore::new());
        let dispatcher = dispatcher(store.clone(), vec![]);
        store
            .enqueue(EnqueueRequest::new(TaskType::Cleanup, json!({})))
            .await
            .unwrap();
        store
            .enqueue(EnqueueRequest::new(TaskType::Alert, json!({"alert_type": "x"})))
            .await
            .unwrap();

        let first = dispatcher.claim_next("w").await.unwrap().unwrap();
        assert_eq!(first.queue, QueueName::Critical);
        let second = dispatcher.claim_next("w").await.unwrap().unwrap();
        assert_eq!(second.queue, QueueName::Low);
    }
}
