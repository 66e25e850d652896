//! Shared integration test infrastructure.

#![allow(dead_code)]

use axum::Router;
use decision_jobs::dispatch::{BackoffCalculator, BackoffConfig, Dispatcher, ExecutionOutcome};
use decision_jobs::handlers::{default_registry, RetentionPolicy};
use decision_jobs::messaging::{MemoryQueueStore, QueueStore};
use decision_jobs::test_helpers::{FakeBackend, RecordingNotifier};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Serve `app` on an ephemeral localhost port
pub async fn spawn_server(app: Router) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server");
    });
    (addr, handle)
}

/// Backoff with no delay so retries are immediately eligible
pub fn no_backoff() -> BackoffCalculator {
    BackoffCalculator::new(BackoffConfig {
        base_delay_seconds: 0,
        jitter_seconds_per_attempt: 0,
    })
}

/// Production handlers over an in-memory store and a scripted backend
pub struct Harness {
    pub store: Arc<MemoryQueueStore>,
    pub backend: Arc<FakeBackend>,
    pub notifier: Arc<RecordingNotifier>,
    pub dispatcher: Dispatcher,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryQueueStore::new());
        let backend = Arc::new(FakeBackend::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let registry = default_registry(
            backend.clone(),
            store.clone() as Arc<dyn QueueStore>,
            notifier.clone(),
            RetentionPolicy::default(),
        );
        let dispatcher = Dispatcher::new(store.clone(), Arc::new(registry)).with_backoff(no_backoff());
        Self {
            store,
            backend,
            notifier,
            dispatcher,
        }
    }

    /// Process envelopes until every queue is idle
    pub async fn drain(&self) -> Vec<ExecutionOutcome> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self
            .dispatcher
            .process_next("harness")
            .await
            .expect("dispatch")
        {
            outcomes.push(outcome);
            assert!(outcomes.len() < 1000, "cascade did not settle");
        }
        outcomes
    }
}
