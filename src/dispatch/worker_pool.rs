//! # Worker Pool
//!
//! Fixed number of tokio tasks sharing one [`Dispatcher`]. Each worker loops:
//! claim, execute, repeat; when every queue is idle it sleeps one poll
//! interval. Shutdown goes through a `watch` channel: workers stop claiming
//! new envelopes, and a handler already running finishes and is settled.

use super::dispatcher::Dispatcher;
use crate::logging::log_error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.joins.len())
            .finish()
    }
}

impl WorkerPool {
    /// Spawn `n` workers named `{service_id}-{index}`
    pub fn spawn(
        n: usize,
        service_id: &str,
        dispatcher: Arc<Dispatcher>,
        poll_interval: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let joins = (0..n)
            .map(|index| {
                let worker_id = format!("{service_id}-{index}");
                let dispatcher = Arc::clone(&dispatcher);
                let rx = shutdown_rx.clone();
                tokio::spawn(worker_loop(worker_id, dispatcher, poll_interval, rx))
            })
            .collect();

        info!(workers = n, service_id = service_id, "Worker pool started");
        Self { shutdown_tx, joins }
    }

    pub fn size(&self) -> usize {
        self.joins.len()
    }

    /// Stop claiming new envelopes; running handlers are not cancelled
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Request shutdown and wait for every worker to finish its current envelope
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                error!(error = %e, "Worker task ended abnormally");
            }
        }
        info!("Worker pool stopped");
    }
}

async fn worker_loop(
    worker_id: String,
    dispatcher: Arc<Dispatcher>,
    poll_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!(worker_id = %worker_id, "Worker started");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let idle = match dispatcher.process_next(&worker_id).await {
            Ok(Some(_)) => false,
            Ok(None) => true,
            Err(e) => {
                log_error("worker_pool", "process_next", &e.to_string(), Some(&worker_id));
                true
            }
        };

        if idle {
            tokio::select! {
                _ = shutdown_rx.changed() => {}
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    debug!(worker_id = %worker_id, "Worker stopped");
}
