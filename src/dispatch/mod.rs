//! # Dispatch
//!
//! Pulls envelopes from the queue store by priority and runs their handlers.
//!
//! ```text
//! WorkerPool ──► Dispatcher ──claim_next──► QueueStore (scan order from QueueOrdering)
//!                    │
//!                    ├──► HandlerRegistry ──► TaskHandler::handle
//!                    │
//!                    └──settle──► complete | requeue_with_delay (BackoffCalculator) | kill
//! ```

pub mod backoff;
pub mod dispatcher;
pub mod ordering;
pub mod registry;
pub mod worker_pool;

pub use backoff::{BackoffCalculator, BackoffConfig};
pub use dispatcher::{Dispatcher, ExecutionOutcome};
pub use ordering::{QueueOrdering, StrictPriority};
pub use registry::HandlerRegistry;
pub use worker_pool::WorkerPool;
