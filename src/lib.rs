#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Decision Jobs
//!
//! Durable, priority-aware job dispatch for the decision-intelligence
//! platform. Producers enqueue task envelopes onto named queues; a pool of
//! workers claims them in priority order, runs the matching handler against
//! the decision-engine backend and settles each envelope: completion with
//! atomically enqueued follow-ups, retry with backoff, or the dead set.
//!
//! ## Module Organization
//!
//! - [`messaging`] - task envelopes, queue names and the [`messaging::QueueStore`] backends
//! - [`dispatch`] - dispatcher, backoff, queue ordering and the worker pool
//! - [`handlers`] - one handler per job type and the cascade between them
//! - [`backend`] - HTTP client for the decision-engine API
//! - [`alerts`] - alert taxonomy and critical-alert notification
//! - [`status`] - consolidated task status lookup
//! - [`producer`] - validated enqueueing for API requests and the scheduler
//! - [`scheduler`] - recurring maintenance jobs
//! - [`web`] - producer API (axum)
//! - [`config`] - layered configuration
//! - [`logging`] - structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use decision_jobs::messaging::{MemoryQueueStore, TaskType};
//! use decision_jobs::producer::JobProducer;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryQueueStore::new());
//! let producer = JobProducer::new(store);
//! let queued = producer
//!     .enqueue(TaskType::RiskScoring, json!({"entity_id": "ent-42"}))
//!     .await?;
//! println!("queued {} on {}", queued.task_id, queued.queue);
//! # Ok(())
//! # }
//! ```

pub mod alerts;
pub mod backend;
pub mod config;
pub mod constants;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod messaging;
pub mod producer;
pub mod scheduler;
pub mod status;
pub mod test_helpers;
pub mod web;

pub use config::{AppConfig, ConfigurationError};
pub use error::{JobError, JobResult};
pub use messaging::{EnqueueRequest, QueueName, QueueStore, TaskEnvelope, TaskId, TaskType};
