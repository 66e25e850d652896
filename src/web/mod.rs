//! # Producer API
//!
//! HTTP surface for enqueueing jobs, reading their status and operating the
//! dead set. Handlers only touch the queue store; nothing here waits on a
//! job to run.
//!
//! | route | purpose |
//! |---|---|
//! | `POST /v1/jobs/{kind}` | enqueue a job (202) |
//! | `GET /v1/jobs/{task_id}` | consolidated status |
//! | `GET /v1/dead` | dead envelopes, newest first |
//! | `POST /v1/dead/{task_id}/replay` | manual replay |
//! | `GET /v1/queues` | per-queue depth by state |
//! | `GET /health`, `/health/live`, `/health/ready` | probes |

pub mod errors;
pub mod handlers;
pub mod state;

pub use errors::{ApiError, ApiResult};
pub use state::AppState;

use axum::routing::{get, post};
use axum::Router;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Build the router with tracing and a per-request timeout
pub fn create_app(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        // one path segment serves both: a job kind on POST, a task id on GET
        .route(
            "/v1/jobs/:id",
            post(handlers::jobs::enqueue_job).get(handlers::jobs::get_job_status),
        )
        .route("/v1/dead", get(handlers::dead_letters::list_dead))
        .route(
            "/v1/dead/:task_id/replay",
            post(handlers::dead_letters::replay_dead),
        )
        .route("/v1/queues", get(handlers::queues::queue_depths))
        .route("/health", get(handlers::health::basic_health))
        .route("/health/live", get(handlers::health::liveness_probe))
        .route("/health/ready", get(handlers::health::readiness_probe))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
