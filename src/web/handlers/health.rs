//! # Health Check Handlers
//!
//! Kubernetes-compatible probes. Readiness depends on the queue store, which
//! is also the durability dependency.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, error};

use crate::web::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct DetailedHealthResponse {
    status: String,
    timestamp: String,
    checks: HashMap<String, HealthCheck>,
    info: HealthInfo,
}

#[derive(Debug, Serialize)]
pub struct HealthCheck {
    status: String,
    message: Option<String>,
    duration_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct HealthInfo {
    version: String,
    environment: String,
    uptime_seconds: u64,
}

/// Service status with dependency checks: GET /health
///
/// Always 200; `status` is `degraded` when a dependency is down.
pub async fn basic_health(State(state): State<AppState>) -> Json<DetailedHealthResponse> {
    let (healthy, response) = detailed_health(&state, "healthy", "degraded").await;
    if !healthy {
        debug!("Health check reports degraded service");
    }
    Json(response)
}

/// Kubernetes liveness probe: GET /health/live
pub async fn liveness_probe() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "alive".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Kubernetes readiness probe: GET /health/ready
pub async fn readiness_probe(
    State(state): State<AppState>,
) -> (StatusCode, Json<DetailedHealthResponse>) {
    let (healthy, response) = detailed_health(&state, "ready", "not_ready").await;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

async fn detailed_health(
    state: &AppState,
    up: &str,
    down: &str,
) -> (bool, DetailedHealthResponse) {
    let mut checks = HashMap::new();
    let store_check = check_queue_store(state).await;
    let healthy = store_check.status == "healthy";
    checks.insert("queue_store".to_string(), store_check);

    let response = DetailedHealthResponse {
        status: if healthy { up } else { down }.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        checks,
        info: HealthInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: state.environment.clone(),
            uptime_seconds: state.started_at.elapsed().as_secs(),
        },
    };
    (healthy, response)
}

async fn check_queue_store(state: &AppState) -> HealthCheck {
    let start = Instant::now();
    match state.store.health_check().await {
        Ok(()) => HealthCheck {
            status: "healthy".to_string(),
            message: None,
            duration_ms: start.elapsed().as_millis() as u64,
        },
        Err(e) => {
            error!(error = %e, "Queue store health check failed");
            HealthCheck {
                status: "unhealthy".to_string(),
                message: Some(e.to_string()),
                duration_ms: start.elapsed().as_millis() as u64,
            }
        }
    }
}
