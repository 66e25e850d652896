//! Dead-set inspection and manual replay.

use crate::logging::log_job_operation;
use crate::messaging::{StoredEnvelope, TaskId};
use crate::web::errors::{ApiError, ApiResult};
use crate::web::state::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct DeadListQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct DeadEnvelopeResponse {
    pub task_id: TaskId,
    pub task_type: String,
    pub queue: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub error: Option<String>,
    pub died_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub payload: Value,
}

impl From<StoredEnvelope> for DeadEnvelopeResponse {
    fn from(stored: StoredEnvelope) -> Self {
        let env = stored.envelope;
        Self {
            task_id: env.task_id,
            task_type: env.task_type.to_string(),
            queue: env.queue.to_string(),
            attempts: env.attempts,
            max_attempts: env.max_attempts,
            error: stored.last_error,
            died_at: stored.died_at,
            created_at: env.created_at,
            payload: env.payload,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeadListResponse {
    pub dead: Vec<DeadEnvelopeResponse>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct ReplayResponse {
    pub task_id: TaskId,
    pub status: &'static str,
}

/// List dead envelopes: GET /v1/dead?limit=
pub async fn list_dead(
    State(state): State<AppState>,
    Query(query): Query<DeadListQuery>,
) -> ApiResult<Json<DeadListResponse>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let dead: Vec<DeadEnvelopeResponse> = state
        .store
        .list_dead(limit)
        .await?
        .into_iter()
        .map(DeadEnvelopeResponse::from)
        .collect();

    Ok(Json(DeadListResponse {
        count: dead.len(),
        dead,
    }))
}

/// Replay a dead envelope: POST /v1/dead/{task_id}/replay
pub async fn replay_dead(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<ReplayResponse>> {
    let task_id: TaskId = task_id.parse()?;
    if !state.store.replay_dead(task_id).await? {
        return Err(ApiError::not_found(format!("dead task {task_id}")));
    }

    log_job_operation(
        "replay",
        Some(&task_id.to_string()),
        None,
        None,
        "pending",
        Some("manual replay from dead set"),
    );
    Ok(Json(ReplayResponse {
        task_id,
        status: "pending",
    }))
}
