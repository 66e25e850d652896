//! # Job Handlers
//!
//! `POST /v1/jobs/{kind}` validates the body against the handler's input
//! shape and enqueues it; `GET /v1/jobs/{task_id}` reports status.

use crate::messaging::TaskId;
use crate::producer::EnqueuedJob;
use crate::status::TaskStatus;
use crate::web::errors::{ApiError, ApiResult};
use crate::web::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Serialize)]
pub struct TaskStatusResponse {
    pub task_id: TaskId,
    #[serde(flatten)]
    pub status: TaskStatus,
}

/// Enqueue a job: POST /v1/jobs/{kind}
///
/// An empty body is treated as `{}` so the parameterless jobs can be posted
/// without one.
pub async fn enqueue_job(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<EnqueuedJob>)> {
    let payload: Value = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Object(Default::default())
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {e}")))?
    };

    debug!(kind = %kind, "Enqueue request received");
    let queued = state.producer.enqueue_kind(&kind, payload).await?;
    Ok((StatusCode::ACCEPTED, Json(queued)))
}

/// Task status: GET /v1/jobs/{task_id}
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<TaskStatusResponse>> {
    let task_id: TaskId = task_id.parse()?;
    let status = state.status.get_status(task_id).await?;
    Ok(Json(TaskStatusResponse { task_id, status }))
}
