use crate::messaging::QueueDepth;
use crate::web::errors::ApiResult;
use crate::web::state::AppState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct QueueDepthsResponse {
    pub queues: Vec<QueueDepth>,
}

/// Per-queue depth by state: GET /v1/queues
pub async fn queue_depths(State(state): State<AppState>) -> ApiResult<Json<QueueDepthsResponse>> {
    let queues = state.store.queue_depths().await?;
    Ok(Json(QueueDepthsResponse { queues }))
}
