//! # Entity Resolution Handlers
//!
//! `EntityResolution` sends a batch of source records to the backend matcher
//! and fans out per resolved entity: a risk score for every entity, plus a
//! network analysis when the match confidence is high.
//!
//! `EntityResolutionSync` is the scheduled feeder: it pages through pending
//! records of each source system and enqueues one `EntityResolution` per
//! page. A failing source is logged and skipped; the others still sync.

use super::{array_field, backend_failure, parse_payload, HandlerOutcome, NoPayload, TaskHandler};
use crate::backend::{path_segment, BackendApi};
use crate::constants::handlers::{
    DEFAULT_MATCH_THRESHOLD, DEFAULT_NETWORK_DEPTH, NETWORK_ANALYSIS_CONFIDENCE,
    RESOLUTION_SYNC_BATCH_SIZE, RESOLUTION_SYNC_MAX_BATCHES,
};
use crate::constants::{DEFAULT_BLOCKING_STRATEGIES, RESOLUTION_SOURCE_SYSTEMS};
use crate::error::JobResult;
use crate::messaging::{EnqueueRequest, TaskEnvelope, TaskType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

fn default_match_threshold() -> f64 {
    DEFAULT_MATCH_THRESHOLD
}

fn default_blocking_strategies() -> Vec<String> {
    DEFAULT_BLOCKING_STRATEGIES
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityResolutionPayload {
    pub records: Vec<Value>,
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,
    #[serde(default = "default_blocking_strategies")]
    pub blocking_strategies: Vec<String>,
}

pub struct EntityResolutionHandler {
    backend: Arc<dyn BackendApi>,
}

impl EntityResolutionHandler {
    pub fn new(backend: Arc<dyn BackendApi>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl TaskHandler for EntityResolutionHandler {
    fn task_type(&self) -> TaskType {
        TaskType::EntityResolution
    }

    async fn handle(&self, envelope: &TaskEnvelope) -> JobResult<HandlerOutcome> {
        let payload: EntityResolutionPayload = parse_payload(self.task_type(), &envelope.payload)?;
        let context = format!("records={}", payload.records.len());

        let response = self
            .backend
            .post(
                "/entity-resolution",
                &json!({
                    "records": payload.records,
                    "match_threshold": payload.match_threshold,
                    "blocking_strategies": payload.blocking_strategies,
                }),
            )
            .await
            .map_err(backend_failure(self.task_type(), &context))?;

        let mut follow_ups = Vec::new();
        let mut network_analyses = 0;
        let mut risk_scorings = 0;

        for entity in array_field(&response, "resolved_entities") {
            let Some(resolved_id) = entity.get("resolved_id").and_then(Value::as_str) else {
                warn!(task_id = %envelope.task_id, "Resolved entity without resolved_id, skipping");
                continue;
            };
            let confidence = entity
                .get("confidence_score")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);

            if confidence >= NETWORK_ANALYSIS_CONFIDENCE {
                follow_ups.push(EnqueueRequest::new(
                    TaskType::NetworkAnalysis,
                    json!({"entity_id": resolved_id, "depth": DEFAULT_NETWORK_DEPTH}),
                ));
                network_analyses += 1;
            }

            let attributes = entity
                .get("attributes")
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::new()));
            follow_ups.push(EnqueueRequest::new(
                TaskType::RiskScoring,
                json!({"entity_id": resolved_id, "attributes": attributes}),
            ));
            risk_scorings += 1;
        }

        info!(
            task_id = %envelope.task_id,
            resolved = risk_scorings,
            network_analyses = network_analyses,
            "Entity resolution completed"
        );

        Ok(HandlerOutcome::new(json!({
            "input_record_count": response.get("input_record_count").cloned().unwrap_or(Value::Null),
            "resolved_entity_count": response.get("resolved_entity_count").cloned().unwrap_or(Value::Null),
            "resolution_rate": response.get("resolution_rate").cloned().unwrap_or(Value::Null),
            "network_analyses_queued": network_analyses,
            "risk_scorings_queued": risk_scorings,
        }))
        .with_follow_ups(follow_ups))
    }
}

/// Per-source outcome of a sync run
#[derive(Debug, Default, Serialize)]
struct SourceSync {
    records: usize,
    batches: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub struct EntityResolutionSyncHandler {
    backend: Arc<dyn BackendApi>,
    batch_size: usize,
    max_batches: usize,
}

impl EntityResolutionSyncHandler {
    pub fn new(backend: Arc<dyn BackendApi>) -> Self {
        Self {
            backend,
            batch_size: RESOLUTION_SYNC_BATCH_SIZE,
            max_batches: RESOLUTION_SYNC_MAX_BATCHES,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    async fn sync_source(&self, source: &str, follow_ups: &mut Vec<EnqueueRequest>) -> SourceSync {
        let path = format!("/sources/{}/pending-records", path_segment(source));
        let mut sync = SourceSync::default();

        while sync.batches < self.max_batches {
            let query = [
                ("limit", self.batch_size.to_string()),
                ("offset", sync.records.to_string()),
            ];
            let response = match self.backend.get(&path, &query).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(source = source, error = %e, "Pending record fetch failed, skipping source");
                    sync.error = Some(e.to_string());
                    break;
                }
            };

            let records = array_field(&response, "records");
            if records.is_empty() {
                break;
            }

            follow_ups.push(EnqueueRequest::new(
                TaskType::EntityResolution,
                json!({"records": records}),
            ));
            sync.records += records.len();
            sync.batches += 1;

            if records.len() < self.batch_size {
                break;
            }
        }
        sync
    }
}

#[async_trait]
impl TaskHandler for EntityResolutionSyncHandler {
    fn task_type(&self) -> TaskType {
        TaskType::EntityResolutionSync
    }

    async fn handle(&self, envelope: &TaskEnvelope) -> JobResult<HandlerOutcome> {
        parse_payload::<NoPayload>(self.task_type(), &envelope.payload)?;

        let mut follow_ups = Vec::new();
        let mut sources = Map::new();
        for source in RESOLUTION_SOURCE_SYSTEMS {
            let sync = self.sync_source(source, &mut follow_ups).await;
            sources.insert(source.to_string(), json!(sync));
        }

        info!(
            task_id = %envelope.task_id,
            batches = follow_ups.len(),
            "Entity resolution sync completed"
        );

        Ok(HandlerOutcome::new(json!({
            "sources": sources,
            "batches_enqueued": follow_ups.len(),
        }))
        .with_follow_ups(follow_ups))
    }
}
