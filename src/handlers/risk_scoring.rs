//! # Risk Scoring Handlers
//!
//! Single-entity scoring routes on the returned risk level:
//!
//! | risk level      | follow-on                                   |
//! |-----------------|---------------------------------------------|
//! | critical, high  | `Alert(high_risk_entity, priority=critical)` |
//! | medium          | `EnhancedDueDiligence`                      |
//! | low / other     | none                                        |
//!
//! Batch scoring only aggregates. A failed batch is logged and counted; the
//! job fails only when every batch failed.

use super::{array_field, backend_failure, parse_payload, required, HandlerOutcome, TaskHandler};
use crate::backend::{BackendApi, BackendError};
use crate::constants::handlers::BATCH_SCORING_SIZE;
use crate::error::{JobError, JobResult};
use crate::messaging::{EnqueueRequest, TaskEnvelope, TaskType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskScoringPayload {
    pub entity_id: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub context: Map<String, Value>,
}

pub struct RiskScoringHandler {
    backend: Arc<dyn BackendApi>,
}

impl RiskScoringHandler {
    pub fn new(backend: Arc<dyn BackendApi>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl TaskHandler for RiskScoringHandler {
    fn task_type(&self) -> TaskType {
        TaskType::RiskScoring
    }

    async fn handle(&self, envelope: &TaskEnvelope) -> JobResult<HandlerOutcome> {
        let payload: RiskScoringPayload = parse_payload(self.task_type(), &envelope.payload)?;
        let context = format!("entity_id={}", payload.entity_id);

        let mut entity = payload.attributes;
        entity.insert("id".to_string(), json!(payload.entity_id));

        let path = "/scoring/calculate";
        let response = self
            .backend
            .post(path, &json!({"entity": entity, "context": payload.context}))
            .await
            .map_err(backend_failure(self.task_type(), &context))?;

        let risk_level = required(&response, path, "risk_level")?
            .as_str()
            .map(str::to_lowercase)
            .ok_or_else(|| BackendError::invalid_response(path, "`risk_level` is not a string"))?;
        let overall_score = response.get("overall_score").cloned().unwrap_or(Value::Null);

        let (follow_up, follow_ups) = match risk_level.as_str() {
            "critical" | "high" => (
                Some("alert"),
                vec![EnqueueRequest::new(
                    TaskType::Alert,
                    json!({
                        "alert_type": "high_risk_entity",
                        "entity_id": payload.entity_id,
                        "priority": "critical",
                        "data": {
                            "overall_score": overall_score,
                            "risk_level": risk_level,
                            "explanation": response.get("explanation").cloned().unwrap_or(Value::Null),
                        },
                    }),
                )],
            ),
            "medium" => (
                Some("enhanced_due_diligence"),
                vec![EnqueueRequest::new(
                    TaskType::EnhancedDueDiligence,
                    json!({"entity_id": payload.entity_id}),
                )],
            ),
            _ => (None, Vec::new()),
        };

        info!(
            task_id = %envelope.task_id,
            entity_id = %payload.entity_id,
            risk_level = %risk_level,
            "Risk score calculated"
        );

        Ok(HandlerOutcome::new(json!({
            "entity_id": payload.entity_id,
            "overall_score": overall_score,
            "risk_level": risk_level,
            "follow_up": follow_up,
        }))
        .with_follow_ups(follow_ups))
    }
}

/// Input for batch jobs over a set of entities; `None` means "let the backend pick"
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityBatchPayload {
    #[serde(default)]
    pub entity_ids: Option<Vec<String>>,
}

pub struct BatchScoringHandler {
    backend: Arc<dyn BackendApi>,
    batch_size: usize,
}

impl BatchScoringHandler {
    pub fn new(backend: Arc<dyn BackendApi>) -> Self {
        Self {
            backend,
            batch_size: BATCH_SCORING_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    async fn entities_due(&self) -> JobResult<Vec<String>> {
        let response = self
            .backend
            .get("/entities/due-for-rescoring", &[])
            .await
            .map_err(backend_failure(TaskType::BatchScoring, "due-for-rescoring"))?;
        Ok(array_field(&response, "entity_ids")
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect())
    }
}

#[async_trait]
impl TaskHandler for BatchScoringHandler {
    fn task_type(&self) -> TaskType {
        TaskType::BatchScoring
    }

    async fn handle(&self, envelope: &TaskEnvelope) -> JobResult<HandlerOutcome> {
        let payload: EntityBatchPayload = parse_payload(self.task_type(), &envelope.payload)?;
        let entity_ids = match payload.entity_ids {
            Some(ids) => ids,
            None => self.entities_due().await?,
        };

        let mut batches = 0usize;
        let mut failed_batches = 0usize;
        let mut scored = 0usize;
        let mut score_total = 0.0;
        let mut by_risk_level: BTreeMap<String, usize> = BTreeMap::new();

        for chunk in entity_ids.chunks(self.batch_size) {
            batches += 1;
            let entities: Vec<Value> = chunk.iter().map(|id| json!({"id": id})).collect();
            let response = match self
                .backend
                .post("/scoring/batch", &json!({"entities": entities}))
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!(
                        task_id = %envelope.task_id,
                        batch = batches,
                        size = chunk.len(),
                        error = %e,
                        "Scoring batch failed"
                    );
                    failed_batches += 1;
                    continue;
                }
            };

            for score in array_field(&response, "scores") {
                scored += 1;
                score_total += score.get("overall_score").and_then(Value::as_f64).unwrap_or(0.0);
                let level = score
                    .get("risk_level")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_lowercase();
                *by_risk_level.entry(level).or_default() += 1;
            }
        }

        if batches > 0 && failed_batches == batches {
            return Err(JobError::handler_failed(
                self.task_type(),
                format!("all {batches} scoring batches failed"),
            ));
        }

        info!(
            task_id = %envelope.task_id,
            entities = entity_ids.len(),
            scored = scored,
            failed_batches = failed_batches,
            "Batch scoring completed"
        );

        let average_score = if scored > 0 {
            score_total / scored as f64
        } else {
            0.0
        };
        Ok(HandlerOutcome::new(json!({
            "entities_requested": entity_ids.len(),
            "entities_scored": scored,
            "batches": batches,
            "failed_batches": failed_batches,
            "by_risk_level": by_risk_level,
            "average_score": average_score,
        })))
    }
}
