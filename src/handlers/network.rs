//! Network handlers: per-entity analysis, network generation and the
//! scheduled refresh that feeds analyses for stale entities.

use super::{array_field, backend_failure, parse_payload, HandlerOutcome, NoPayload, TaskHandler};
use crate::backend::{path_segment, BackendApi};
use crate::constants::handlers::{DEFAULT_NETWORK_DEPTH, HIGH_RISK_NETWORK_EXPOSURE};
use crate::error::JobResult;
use crate::messaging::{EnqueueRequest, TaskEnvelope, TaskType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

fn default_depth() -> u32 {
    DEFAULT_NETWORK_DEPTH
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkAnalysisPayload {
    pub entity_id: String,
    #[serde(default = "default_depth")]
    pub depth: u32,
}

pub struct NetworkAnalysisHandler {
    backend: Arc<dyn BackendApi>,
}

impl NetworkAnalysisHandler {
    pub fn new(backend: Arc<dyn BackendApi>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl TaskHandler for NetworkAnalysisHandler {
    fn task_type(&self) -> TaskType {
        TaskType::NetworkAnalysis
    }

    async fn handle(&self, envelope: &TaskEnvelope) -> JobResult<HandlerOutcome> {
        let payload: NetworkAnalysisPayload = parse_payload(self.task_type(), &envelope.payload)?;
        let context = format!("entity_id={}", payload.entity_id);

        let response = self
            .backend
            .post(
                &format!("/network/analyze/{}", path_segment(&payload.entity_id)),
                &json!({"depth": payload.depth}),
            )
            .await
            .map_err(backend_failure(self.task_type(), &context))?;

        let connected = array_field(&response, "connected_entities").len();
        let risk_exposure = response
            .pointer("/metrics/risk_exposure")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);

        let mut outcome = HandlerOutcome::new(json!({
            "entity_id": payload.entity_id,
            "depth": payload.depth,
            "connected_entity_count": connected,
            "risk_exposure": risk_exposure,
            "alert_queued": risk_exposure > HIGH_RISK_NETWORK_EXPOSURE,
        }));

        if risk_exposure > HIGH_RISK_NETWORK_EXPOSURE {
            info!(
                entity_id = %payload.entity_id,
                risk_exposure = risk_exposure,
                "High network risk exposure, raising alert"
            );
            outcome.follow_ups.push(EnqueueRequest::new(
                TaskType::Alert,
                json!({
                    "alert_type": "high_risk_network",
                    "entity_id": payload.entity_id,
                    "data": {
                        "risk_exposure": risk_exposure,
                        "connected_entity_count": connected,
                        "depth": payload.depth,
                    },
                }),
            ));
        }
        Ok(outcome)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkGenerationOptions {
    #[serde(default = "default_true")]
    pub run_inference: bool,
    #[serde(default)]
    pub transactions: Vec<Value>,
    /// Store the generated network in the graph store
    #[serde(default)]
    pub persist: bool,
}

impl Default for NetworkGenerationOptions {
    fn default() -> Self {
        Self {
            run_inference: true,
            transactions: Vec::new(),
            persist: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkGenerationPayload {
    pub nodes: Vec<Value>,
    #[serde(default)]
    pub edges: Vec<Value>,
    #[serde(default)]
    pub options: NetworkGenerationOptions,
}

pub struct NetworkGenerationHandler {
    backend: Arc<dyn BackendApi>,
}

impl NetworkGenerationHandler {
    pub fn new(backend: Arc<dyn BackendApi>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl TaskHandler for NetworkGenerationHandler {
    fn task_type(&self) -> TaskType {
        TaskType::NetworkGeneration
    }

    async fn handle(&self, envelope: &TaskEnvelope) -> JobResult<HandlerOutcome> {
        let payload: NetworkGenerationPayload =
            parse_payload(self.task_type(), &envelope.payload)?;
        let context = format!("nodes={} edges={}", payload.nodes.len(), payload.edges.len());

        let response = self
            .backend
            .post(
                "/network/generate",
                &json!({
                    "nodes": payload.nodes,
                    "edges": payload.edges,
                    "run_inference": payload.options.run_inference,
                    "transactions": payload.options.transactions,
                }),
            )
            .await
            .map_err(backend_failure(self.task_type(), &context))?;

        let summary = response.get("summary").cloned().unwrap_or(Value::Null);
        let inferred = array_field(&response, "inferred_relationships").len();

        // Persistence is best-effort; the generated network is still returned.
        let mut persisted = false;
        if payload.options.persist {
            let network = response.get("network").cloned().unwrap_or(Value::Null);
            match self
                .backend
                .post("/graph/networks", &json!({"network": network, "summary": summary}))
                .await
            {
                Ok(_) => persisted = true,
                Err(e) => warn!(task_id = %envelope.task_id, error = %e, "Network persistence failed"),
            }
        }

        Ok(HandlerOutcome::new(json!({
            "node_count": summary.get("node_count").cloned().unwrap_or(Value::Null),
            "edge_count": summary.get("edge_count").cloned().unwrap_or(Value::Null),
            "inferred_relationship_count": inferred,
            "persisted": persisted,
        })))
    }
}

/// Queues a network analysis for every entity the backend reports as stale
pub struct NetworkRefreshHandler {
    backend: Arc<dyn BackendApi>,
}

impl NetworkRefreshHandler {
    pub fn new(backend: Arc<dyn BackendApi>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl TaskHandler for NetworkRefreshHandler {
    fn task_type(&self) -> TaskType {
        TaskType::NetworkRefresh
    }

    async fn handle(&self, envelope: &TaskEnvelope) -> JobResult<HandlerOutcome> {
        parse_payload::<NoPayload>(self.task_type(), &envelope.payload)?;

        let response = self
            .backend
            .get("/entities/due-for-network-refresh", &[])
            .await
            .map_err(backend_failure(self.task_type(), "network refresh"))?;

        let follow_ups: Vec<EnqueueRequest> = array_field(&response, "entity_ids")
            .iter()
            .filter_map(Value::as_str)
            .map(|entity_id| {
                EnqueueRequest::new(
                    TaskType::NetworkAnalysis,
                    json!({"entity_id": entity_id, "depth": DEFAULT_NETWORK_DEPTH}),
                )
            })
            .collect();

        info!(entities = follow_ups.len(), "Network refresh queued analyses");
        Ok(HandlerOutcome::new(json!({"entities_queued": follow_ups.len()}))
            .with_follow_ups(follow_ups))
    }
}
