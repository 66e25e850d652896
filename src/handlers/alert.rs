//! Alert handler: classify, post to the backend alert sink, and notify
//! synchronously for critical alerts.

use super::{backend_failure, parse_payload, HandlerOutcome, TaskHandler};
use crate::alerts::{AlertPriority, AlertRecord, Notifier};
use crate::backend::BackendApi;
use crate::error::{JobError, JobResult};
use crate::messaging::{TaskEnvelope, TaskType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertPayload {
    pub alert_type: String,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub data: Value,
    /// Overrides the priority derived from the alert type
    #[serde(default)]
    pub priority: Option<AlertPriority>,
}

pub struct AlertHandler {
    backend: Arc<dyn BackendApi>,
    notifier: Arc<dyn Notifier>,
}

impl AlertHandler {
    pub fn new(backend: Arc<dyn BackendApi>, notifier: Arc<dyn Notifier>) -> Self {
        Self { backend, notifier }
    }
}

#[async_trait]
impl TaskHandler for AlertHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Alert
    }

    async fn handle(&self, envelope: &TaskEnvelope) -> JobResult<HandlerOutcome> {
        let payload: AlertPayload = parse_payload(self.task_type(), &envelope.payload)?;
        let record = AlertRecord::new(
            &payload.alert_type,
            payload.entity_id,
            payload.data,
            payload.priority,
        );
        let context = format!(
            "alert_type={} entity_id={}",
            record.alert_type,
            record.entity_id.as_deref().unwrap_or("-")
        );

        let body = serde_json::to_value(&record)
            .map_err(|e| JobError::invalid_payload(self.task_type(), e))?;
        let response = self
            .backend
            .post("/alerts", &body)
            .await
            .map_err(backend_failure(self.task_type(), &context))?;

        let notified = record.is_critical();
        if notified {
            self.notifier.notify(&record).await;
        }

        info!(
            task_id = %envelope.task_id,
            alert_type = %record.alert_type,
            priority = ?record.priority,
            "Alert created"
        );

        Ok(HandlerOutcome::new(json!({
            "alert_id": response.get("id").cloned().unwrap_or(Value::Null),
            "alert_type": record.alert_type,
            "priority": record.priority,
            "category": record.category,
            "entity_id": record.entity_id,
            "notified": notified,
        })))
    }
}
