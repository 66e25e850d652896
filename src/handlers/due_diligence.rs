//! Enhanced due diligence: a deep network analysis and a year of
//! transactions with counterparty analysis, plus the manual checks an
//! analyst still has to complete.

use super::{parse_payload, HandlerOutcome, TaskHandler};
use crate::constants::handlers::{EDD_LOOKBACK_DAYS, EDD_NETWORK_DEPTH};
use crate::constants::EDD_MANUAL_CHECKS;
use crate::error::JobResult;
use crate::messaging::{EnqueueRequest, TaskEnvelope, TaskType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancedDueDiligencePayload {
    pub entity_id: String,
}

#[derive(Debug, Default)]
pub struct EnhancedDueDiligenceHandler;

impl EnhancedDueDiligenceHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TaskHandler for EnhancedDueDiligenceHandler {
    fn task_type(&self) -> TaskType {
        TaskType::EnhancedDueDiligence
    }

    async fn handle(&self, envelope: &TaskEnvelope) -> JobResult<HandlerOutcome> {
        let payload: EnhancedDueDiligencePayload =
            parse_payload(self.task_type(), &envelope.payload)?;

        let follow_ups = vec![
            EnqueueRequest::new(
                TaskType::NetworkAnalysis,
                json!({"entity_id": payload.entity_id, "depth": EDD_NETWORK_DEPTH}),
            ),
            EnqueueRequest::new(
                TaskType::TransactionAnalysis,
                json!({
                    "entity_id": payload.entity_id,
                    "lookback_days": EDD_LOOKBACK_DAYS,
                    "include_counterparties": true,
                }),
            ),
        ];

        let manual_checks: Vec<_> = EDD_MANUAL_CHECKS
            .iter()
            .map(|check| json!({"check": check, "status": "pending"}))
            .collect();

        info!(
            task_id = %envelope.task_id,
            entity_id = %payload.entity_id,
            "Enhanced due diligence initiated"
        );

        Ok(HandlerOutcome::new(json!({
            "entity_id": payload.entity_id,
            "status": "initiated",
            "automated_checks": ["network_analysis", "transaction_analysis"],
            "manual_checks": manual_checks,
        }))
        .with_follow_ups(follow_ups))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::envelope_for;

    #[tokio::test]
    async fn test_edd_enqueues_deep_analyses() {
        let outcome = EnhancedDueDiligenceHandler::new()
            .handle(&envelope_for(
                TaskType::EnhancedDueDiligence,
                json!({"entity_id": "ent-5"}),
            ))
            .await
            .unwrap();

        assert_eq!(outcome.follow_ups.len(), 2);
        assert_eq!(outcome.follow_ups[0].task_type, TaskType::NetworkAnalysis);
        assert_eq!(outcome.follow_ups[0].payload["depth"], 4);
        assert_eq!(outcome.follow_ups[1].task_type, TaskType::TransactionAnalysis);
        assert_eq!(outcome.follow_ups[1].payload["lookback_days"], 365);
        assert_eq!(outcome.follow_ups[1].payload["include_counterparties"], true);
        assert_eq!(outcome.result["manual_checks"].as_array().unwrap().len(), 3);
    }
}
