//! # Transaction Analysis Handler
//!
//! Pulls an entity's transactions over a lookback window, aggregates them
//! (count, volume, average, per-type and per-currency breakdowns, distinct
//! counterparties) and flags three patterns:
//!
//! - `high_volume`: total volume above 1,000,000
//! - `high_frequency`: more than 1000 transactions
//! - `many_counterparties`: more than 100 distinct counterparties
//!
//! Any pattern raises one `suspicious_transaction` alert. When requested,
//! the first 50 counterparties (in order of first appearance) each get a
//! depth-1 network analysis.

use super::{array_field, backend_failure, parse_payload, HandlerOutcome, TaskHandler};
use crate::backend::BackendApi;
use crate::constants::handlers::{
    COUNTERPARTY_NETWORK_DEPTH, DEFAULT_LOOKBACK_DAYS, MAX_COUNTERPARTY_ANALYSES,
    MAX_LOOKBACK_DAYS, SUSPICIOUS_COUNT, SUSPICIOUS_COUNTERPARTIES, SUSPICIOUS_VOLUME,
    TRANSACTION_FETCH_LIMIT,
};
use crate::error::{JobError, JobResult};
use crate::messaging::{EnqueueRequest, TaskEnvelope, TaskType};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::info;

fn default_lookback_days() -> u32 {
    DEFAULT_LOOKBACK_DAYS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionAnalysisPayload {
    pub entity_id: String,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    #[serde(default)]
    pub include_counterparties: bool,
}

impl TransactionAnalysisPayload {
    /// Parse and require `1..=MAX_LOOKBACK_DAYS` days of lookback
    pub fn parse(payload: &Value) -> JobResult<Self> {
        let parsed: Self = parse_payload(TaskType::TransactionAnalysis, payload)?;
        if parsed.lookback_days == 0 || parsed.lookback_days > MAX_LOOKBACK_DAYS {
            return Err(JobError::invalid_payload(
                TaskType::TransactionAnalysis,
                format!(
                    "lookback_days must be between 1 and {MAX_LOOKBACK_DAYS}, got {}",
                    parsed.lookback_days
                ),
            ));
        }
        Ok(parsed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CurrencyStats {
    pub count: usize,
    pub volume: f64,
}

/// A tripped threshold, as reported in the result and the alert data
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuspiciousPattern {
    #[serde(rename = "type")]
    pub pattern_type: &'static str,
    pub value: f64,
    pub threshold: f64,
}

/// Aggregates over a transaction list
#[derive(Debug, Default, PartialEq, Serialize)]
pub struct TransactionStats {
    pub transaction_count: usize,
    pub total_volume: f64,
    pub by_type: BTreeMap<String, usize>,
    pub by_currency: BTreeMap<String, CurrencyStats>,
    /// Distinct counterparties in order of first appearance
    pub counterparties: Vec<String>,
}

impl TransactionStats {
    pub fn from_transactions(transactions: &[Value]) -> Self {
        let mut stats = TransactionStats {
            transaction_count: transactions.len(),
            ..Default::default()
        };
        let mut seen = HashSet::new();

        for tx in transactions {
            let value = amount(tx).abs();
            stats.total_volume += value;

            let kind = tx.get("type").and_then(Value::as_str).unwrap_or("unknown");
            *stats.by_type.entry(kind.to_string()).or_default() += 1;

            let currency = tx.get("currency").and_then(Value::as_str).unwrap_or("unknown");
            let entry = stats.by_currency.entry(currency.to_string()).or_default();
            entry.count += 1;
            entry.volume += value;

            if let Some(counterparty) = counterparty_id(tx) {
                if seen.insert(counterparty.clone()) {
                    stats.counterparties.push(counterparty);
                }
            }
        }
        stats
    }

    pub fn average_amount(&self) -> f64 {
        if self.transaction_count == 0 {
            0.0
        } else {
            self.total_volume / self.transaction_count as f64
        }
    }

    pub fn suspicious_patterns(&self) -> Vec<SuspiciousPattern> {
        let mut patterns = Vec::new();
        if self.total_volume > SUSPICIOUS_VOLUME {
            patterns.push(SuspiciousPattern {
                pattern_type: "high_volume",
                value: self.total_volume,
                threshold: SUSPICIOUS_VOLUME,
            });
        }
        if self.transaction_count > SUSPICIOUS_COUNT {
            patterns.push(SuspiciousPattern {
                pattern_type: "high_frequency",
                value: self.transaction_count as f64,
                threshold: SUSPICIOUS_COUNT as f64,
            });
        }
        if self.counterparties.len() > SUSPICIOUS_COUNTERPARTIES {
            patterns.push(SuspiciousPattern {
                pattern_type: "many_counterparties",
                value: self.counterparties.len() as f64,
                threshold: SUSPICIOUS_COUNTERPARTIES as f64,
            });
        }
        patterns
    }
}

fn amount(tx: &Value) -> f64 {
    match tx.get("amount") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn counterparty_id(tx: &Value) -> Option<String> {
    match tx.get("counterparty_id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub struct TransactionAnalysisHandler {
    backend: Arc<dyn BackendApi>,
}

impl TransactionAnalysisHandler {
    pub fn new(backend: Arc<dyn BackendApi>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl TaskHandler for TransactionAnalysisHandler {
    fn task_type(&self) -> TaskType {
        TaskType::TransactionAnalysis
    }

    async fn handle(&self, envelope: &TaskEnvelope) -> JobResult<HandlerOutcome> {
        let payload = TransactionAnalysisPayload::parse(&envelope.payload)?;
        let context = format!("entity_id={}", payload.entity_id);
        let from_date = (Utc::now() - Duration::days(i64::from(payload.lookback_days)))
            .date_naive()
            .to_string();

        let response = self
            .backend
            .get(
                "/transactions",
                &[
                    ("entity_id", payload.entity_id.clone()),
                    ("from_date", from_date),
                    ("limit", TRANSACTION_FETCH_LIMIT.to_string()),
                ],
            )
            .await
            .map_err(backend_failure(self.task_type(), &context))?;

        let stats = TransactionStats::from_transactions(array_field(&response, "transactions"));
        let patterns = stats.suspicious_patterns();
        let suspicious = !patterns.is_empty();
        let mut follow_ups = Vec::new();

        if suspicious {
            follow_ups.push(EnqueueRequest::new(
                TaskType::Alert,
                json!({
                    "alert_type": "suspicious_transaction",
                    "entity_id": payload.entity_id,
                    "data": {
                        "suspicious_patterns": patterns,
                        "total_volume": stats.total_volume,
                        "transaction_count": stats.transaction_count,
                        "unique_counterparties": stats.counterparties.len(),
                        "lookback_days": payload.lookback_days,
                    },
                }),
            ));
        }

        let mut counterparty_analyses = 0;
        if payload.include_counterparties {
            for counterparty in stats.counterparties.iter().take(MAX_COUNTERPARTY_ANALYSES) {
                follow_ups.push(EnqueueRequest::new(
                    TaskType::NetworkAnalysis,
                    json!({"entity_id": counterparty, "depth": COUNTERPARTY_NETWORK_DEPTH}),
                ));
                counterparty_analyses += 1;
            }
        }

        info!(
            task_id = %envelope.task_id,
            entity_id = %payload.entity_id,
            transactions = stats.transaction_count,
            suspicious = suspicious,
            "Transaction analysis completed"
        );

        Ok(HandlerOutcome::new(json!({
            "entity_id": payload.entity_id,
            "lookback_days": payload.lookback_days,
            "transaction_count": stats.transaction_count,
            "total_volume": stats.total_volume,
            "average_amount": stats.average_amount(),
            "unique_counterparties": stats.counterparties.len(),
            "by_type": stats.by_type,
            "by_currency": stats.by_currency,
            "suspicious_patterns": patterns,
            "suspicious": suspicious,
            "counterparty_analyses_queued": counterparty_analyses,
        }))
        .with_follow_ups(follow_ups))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{envelope_for, FakeBackend};

    #[test]
    fn test_stats_track_first_seen_counterparties() {
        let stats = TransactionStats::from_transactions(&[
            json!({"amount": 100.0, "currency": "USD", "type": "wire", "counterparty_id": "c-2"}),
            json!({"amount": "-50", "currency": "EUR", "type": "wire", "counterparty_id": "c-1"}),
            json!({"amount": 25, "currency": "USD", "type": "card", "counterparty_id": "c-2"}),
            json!({"amount": 5}),
        ]);
        assert_eq!(stats.transaction_count, 4);
        assert_eq!(stats.total_volume, 180.0);
        assert_eq!(stats.counterparties, vec!["c-2", "c-1"]);
        assert_eq!(stats.average_amount(), 45.0);
        assert_eq!(stats.by_currency["USD"], CurrencyStats { count: 2, volume: 125.0 });
        assert_eq!(stats.by_currency["EUR"], CurrencyStats { count: 1, volume: 50.0 });
        assert_eq!(stats.by_currency["unknown"].count, 1);
        assert_eq!(stats.by_type["wire"], 2);
        assert_eq!(stats.by_type["unknown"], 1);
        assert!(stats.suspicious_patterns().is_empty());
    }

    #[tokio::test]
    async fn test_high_volume_raises_suspicious_transaction_alert() {
        let backend = Arc::new(FakeBackend::new());
        backend.on_get(
            "/transactions",
            json!({"transactions": [
                {"amount": 700000, "currency": "USD", "type": "wire", "counterparty_id": "c-1"},
                {"amount": 500000, "currency": "EUR", "type": "wire", "counterparty_id": "c-2"}
            ]}),
        );

        let outcome = TransactionAnalysisHandler::new(backend.clone())
            .handle(&envelope_for(
                TaskType::TransactionAnalysis,
                json!({"entity_id": "ent-1"}),
            ))
            .await
            .unwrap();

        let expected = json!([{"type": "high_volume", "value": 1_200_000.0, "threshold": 1_000_000.0}]);
        assert_eq!(outcome.result["suspicious_patterns"], expected);
        assert_eq!(outcome.result["average_amount"], 600_000.0);
        assert_eq!(outcome.result["by_currency"]["USD"], json!({"count": 1, "volume": 700_000.0}));
        assert_eq!(outcome.result["by_currency"]["EUR"], json!({"count": 1, "volume": 500_000.0}));
        assert_eq!(outcome.follow_ups.len(), 1);
        assert_eq!(outcome.follow_ups[0].payload["alert_type"], "suspicious_transaction");
        assert_eq!(outcome.follow_ups[0].payload["data"]["suspicious_patterns"], expected);
        assert_eq!(outcome.follow_ups[0].queue, crate::messaging::QueueName::Critical);

        let call = &backend.calls()[0];
        assert_eq!(call.query_param("entity_id"), Some("ent-1"));
        assert_eq!(call.query_param("limit"), Some("10000"));
        assert!(call.query_param("from_date").is_some());
    }

    #[tokio::test]
    async fn test_counterparty_analyses_capped_at_fifty() {
        let transactions: Vec<Value> = (0..120)
            .map(|i| json!({"amount": 10, "type": "wire", "counterparty_id": format!("c-{i}")}))
            .collect();
        let backend = Arc::new(FakeBackend::new());
        backend.on_get("/transactions", json!({"transactions": transactions}));

        let outcome = TransactionAnalysisHandler::new(backend)
            .handle(&envelope_for(
                TaskType::TransactionAnalysis,
                json!({"entity_id": "ent-1", "lookback_days": 365, "include_counterparties": true}),
            ))
            .await
            .unwrap();

        let network: Vec<&EnqueueRequest> = outcome
            .follow_ups
            .iter()
            .filter(|r| r.task_type == TaskType::NetworkAnalysis)
            .collect();
        assert_eq!(network.len(), 50);
        assert_eq!(network[0].payload["entity_id"], "c-0");
        assert_eq!(network[0].payload["depth"], 1);
        assert_eq!(
            outcome.result["suspicious_patterns"][0]["type"],
            "many_counterparties"
        );
        assert_eq!(outcome.follow_ups.len(), 51);
    }

    #[test]
    fn test_lookback_window_is_bounded() {
        assert_eq!(
            TransactionAnalysisPayload::parse(&json!({"entity_id": "e"}))
                .unwrap()
                .lookback_days,
            90
        );
        for bad in [json!(0), json!(3651), json!(-5), json!(i64::MAX)] {
            let err = TransactionAnalysisPayload::parse(&json!({"entity_id": "e", "lookback_days": bad}))
                .unwrap_err();
            assert!(matches!(err, JobError::InvalidPayload { .. }), "accepted {bad}");
        }
        assert!(crate::handlers::validate_payload(
            TaskType::TransactionAnalysis,
            &json!({"entity_id": "e", "lookback_days": 0})
        )
        .is_err());
    }
}
