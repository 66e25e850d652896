//! Watchlist screening: batch screening of entities and the scheduled
//! watchlist refresh that triggers a full rescreen.

use super::{array_field, backend_failure, parse_payload, EntityBatchPayload, HandlerOutcome, TaskHandler};
use crate::backend::{path_segment, BackendApi};
use crate::constants::handlers::BATCH_SCREENING_SIZE;
use crate::constants::DEFAULT_WATCHLIST_SOURCES;
use crate::error::JobResult;
use crate::messaging::{EnqueueRequest, TaskEnvelope, TaskType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

pub struct BatchScreeningHandler {
    backend: Arc<dyn BackendApi>,
    batch_size: usize,
}

impl BatchScreeningHandler {
    pub fn new(backend: Arc<dyn BackendApi>) -> Self {
        Self {
            backend,
            batch_size: BATCH_SCREENING_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// `{id, name}` for the requested entities, or every entity when `ids` is `None`
    async fn load_entities(&self, ids: Option<&[String]>) -> JobResult<Vec<Value>> {
        let query: Vec<(&str, String)> = match ids {
            Some(ids) => vec![("ids", ids.join(","))],
            None => Vec::new(),
        };
        let response = self
            .backend
            .get("/entities", &query)
            .await
            .map_err(backend_failure(TaskType::BatchScreening, "entity lookup"))?;

        Ok(array_field(&response, "entities")
            .iter()
            .map(|entity| {
                json!({
                    "id": entity.get("id").cloned().unwrap_or(Value::Null),
                    "name": entity.get("name").cloned().unwrap_or(Value::Null),
                })
            })
            .collect())
    }
}

#[async_trait]
impl TaskHandler for BatchScreeningHandler {
    fn task_type(&self) -> TaskType {
        TaskType::BatchScreening
    }

    async fn handle(&self, envelope: &TaskEnvelope) -> JobResult<HandlerOutcome> {
        let payload: EntityBatchPayload = parse_payload(self.task_type(), &envelope.payload)?;
        let entities = self.load_entities(payload.entity_ids.as_deref()).await?;

        let mut batches = 0usize;
        let mut failed_batches = 0usize;
        let mut follow_ups = Vec::new();

        for chunk in entities.chunks(self.batch_size) {
            batches += 1;
            let response = match self
                .backend
                .post("/screening/batch", &json!({"entities": chunk}))
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!(
                        task_id = %envelope.task_id,
                        batch = batches,
                        size = chunk.len(),
                        error = %e,
                        "Screening batch failed, continuing"
                    );
                    failed_batches += 1;
                    continue;
                }
            };

            for hit in array_field(&response, "matches") {
                let alert_type = hit
                    .get("match_type")
                    .and_then(Value::as_str)
                    .unwrap_or("watchlist_match");
                follow_ups.push(EnqueueRequest::new(
                    TaskType::Alert,
                    json!({
                        "alert_type": alert_type,
                        "entity_id": hit.get("entity_id").cloned().unwrap_or(Value::Null),
                        "data": hit,
                    }),
                ));
            }
        }

        info!(
            task_id = %envelope.task_id,
            entities = entities.len(),
            matches = follow_ups.len(),
            failed_batches = failed_batches,
            "Batch screening completed"
        );

        Ok(HandlerOutcome::new(json!({
            "entities_screened": entities.len(),
            "batches": batches,
            "failed_batches": failed_batches,
            "matches": follow_ups.len(),
        }))
        .with_follow_ups(follow_ups))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchlistSyncPayload {
    #[serde(default)]
    pub sources: Option<Vec<String>>,
}

pub struct WatchlistSyncHandler {
    backend: Arc<dyn BackendApi>,
}

impl WatchlistSyncHandler {
    pub fn new(backend: Arc<dyn BackendApi>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl TaskHandler for WatchlistSyncHandler {
    fn task_type(&self) -> TaskType {
        TaskType::WatchlistSync
    }

    async fn handle(&self, envelope: &TaskEnvelope) -> JobResult<HandlerOutcome> {
        let payload: WatchlistSyncPayload = parse_payload(self.task_type(), &envelope.payload)?;
        let sources = payload.sources.unwrap_or_else(|| {
            DEFAULT_WATCHLIST_SOURCES
                .iter()
                .map(|s| s.to_string())
                .collect()
        });

        let mut counts = Map::new();
        let mut failed = Vec::new();
        let mut total = 0u64;

        for source in &sources {
            let path = format!("/screening/watchlists/{}/sync", path_segment(source));
            let synced = match self.backend.post(&path, &json!({})).await {
                Ok(response) => response
                    .get("entries_synced")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
                Err(e) => {
                    warn!(source = %source, error = %e, "Watchlist sync failed for source");
                    failed.push(source.clone());
                    0
                }
            };
            total += synced;
            counts.insert(source.clone(), json!(synced));
        }

        info!(
            task_id = %envelope.task_id,
            sources = sources.len(),
            failed = failed.len(),
            entries = total,
            "Watchlist sync completed, queueing full rescreen"
        );

        Ok(HandlerOutcome::new(json!({
            "sources": counts,
            "total_entries_synced": total,
            "failed_sources": failed,
            "rescreen_queued": true,
        }))
        .with_follow_ups(vec![EnqueueRequest::new(TaskType::BatchScreening, json!({}))]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{envelope_for, FakeBackend};

    #[tokio::test]
    async fn test_watchlist_sync_tolerates_failed_sources() {
        let backend = Arc::new(FakeBackend::new());
        for source in ["ofac", "un", "eu", "dow_jones"] {
            backend.on_post(
                &format!("/screening/watchlists/{source}/sync"),
                json!({"entries_synced": 10}),
            );
        }
        backend.fail_post("/screening/watchlists/uk_hmt/sync", 503);
        backend.fail_post("/screening/watchlists/refinitiv/sync", 500);

        let outcome = WatchlistSyncHandler::new(backend)
            .handle(&envelope_for(TaskType::WatchlistSync, json!({})))
            .await
            .unwrap();

        assert_eq!(outcome.result["sources"]["ofac"], 10);
        assert_eq!(outcome.result["sources"]["uk_hmt"], 0);
        assert_eq!(outcome.result["sources"]["refinitiv"], 0);
        assert_eq!(outcome.result["total_entries_synced"], 40);
        assert_eq!(outcome.result["failed_sources"], json!(["uk_hmt", "refinitiv"]));
        assert_eq!(outcome.follow_ups.len(), 1);
        assert_eq!(outcome.follow_ups[0].task_type, TaskType::BatchScreening);
    }

    #[tokio::test]
    async fn test_explicit_sources_override_defaults() {
        let backend = Arc::new(FakeBackend::new());
        backend.on_post("/screening/watchlists/ofac/sync", json!({"entries_synced": 3}));

        let outcome = WatchlistSyncHandler::new(backend.clone())
            .handle(&envelope_for(TaskType::WatchlistSync, json!({"sources": ["ofac"]})))
            .await
            .unwrap();
        assert_eq!(backend.calls().len(), 1);
        assert_eq!(outcome.result["total_entries_synced"], 3);
    }

    #[tokio::test]
    async fn test_batch_screening_alert_per_match() {
        let backend = Arc::new(FakeBackend::new());
        backend.on_get(
            "/entities",
            json!({"entities": [
                {"id": "e-1", "name": "Acme", "country": "XX"},
                {"id": "e-2", "name": "Beta"},
                {"id": "e-3", "name": "Gamma"}
            ]}),
        );
        backend.on_post(
            "/screening/batch",
            json!({"matches": [
                {"entity_id": "e-1", "matched_name": "ACME", "score": 0.97, "watchlist": "ofac", "match_type": "sanctions_match"},
                {"entity_id": "e-2", "matched_name": "Beta", "score": 0.9, "watchlist": "pep", "match_type": "pep_match"}
            ]}),
        );

        let outcome = BatchScreeningHandler::new(backend.clone())
            .with_batch_size(2)
            .handle(&envelope_for(
                TaskType::BatchScreening,
                json!({"entity_ids": ["e-1", "e-2", "e-3"]}),
            ))
            .await
            .unwrap();

        // two batches, each answered with the same two matches
        assert_eq!(outcome.result["batches"], 2);
        assert_eq!(outcome.follow_ups.len(), 4);
        assert_eq!(outcome.follow_ups[0].payload["alert_type"], "sanctions_match");
        assert_eq!(outcome.follow_ups[1].payload["alert_type"], "pep_match");

        let lookup = &backend.calls_to("GET", "/entities")[0];
        assert_eq!(lookup.query_param("ids"), Some("e-1,e-2,e-3"));
        let first_batch = &backend.calls_to("POST", "/screening/batch")[0];
        assert_eq!(
            first_batch.body.as_ref().unwrap()["entities"][0],
            json!({"id": "e-1", "name": "Acme"})
        );
    }

    #[tokio::test]
    async fn test_batch_screening_failed_batches_are_skipped() {
        let backend = Arc::new(FakeBackend::new());
        backend.on_get("/entities", json!({"entities": [{"id": "e-1", "name": "Acme"}]}));
        backend.fail_post("/screening/batch", 500);

        let outcome = BatchScreeningHandler::new(backend.clone())
            .handle(&envelope_for(TaskType::BatchScreening, json!({})))
            .await
            .unwrap();
        assert_eq!(outcome.result["failed_batches"], 1);
        assert!(outcome.follow_ups.is_empty());
        assert!(backend.calls_to("GET", "/entities")[0].query.is_empty());
    }
}
