//! End-to-end cascades through the production handlers against a scripted backend.

mod common;

use common::Harness;
use decision_jobs::alerts::AlertPriority;
use decision_jobs::dispatch::ExecutionOutcome;
use decision_jobs::messaging::{EnqueueRequest, QueueStore, TaskType};
use decision_jobs::status::{StatusQueryService, TaskStatus};
use decision_jobs::test_helpers::FakeResponse;
use serde_json::json;

fn completed_types(outcomes: &[ExecutionOutcome]) -> Vec<TaskType> {
    outcomes
        .iter()
        .filter_map(|outcome| match outcome {
            ExecutionOutcome::Completed { task_type, .. } => Some(*task_type),
            _ => None,
        })
        .collect()
}

fn count(types: &[TaskType], wanted: TaskType) -> usize {
    types.iter().filter(|t| **t == wanted).count()
}

#[tokio::test]
async fn test_entity_resolution_fans_out_to_network_and_scoring() {
    let h = Harness::new();
    h.backend.on_post(
        "/entity-resolution",
        json!({
            "input_record_count": 3,
            "resolved_entity_count": 2,
            "resolution_rate": 0.66,
            "resolved_entities": [
                {"resolved_id": "ent-1", "confidence_score": 0.9, "attributes": {"name": "Acme"}},
                {"resolved_id": "ent-2", "confidence_score": 0.5},
            ],
        }),
    );
    h.backend.on_post(
        "/network/analyze/ent-1",
        json!({"connected_entities": [{"id": "ent-7"}], "metrics": {"risk_exposure": 0.2}}),
    );
    h.backend.on_post(
        "/scoring/calculate",
        json!({"risk_level": "low", "overall_score": 0.1}),
    );

    let root = h
        .store
        .enqueue(EnqueueRequest::new(
            TaskType::EntityResolution,
            json!({"records": [{"name": "Acme"}, {"name": "ACME Ltd"}, {"name": "Other"}]}),
        ))
        .await
        .unwrap();

    let outcomes = h.drain().await;
    let types = completed_types(&outcomes);
    assert_eq!(outcomes.len(), 4);
    assert_eq!(count(&types, TaskType::EntityResolution), 1);
    assert_eq!(count(&types, TaskType::NetworkAnalysis), 1);
    assert_eq!(count(&types, TaskType::RiskScoring), 2);
    assert!(h.store.is_empty());

    let network_call = &h.backend.calls_to("POST", "/network/analyze/ent-1")[0];
    assert_eq!(network_call.body.as_ref().unwrap()["depth"], 2);

    let scored: Vec<String> = h
        .backend
        .calls_to("POST", "/scoring/calculate")
        .iter()
        .filter_map(|call| call.body.as_ref()?["entity"]["id"].as_str().map(String::from))
        .collect();
    assert!(scored.contains(&"ent-1".to_string()));
    assert!(scored.contains(&"ent-2".to_string()));

    let root_completion = h.store.find_completion(root).await.unwrap().unwrap();
    let result = root_completion.result.unwrap();
    assert_eq!(result["network_analyses_queued"], 1);
    assert_eq!(result["risk_scorings_queued"], 2);
}

#[tokio::test]
async fn test_critical_risk_raises_notified_alert() {
    let h = Harness::new();
    h.backend.on_post(
        "/scoring/calculate",
        json!({"risk_level": "CRITICAL", "overall_score": 0.97, "explanation": "sanctioned owner"}),
    );
    h.backend.on_post("/alerts", json!({"id": "al-1"}));

    h.store
        .enqueue(EnqueueRequest::new(TaskType::RiskScoring, json!({"entity_id": "ent-9"})))
        .await
        .unwrap();

    let outcomes = h.drain().await;
    assert_eq!(
        completed_types(&outcomes),
        vec![TaskType::RiskScoring, TaskType::Alert]
    );

    let alerts = h.notifier.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, "high_risk_entity");
    assert_eq!(alerts[0].priority, AlertPriority::Critical);
    assert_eq!(alerts[0].entity_id.as_deref(), Some("ent-9"));

    let posted = &h.backend.calls_to("POST", "/alerts")[0];
    assert_eq!(posted.body.as_ref().unwrap()["data"]["risk_level"], "critical");
}

#[tokio::test]
async fn test_medium_risk_triggers_due_diligence_cascade() {
    let h = Harness::new();
    h.backend.on_post("/scoring/calculate", json!({"risk_level": "medium"}));
    h.backend.on_post(
        "/network/analyze/ent-3",
        json!({"connected_entities": [], "metrics": {"risk_exposure": 0.1}}),
    );
    h.backend.on_get("/transactions", json!({"transactions": []}));

    h.store
        .enqueue(EnqueueRequest::new(TaskType::RiskScoring, json!({"entity_id": "ent-3"})))
        .await
        .unwrap();

    let types = completed_types(&h.drain().await);
    assert_eq!(count(&types, TaskType::EnhancedDueDiligence), 1);
    assert_eq!(count(&types, TaskType::NetworkAnalysis), 1);
    assert_eq!(count(&types, TaskType::TransactionAnalysis), 1);

    let network_call = &h.backend.calls_to("POST", "/network/analyze/ent-3")[0];
    assert_eq!(network_call.body.as_ref().unwrap()["depth"], 4);
    assert!(h.notifier.alerts().is_empty());
}

#[tokio::test]
async fn test_alert_sink_outage_is_retried_and_notifies_once() {
    let h = Harness::new();
    h.backend
        .push_post("/alerts", FakeResponse::Status(503, "down".into()))
        .push_post("/alerts", FakeResponse::Status(503, "down".into()))
        .on_post("/alerts", json!({"id": "al-2"}));

    let id = h
        .store
        .enqueue(EnqueueRequest::new(
            TaskType::Alert,
            json!({"alert_type": "sanctions_match", "entity_id": "ent-4"}),
        ))
        .await
        .unwrap();

    let statuses: Vec<&str> = h.drain().await.iter().map(ExecutionOutcome::status).collect();
    assert_eq!(statuses, vec!["retrying", "retrying", "completed"]);
    assert_eq!(h.notifier.alerts().len(), 1);

    let completion = h.store.find_completion(id).await.unwrap().unwrap();
    assert_eq!(completion.attempts, 2);
    assert_eq!(completion.result.unwrap()["alert_id"], "al-2");
}

#[tokio::test]
async fn test_watchlist_sync_with_failed_sources_still_rescreens() {
    let h = Harness::new();
    for source in ["ofac", "un", "eu", "dow_jones"] {
        h.backend.on_post(
            &format!("/screening/watchlists/{source}/sync"),
            json!({"entries_synced": 5}),
        );
    }
    h.backend.fail_post("/screening/watchlists/uk_hmt/sync", 502);
    h.backend.fail_post("/screening/watchlists/refinitiv/sync", 500);
    h.backend.on_get(
        "/entities",
        json!({"entities": [{"id": "ent-1", "name": "Acme"}, {"id": "ent-2", "name": "Globex"}]}),
    );
    h.backend.on_post(
        "/screening/batch",
        json!({"matches": [{"entity_id": "ent-2", "match_type": "sanctions_match", "list": "ofac"}]}),
    );
    h.backend.on_post("/alerts", json!({"id": "al-3"}));

    let id = h
        .store
        .enqueue(EnqueueRequest::new(TaskType::WatchlistSync, json!({})))
        .await
        .unwrap();

    let outcomes = h.drain().await;
    assert_eq!(
        completed_types(&outcomes),
        vec![TaskType::WatchlistSync, TaskType::BatchScreening, TaskType::Alert]
    );

    let result = h.store.find_completion(id).await.unwrap().unwrap().result.unwrap();
    assert_eq!(result["total_entries_synced"], 20);
    assert_eq!(result["failed_sources"], json!(["uk_hmt", "refinitiv"]));

    let alerts = h.notifier.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].entity_id.as_deref(), Some("ent-2"));
}

#[tokio::test]
async fn test_backend_outage_ends_in_dead_set_without_follow_ups() {
    let h = Harness::new();
    h.backend.fail_post("/scoring/calculate", 500);

    let id = h
        .store
        .enqueue(EnqueueRequest::new(TaskType::RiskScoring, json!({"entity_id": "ent-5"})))
        .await
        .unwrap();

    let outcomes = h.drain().await;
    assert_eq!(outcomes.len(), 3);
    assert!(matches!(outcomes[2], ExecutionOutcome::Dead { attempt: 3, .. }));
    assert_eq!(h.store.len(), 1);
    assert_eq!(h.backend.calls_to("POST", "/scoring/calculate").len(), 3);

    let status = StatusQueryService::new(h.store.clone()).get_status(id).await.unwrap();
    match status {
        TaskStatus::Dead { attempts, error, .. } => {
            assert_eq!(attempts, 3);
            assert!(error.unwrap().contains("500"));
        }
        other => panic!("expected dead, got {other:?}"),
    }
}
