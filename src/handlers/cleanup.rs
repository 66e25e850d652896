//! Scheduled retention pass over the queue store.

use super::{parse_payload, HandlerOutcome, NoPayload, TaskHandler};
use crate::constants::retention::{DEAD_DAYS, JOB_LOG_DAYS, RESULT_DAYS};
use crate::error::JobResult;
use crate::messaging::{QueueStore, RetentionCutoffs, TaskEnvelope, TaskType};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Retention windows in days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    pub job_log_days: i64,
    pub result_days: i64,
    pub dead_days: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            job_log_days: JOB_LOG_DAYS,
            result_days: RESULT_DAYS,
            dead_days: DEAD_DAYS,
        }
    }
}

impl RetentionPolicy {
    pub fn cutoffs(&self, now: DateTime<Utc>) -> RetentionCutoffs {
        RetentionCutoffs {
            job_log_before: now - Duration::days(self.job_log_days),
            results_before: now - Duration::days(self.result_days),
            dead_before: now - Duration::days(self.dead_days),
        }
    }
}

pub struct CleanupHandler {
    store: Arc<dyn QueueStore>,
    policy: RetentionPolicy,
}

impl CleanupHandler {
    pub fn new(store: Arc<dyn QueueStore>, policy: RetentionPolicy) -> Self {
        Self { store, policy }
    }
}

#[async_trait]
impl TaskHandler for CleanupHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Cleanup
    }

    async fn handle(&self, envelope: &TaskEnvelope) -> JobResult<HandlerOutcome> {
        parse_payload::<NoPayload>(self.task_type(), &envelope.payload)?;

        let counts = self
            .store
            .purge_expired(self.policy.cutoffs(Utc::now()))
            .await?;

        info!(
            task_id = %envelope.task_id,
            job_log_deleted = counts.job_log_deleted,
            results_cleared = counts.results_cleared,
            dead_deleted = counts.dead_deleted,
            "Retention cleanup completed"
        );

        Ok(HandlerOutcome::new(json!({
            "job_log_deleted": counts.job_log_deleted,
            "results_cleared": counts.results_cleared,
            "dead_deleted": counts.dead_deleted,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{CompletionRecord, EnqueueRequest, MemoryQueueStore, QueueName};
    use crate::test_helpers::envelope_for;

    #[test]
    fn test_cutoffs() {
        let now = Utc::now();
        let cutoffs = RetentionPolicy::default().cutoffs(now);
        assert_eq!(cutoffs.job_log_before, now - Duration::days(30));
        assert_eq!(cutoffs.results_before, now - Duration::days(7));
        assert_eq!(cutoffs.dead_before, now - Duration::days(30));
    }

    #[tokio::test]
    async fn test_cleanup_purges_old_log_entries() {
        let store = Arc::new(MemoryQueueStore::new());
        store
            .enqueue(EnqueueRequest::new(TaskType::Cleanup, json!({})))
            .await
            .unwrap();
        let old = store.dequeue(QueueName::Low, "w").await.unwrap().unwrap();
        store
            .complete(&old, CompletionRecord::for_envelope(&old, 1, json!({})), vec![])
            .await
            .unwrap();
        store.backdate_completion(old.task_id, Duration::days(45));

        let outcome = CleanupHandler::new(store.clone(), RetentionPolicy::default())
            .handle(&envelope_for(TaskType::Cleanup, json!({})))
            .await
            .unwrap();

        assert_eq!(outcome.result["job_log_deleted"], 1);
        assert!(store.find_completion(old.task_id).await.unwrap().is_none());
    }
}
