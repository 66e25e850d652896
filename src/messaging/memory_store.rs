//! In-memory queue store.
//!
//! All state sits behind one `parking_lot::Mutex`, so every operation is a
//! single atomic transition. Nothing survives a restart.

use super::{
    Claim, CompletionRecord, EnqueueRequest, EnvelopeState, MessagingError, MessagingResult,
    PurgeCounts, QueueDepth, QueueName, QueueStore, RetentionCutoffs, StoredEnvelope,
    TaskEnvelope, TaskId,
};
use crate::constants::DEFAULT_LEASE_SECONDS;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug)]
struct Entry {
    stored: StoredEnvelope,
    /// Insertion order, breaks ties between equal `run_at`
    seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
    envelopes: HashMap<TaskId, Entry>,
    completions: HashMap<TaskId, CompletionRecord>,
    next_seq: u64,
}

impl Inner {
    fn insert_pending(&mut self, request: EnqueueRequest, now: DateTime<Utc>) -> TaskId {
        let envelope = request.into_envelope(now);
        let task_id = envelope.task_id;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.envelopes.insert(
            task_id,
            Entry {
                stored: StoredEnvelope {
                    envelope,
                    state: EnvelopeState::Pending,
                    last_error: None,
                    died_at: None,
                },
                seq,
            },
        );
        task_id
    }

    /// The stored entry, provided `envelope` still holds its current claim
    fn claimed_entry(&mut self, envelope: &TaskEnvelope) -> MessagingResult<&mut Entry> {
        let token = envelope
            .claim
            .as_ref()
            .map(|claim| claim.token)
            .ok_or_else(|| MessagingError::lease_lost(envelope.task_id))?;

        match self.envelopes.get_mut(&envelope.task_id) {
            Some(entry)
                if entry.stored.state == EnvelopeState::InFlight
                    && entry.stored.envelope.claim.as_ref().map(|c| c.token) == Some(token) =>
            {
                Ok(entry)
            }
            _ => Err(MessagingError::lease_lost(envelope.task_id)),
        }
    }
}

fn is_eligible(stored: &StoredEnvelope, now: DateTime<Utc>) -> bool {
    match stored.state {
        EnvelopeState::Pending | EnvelopeState::Retrying => stored.envelope.run_at <= now,
        EnvelopeState::InFlight => stored
            .envelope
            .claim
            .as_ref()
            .is_some_and(|claim| claim.lease_expires_at <= now),
        EnvelopeState::Dead => false,
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// Mutex-guarded queue store
#[derive(Debug)]
pub struct MemoryQueueStore {
    inner: Mutex<Inner>,
    lease: Duration,
}

impl Default for MemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            lease: Duration::from_secs(DEFAULT_LEASE_SECONDS),
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Number of envelopes still held (any state)
    pub fn len(&self) -> usize {
        self.inner.lock().envelopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every held envelope, oldest first
    pub fn snapshot(&self) -> Vec<StoredEnvelope> {
        let inner = self.inner.lock();
        let mut entries: Vec<&Entry> = inner.envelopes.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(|entry| entry.stored.clone()).collect()
    }

    /// Make a held envelope eligible immediately (skips a retry delay)
    pub fn make_due(&self, task_id: TaskId) -> bool {
        let mut inner = self.inner.lock();
        match inner.envelopes.get_mut(&task_id) {
            Some(entry) => {
                entry.stored.envelope.run_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Shift the timestamps of a completion log entry, for retention tests
    pub fn backdate_completion(&self, task_id: TaskId, by: chrono::Duration) -> bool {
        let mut inner = self.inner.lock();
        match inner.completions.get_mut(&task_id) {
            Some(record) => {
                record.completed_at -= by;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue(&self, request: EnqueueRequest) -> MessagingResult<TaskId> {
        let queue = request.queue;
        let task_id = self.inner.lock().insert_pending(request, Utc::now());
        debug!(task_id = %task_id, queue = %queue, "Envelope enqueued");
        Ok(task_id)
    }

    async fn dequeue(
        &self,
        queue: QueueName,
        worker_id: &str,
    ) -> MessagingResult<Option<TaskEnvelope>> {
        let now = Utc::now();
        let mut inner = self.inner.lock();

        let next = inner
            .envelopes
            .values()
            .filter(|entry| entry.stored.envelope.queue == queue && is_eligible(&entry.stored, now))
            .min_by_key(|entry| (entry.stored.envelope.run_at, entry.seq))
            .map(|entry| entry.stored.envelope.task_id);

        let Some(task_id) = next else {
            return Ok(None);
        };
        let Some(entry) = inner.envelopes.get_mut(&task_id) else {
            return Ok(None);
        };

        entry.stored.state = EnvelopeState::InFlight;
        entry.stored.envelope.claim = Some(Claim {
            worker_id: worker_id.to_string(),
            token: Uuid::new_v4(),
            lease_expires_at: now + to_chrono(self.lease),
        });
        Ok(Some(entry.stored.envelope.clone()))
    }

    async fn extend_lease(&self, envelope: &TaskEnvelope) -> MessagingResult<()> {
        let lease_expires_at = Utc::now() + to_chrono(self.lease);
        let mut inner = self.inner.lock();
        let entry = inner.claimed_entry(envelope)?;
        if let Some(claim) = entry.stored.envelope.claim.as_mut() {
            claim.lease_expires_at = lease_expires_at;
        }
        Ok(())
    }

    async fn requeue_with_delay(
        &self,
        envelope: &TaskEnvelope,
        delay: Duration,
        error: &str,
    ) -> MessagingResult<()> {
        let mut inner = self.inner.lock();
        let entry = inner.claimed_entry(envelope)?;
        entry.stored.state = EnvelopeState::Retrying;
        entry.stored.last_error = Some(error.to_string());
        entry.stored.envelope.attempts = envelope.attempts;
        entry.stored.envelope.run_at = Utc::now() + to_chrono(delay);
        entry.stored.envelope.claim = None;
        Ok(())
    }

    async fn kill(&self, envelope: &TaskEnvelope, error: &str) -> MessagingResult<()> {
        let mut inner = self.inner.lock();
        let entry = inner.claimed_entry(envelope)?;
        entry.stored.state = EnvelopeState::Dead;
        entry.stored.last_error = Some(error.to_string());
        entry.stored.died_at = Some(Utc::now());
        entry.stored.envelope.attempts = envelope.attempts;
        entry.stored.envelope.claim = None;
        Ok(())
    }

    async fn complete(
        &self,
        envelope: &TaskEnvelope,
        completion: CompletionRecord,
        follow_ups: Vec<EnqueueRequest>,
    ) -> MessagingResult<Vec<TaskId>> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        inner.claimed_entry(envelope)?;
        inner.envelopes.remove(&envelope.task_id);
        inner.completions.insert(envelope.task_id, completion);
        Ok(follow_ups
            .into_iter()
            .map(|request| inner.insert_pending(request, now))
            .collect())
    }

    async fn find(&self, task_id: TaskId) -> MessagingResult<Option<StoredEnvelope>> {
        Ok(self
            .inner
            .lock()
            .envelopes
            .get(&task_id)
            .map(|entry| entry.stored.clone()))
    }

    async fn find_completion(&self, task_id: TaskId) -> MessagingResult<Option<CompletionRecord>> {
        Ok(self.inner.lock().completions.get(&task_id).cloned())
    }

    async fn list_dead(&self, limit: usize) -> MessagingResult<Vec<StoredEnvelope>> {
        let inner = self.inner.lock();
        let mut dead: Vec<StoredEnvelope> = inner
            .envelopes
            .values()
            .filter(|entry| entry.stored.state == EnvelopeState::Dead)
            .map(|entry| entry.stored.clone())
            .collect();
        dead.sort_by(|a, b| b.died_at.cmp(&a.died_at));
        dead.truncate(limit);
        Ok(dead)
    }

    async fn replay_dead(&self, task_id: TaskId) -> MessagingResult<bool> {
        let mut inner = self.inner.lock();
        match inner.envelopes.get_mut(&task_id) {
            Some(entry) if entry.stored.state == EnvelopeState::Dead => {
                entry.stored.state = EnvelopeState::Pending;
                entry.stored.died_at = None;
                entry.stored.envelope.attempts = 0;
                entry.stored.envelope.run_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn queue_depths(&self) -> MessagingResult<Vec<QueueDepth>> {
        let inner = self.inner.lock();
        let mut depths: Vec<QueueDepth> = QueueName::ALL
            .iter()
            .map(|queue| QueueDepth {
                queue: queue.as_str().to_string(),
                ..QueueDepth::default()
            })
            .collect();

        for entry in inner.envelopes.values() {
            let Some(depth) = depths
                .iter_mut()
                .find(|d| d.queue == entry.stored.envelope.queue.as_str())
            else {
                continue;
            };
            match entry.stored.state {
                EnvelopeState::Pending => depth.pending += 1,
                EnvelopeState::InFlight => depth.in_flight += 1,
                EnvelopeState::Retrying => depth.retrying += 1,
                EnvelopeState::Dead => depth.dead += 1,
            }
        }
        Ok(depths)
    }

    async fn purge_expired(&self, cutoffs: RetentionCutoffs) -> MessagingResult<PurgeCounts> {
        let mut inner = self.inner.lock();
        let mut counts = PurgeCounts::default();

        let before = inner.completions.len();
        inner
            .completions
            .retain(|_, record| record.completed_at >= cutoffs.job_log_before);
        counts.job_log_deleted = (before - inner.completions.len()) as u64;

        for record in inner.completions.values_mut() {
            if record.completed_at < cutoffs.results_before && record.result.is_some() {
                record.result = None;
                counts.results_cleared += 1;
            }
        }

        let before = inner.envelopes.len();
        inner.envelopes.retain(|_, entry| {
            !(entry.stored.state == EnvelopeState::Dead
                && entry
                    .stored
                    .died_at
                    .is_some_and(|died_at| died_at < cutoffs.dead_before))
        });
        counts.dead_deleted = (before - inner.envelopes.len()) as u64;

        Ok(counts)
    }

    async fn health_check(&self) -> MessagingResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::TaskType;
    use serde_json::json;

    fn request(task_type: TaskType) -> EnqueueRequest {
        EnqueueRequest::new(task_type, json!({"entity_id": "e-1"}))
    }

    #[tokio::test]
    async fn test_enqueue_then_dequeue_claims_envelope() {
        let store = MemoryQueueStore::new();
        let task_id = store.enqueue(request(TaskType::RiskScoring)).await.unwrap();

        let envelope = store
            .dequeue(QueueName::Scoring, "worker-1")
            .await
            .unwrap()
            .expect("envelope should be claimable");
        assert_eq!(envelope.task_id, task_id);
        assert_eq!(envelope.claim.as_ref().unwrap().worker_id, "worker-1");

        // Already in flight: nothing else to claim
        assert!(store.dequeue(QueueName::Scoring, "worker-2").await.unwrap().is_none());
        let stored = store.find(task_id).await.unwrap().unwrap();
        assert_eq!(stored.state, EnvelopeState::InFlight);
    }

    #[tokio::test]
    async fn test_dequeue_is_fifo_within_queue() {
        let store = MemoryQueueStore::new();
        let first = store.enqueue(request(TaskType::Cleanup)).await.unwrap();
        let second = store.enqueue(request(TaskType::Cleanup)).await.unwrap();

        let a = store.dequeue(QueueName::Low, "w").await.unwrap().unwrap();
        let b = store.dequeue(QueueName::Low, "w").await.unwrap().unwrap();
        assert_eq!(a.task_id, first);
        assert_eq!(b.task_id, second);
    }

    #[tokio::test]
    async fn test_requeue_hides_envelope_until_delay_passes() {
        let store = MemoryQueueStore::new();
        let task_id = store.enqueue(request(TaskType::RiskScoring)).await.unwrap();
        let mut envelope = store.dequeue(QueueName::Scoring, "w").await.unwrap().unwrap();

        envelope.attempts += 1;
        store
            .requeue_with_delay(&envelope, Duration::from_secs(60), "backend down")
            .await
            .unwrap();

        assert!(store.dequeue(QueueName::Scoring, "w").await.unwrap().is_none());
        let stored = store.find(task_id).await.unwrap().unwrap();
        assert_eq!(stored.state, EnvelopeState::Retrying);
        assert_eq!(stored.envelope.attempts, 1);
        assert_eq!(stored.last_error.as_deref(), Some("backend down"));

        assert!(store.make_due(task_id));
        let again = store.dequeue(QueueName::Scoring, "w").await.unwrap().unwrap();
        assert_eq!(again.attempts, 1);
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimable_and_stale_claim_rejected() {
        let store = MemoryQueueStore::new().with_lease(Duration::from_millis(0));
        store.enqueue(request(TaskType::RiskScoring)).await.unwrap();

        let stale = store.dequeue(QueueName::Scoring, "crashed").await.unwrap().unwrap();
        let fresh = store.dequeue(QueueName::Scoring, "healthy").await.unwrap().unwrap();
        assert_eq!(stale.task_id, fresh.task_id);

        let err = store.kill(&stale, "late").await.unwrap_err();
        assert!(matches!(err, MessagingError::LeaseLost { .. }));

        store
            .complete(
                &fresh,
                CompletionRecord::for_envelope(&fresh, 5, json!({})),
                vec![],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_extended_lease_keeps_envelope_claimed() {
        let store = MemoryQueueStore::new().with_lease(Duration::from_millis(50));
        store.enqueue(request(TaskType::RiskScoring)).await.unwrap();
        let claimed = store.dequeue(QueueName::Scoring, "w1").await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        store.extend_lease(&claimed).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.dequeue(QueueName::Scoring, "w2").await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(40)).await;
        let stolen = store.dequeue(QueueName::Scoring, "w2").await.unwrap().unwrap();
        assert!(matches!(
            store.extend_lease(&claimed).await,
            Err(MessagingError::LeaseLost { .. })
        ));
        store.extend_lease(&stolen).await.unwrap();
    }

    #[tokio::test]
    async fn test_complete_logs_and_enqueues_follow_ups() {
        let store = MemoryQueueStore::new();
        let task_id = store.enqueue(request(TaskType::RiskScoring)).await.unwrap();
        let envelope = store.dequeue(QueueName::Scoring, "w").await.unwrap().unwrap();

        let follow_ups = store
            .complete(
                &envelope,
                CompletionRecord::for_envelope(&envelope, 12, json!({"risk_level": "critical"})),
                vec![request(TaskType::Alert)],
            )
            .await
            .unwrap();

        assert_eq!(follow_ups.len(), 1);
        assert!(store.find(task_id).await.unwrap().is_none());
        assert!(store.find_completion(task_id).await.unwrap().is_some());
        let alert = store.dequeue(QueueName::Critical, "w").await.unwrap().unwrap();
        assert_eq!(alert.task_id, follow_ups[0]);
        assert_eq!(alert.max_attempts, 5);
    }

    #[tokio::test]
    async fn test_kill_then_replay() {
        let store = MemoryQueueStore::new();
        let task_id = store.enqueue(request(TaskType::RiskScoring)).await.unwrap();
        let mut envelope = store.dequeue(QueueName::Scoring, "w").await.unwrap().unwrap();
        envelope.attempts = 3;
        store.kill(&envelope, "boom").await.unwrap();

        let dead = store.list_dead(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].envelope.attempts, 3);
        assert!(dead[0].died_at.is_some());
        assert!(store.dequeue(QueueName::Scoring, "w").await.unwrap().is_none());

        assert!(store.replay_dead(task_id).await.unwrap());
        assert!(!store.replay_dead(task_id).await.unwrap());
        let replayed = store.dequeue(QueueName::Scoring, "w").await.unwrap().unwrap();
        assert_eq!(replayed.attempts, 0);
    }

    #[tokio::test]
    async fn test_queue_depths_count_by_state() {
        let store = MemoryQueueStore::new();
        store.enqueue(request(TaskType::Alert)).await.unwrap();
        store.enqueue(request(TaskType::Alert)).await.unwrap();
        store.dequeue(QueueName::Critical, "w").await.unwrap();

        let depths = store.queue_depths().await.unwrap();
        let critical = depths.iter().find(|d| d.queue == "critical").unwrap();
        assert_eq!(critical.pending, 1);
        assert_eq!(critical.in_flight, 1);
        assert_eq!(depths.len(), QueueName::ALL.len());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemoryQueueStore::new();
        let mut ids = Vec::new();
        for _ in 0..3 {
            store.enqueue(request(TaskType::Cleanup)).await.unwrap();
            let envelope = store.dequeue(QueueName::Low, "w").await.unwrap().unwrap();
            store
                .complete(
                    &envelope,
                    CompletionRecord::for_envelope(&envelope, 1, json!({"ok": true})),
                    vec![],
                )
                .await
                .unwrap();
            ids.push(envelope.task_id);
        }
        store.backdate_completion(ids[0], chrono::Duration::days(31));
        store.backdate_completion(ids[1], chrono::Duration::days(8));

        let now = Utc::now();
        let counts = store
            .purge_expired(RetentionCutoffs {
                job_log_before: now - chrono::Duration::days(30),
                results_before: now - chrono::Duration::days(7),
                dead_before: now - chrono::Duration::days(30),
            })
            .await
            .unwrap();

        assert_eq!(counts.job_log_deleted, 1);
        assert_eq!(counts.results_cleared, 1);
        assert!(store.find_completion(ids[0]).await.unwrap().is_none());
        let cleared = store.find_completion(ids[1]).await.unwrap().unwrap();
        assert!(cleared.result.is_none());
        let kept = store.find_completion(ids[2]).await.unwrap().unwrap();
        assert!(kept.result.is_some());
    }
}
