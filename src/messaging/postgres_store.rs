//! # PostgreSQL Queue Store
//!
//! Durable envelope storage on two tables, `job_envelopes` and `job_log`
//! (see `migrations/`). Claims use `FOR UPDATE SKIP LOCKED` so concurrent
//! workers never receive the same envelope; settlement statements match on
//! the claim token so a worker whose lease expired cannot settle an envelope
//! another worker has since claimed.

use super::{
    Claim, CompletionRecord, EnqueueRequest, EnvelopeState, MessagingError, MessagingResult,
    PurgeCounts, QueueDepth, QueueName, QueueStore, RetentionCutoffs, StoredEnvelope,
    TaskEnvelope, TaskId,
};
use crate::constants::DEFAULT_LEASE_SECONDS;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const ENVELOPE_COLUMNS: &str = "task_id, task_type, queue_name, payload, attempts, max_attempts, \
     state, created_at, run_at, claimed_by, claim_token, lease_expires_at, last_error, died_at";

#[derive(Debug, FromRow)]
struct EnvelopeRow {
    task_id: Uuid,
    task_type: String,
    queue_name: String,
    payload: Value,
    attempts: i32,
    max_attempts: i32,
    state: String,
    created_at: DateTime<Utc>,
    run_at: DateTime<Utc>,
    claimed_by: Option<String>,
    claim_token: Option<Uuid>,
    lease_expires_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    died_at: Option<DateTime<Utc>>,
}

impl TryFrom<EnvelopeRow> for StoredEnvelope {
    type Error = MessagingError;

    fn try_from(row: EnvelopeRow) -> Result<Self, Self::Error> {
        let claim = match (row.claimed_by, row.claim_token, row.lease_expires_at) {
            (Some(worker_id), Some(token), Some(lease_expires_at)) => Some(Claim {
                worker_id,
                token,
                lease_expires_at,
            }),
            _ => None,
        };

        Ok(StoredEnvelope {
            envelope: TaskEnvelope {
                task_id: row.task_id.into(),
                task_type: row
                    .task_type
                    .parse()
                    .map_err(MessagingError::message_deserialization)?,
                queue: row
                    .queue_name
                    .parse()
                    .map_err(MessagingError::message_deserialization)?,
                payload: row.payload,
                attempts: row.attempts.max(0) as u32,
                max_attempts: row.max_attempts.max(0) as u32,
                created_at: row.created_at,
                run_at: row.run_at,
                claim,
            },
            state: row
                .state
                .parse()
                .map_err(MessagingError::message_deserialization)?,
            last_error: row.last_error,
            died_at: row.died_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct CompletionRow {
    task_id: Uuid,
    task_type: String,
    queue_name: String,
    attempts: i32,
    duration_ms: i64,
    completed_at: DateTime<Utc>,
    result: Option<Value>,
}

impl TryFrom<CompletionRow> for CompletionRecord {
    type Error = MessagingError;

    fn try_from(row: CompletionRow) -> Result<Self, Self::Error> {
        Ok(CompletionRecord {
            task_id: row.task_id.into(),
            task_type: row
                .task_type
                .parse()
                .map_err(MessagingError::message_deserialization)?,
            queue: row
                .queue_name
                .parse()
                .map_err(MessagingError::message_deserialization)?,
            attempts: row.attempts.max(0) as u32,
            duration_ms: row.duration_ms.max(0) as u64,
            completed_at: row.completed_at,
            result: row.result,
        })
    }
}

fn claim_token(envelope: &TaskEnvelope) -> MessagingResult<Uuid> {
    envelope
        .claim
        .as_ref()
        .map(|claim| claim.token)
        .ok_or_else(|| MessagingError::lease_lost(envelope.task_id))
}

/// Queue store backed by PostgreSQL
#[derive(Debug, Clone)]
pub struct PostgresQueueStore {
    pool: PgPool,
    lease: Duration,
}

impl PostgresQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lease: Duration::from_secs(DEFAULT_LEASE_SECONDS),
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Open a connection pool
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> MessagingResult<PgPool> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await
            .map_err(|e| {
                error!("Failed to connect to queue database: {}", e);
                MessagingError::database_connection(e.to_string())
            })
    }

    /// Apply pending schema migrations
    pub async fn migrate(&self) -> MessagingResult<()> {
        MIGRATOR.run(&self.pool).await?;
        info!("Queue store migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert_envelope(
        tx: &mut Transaction<'_, Postgres>,
        request: EnqueueRequest,
    ) -> MessagingResult<TaskId> {
        let task_id = TaskId::new();
        sqlx::query(
            r#"
            INSERT INTO job_envelopes (task_id, task_type, queue_name, payload, max_attempts)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(task_id.as_uuid())
        .bind(request.task_type.as_str())
        .bind(request.queue.as_str())
        .bind(&request.payload)
        .bind(request.max_attempts as i32)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            MessagingError::queue_operation(request.queue.as_str(), "enqueue", e.to_string())
        })?;
        Ok(task_id)
    }

    fn ensure_settled(
        envelope: &TaskEnvelope,
        operation: &str,
        rows_affected: u64,
    ) -> MessagingResult<()> {
        if rows_affected == 0 {
            warn!(
                task_id = %envelope.task_id,
                operation = operation,
                "Claim is no longer current, operation rejected"
            );
            return Err(MessagingError::lease_lost(envelope.task_id));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueStore for PostgresQueueStore {
    #[instrument(skip(self, request), fields(task_type = %request.task_type, queue = %request.queue))]
    async fn enqueue(&self, request: EnqueueRequest) -> MessagingResult<TaskId> {
        let mut tx = self.pool.begin().await?;
        let task_id = Self::insert_envelope(&mut tx, request).await?;
        tx.commit().await?;
        debug!(task_id = %task_id, "Envelope enqueued");
        Ok(task_id)
    }

    async fn dequeue(
        &self,
        queue: QueueName,
        worker_id: &str,
    ) -> MessagingResult<Option<TaskEnvelope>> {
        let query = format!(
            r#"
            UPDATE job_envelopes
            SET state = 'in_flight',
                claimed_by = $2,
                claim_token = $3,
                lease_expires_at = now() + make_interval(secs => $4::float8),
                updated_at = now()
            WHERE task_id = (
                SELECT task_id FROM job_envelopes
                WHERE queue_name = $1
                  AND ((state IN ('pending', 'retrying') AND run_at <= now())
                       OR (state = 'in_flight' AND lease_expires_at <= now()))
                ORDER BY run_at, created_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {ENVELOPE_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, EnvelopeRow>(&query)
            .bind(queue.as_str())
            .bind(worker_id)
            .bind(Uuid::new_v4())
            .bind(self.lease.as_secs_f64())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue.as_str(), "dequeue", e.to_string()))?;

        match row {
            Some(row) => {
                let stored = StoredEnvelope::try_from(row)?;
                Ok(Some(stored.envelope))
            }
            None => Ok(None),
        }
    }

    async fn extend_lease(&self, envelope: &TaskEnvelope) -> MessagingResult<()> {
        let token = claim_token(envelope)?;
        let result = sqlx::query(
            r#"
            UPDATE job_envelopes
            SET lease_expires_at = now() + make_interval(secs => $3::float8),
                updated_at = now()
            WHERE task_id = $1 AND state = 'in_flight' AND claim_token = $2
            "#,
        )
        .bind(envelope.task_id.as_uuid())
        .bind(token)
        .bind(self.lease.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            MessagingError::queue_operation(envelope.queue.as_str(), "extend_lease", e.to_string())
        })?;

        Self::ensure_settled(envelope, "extend_lease", result.rows_affected())
    }

    async fn requeue_with_delay(
        &self,
        envelope: &TaskEnvelope,
        delay: Duration,
        error: &str,
    ) -> MessagingResult<()> {
        let token = claim_token(envelope)?;
        let result = sqlx::query(
            r#"
            UPDATE job_envelopes
            SET state = 'retrying',
                attempts = $3,
                last_error = $4,
                run_at = now() + make_interval(secs => $5::float8),
                claimed_by = NULL, claim_token = NULL, lease_expires_at = NULL,
                updated_at = now()
            WHERE task_id = $1 AND state = 'in_flight' AND claim_token = $2
            "#,
        )
        .bind(envelope.task_id.as_uuid())
        .bind(token)
        .bind(envelope.attempts as i32)
        .bind(error)
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            MessagingError::queue_operation(envelope.queue.as_str(), "requeue", e.to_string())
        })?;

        Self::ensure_settled(envelope, "requeue", result.rows_affected())
    }

    async fn kill(&self, envelope: &TaskEnvelope, error: &str) -> MessagingResult<()> {
        let token = claim_token(envelope)?;
        let result = sqlx::query(
            r#"
            UPDATE job_envelopes
            SET state = 'dead',
                attempts = $3,
                last_error = $4,
                died_at = now(),
                claimed_by = NULL, claim_token = NULL, lease_expires_at = NULL,
                updated_at = now()
            WHERE task_id = $1 AND state = 'in_flight' AND claim_token = $2
            "#,
        )
        .bind(envelope.task_id.as_uuid())
        .bind(token)
        .bind(envelope.attempts as i32)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            MessagingError::queue_operation(envelope.queue.as_str(), "kill", e.to_string())
        })?;

        Self::ensure_settled(envelope, "kill", result.rows_affected())
    }

    #[instrument(skip_all, fields(task_id = %envelope.task_id, follow_ups = follow_ups.len()))]
    async fn complete(
        &self,
        envelope: &TaskEnvelope,
        completion: CompletionRecord,
        follow_ups: Vec<EnqueueRequest>,
    ) -> MessagingResult<Vec<TaskId>> {
        let token = claim_token(envelope)?;
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query(
            "DELETE FROM job_envelopes WHERE task_id = $1 AND state = 'in_flight' AND claim_token = $2",
        )
        .bind(envelope.task_id.as_uuid())
        .bind(token)
        .execute(&mut *tx)
        .await?;

        if let Err(e) = Self::ensure_settled(envelope, "complete", deleted.rows_affected()) {
            tx.rollback().await?;
            return Err(e);
        }

        sqlx::query(
            r#"
            INSERT INTO job_log (task_id, task_type, queue_name, attempts, duration_ms, completed_at, result)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (task_id) DO UPDATE
            SET attempts = EXCLUDED.attempts,
                duration_ms = EXCLUDED.duration_ms,
                completed_at = EXCLUDED.completed_at,
                result = EXCLUDED.result
            "#,
        )
        .bind(completion.task_id.as_uuid())
        .bind(completion.task_type.as_str())
        .bind(completion.queue.as_str())
        .bind(completion.attempts as i32)
        .bind(completion.duration_ms as i64)
        .bind(completion.completed_at)
        .bind(&completion.result)
        .execute(&mut *tx)
        .await?;

        let mut ids = Vec::with_capacity(follow_ups.len());
        for request in follow_ups {
            ids.push(Self::insert_envelope(&mut tx, request).await?);
        }

        tx.commit().await?;
        Ok(ids)
    }

    async fn find(&self, task_id: TaskId) -> MessagingResult<Option<StoredEnvelope>> {
        let query = format!("SELECT {ENVELOPE_COLUMNS} FROM job_envelopes WHERE task_id = $1");
        sqlx::query_as::<_, EnvelopeRow>(&query)
            .bind(task_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(StoredEnvelope::try_from)
            .transpose()
    }

    async fn find_completion(&self, task_id: TaskId) -> MessagingResult<Option<CompletionRecord>> {
        sqlx::query_as::<_, CompletionRow>(
            r#"
            SELECT task_id, task_type, queue_name, attempts, duration_ms, completed_at, result
            FROM job_log WHERE task_id = $1
            "#,
        )
        .bind(task_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(CompletionRecord::try_from)
        .transpose()
    }

    async fn list_dead(&self, limit: usize) -> MessagingResult<Vec<StoredEnvelope>> {
        let query = format!(
            "SELECT {ENVELOPE_COLUMNS} FROM job_envelopes WHERE state = 'dead' \
             ORDER BY died_at DESC LIMIT $1"
        );
        sqlx::query_as::<_, EnvelopeRow>(&query)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(StoredEnvelope::try_from)
            .collect()
    }

    async fn replay_dead(&self, task_id: TaskId) -> MessagingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE job_envelopes
            SET state = 'pending', attempts = 0, run_at = now(), died_at = NULL, updated_at = now()
            WHERE task_id = $1 AND state = 'dead'
            "#,
        )
        .bind(task_id.as_uuid())
        .execute(&self.pool)
        .await?;

        let replayed = result.rows_affected() > 0;
        if replayed {
            info!(task_id = %task_id, "Dead envelope replayed");
        }
        Ok(replayed)
    }

    async fn queue_depths(&self) -> MessagingResult<Vec<QueueDepth>> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            "SELECT queue_name, state, COUNT(*) FROM job_envelopes GROUP BY queue_name, state",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut depths: Vec<QueueDepth> = QueueName::ALL
            .iter()
            .map(|queue| QueueDepth {
                queue: queue.as_str().to_string(),
                ..QueueDepth::default()
            })
            .collect();

        for (queue_name, state, count) in rows {
            let Some(depth) = depths.iter_mut().find(|d| d.queue == queue_name) else {
                continue;
            };
            let count = count.max(0) as u64;
            match state.parse::<EnvelopeState>() {
                Ok(EnvelopeState::Pending) => depth.pending = count,
                Ok(EnvelopeState::InFlight) => depth.in_flight = count,
                Ok(EnvelopeState::Retrying) => depth.retrying = count,
                Ok(EnvelopeState::Dead) => depth.dead = count,
                Err(e) => warn!("Ignoring queue depth row: {}", e),
            }
        }
        Ok(depths)
    }

    async fn purge_expired(&self, cutoffs: RetentionCutoffs) -> MessagingResult<PurgeCounts> {
        let mut tx = self.pool.begin().await?;

        let job_log_deleted = sqlx::query("DELETE FROM job_log WHERE completed_at < $1")
            .bind(cutoffs.job_log_before)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let results_cleared = sqlx::query(
            "UPDATE job_log SET result = NULL WHERE completed_at < $1 AND result IS NOT NULL",
        )
        .bind(cutoffs.results_before)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let dead_deleted =
            sqlx::query("DELETE FROM job_envelopes WHERE state = 'dead' AND died_at < $1")
                .bind(cutoffs.dead_before)
                .execute(&mut *tx)
                .await?
                .rows_affected();

        tx.commit().await?;

        Ok(PurgeCounts {
            job_log_deleted,
            results_cleared,
            dead_deleted,
        })
    }

    async fn health_check(&self) -> MessagingResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| MessagingError::database_connection(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::TaskType;
    use serde_json::json;

    /// Store against `TEST_DATABASE_URL`, or `None` to skip
    async fn test_store() -> Option<PostgresQueueStore> {
        let Some(url) = crate::test_helpers::test_database_url() else {
            eprintln!("Skipping PostgreSQL store test: TEST_DATABASE_URL not set");
            return None;
        };
        let pool = PostgresQueueStore::connect(&url, 5, Duration::from_secs(5))
            .await
            .expect("connect to test database");
        let store = PostgresQueueStore::new(pool);
        store.migrate().await.expect("apply migrations");
        sqlx::query("TRUNCATE job_envelopes, job_log")
            .execute(store.pool())
            .await
            .expect("truncate queue tables");
        Some(store)
    }

    #[tokio::test]
    async fn test_postgres_envelope_lifecycle() {
        let Some(store) = test_store().await else {
            return;
        };

        let task_id = store
            .enqueue(EnqueueRequest::new(
                TaskType::RiskScoring,
                json!({"entity_id": "e-1"}),
            ))
            .await
            .unwrap();

        let mut envelope = store
            .dequeue(QueueName::Scoring, "worker-1")
            .await
            .unwrap()
            .expect("claimable envelope");
        assert_eq!(envelope.task_id, task_id);
        assert!(store.dequeue(QueueName::Scoring, "worker-2").await.unwrap().is_none());

        store.extend_lease(&envelope).await.unwrap();
        let renewed = store.find(task_id).await.unwrap().unwrap().envelope.claim.unwrap();
        assert!(renewed.lease_expires_at >= envelope.claim.as_ref().unwrap().lease_expires_at);

        envelope.attempts = 1;
        store
            .requeue_with_delay(&envelope, Duration::from_secs(0), "backend down")
            .await
            .unwrap();
        let stored = store.find(task_id).await.unwrap().unwrap();
        assert_eq!(stored.state, EnvelopeState::Retrying);
        assert_eq!(stored.envelope.attempts, 1);

        // The old claim token is no longer valid
        let err = store.kill(&envelope, "late").await.unwrap_err();
        assert!(matches!(err, MessagingError::LeaseLost { .. }));
        let err = store.extend_lease(&envelope).await.unwrap_err();
        assert!(matches!(err, MessagingError::LeaseLost { .. }));

        let envelope = store
            .dequeue(QueueName::Scoring, "worker-1")
            .await
            .unwrap()
            .expect("retry is due");
        let follow_ups = store
            .complete(
                &envelope,
                CompletionRecord::for_envelope(&envelope, 7, json!({"risk_level": "high"})),
                vec![EnqueueRequest::new(TaskType::Alert, json!({"alert_type": "high_risk_entity"}))],
            )
            .await
            .unwrap();
        assert_eq!(follow_ups.len(), 1);
        assert!(store.find(task_id).await.unwrap().is_none());
        assert_eq!(
            store.find_completion(task_id).await.unwrap().unwrap().attempts,
            1
        );

        let mut alert = store
            .dequeue(QueueName::Critical, "worker-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alert.max_attempts, 5);
        alert.attempts = 5;
        store.kill(&alert, "sink unavailable").await.unwrap();

        let dead = store.list_dead(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].last_error.as_deref(), Some("sink unavailable"));

        let depths = store.queue_depths().await.unwrap();
        assert_eq!(depths.iter().find(|d| d.queue == "critical").unwrap().dead, 1);

        assert!(store.replay_dead(alert.task_id).await.unwrap());
        let replayed = store.find(alert.task_id).await.unwrap().unwrap();
        assert_eq!(replayed.state, EnvelopeState::Pending);
        assert_eq!(replayed.envelope.attempts, 0);

        store.health_check().await.unwrap();
    }
}
