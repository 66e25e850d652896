//! # Status Query Service
//!
//! Consolidated view of a task id across the live envelope states and the
//! completed-job log. `Unknown` covers ids that never existed and completions
//! that have already been purged by retention.

use crate::messaging::{
    CompletionRecord, EnvelopeState, MessagingResult, QueueStore, StoredEnvelope, TaskId,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    Pending {
        task_type: String,
        queue: String,
        run_at: DateTime<Utc>,
    },
    InFlight {
        task_type: String,
        queue: String,
        worker_id: Option<String>,
        attempt: u32,
    },
    Retrying {
        task_type: String,
        queue: String,
        /// Failed executions so far
        attempt: u32,
        max_attempts: u32,
        next_run_at: DateTime<Utc>,
        last_error: Option<String>,
    },
    Dead {
        task_type: String,
        queue: String,
        attempts: u32,
        error: Option<String>,
        died_at: Option<DateTime<Utc>>,
    },
    Completed {
        task_type: String,
        queue: String,
        attempts: u32,
        duration_ms: u64,
        completed_at: DateTime<Utc>,
        result: Option<Value>,
    },
    Unknown,
}

impl TaskStatus {
    pub fn name(&self) -> &'static str {
        match self {
            TaskStatus::Pending { .. } => "pending",
            TaskStatus::InFlight { .. } => "in_flight",
            TaskStatus::Retrying { .. } => "retrying",
            TaskStatus::Dead { .. } => "dead",
            TaskStatus::Completed { .. } => "completed",
            TaskStatus::Unknown => "unknown",
        }
    }

    fn from_stored(stored: StoredEnvelope) -> Self {
        let env = stored.envelope;
        let task_type = env.task_type.to_string();
        let queue = env.queue.to_string();
        match stored.state {
            EnvelopeState::Pending => TaskStatus::Pending {
                task_type,
                queue,
                run_at: env.run_at,
            },
            EnvelopeState::InFlight => TaskStatus::InFlight {
                task_type,
                queue,
                worker_id: env.claim.map(|c| c.worker_id),
                attempt: env.attempts + 1,
            },
            EnvelopeState::Retrying => TaskStatus::Retrying {
                task_type,
                queue,
                attempt: env.attempts,
                max_attempts: env.max_attempts,
                next_run_at: env.run_at,
                last_error: stored.last_error,
            },
            EnvelopeState::Dead => TaskStatus::Dead {
                task_type,
                queue,
                attempts: env.attempts,
                error: stored.last_error,
                died_at: stored.died_at,
            },
        }
    }

    fn from_completion(record: CompletionRecord) -> Self {
        TaskStatus::Completed {
            task_type: record.task_type.to_string(),
            queue: record.queue.to_string(),
            attempts: record.attempts,
            duration_ms: record.duration_ms,
            completed_at: record.completed_at,
            result: record.result,
        }
    }
}

#[derive(Clone)]
pub struct StatusQueryService {
    store: Arc<dyn QueueStore>,
}

impl std::fmt::Debug for StatusQueryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusQueryService").finish_non_exhaustive()
    }
}

impl StatusQueryService {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    /// Live envelope state first, then the completed-job log
    pub async fn get_status(&self, task_id: TaskId) -> MessagingResult<TaskStatus> {
        if let Some(stored) = self.store.find(task_id).await? {
            return Ok(TaskStatus::from_stored(stored));
        }
        Ok(self
            .store
            .find_completion(task_id)
            .await?
            .map(TaskStatus::from_completion)
            .unwrap_or(TaskStatus::Unknown))
    }
}
