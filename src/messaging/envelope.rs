//! # Task Envelopes
//!
//! The unit of work carried through the queue store. An envelope names the
//! handler that should run it ([`TaskType`]), the queue it lives on
//! ([`QueueName`]), an opaque JSON payload and its retry accounting.
//!
//! Every task type has a fixed routing: a default queue and an attempt budget.
//! Envelopes on the `critical` queue get five attempts, everything else three.

use crate::constants::{CRITICAL_MAX_ATTEMPTS, DEFAULT_MAX_ATTEMPTS};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Globally unique, immutable envelope identifier (UUID v4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TaskId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Named queues with static priority weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    Critical,
    EntityResolution,
    NetworkAnalysis,
    Scoring,
    Batch,
    Default,
    Low,
}

impl QueueName {
    /// All queues, highest weight first
    pub const ALL: [QueueName; 7] = [
        QueueName::Critical,
        QueueName::EntityResolution,
        QueueName::NetworkAnalysis,
        QueueName::Scoring,
        QueueName::Batch,
        QueueName::Default,
        QueueName::Low,
    ];

    pub fn weight(&self) -> u8 {
        match self {
            QueueName::Critical => 6,
            QueueName::EntityResolution => 5,
            QueueName::NetworkAnalysis => 4,
            QueueName::Scoring => 4,
            QueueName::Batch => 3,
            QueueName::Default => 2,
            QueueName::Low => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Critical => "critical",
            QueueName::EntityResolution => "entity_resolution",
            QueueName::NetworkAnalysis => "network_analysis",
            QueueName::Scoring => "scoring",
            QueueName::Batch => "batch",
            QueueName::Default => "default",
            QueueName::Low => "low",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueName::ALL
            .into_iter()
            .find(|queue| queue.as_str() == s)
            .ok_or_else(|| format!("unknown queue: {s}"))
    }
}

/// Handler names, one per job type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    EntityResolution,
    EntityResolutionSync,
    NetworkAnalysis,
    NetworkGeneration,
    NetworkRefresh,
    RiskScoring,
    BatchScoring,
    BatchScreening,
    WatchlistSync,
    TransactionAnalysis,
    EnhancedDueDiligence,
    Alert,
    Cleanup,
}

impl TaskType {
    pub const ALL: [TaskType; 13] = [
        TaskType::EntityResolution,
        TaskType::EntityResolutionSync,
        TaskType::NetworkAnalysis,
        TaskType::NetworkGeneration,
        TaskType::NetworkRefresh,
        TaskType::RiskScoring,
        TaskType::BatchScoring,
        TaskType::BatchScreening,
        TaskType::WatchlistSync,
        TaskType::TransactionAnalysis,
        TaskType::EnhancedDueDiligence,
        TaskType::Alert,
        TaskType::Cleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::EntityResolution => "entity_resolution",
            TaskType::EntityResolutionSync => "entity_resolution_sync",
            TaskType::NetworkAnalysis => "network_analysis",
            TaskType::NetworkGeneration => "network_generation",
            TaskType::NetworkRefresh => "network_refresh",
            TaskType::RiskScoring => "risk_scoring",
            TaskType::BatchScoring => "batch_scoring",
            TaskType::BatchScreening => "batch_screening",
            TaskType::WatchlistSync => "watchlist_sync",
            TaskType::TransactionAnalysis => "transaction_analysis",
            TaskType::EnhancedDueDiligence => "enhanced_due_diligence",
            TaskType::Alert => "alert",
            TaskType::Cleanup => "cleanup",
        }
    }

    /// Path segment used by the producer API (`POST /v1/jobs/{kind}`)
    pub fn job_kind(&self) -> &'static str {
        match self {
            TaskType::EntityResolution => "entity-resolution",
            TaskType::EntityResolutionSync => "entity-resolution-sync",
            TaskType::NetworkAnalysis => "network-analysis",
            TaskType::NetworkGeneration => "network-generation",
            TaskType::NetworkRefresh => "network-refresh",
            TaskType::RiskScoring => "risk-scoring",
            TaskType::BatchScoring => "batch-scoring",
            TaskType::BatchScreening => "batch-screening",
            TaskType::WatchlistSync => "watchlist-sync",
            TaskType::TransactionAnalysis => "transaction-analysis",
            TaskType::EnhancedDueDiligence => "enhanced-due-diligence",
            TaskType::Alert => "alerts",
            TaskType::Cleanup => "cleanup",
        }
    }

    pub fn from_job_kind(kind: &str) -> Option<Self> {
        TaskType::ALL.into_iter().find(|t| t.job_kind() == kind)
    }

    pub fn default_queue(&self) -> QueueName {
        match self {
            TaskType::EntityResolution | TaskType::EntityResolutionSync => {
                QueueName::EntityResolution
            }
            TaskType::NetworkAnalysis | TaskType::NetworkGeneration | TaskType::NetworkRefresh => {
                QueueName::NetworkAnalysis
            }
            TaskType::RiskScoring => QueueName::Scoring,
            TaskType::BatchScoring | TaskType::BatchScreening => QueueName::Batch,
            TaskType::TransactionAnalysis | TaskType::WatchlistSync => QueueName::Default,
            TaskType::EnhancedDueDiligence | TaskType::Alert => QueueName::Critical,
            TaskType::Cleanup => QueueName::Low,
        }
    }

    pub fn default_max_attempts(&self) -> u32 {
        max_attempts_for(self.default_queue())
    }
}

/// Attempt budget for envelopes living on `queue`
pub fn max_attempts_for(queue: QueueName) -> u32 {
    match queue {
        QueueName::Critical => CRITICAL_MAX_ATTEMPTS,
        _ => DEFAULT_MAX_ATTEMPTS,
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown task type: {s}"))
    }
}

/// Lifecycle state of a stored envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeState {
    Pending,
    InFlight,
    Retrying,
    Dead,
}

impl EnvelopeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeState::Pending => "pending",
            EnvelopeState::InFlight => "in_flight",
            EnvelopeState::Retrying => "retrying",
            EnvelopeState::Dead => "dead",
        }
    }
}

impl FromStr for EnvelopeState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EnvelopeState::Pending),
            "in_flight" => Ok(EnvelopeState::InFlight),
            "retrying" => Ok(EnvelopeState::Retrying),
            "dead" => Ok(EnvelopeState::Dead),
            other => Err(format!("unknown envelope state: {other}")),
        }
    }
}

/// Current holder of an in-flight envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub worker_id: String,
    pub token: Uuid,
    pub lease_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub queue: QueueName,
    pub payload: Value,
    /// Failed executions so far; only ever incremented on failure
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    /// Earliest time the envelope may be claimed
    pub run_at: DateTime<Utc>,
    pub claim: Option<Claim>,
}

impl TaskEnvelope {
    pub fn priority(&self) -> u8 {
        self.queue.weight()
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// String field from the payload, used for log context
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

/// Request to place a new envelope on a queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub task_type: TaskType,
    pub queue: QueueName,
    pub payload: Value,
    pub max_attempts: u32,
}

impl EnqueueRequest {
    /// Request routed with the task type's default queue and attempt budget
    pub fn new(task_type: TaskType, payload: Value) -> Self {
        Self {
            task_type,
            queue: task_type.default_queue(),
            payload,
            max_attempts: task_type.default_max_attempts(),
        }
    }

    /// Route to a different queue; the attempt budget follows the queue
    pub fn on_queue(mut self, queue: QueueName) -> Self {
        self.queue = queue;
        self.max_attempts = max_attempts_for(queue);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Materialize into a pending envelope
    pub fn into_envelope(self, now: DateTime<Utc>) -> TaskEnvelope {
        TaskEnvelope {
            task_id: TaskId::new(),
            task_type: self.task_type,
            queue: self.queue,
            payload: self.payload,
            attempts: 0,
            max_attempts: self.max_attempts,
            created_at: now,
            run_at: now,
            claim: None,
        }
    }
}

/// An envelope as the store holds it, with lifecycle state and failure context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEnvelope {
    pub envelope: TaskEnvelope,
    pub state: EnvelopeState,
    pub last_error: Option<String>,
    pub died_at: Option<DateTime<Utc>>,
}

/// Completed-job log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub queue: QueueName,
    pub attempts: u32,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
    /// Handler result; cleared once older than the result retention window
    pub result: Option<Value>,
}

impl CompletionRecord {
    pub fn for_envelope(envelope: &TaskEnvelope, duration_ms: u64, result: Value) -> Self {
        Self {
            task_id: envelope.task_id,
            task_type: envelope.task_type,
            queue: envelope.queue,
            attempts: envelope.attempts,
            duration_ms,
            completed_at: Utc::now(),
            result: Some(result),
        }
    }
}

/// Per-queue counts by state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueDepth {
    pub queue: String,
    pub pending: u64,
    pub in_flight: u64,
    pub retrying: u64,
    pub dead: u64,
}

/// Rows removed or cleared by a retention pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeCounts {
    pub job_log_deleted: u64,
    pub results_cleared: u64,
    pub dead_deleted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_queue_weights_are_ordered() {
        let weights: Vec<u8> = QueueName::ALL.iter().map(QueueName::weight).collect();
        assert_eq!(weights, vec![6, 5, 4, 4, 3, 2, 1]);
    }

    #[test]
    fn test_task_routing() {
        assert_eq!(TaskType::Alert.default_queue(), QueueName::Critical);
        assert_eq!(TaskType::Alert.default_max_attempts(), 5);
        assert_eq!(TaskType::EnhancedDueDiligence.default_max_attempts(), 5);
        assert_eq!(TaskType::RiskScoring.default_queue(), QueueName::Scoring);
        assert_eq!(TaskType::RiskScoring.default_max_attempts(), 3);
        assert_eq!(TaskType::Cleanup.default_queue(), QueueName::Low);
        assert_eq!(TaskType::WatchlistSync.default_queue(), QueueName::Default);
        assert_eq!(
            TaskType::NetworkRefresh.default_queue(),
            QueueName::NetworkAnalysis
        );
    }

    #[test]
    fn test_job_kind_lookup() {
        for task_type in TaskType::ALL {
            assert_eq!(TaskType::from_job_kind(task_type.job_kind()), Some(task_type));
            assert_eq!(task_type.as_str().parse::<TaskType>(), Ok(task_type));
        }
        assert_eq!(TaskType::from_job_kind("alerts"), Some(TaskType::Alert));
        assert_eq!(TaskType::from_job_kind("alert"), None);
    }

    #[test]
    fn test_serde_names_match_as_str() {
        let value = serde_json::to_value(TaskType::EnhancedDueDiligence).unwrap();
        assert_eq!(value, json!("enhanced_due_diligence"));
        let value = serde_json::to_value(QueueName::NetworkAnalysis).unwrap();
        assert_eq!(value, json!("network_analysis"));
    }

    #[test]
    fn test_enqueue_request_requeue_to_critical() {
        let request = EnqueueRequest::new(TaskType::RiskScoring, json!({}))
            .on_queue(QueueName::Critical);
        assert_eq!(request.max_attempts, CRITICAL_MAX_ATTEMPTS);

        let envelope = request.into_envelope(Utc::now());
        assert_eq!(envelope.attempts, 0);
        assert_eq!(envelope.priority(), 6);
        assert!(envelope.claim.is_none());
        assert!(!envelope.is_exhausted());
    }

    #[test]
    fn test_task_id_parse() {
        let id = TaskId::new();
        assert_eq!(id.to_string().parse::<TaskId>().unwrap(), id);
        assert!("not-a-uuid".parse::<TaskId>().is_err());
    }
}
