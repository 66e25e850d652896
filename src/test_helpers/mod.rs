//! Test doubles shared by unit and integration tests.

pub mod fake_backend;

pub use fake_backend::{FakeBackend, FakeResponse, RecordedCall};

use crate::alerts::{AlertRecord, Notifier};
use crate::messaging::{EnqueueRequest, TaskEnvelope, TaskType};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;

/// Notifier that keeps every alert it is handed
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    alerts: Mutex<Vec<AlertRecord>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<AlertRecord> {
        self.alerts.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, alert: &AlertRecord) {
        self.alerts.lock().push(alert.clone());
    }
}

/// Database URL for tests that need PostgreSQL, or `None` to skip them
pub fn test_database_url() -> Option<String> {
    std::env::var("TEST_DATABASE_URL").ok()
}

/// Unclaimed envelope for calling a handler directly
pub fn envelope_for(task_type: TaskType, payload: Value) -> TaskEnvelope {
    EnqueueRequest::new(task_type, payload).into_envelope(Utc::now())
}
