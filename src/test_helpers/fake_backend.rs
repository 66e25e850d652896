//! Scripted in-process backend for handler and cascade tests.

use crate::backend::{BackendApi, BackendError, BackendResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};

/// A scripted reply
#[derive(Debug, Clone, PartialEq)]
pub enum FakeResponse {
    Json(Value),
    /// Non-2xx reply, surfaced as `BackendError::ApiError`
    Status(u16, String),
}

impl FakeResponse {
    fn into_result(self) -> BackendResult<Value> {
        match self {
            FakeResponse::Json(value) => Ok(value),
            FakeResponse::Status(status, body) => Err(BackendError::api_error(status, body)),
        }
    }
}

/// A call the fake received
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: &'static str,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RecordedCall {
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Default)]
struct Script {
    /// One-shot replies, consumed in order before the sticky reply
    queued: VecDeque<FakeResponse>,
    sticky: Option<FakeResponse>,
}

/// [`BackendApi`] double keyed by method and path
///
/// Paths without a scripted reply answer `404`.
#[derive(Debug, Default)]
pub struct FakeBackend {
    scripts: Mutex<HashMap<(&'static str, String), Script>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self, method: &'static str, path: &str, response: FakeResponse, sticky: bool) {
        let mut scripts = self.scripts.lock();
        let script = scripts.entry((method, path.to_string())).or_default();
        if sticky {
            script.sticky = Some(response);
        } else {
            script.queued.push_back(response);
        }
    }

    /// Reply to every `GET path` with `body`
    pub fn on_get(&self, path: &str, body: Value) -> &Self {
        self.script("GET", path, FakeResponse::Json(body), true);
        self
    }

    /// Reply to every `POST path` with `body`
    pub fn on_post(&self, path: &str, body: Value) -> &Self {
        self.script("POST", path, FakeResponse::Json(body), true);
        self
    }

    /// Reply to the next unanswered `GET path` with `response`
    pub fn push_get(&self, path: &str, response: FakeResponse) -> &Self {
        self.script("GET", path, response, false);
        self
    }

    /// Reply to the next unanswered `POST path` with `response`
    pub fn push_post(&self, path: &str, response: FakeResponse) -> &Self {
        self.script("POST", path, response, false);
        self
    }

    pub fn fail_get(&self, path: &str, status: u16) -> &Self {
        self.script("GET", path, FakeResponse::Status(status, "scripted failure".into()), true);
        self
    }

    pub fn fail_post(&self, path: &str, status: u16) -> &Self {
        self.script("POST", path, FakeResponse::Status(status, "scripted failure".into()), true);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, method: &str, path: &str) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.method == method && call.path == path)
            .cloned()
            .collect()
    }

    fn respond(&self, method: &'static str, path: &str) -> BackendResult<Value> {
        let mut scripts = self.scripts.lock();
        let response = scripts
            .get_mut(&(method, path.to_string()))
            .and_then(|script| script.queued.pop_front().or_else(|| script.sticky.clone()))
            .unwrap_or_else(|| FakeResponse::Status(404, format!("no script for {method} {path}")));
        response.into_result()
    }
}

#[async_trait]
impl BackendApi for FakeBackend {
    async fn get(&self, path: &str, query: &[(&str, String)]) -> BackendResult<Value> {
        self.calls.lock().push(RecordedCall {
            method: "GET",
            path: path.to_string(),
            query: query
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            body: None,
        });
        self.respond("GET", path)
    }

    async fn post(&self, path: &str, body: &Value) -> BackendResult<Value> {
        self.calls.lock().push(RecordedCall {
            method: "POST",
            path: path.to_string(),
            query: Vec::new(),
            body: Some(body.clone()),
        });
        self.respond("POST", path)
    }
}
