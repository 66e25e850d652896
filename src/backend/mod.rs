//! # Decision-Engine Backend
//!
//! Every handler reaches the external backend through the [`BackendApi`]
//! trait. [`BackendClient`] is the production implementation; it is built
//! once at start-up and shared behind an `Arc`.

pub mod client;
pub mod errors;

pub use client::{BackendClient, BackendClientConfig};
pub use errors::{BackendError, BackendResult};

use async_trait::async_trait;
use serde_json::Value;
use std::borrow::Cow;

/// Percent-encode an id or name for use as one segment of a backend path
pub fn path_segment(raw: &str) -> Cow<'_, str> {
    urlencoding::encode(raw)
}

#[async_trait]
pub trait BackendApi: Send + Sync {
    /// `GET {base}{path}?{query}`; returns the parsed body
    async fn get(&self, path: &str, query: &[(&str, String)]) -> BackendResult<Value>;

    /// `POST {base}{path}` with a JSON body; returns the parsed body
    async fn post(&self, path: &str, body: &Value) -> BackendResult<Value>;
}
