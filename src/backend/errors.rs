//! # Backend Error Types

use thiserror::Error;

pub type BackendResult<T> = Result<T, BackendError>;

/// Errors talking to the decision-engine backend
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("API error: {status} - {body}")]
    ApiError { status: u16, body: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid response from {path}: {reason}")]
    InvalidResponse { path: String, reason: String },

    #[error("Invalid request path: {path}")]
    InvalidPath { path: String },
}

impl BackendError {
    pub fn api_error(status: u16, body: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            body: body.into(),
        }
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Create an invalid response error for a body missing required fields
    pub fn invalid_response(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath { path: path.into() }
    }

    /// Connect, timeout and body-read failures; the only errors the client retries itself
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::HttpError(e) => e.is_timeout() || e.is_connect() || e.is_body(),
            _ => false,
        }
    }

    /// HTTP status carried by an application error
    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::ApiError { status, .. } => Some(*status),
            _ => None,
        }
    }
}
