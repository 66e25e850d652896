//! Crate-level error type.
//!
//! Each layer owns its error enum ([`MessagingError`], [`BackendError`],
//! [`ConfigurationError`]); [`JobError`] wraps them for the dispatcher and
//! the handlers, and adds the handler-side failures.

use crate::backend::BackendError;
use crate::config::ConfigurationError;
use crate::messaging::MessagingError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Invalid payload for {task_type}: {message}")]
    InvalidPayload { task_type: String, message: String },

    #[error("No handler registered for task type: {task_type}")]
    HandlerNotFound { task_type: String },

    #[error("Handler {task_type} failed: {message}")]
    HandlerFailed { task_type: String, message: String },

    #[error("Unknown scheduled job: {name}")]
    UnknownSchedule { name: String },
}

impl JobError {
    pub fn invalid_payload(task_type: impl ToString, message: impl ToString) -> Self {
        Self::InvalidPayload {
            task_type: task_type.to_string(),
            message: message.to_string(),
        }
    }

    pub fn handler_not_found(task_type: impl ToString) -> Self {
        Self::HandlerNotFound {
            task_type: task_type.to_string(),
        }
    }

    pub fn handler_failed(task_type: impl ToString, message: impl Into<String>) -> Self {
        Self::HandlerFailed {
            task_type: task_type.to_string(),
            message: message.into(),
        }
    }
}

pub type JobResult<T> = Result<T, JobError>;
