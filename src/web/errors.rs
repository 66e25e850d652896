//! # Web API Error Types
//!
//! Error surface of the producer API and its HTTP mapping. Every error body
//! has the shape `{"error": {"code": ..., "message": ...}}`.

use crate::error::JobError;
use crate::messaging::MessagingError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Invalid request: {message}")]
    BadRequest { message: String },

    #[error("Invalid UUID format: {uuid}")]
    InvalidUuid { uuid: String },

    #[error("Service temporarily unavailable")]
    ServiceUnavailable,

    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn invalid_uuid(uuid: impl Into<String>) -> Self {
        Self::InvalidUuid { uuid: uuid.into() }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::BadRequest { .. } | ApiError::InvalidUuid { .. } => StatusCode::BAD_REQUEST,
            ApiError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (error_code, message) = match &self {
            ApiError::NotFound { resource } => ("NOT_FOUND", resource.as_str()),
            ApiError::BadRequest { message } => ("BAD_REQUEST", message.as_str()),
            ApiError::InvalidUuid { uuid } => ("INVALID_UUID", uuid.as_str()),
            ApiError::ServiceUnavailable => {
                ("SERVICE_UNAVAILABLE", "Service temporarily unavailable")
            }
            ApiError::Internal => ("INTERNAL_ERROR", "Internal server error"),
        };

        let error_response = json!({
            "error": {
                "code": error_code,
                "message": message
            }
        });

        (self.status_code(), Json(error_response)).into_response()
    }
}

impl From<MessagingError> for ApiError {
    fn from(err: MessagingError) -> Self {
        if err.is_unavailable() {
            error!(error = %err, "Queue store unavailable");
            ApiError::ServiceUnavailable
        } else {
            error!(error = %err, "Queue store operation failed");
            ApiError::Internal
        }
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::InvalidPayload { .. } => ApiError::bad_request(err.to_string()),
            JobError::HandlerNotFound { task_type } => {
                ApiError::not_found(format!("job kind `{task_type}`"))
            }
            JobError::UnknownSchedule { name } => {
                ApiError::not_found(format!("scheduled job `{name}`"))
            }
            JobError::Messaging(e) => e.into(),
            other => {
                error!(error = %other, "Unexpected job error in web API");
                ApiError::Internal
            }
        }
    }
}

impl From<uuid::Error> for ApiError {
    fn from(err: uuid::Error) -> Self {
        ApiError::invalid_uuid(err.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
