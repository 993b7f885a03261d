use crate::billing::BillingError;
use crate::plans::ResourceKind;
use crate::storage::StorageError;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::{Json, http::StatusCode};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Failures of the habit, task, account and plan rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("{0}")]
    Validation(String),

    #[error("You've reached the limit of {limit} {kind}. Upgrade your plan for more!")]
    LimitExceeded { kind: ResourceKind, limit: usize },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    InvalidCredentials(String),

    #[error("{0}")]
    ExternalService(String),
}

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal(err: impl std::error::Error) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        let status = match &err {
            DomainError::Validation(_) => StatusCode::BAD_REQUEST,
            DomainError::LimitExceeded { .. } => StatusCode::FORBIDDEN,
            DomainError::NotFound(_) => StatusCode::NOT_FOUND,
            DomainError::Conflict(_) => StatusCode::CONFLICT,
            DomainError::InvalidCredentials(_) => StatusCode::UNAUTHORIZED,
            DomainError::ExternalService(_) => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, err.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        Self::internal(err)
    }
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InvalidSignature(reason) => {
                Self::bad_request(format!("Webhook Error: {reason}"))
            }
            BillingError::InvalidPayload(_) => Self::bad_request(err.to_string()),
            BillingError::NotConfigured => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            other => DomainError::from(other).into(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        if self.status.is_server_error() {
            error!(status = %self.status, "request failed: {}", self.message);
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
