use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use agora_shared::error::{ErrorCode, ValidationError};
use agora_shared::protocol::FailureResponse;
use agora_store::StoreError;

/// Every way a request can fail. Rendered as `{success: false, error: CODE}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Admin password required")]
    AdminPasswordRequired,

    #[error("Invalid admin password")]
    InvalidAdminPassword,

    #[error("Missing or invalid session")]
    Unauthenticated,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Insufficient privileges")]
    Forbidden,

    #[error("Access denied")]
    AccessDenied,

    #[error("Not found")]
    NotFound,

    #[error("Duplicate {0}")]
    Duplicate(&'static str),

    #[error("Upstream unavailable: {0}")]
    Upstream(String),
}

impl ApiError {
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        ApiError::Validation(ValidationError::InvalidRequest(reason.into()))
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ApiError::Validation(e) => e.code(),
            ApiError::AdminPasswordRequired => ErrorCode::AdminPasswordRequired,
            ApiError::InvalidAdminPassword => ErrorCode::InvalidAdminPassword,
            ApiError::Unauthenticated => ErrorCode::Unauthenticated,
            ApiError::InvalidCredentials => ErrorCode::InvalidCredentials,
            ApiError::Forbidden => ErrorCode::Forbidden,
            ApiError::AccessDenied => ErrorCode::AccessDenied,
            ApiError::NotFound => ErrorCode::NotFound,
            ApiError::Duplicate(_) => ErrorCode::DuplicateIdentity,
            ApiError::Upstream(_) => ErrorCode::UpstreamUnavailable,
        }
    }

    /// Validation failures and admin-auth outcomes are ordinary answers
    /// (200 with `success: false`); everything else maps to an HTTP error.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_)
            | ApiError::AdminPasswordRequired
            | ApiError::InvalidAdminPassword => StatusCode::OK,
            ApiError::Unauthenticated | ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden | ApiError::AccessDenied => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Duplicate(_) => StatusCode::CONFLICT,
            ApiError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ApiError::NotFound,
            StoreError::Duplicate(field) => ApiError::Duplicate(field),
            StoreError::Validation(v) => ApiError::Validation(v),
            StoreError::BlockedAuthor => ApiError::AccessDenied,
            other => ApiError::Upstream(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::Upstream(format!("background task failed: {e}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Upstream(detail) => tracing::error!(error = %detail, "request failed"),
            other => tracing::debug!(code = %other.code(), "request rejected"),
        }

        (self.status(), Json(FailureResponse::new(self.code()))).into_response()
    }
}
