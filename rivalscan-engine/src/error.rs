//! Error types for rivalscan-engine

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rivalscan_common::events::{SourceStatus, SourceType};
use serde_json::json;
use thiserror::Error;

use crate::models::WarningCode;

/// Failure taxonomy of the scan pipeline
///
/// Clonable so a single upstream failure can be shared by every caller
/// waiting on the same in-flight fetch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    /// Upstream refused or failed (5xx, 429, connection error)
    #[error("{source_type} source unavailable: {message}")]
    SourceUnavailable { source_type: SourceType, message: String },

    /// Upstream did not answer within the per-call timeout
    #[error("{source_type} source timed out after {timeout_ms} ms")]
    SourceTimeout { source_type: SourceType, timeout_ms: u64 },

    /// Upstream answered with something that cannot be parsed
    #[error("{source_type} source returned malformed data: {message}")]
    SourceMalformed { source_type: SourceType, message: String },

    /// A competitor name could not be attributed unambiguously
    #[error("ambiguous competitor identity '{name}': {message}")]
    EntityAmbiguous { name: String, message: String },

    /// A fetch panicked or was torn down before it answered
    #[error("fetch task failed: {message}")]
    FetchTaskFailed { message: String },

    #[error("scan session cancelled")]
    SessionCancelled,

    #[error("every source failed for every competitor")]
    AllSourcesFailed,
}

impl SourceError {
    /// Whether the orchestrator may retry the call
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SourceError::SourceUnavailable { .. } | SourceError::SourceTimeout { .. }
        )
    }

    /// Snapshot status recorded for a source that failed with this error
    pub fn source_status(&self) -> SourceStatus {
        match self {
            SourceError::SourceTimeout { .. } => SourceStatus::Timeout,
            SourceError::SourceMalformed { .. } => SourceStatus::Malformed,
            _ => SourceStatus::Unavailable,
        }
    }

    pub fn warning_code(&self) -> WarningCode {
        match self {
            SourceError::SourceUnavailable { .. } => WarningCode::SourceUnavailable,
            SourceError::SourceTimeout { .. } => WarningCode::SourceTimeout,
            SourceError::SourceMalformed { .. } => WarningCode::SourceMalformed,
            SourceError::EntityAmbiguous { .. } => WarningCode::EntityAmbiguous,
            SourceError::FetchTaskFailed { .. } => WarningCode::SourceUnavailable,
            SourceError::SessionCancelled => WarningCode::SourceUnavailable,
            SourceError::AllSourcesFailed => WarningCode::AllSourcesFailed,
        }
    }
}

impl serde::Serialize for SourceError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), e.g. cancelling a finished session
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),

    #[error("Common error: {0}")]
    Common(#[from] rivalscan_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Other(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
            ),
            ApiError::Common(rivalscan_common::Error::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", msg)
            }
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        let unavailable = SourceError::SourceUnavailable {
            source_type: SourceType::Ads,
            message: "503".to_string(),
        };
        let timeout = SourceError::SourceTimeout {
            source_type: SourceType::Ads,
            timeout_ms: 100,
        };
        let malformed = SourceError::SourceMalformed {
            source_type: SourceType::Ads,
            message: "bad json".to_string(),
        };

        assert!(unavailable.is_retryable());
        assert!(timeout.is_retryable());
        assert!(!malformed.is_retryable());
        assert!(!SourceError::SessionCancelled.is_retryable());
        assert_eq!(timeout.source_status(), SourceStatus::Timeout);
        assert_eq!(malformed.source_status(), SourceStatus::Malformed);

        let crashed = SourceError::FetchTaskFailed {
            message: "panicked".to_string(),
        };
        assert!(!crashed.is_retryable());
        assert_eq!(crashed.source_status(), SourceStatus::Unavailable);
        assert_eq!(crashed.warning_code(), WarningCode::SourceUnavailable);
    }

    #[test]
    fn test_api_error_status() {
        let response = ApiError::NotFound("scan".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response =
            ApiError::Common(rivalscan_common::Error::NotFound("brand".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
