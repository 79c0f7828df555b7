//! Bridge error types
//!
//! [`BridgeError`] is the library error. [`ApiError`] is what HTTP handlers
//! return; it renders `{"ok": false, "error": <kind>, "detail": <message>}`
//! with a status chosen from the kind.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use qlink_core::CoreError;
use qlink_transport::{ErrorKind, TransportError};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("config error: {0}")]
    Config(String),

    #[error("settings error: {0}")]
    Settings(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Controller answered with something that could not be parsed
    #[error("unexpected controller response: {0}")]
    BadResponse(#[from] CoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error body sent to HTTP callers
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub ok: bool,
    pub error: &'static str,
    pub detail: String,
}

/// HTTP-facing error
#[derive(Error, Debug)]
pub enum ApiError {
    /// Controller did not answer in time
    #[error("{0}")]
    Timeout(String),

    /// Could not reach the controller
    #[error("{0}")]
    Transport(String),

    /// Caller-supplied value rejected before contacting the controller
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Transport(_) => StatusCode::BAD_GATEWAY,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Timeout(_) => "timeout",
            ApiError::Transport(_) => "transport",
            ApiError::Validation(_) => "validation",
            ApiError::NotFound(_) => "not_found",
            ApiError::Internal(_) => "internal",
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            ok: false,
            error: self.kind(),
            detail: self.to_string(),
        }
    }
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        match err.kind() {
            ErrorKind::Timeout => ApiError::Timeout(err.to_string()),
            ErrorKind::Transport => ApiError::Transport(err.to_string()),
        }
    }
}

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Transport(e) => e.into(),
            BridgeError::Settings(msg) => ApiError::Validation(msg),
            e @ BridgeError::BadResponse(_) => ApiError::Transport(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("{} ({})", self, status);
        }
        (status, Json(self.body())).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_keep_their_kind() {
        let timeout: ApiError = TransportError::Timeout("10.0.0.1:3041".into()).into();
        assert_eq!(timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(timeout.kind(), "timeout");

        let exhausted: ApiError = TransportError::MaxRetriesExceeded {
            attempts: 4,
            last: "refused".into(),
        }
        .into();
        assert_eq!(exhausted.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(exhausted.kind(), "transport");
    }

    #[test]
    fn test_body_shape() {
        let body = serde_json::to_value(ApiError::Validation("switch must be on/off".into()).body())
            .unwrap();
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"], "validation");
        assert_eq!(body["detail"], "switch must be on/off");
    }
}
