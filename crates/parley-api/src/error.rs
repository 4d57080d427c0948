//! API error types and JSON error response formatting.
//!
//! ApiError gives every endpoint the same JSON error shape and maps engine
//! errors to HTTP status codes. Unknown sessions get their own error code so
//! clients can tell "start a new session" apart from a generic 404.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use parley_chat::ChatError;
use parley_core::error::ParleyError;

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request", "session_not_found").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug)]
pub enum ApiError {
    /// 400 - empty, oversized or malformed input.
    BadRequest(String),
    /// 404 - the session id is unknown or expired.
    SessionNotFound(String),
    /// 404 - any other missing resource.
    NotFound(String),
    /// 409 - a turn is already streaming on the session.
    TurnInProgress(String),
    /// 500 - unexpected server error.
    Internal(String),
    /// 502 - the generation backend failed.
    BadGateway(String),
    /// 503 - chat disabled or a component is not running.
    ServiceUnavailable(String),
    /// 504 - the generation backend did not answer in time.
    GatewayTimeout(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::SessionNotFound(msg) => (StatusCode::NOT_FOUND, "session_not_found", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::TurnInProgress(msg) => (StatusCode::CONFLICT, "turn_in_progress", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "generation_failed", msg),
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
            }
            ApiError::GatewayTimeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "timeout", msg),
        };

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
            details: None,
        };

        (status, Json(body)).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        let message = err.to_string();
        match err {
            ChatError::EmptyMessage | ChatError::MessageTooLong(_) | ChatError::InvalidSessionId => {
                ApiError::BadRequest(message)
            }
            ChatError::SessionNotFound(_) => ApiError::SessionNotFound(message),
            ChatError::TurnInProgress(_) => ApiError::TurnInProgress(message),
            ChatError::GenerationFailure(_) => ApiError::BadGateway(message),
            ChatError::Timeout(_) => ApiError::GatewayTimeout(message),
            ChatError::Disabled => ApiError::ServiceUnavailable(message),
            ChatError::TransportDisconnect | ChatError::PersistenceFailure(_) => {
                ApiError::Internal(message)
            }
        }
    }
}

impl From<ParleyError> for ApiError {
    fn from(err: ParleyError) -> Self {
        match err {
            ParleyError::Config(msg) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::types::SessionId;

    fn status_of(err: ChatError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_chat_error_status_mapping() {
        let id = SessionId::generate();
        assert_eq!(status_of(ChatError::EmptyMessage), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(ChatError::MessageTooLong(1000)), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(ChatError::SessionNotFound(id.clone())), StatusCode::NOT_FOUND);
        assert_eq!(status_of(ChatError::TurnInProgress(id)), StatusCode::CONFLICT);
        assert_eq!(
            status_of(ChatError::GenerationFailure("x".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(status_of(ChatError::Timeout(30)), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_of(ChatError::Disabled), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_parley_error_mapping() {
        let resp = ApiError::from(ParleyError::Config("bad port".into())).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = ApiError::from(ParleyError::Storage("locked".into())).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
