//! Gateway errors and their HTTP mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use prixagent_conversation_core::OrchestratorError;
use prixagent_providers::ProviderError;

/// Startup and wiring failures
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for GatewayError {
    fn from(err: config::ConfigError) -> Self {
        GatewayError::Config(err.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// JSON error body: `{"error": code, "message": text}`
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    status: StatusCode,
    #[serde(rename = "error")]
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        let message = err.to_string();
        match err {
            OrchestratorError::DuplicateCall { .. } => Self::new(StatusCode::CONFLICT, "duplicate_call", message),
            OrchestratorError::InvalidState { .. } => Self::new(StatusCode::CONFLICT, "invalid_state", message),
            OrchestratorError::AgentInactive { .. } => Self::new(StatusCode::CONFLICT, "agent_inactive", message),
            OrchestratorError::CallNotFound { .. } | OrchestratorError::AgentNotFound { .. } => {
                Self::not_found(message)
            }
            OrchestratorError::NumberNotRouted { .. } => {
                Self::new(StatusCode::NOT_FOUND, "number_not_routed", message)
            }
            OrchestratorError::Unauthorized { .. } => Self::unauthorized(message),
            OrchestratorError::Adapter(_) => Self::new(StatusCode::BAD_GATEWAY, "provider_error", message),
            OrchestratorError::Persistence(_) | OrchestratorError::Configuration(_) | OrchestratorError::Internal(_) => {
                error!("Request failed: {}", message);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal server error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prixagent_conversation_core::{AdapterError, CallId, ConversationStatus};

    #[test]
    fn test_status_mapping() {
        let call_id = CallId::from("c1");
        let cases = [
            (OrchestratorError::duplicate(&call_id), StatusCode::CONFLICT),
            (OrchestratorError::call_not_found(&call_id), StatusCode::NOT_FOUND),
            (
                OrchestratorError::invalid_state(&call_id, ConversationStatus::Ended, "end"),
                StatusCode::CONFLICT,
            ),
            (
                OrchestratorError::Unauthorized { message: "no".into() },
                StatusCode::UNAUTHORIZED,
            ),
            (
                AdapterError::fatal("elevenlabs", "gone").into(),
                StatusCode::BAD_GATEWAY,
            ),
            (OrchestratorError::persistence("disk full"), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let body = serde_json::to_value(ApiError::from(OrchestratorError::persistence("secret path"))).unwrap();
        assert_eq!(body["error"], "internal_error");
        assert!(!body["message"].as_str().unwrap().contains("secret"));
        assert!(body.get("status").is_none());
    }
}
