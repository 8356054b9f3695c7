//! Provider client errors

use prixagent_conversation_core::AdapterError;
use reqwest::Response;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProviderError>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Non-success HTTP status from a provider API
    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),

    /// The conversation socket is gone
    #[error("Stream closed: {0}")]
    Closed(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub fn closed(message: impl Into<String>) -> Self {
        Self::Closed(message.into())
    }

    /// Classify for the orchestrator: closed sockets are fatal, client-side
    /// API errors are rejections, everything else may succeed on retry
    pub fn into_adapter(self, provider: &str) -> AdapterError {
        match self {
            ProviderError::Closed(message) => AdapterError::fatal(provider, message),
            ProviderError::Timeout(seconds) => AdapterError::timeout(provider, seconds),
            ProviderError::Api { status, body } if (400..500).contains(&status) && status != 429 => {
                AdapterError::rejected(provider, format!("{}: {}", status, body))
            }
            ProviderError::Config(message) => AdapterError::rejected(provider, message),
            ProviderError::Http(e) if e.is_timeout() => AdapterError::timeout(provider, 0),
            other => AdapterError::transient(provider, other.to_string()),
        }
    }
}

/// Turn a non-success response into [`ProviderError::Api`]
pub(crate) async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Api {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_classification() {
        assert!(ProviderError::closed("eof").into_adapter("elevenlabs").is_fatal());

        let rejected = ProviderError::Api {
            status: 404,
            body: "agent not found".into(),
        }
        .into_adapter("elevenlabs");
        assert!(matches!(rejected, AdapterError::Rejected { .. }));

        let throttled = ProviderError::Api {
            status: 429,
            body: "slow down".into(),
        }
        .into_adapter("twilio");
        assert!(matches!(throttled, AdapterError::Transient { .. }));

        let upstream = ProviderError::Api {
            status: 503,
            body: String::new(),
        }
        .into_adapter("twilio");
        assert_eq!(upstream.provider(), "twilio");
        assert!(!upstream.is_fatal());
    }
}
