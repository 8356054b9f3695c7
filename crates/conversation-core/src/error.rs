//! Error types for conversation orchestration

use thiserror::Error;

use crate::types::{AccountId, AgentId, CallId, ConversationStatus};

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Result type for adapter calls
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Errors surfaced by the call registry and the conversation orchestrator
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A conversation is already registered for this call
    #[error("Conversation already registered for call {call_id}")]
    DuplicateCall { call_id: CallId },

    /// No conversation (or call record) exists for this call
    #[error("Call not found: {call_id}")]
    CallNotFound { call_id: CallId },

    /// The agent referenced by a request does not exist for the account
    #[error("Agent not found: {agent_id}")]
    AgentNotFound { agent_id: AgentId },

    /// The agent exists but is switched off
    #[error("Agent {agent_id} is inactive")]
    AgentInactive { agent_id: AgentId },

    /// Operation not valid for the conversation's current status
    #[error("Cannot {operation} call {call_id} while {status}")]
    InvalidState {
        call_id: CallId,
        status: ConversationStatus,
        operation: &'static str,
    },

    /// The caller is not allowed to touch this tenant's data
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// No agent is routed to the dialled number
    #[error("No agent routed to number {number}")]
    NumberNotRouted { number: String },

    /// A telephony or voice-AI adapter call failed
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// The persistence collaborator failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal invariant violated
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    pub fn call_not_found(call_id: &CallId) -> Self {
        Self::CallNotFound { call_id: call_id.clone() }
    }

    pub fn duplicate(call_id: &CallId) -> Self {
        Self::DuplicateCall { call_id: call_id.clone() }
    }

    pub fn invalid_state(call_id: &CallId, status: ConversationStatus, operation: &'static str) -> Self {
        Self::InvalidState {
            call_id: call_id.clone(),
            status,
            operation,
        }
    }

    pub fn wrong_account(call_id: &CallId, account_id: &AccountId) -> Self {
        Self::Unauthorized {
            message: format!("call {} does not belong to account {}", call_id, account_id),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// True when the error came from an adapter that reported its stream unusable
    pub fn is_fatal_adapter_error(&self) -> bool {
        matches!(self, Self::Adapter(e) if e.is_fatal())
    }
}

/// Errors reported by a telephony or voice-AI adapter
///
/// `Transient` failures (a dropped audio push, a slow REST call) are logged and
/// the conversation continues. `Fatal` means the provider stream is permanently
/// broken and the conversation must be failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterError {
    #[error("{provider} transient error: {message}")]
    Transient { provider: String, message: String },

    #[error("{provider} fatal error: {message}")]
    Fatal { provider: String, message: String },

    #[error("{provider} rejected request: {message}")]
    Rejected { provider: String, message: String },

    #[error("{provider} timed out after {seconds}s")]
    Timeout { provider: String, seconds: u64 },
}

impl AdapterError {
    pub fn transient(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn fatal(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fatal {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn rejected(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn timeout(provider: impl Into<String>, seconds: u64) -> Self {
        Self::Timeout {
            provider: provider.into(),
            seconds,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }

    pub fn provider(&self) -> &str {
        match self {
            Self::Transient { provider, .. }
            | Self::Fatal { provider, .. }
            | Self::Rejected { provider, .. }
            | Self::Timeout { provider, .. } => provider,
        }
    }
}
