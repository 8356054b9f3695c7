//! # PrixAgent Conversation Core
//!
//! Conversation orchestration and call lifecycle coordination for PrixAgent
//! AI voice agents.
//!
//! This crate provides:
//! - the [`CallRegistry`] of active call contexts, with per-call serialisation
//! - the [`ConversationOrchestrator`] state machine that bridges a telephony
//!   leg and a voice-AI conversation stream
//! - the [`TelephonyAdapter`] and [`VoiceAiAdapter`] provider contracts
//! - the [`CallStore`] and [`AgentDirectory`] persistence contracts, with an
//!   in-memory implementation
//! - the [`NotificationHub`] that fans typed [`DashboardEvent`]s out to
//!   dashboard connections, scoped per account
//! - the [`MediaBridge`] return path for agent audio
//!
//! ## Architecture
//!
//! ```text
//!   telephony webhooks ─┐                         ┌─► TelephonyAdapter
//!   media stream audio ─┼─► ConversationOrchestrator ─► VoiceAiAdapter
//!   provider events ────┘     │          │        └─► CallStore
//!                             ▼          ▼
//!                        CallRegistry  Notifier ──► dashboard sockets
//! ```
//!
//! Provider implementations live in `prixagent-providers`; the HTTP and
//! websocket boundary lives in `prixagent-gateway`.

pub mod adapters;
pub mod bridge;
pub mod config;
pub mod error;
pub mod events;
pub mod fanout;
pub mod orchestrator;
pub mod registry;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

pub use adapters::{
    CallEvent, ConversationPhoneNumbers, OutboundCallPlaced, OutboundCallRequest, ProviderEvent, StreamParams,
    TelephonyAdapter, VoiceAiAdapter,
};
pub use bridge::{MediaAttachment, MediaBridge, MediaFrame};
pub use config::OrchestratorConfig;
pub use error::{AdapterError, AdapterResult, OrchestratorError, Result};
pub use events::{AlertSeverity, DashboardEvent, EventEnvelope};
pub use fanout::{AuthClaims, ConnectionId, NotificationHub, Notifier, TokenVerifier};
pub use orchestrator::{
    CallStatusCallback, ConversationOrchestrator, InboundCall, InboundRoute, OrchestratorBuilder, OutboundCallParams,
    OutboundCallResult,
};
pub use registry::{CallGuard, CallRegistry, RegistryStats};
pub use store::{AgentDirectory, CallStore, InMemoryCallStore};
pub use types::*;

/// Common imports for users of the orchestrator
pub mod prelude {
    pub use crate::adapters::{ProviderEvent, TelephonyAdapter, VoiceAiAdapter};
    pub use crate::error::{AdapterError, OrchestratorError, Result};
    pub use crate::events::DashboardEvent;
    pub use crate::fanout::{NotificationHub, Notifier};
    pub use crate::orchestrator::ConversationOrchestrator;
    pub use crate::store::{AgentDirectory, CallStore, InMemoryCallStore};
    pub use crate::types::{
        AccountId, AgentId, AudioFormat, CallContext, CallId, ConversationStatus, StartConversationRequest,
    };
}
