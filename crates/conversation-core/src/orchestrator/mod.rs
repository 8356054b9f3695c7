//! # Conversation Orchestrator
//!
//! Drives every orchestrated call through its lifecycle:
//!
//! ```text
//! start_conversation ──► starting ──► active ──► ending ──► ended
//!                             │          │
//!                             └──────────┴──► failed
//! ```
//!
//! ## Module Organization
//!
//! - [`conversation`]: start, inbound audio, provider events, reads
//! - [`lifecycle`]: end, forced failure, idle sweep
//! - [`calls`]: outbound dialing, inbound routing, telephony status relay,
//!   phone number backfill
//!
//! ## Ordering
//!
//! Every operation that mutates a call first takes the call's guard from the
//! [`CallRegistry`], so operations on one call run one at a time in arrival
//! order while different calls proceed independently. `start_conversation`
//! holds the guard from registration until the provider acknowledges the
//! stream; audio for the call queues behind it.
//!
//! `end_conversation` releases the guard while the provider stream closes so
//! late audio can still be recorded, and re-takes it to finalize. Closing and
//! finalizing run on a spawned task: a caller that stops waiting never leaves
//! a call stuck in `ending`.
//!
//! ## Failure handling
//!
//! Adapter errors never escape as panics. A transient error is logged and
//! reported to the dashboard as a warning; a fatal one moves the call to
//! `failed`, persists what is known, and evicts it.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use prixagent_conversation_core::prelude::*;
//! use prixagent_conversation_core::{CallRecord, Direction};
//! use prixagent_conversation_core::testing::{CollectingNotifier, RecordingTelephony, RecordingVoiceAdapter};
//!
//! # async fn example() -> Result<()> {
//! let store = Arc::new(InMemoryCallStore::new());
//! let orchestrator = ConversationOrchestrator::builder()
//!     .voice(Arc::new(RecordingVoiceAdapter::new()))
//!     .telephony(Arc::new(RecordingTelephony::new()))
//!     .call_store(store.clone())
//!     .agent_directory(store.clone())
//!     .notifier(Arc::new(CollectingNotifier::new()))
//!     .build()?;
//!
//! store.insert_call(CallRecord::new(CallId::from("c1"), AccountId::from("a1"), Direction::Inbound));
//! let request = StartConversationRequest::new("c1", "a1", "ag1", "wss://media.example/stream");
//! orchestrator.start_conversation(request).await?;
//! orchestrator.process_incoming_audio(&CallId::from("c1"), Bytes::from(vec![0xff; 160])).await?;
//! orchestrator.end_conversation(&CallId::from("c1"), "completed").await?;
//! # Ok(())
//! # }
//! ```

mod calls;
mod conversation;
mod lifecycle;

use std::future::Future;
use std::sync::Arc;

use crate::adapters::{TelephonyAdapter, VoiceAiAdapter};
use crate::bridge::MediaBridge;
use crate::config::OrchestratorConfig;
use crate::error::{AdapterError, AdapterResult, OrchestratorError, Result};
use crate::fanout::Notifier;
use crate::registry::CallRegistry;
use crate::store::{AgentDirectory, CallStore};

pub use calls::{CallStatusCallback, InboundCall, InboundRoute, OutboundCallParams, OutboundCallResult};

/// Coordinates the registry, the provider adapters, persistence and fan-out
///
/// Cloning is cheap and yields a handle onto the same registry and adapters.
#[derive(Clone)]
pub struct ConversationOrchestrator {
    registry: Arc<CallRegistry>,
    voice: Arc<dyn VoiceAiAdapter>,
    telephony: Arc<dyn TelephonyAdapter>,
    calls: Arc<dyn CallStore>,
    agents: Arc<dyn AgentDirectory>,
    notifier: Arc<dyn Notifier>,
    bridge: Arc<MediaBridge>,
    config: OrchestratorConfig,
}

impl ConversationOrchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    pub fn registry(&self) -> &Arc<CallRegistry> {
        &self.registry
    }

    pub fn media_bridge(&self) -> &Arc<MediaBridge> {
        &self.bridge
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn active_count(&self) -> usize {
        self.registry.len()
    }

    /// Run an adapter call under the configured timeout
    async fn bounded<T>(&self, provider: &str, call: impl Future<Output = AdapterResult<T>>) -> AdapterResult<T> {
        let limit = self.config.adapter_timeout();
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::timeout(provider, limit.as_secs())),
        }
    }
}

/// Builder for [`ConversationOrchestrator`]
#[derive(Default)]
pub struct OrchestratorBuilder {
    registry: Option<Arc<CallRegistry>>,
    voice: Option<Arc<dyn VoiceAiAdapter>>,
    telephony: Option<Arc<dyn TelephonyAdapter>>,
    calls: Option<Arc<dyn CallStore>>,
    agents: Option<Arc<dyn AgentDirectory>>,
    notifier: Option<Arc<dyn Notifier>>,
    config: Option<OrchestratorConfig>,
}

impl OrchestratorBuilder {
    /// Share an existing registry; a fresh one is created otherwise
    pub fn registry(mut self, registry: Arc<CallRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn voice(mut self, voice: Arc<dyn VoiceAiAdapter>) -> Self {
        self.voice = Some(voice);
        self
    }

    pub fn telephony(mut self, telephony: Arc<dyn TelephonyAdapter>) -> Self {
        self.telephony = Some(telephony);
        self
    }

    pub fn call_store(mut self, calls: Arc<dyn CallStore>) -> Self {
        self.calls = Some(calls);
        self
    }

    pub fn agent_directory(mut self, agents: Arc<dyn AgentDirectory>) -> Self {
        self.agents = Some(agents);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<ConversationOrchestrator> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        Ok(ConversationOrchestrator {
            registry: self.registry.unwrap_or_default(),
            voice: self.voice.ok_or_else(|| missing("voice adapter"))?,
            telephony: self.telephony.ok_or_else(|| missing("telephony adapter"))?,
            calls: self.calls.ok_or_else(|| missing("call store"))?,
            agents: self.agents.ok_or_else(|| missing("agent directory"))?,
            notifier: self.notifier.ok_or_else(|| missing("notifier"))?,
            bridge: Arc::new(MediaBridge::new(config.media_buffer_frames)),
            config,
        })
    }
}

fn missing(what: &str) -> OrchestratorError {
    OrchestratorError::config(format!("orchestrator requires a {}", what))
}
