//! Test doubles for the orchestrator's collaborators
//!
//! Shared by this crate's tests and by the gateway's router tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::adapters::{
    ConversationPhoneNumbers, OutboundCallPlaced, OutboundCallRequest, StreamParams, TelephonyAdapter,
    VoiceAiAdapter,
};
use crate::error::{AdapterError, AdapterResult, OrchestratorError, Result};
use crate::events::DashboardEvent;
use crate::fanout::{AuthClaims, Notifier, TokenVerifier};
use crate::orchestrator::ConversationOrchestrator;
use crate::store::InMemoryCallStore;
use crate::types::{
    AccountId, AgentId, AgentRecord, CallId, CallRecord, Direction, NumberRoute, StreamHandle, UserId,
};

/// Voice-AI adapter that records every call and fails on demand
#[derive(Default)]
pub struct RecordingVoiceAdapter {
    started: Mutex<Vec<(String, StreamParams)>>,
    pushed: Mutex<Vec<(CallId, usize)>>,
    closed: Mutex<Vec<CallId>>,
    start_failure: Mutex<Option<AdapterError>>,
    push_failure: Mutex<Option<AdapterError>>,
    start_delay: Mutex<Option<Duration>>,
    close_delay: Mutex<Option<Duration>>,
    phone_numbers: Mutex<Option<ConversationPhoneNumbers>>,
}

impl RecordingVoiceAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_start_with(&self, error: AdapterError) {
        *self.start_failure.lock() = Some(error);
    }

    /// Every following push fails with `error`
    pub fn fail_push_with(&self, error: AdapterError) {
        *self.push_failure.lock() = Some(error);
    }

    pub fn delay_start(&self, delay: Duration) {
        *self.start_delay.lock() = Some(delay);
    }

    pub fn delay_close(&self, delay: Duration) {
        *self.close_delay.lock() = Some(delay);
    }

    pub fn set_phone_numbers(&self, numbers: ConversationPhoneNumbers) {
        *self.phone_numbers.lock() = Some(numbers);
    }

    pub fn started(&self) -> Vec<(String, StreamParams)> {
        self.started.lock().clone()
    }

    pub fn pushed(&self) -> Vec<(CallId, usize)> {
        self.pushed.lock().clone()
    }

    pub fn push_count(&self, call_id: &CallId) -> usize {
        self.pushed.lock().iter().filter(|(id, _)| id == call_id).count()
    }

    pub fn closed(&self) -> Vec<CallId> {
        self.closed.lock().clone()
    }
}

#[async_trait]
impl VoiceAiAdapter for RecordingVoiceAdapter {
    fn name(&self) -> &str {
        "recording-voice"
    }

    async fn start_conversation_stream(&self, agent_voice_id: &str, params: &StreamParams) -> AdapterResult<StreamHandle> {
        let delay = *self.start_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.start_failure.lock().clone();
        if let Some(error) = failure {
            return Err(error);
        }
        self.started.lock().push((agent_voice_id.to_string(), params.clone()));
        Ok(StreamHandle {
            call_id: params.call_id.clone(),
            conversation_id: format!("conv-{}", params.call_id),
        })
    }

    async fn push_audio(&self, handle: &StreamHandle, audio: Bytes) -> AdapterResult<()> {
        let failure = self.push_failure.lock().clone();
        if let Some(error) = failure {
            return Err(error);
        }
        self.pushed.lock().push((handle.call_id.clone(), audio.len()));
        Ok(())
    }

    async fn close_stream(&self, handle: &StreamHandle) -> AdapterResult<()> {
        let delay = *self.close_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.closed.lock().push(handle.call_id.clone());
        Ok(())
    }

    async fn get_conversation_phone_numbers(&self, _provider_conversation_id: &str) -> AdapterResult<ConversationPhoneNumbers> {
        self.phone_numbers
            .lock()
            .clone()
            .ok_or_else(|| AdapterError::rejected("recording-voice", "no phone numbers configured"))
    }

    async fn get_conversation_audio(&self, provider_conversation_id: &str) -> AdapterResult<Bytes> {
        Ok(Bytes::from(format!("audio:{}", provider_conversation_id)))
    }
}

/// Telephony adapter that records dial requests
#[derive(Default)]
pub struct RecordingTelephony {
    requests: Mutex<Vec<OutboundCallRequest>>,
    failure: Mutex<Option<AdapterError>>,
    counter: AtomicU64,
}

impl RecordingTelephony {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, error: AdapterError) {
        *self.failure.lock() = Some(error);
    }

    pub fn requests(&self) -> Vec<OutboundCallRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl TelephonyAdapter for RecordingTelephony {
    fn name(&self) -> &str {
        "recording-telephony"
    }

    async fn place_outbound_call(&self, request: OutboundCallRequest) -> AdapterResult<OutboundCallPlaced> {
        let failure = self.failure.lock().clone();
        if let Some(error) = failure {
            return Err(error);
        }
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        self.requests.lock().push(request);
        Ok(OutboundCallPlaced {
            provider_call_id: format!("CA{:032}", n),
            provider_conversation_id: None,
        })
    }
}

/// Notifier that keeps every event it is handed
#[derive(Default)]
pub struct CollectingNotifier {
    events: Mutex<Vec<(AccountId, DashboardEvent)>>,
}

impl CollectingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(AccountId, DashboardEvent)> {
        self.events.lock().clone()
    }

    /// Wire names of the events sent to one account, in order
    pub fn names_for(&self, account_id: &AccountId) -> Vec<&'static str> {
        self.events
            .lock()
            .iter()
            .filter(|(account, _)| account == account_id)
            .map(|(_, event)| event.event_name())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl Notifier for CollectingNotifier {
    fn notify(&self, account_id: &AccountId, event: DashboardEvent) -> usize {
        self.events.lock().push((account_id.clone(), event));
        1
    }
}

/// Verifier backed by a fixed token table
#[derive(Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, AuthClaims>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: &str, user_id: &str, account_id: &str) -> Self {
        self.tokens.insert(
            token.to_string(),
            AuthClaims {
                user_id: UserId::from(user_id),
                account_id: AccountId::from(account_id),
            },
        );
        self
    }
}

impl TokenVerifier for StaticTokenVerifier {
    fn verify(&self, token: &str) -> Result<AuthClaims> {
        self.tokens.get(token).cloned().ok_or_else(|| OrchestratorError::Unauthorized {
            message: "unknown token".to_string(),
        })
    }
}

/// An active agent with an outbound number
pub fn agent_record(account_id: &str, agent_id: &str) -> AgentRecord {
    AgentRecord {
        agent_id: AgentId::from(agent_id),
        account_id: AccountId::from(account_id),
        name: format!("Agent {}", agent_id),
        voice_id: "voice-1".to_string(),
        prompt: "You are a helpful assistant.".to_string(),
        first_message: Some("Hello, how can I help?".to_string()),
        language: Some("en".to_string()),
        provider_agent_id: format!("el-{}", agent_id),
        phone_number_id: Some(format!("pn-{}", agent_id)),
        active: true,
    }
}

/// An orchestrator wired to in-memory fakes
pub struct TestRig {
    pub orchestrator: Arc<ConversationOrchestrator>,
    pub voice: Arc<RecordingVoiceAdapter>,
    pub telephony: Arc<RecordingTelephony>,
    pub store: Arc<InMemoryCallStore>,
    pub notifier: Arc<CollectingNotifier>,
}

impl TestRig {
    /// Rig with agent `ag1` of account `a1` registered and routed to `+15550001111`
    pub fn new() -> Self {
        let voice = Arc::new(RecordingVoiceAdapter::new());
        let telephony = Arc::new(RecordingTelephony::new());
        let store = Arc::new(InMemoryCallStore::new());
        let notifier = Arc::new(CollectingNotifier::new());

        store.insert_agent(agent_record("a1", "ag1"));
        store.insert_route(NumberRoute {
            phone_number: "+15550001111".to_string(),
            account_id: AccountId::from("a1"),
            agent_id: AgentId::from("ag1"),
        });

        let orchestrator = match ConversationOrchestrator::builder()
            .voice(voice.clone())
            .telephony(telephony.clone())
            .call_store(store.clone())
            .agent_directory(store.clone())
            .notifier(notifier.clone())
            .build()
        {
            Ok(orchestrator) => Arc::new(orchestrator),
            Err(e) => panic!("test rig misconfigured: {}", e),
        };

        Self {
            orchestrator,
            voice,
            telephony,
            store,
            notifier,
        }
    }

    /// Create the inbound call record a conversation start needs
    pub fn seed_call(&self, call_id: &str, account_id: &str) -> CallId {
        let call_id = CallId::from(call_id);
        self.store.insert_call(CallRecord::new(
            call_id.clone(),
            AccountId::from(account_id),
            Direction::Inbound,
        ));
        call_id
    }
}

impl Default for TestRig {
    fn default() -> Self {
        Self::new()
    }
}
