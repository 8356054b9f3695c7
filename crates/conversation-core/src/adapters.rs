//! Provider adapter contracts
//!
//! The orchestrator never parses provider payload shapes. It talks to the
//! telephony provider and the voice-AI provider through the two traits below;
//! concrete implementations live in `prixagent-providers`.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::AdapterResult;
use crate::types::{AgentSnapshot, AudioFormat, CallId, Direction, StreamHandle};

/// Request to dial a contact from an agent's number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundCallRequest {
    pub to_number: String,
    /// Provider id of the number to call from
    pub from_number_id: String,
    /// Agent identifier at the voice-AI provider
    pub agent_voice_provider_id: String,
    pub opening_message: Option<String>,
    /// Platform call id, passed through so webhooks can be correlated
    pub call_id: CallId,
}

/// Result of a successfully placed outbound call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundCallPlaced {
    /// Telephony call identifier (Twilio call SID)
    pub provider_call_id: String,
    /// Conversation id, when the voice-AI provider places the call itself
    pub provider_conversation_id: Option<String>,
}

/// Telephony provider boundary
#[async_trait]
pub trait TelephonyAdapter: Send + Sync {
    /// Provider name used in logs and errors
    fn name(&self) -> &str;

    async fn place_outbound_call(&self, request: OutboundCallRequest) -> AdapterResult<OutboundCallPlaced>;
}

/// Media and agent parameters for opening a conversation stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamParams {
    pub call_id: CallId,
    pub stream_url: String,
    pub audio_format: AudioFormat,
    pub sample_rate: u32,
    pub agent: AgentSnapshot,
}

/// Phone numbers of a provider conversation, for display backfill
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationPhoneNumbers {
    pub agent_phone_number: Option<String>,
    pub contact_phone_number: Option<String>,
    pub direction: Option<Direction>,
}

/// Voice-AI provider boundary
#[async_trait]
pub trait VoiceAiAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Open a conversation stream. Returns once the provider acknowledged it.
    async fn start_conversation_stream(&self, agent_voice_id: &str, params: &StreamParams) -> AdapterResult<StreamHandle>;

    async fn push_audio(&self, handle: &StreamHandle, audio: Bytes) -> AdapterResult<()>;

    async fn close_stream(&self, handle: &StreamHandle) -> AdapterResult<()>;

    async fn get_conversation_phone_numbers(&self, provider_conversation_id: &str) -> AdapterResult<ConversationPhoneNumbers>;

    /// Full recording of a finished conversation
    async fn get_conversation_audio(&self, provider_conversation_id: &str) -> AdapterResult<Bytes>;
}

/// Events a voice-AI stream reports back for a call
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderEvent {
    /// Synthesised agent speech to play to the caller
    AgentAudio { audio: Bytes },
    AgentResponse { text: String },
    UserTranscript { text: String },
    /// The caller barged in over the agent
    Interruption,
    /// The provider ended the conversation (agent hung up, end-call tool)
    ConversationEnded { reason: String },
    /// The stream broke; `fatal` means it cannot be used again
    StreamFailed { fatal: bool, message: String },
}

impl ProviderEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderEvent::AgentAudio { .. } => "agent_audio",
            ProviderEvent::AgentResponse { .. } => "agent_response",
            ProviderEvent::UserTranscript { .. } => "user_transcript",
            ProviderEvent::Interruption => "interruption",
            ProviderEvent::ConversationEnded { .. } => "conversation_ended",
            ProviderEvent::StreamFailed { .. } => "stream_failed",
        }
    }
}

impl fmt::Debug for ProviderEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderEvent::AgentAudio { audio } => write!(f, "AgentAudio({} bytes)", audio.len()),
            ProviderEvent::AgentResponse { text } => write!(f, "AgentResponse({:?})", text),
            ProviderEvent::UserTranscript { text } => write!(f, "UserTranscript({:?})", text),
            ProviderEvent::Interruption => f.write_str("Interruption"),
            ProviderEvent::ConversationEnded { reason } => write!(f, "ConversationEnded({})", reason),
            ProviderEvent::StreamFailed { fatal, message } => {
                write!(f, "StreamFailed(fatal={}, {})", fatal, message)
            }
        }
    }
}

/// A provider event tagged with the call it belongs to
pub type CallEvent = (CallId, ProviderEvent);
