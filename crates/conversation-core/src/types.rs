//! Core types for conversation orchestration
//!
//! Identifiers, the per-call [`CallContext`], the conversation status state
//! machine, and the records exchanged with the persistence collaborator.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default telephony sample rate in Hz
pub const DEFAULT_SAMPLE_RATE: u32 = 8000;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Identifier of one call/conversation, stable for its lifetime
    CallId
);
string_id!(
    /// Owning tenant
    AccountId
);
string_id!(
    /// Configured AI voice agent
    AgentId
);
string_id!(
    /// Contact being called or calling in
    ContactId
);
string_id!(
    /// Dashboard user
    UserId
);
string_id!(
    /// Outbound campaign
    CampaignId
);

impl CallId {
    /// Generate a fresh call identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Audio encoding on the media path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    /// 8-bit companded G.711 mu-law, the telephony default
    #[default]
    Mulaw,
    /// Uncompressed 16-bit PCM
    Linear,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Mulaw => "mulaw",
            AudioFormat::Linear => "linear",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mulaw" | "ulaw" | "audio/x-mulaw" => Ok(AudioFormat::Mulaw),
            "linear" | "pcm" | "l16" => Ok(AudioFormat::Linear),
            other => Err(format!("unknown audio format: {}", other)),
        }
    }
}

/// Status of an orchestrated conversation
///
/// ```text
/// starting ──► active ──► ending ──► ended
///     │          │ ▲
///     │          └─┘ (audio / provider events)
///     └──────────┴──► failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Starting,
    Active,
    Ending,
    Ended,
    Failed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Starting => "starting",
            ConversationStatus::Active => "active",
            ConversationStatus::Ending => "ending",
            ConversationStatus::Ended => "ended",
            ConversationStatus::Failed => "failed",
        }
    }

    /// `ended` and `failed` have no outgoing transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConversationStatus::Ended | ConversationStatus::Failed)
    }

    /// Whether audio is forwarded to the voice-AI provider in this status
    pub fn forwards_audio(&self) -> bool {
        matches!(self, ConversationStatus::Starting | ConversationStatus::Active)
    }

    pub fn can_transition_to(&self, next: ConversationStatus) -> bool {
        use ConversationStatus::*;

        match (self, next) {
            (Starting, Active) => true,
            (Starting, Failed) => true,
            (Active, Active) => true,
            (Active, Ending) => true,
            (Active, Failed) => true,
            (Ending, Ended) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Call direction relative to the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inbound" => Ok(Direction::Inbound),
            "outbound" | "outbound-api" | "outbound-dial" => Ok(Direction::Outbound),
            other => Err(format!("unknown direction: {}", other)),
        }
    }
}

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Caller,
    Agent,
    System,
}

/// Payload of one history entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnContent {
    /// Caller audio chunk (only its size is retained)
    Audio { bytes: usize },
    /// Agent audio chunk relayed back to the caller
    AgentAudio { bytes: usize },
    /// Caller speech as transcribed by the provider
    Transcript { text: String },
    /// Agent reply text
    AgentText { text: String },
    /// Out-of-band provider event such as an interruption
    Event { name: String },
}

impl TurnContent {
    pub fn text(&self) -> Option<&str> {
        match self {
            TurnContent::Transcript { text } | TurnContent::AgentText { text } => Some(text),
            _ => None,
        }
    }
}

/// One entry of the append-only conversation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub sequence: u64,
    pub speaker: Speaker,
    pub content: TurnContent,
    pub timestamp: DateTime<Utc>,
}

/// Agent settings captured when a conversation starts
///
/// The snapshot is never re-synced: editing the agent mid-call does not
/// affect a conversation already in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub name: String,
    pub voice_id: String,
    pub prompt: String,
    pub first_message: Option<String>,
    pub language: Option<String>,
    /// Agent identifier at the voice-AI provider
    pub provider_agent_id: String,
}

/// Agent configuration as owned by the agent directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: AgentId,
    pub account_id: AccountId,
    pub name: String,
    pub voice_id: String,
    pub prompt: String,
    pub first_message: Option<String>,
    pub language: Option<String>,
    pub provider_agent_id: String,
    /// Provider-side id of the number the agent dials out from
    pub phone_number_id: Option<String>,
    pub active: bool,
}

impl AgentRecord {
    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            name: self.name.clone(),
            voice_id: self.voice_id.clone(),
            prompt: self.prompt.clone(),
            first_message: self.first_message.clone(),
            language: self.language.clone(),
            provider_agent_id: self.provider_agent_id.clone(),
        }
    }
}

/// Opaque handle to an open voice-AI conversation stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamHandle {
    pub call_id: CallId,
    /// Conversation identifier assigned by the provider
    pub conversation_id: String,
}

/// Request accepted by [`start_conversation`](crate::ConversationOrchestrator::start_conversation)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartConversationRequest {
    pub call_id: CallId,
    pub account_id: AccountId,
    pub agent_id: AgentId,
    #[serde(default)]
    pub contact_id: Option<ContactId>,
    pub stream_url: String,
    #[serde(default)]
    pub audio_format: AudioFormat,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

impl StartConversationRequest {
    pub fn new(
        call_id: impl Into<CallId>,
        account_id: impl Into<AccountId>,
        agent_id: impl Into<AgentId>,
        stream_url: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            account_id: account_id.into(),
            agent_id: agent_id.into(),
            contact_id: None,
            stream_url: stream_url.into(),
            audio_format: AudioFormat::Mulaw,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }

    pub fn with_contact(mut self, contact_id: impl Into<ContactId>) -> Self {
        self.contact_id = Some(contact_id.into());
        self
    }

    pub fn with_audio(mut self, format: AudioFormat, sample_rate: u32) -> Self {
        self.audio_format = format;
        self.sample_rate = sample_rate;
        self
    }
}

/// The central mutable entity for one in-progress call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallContext {
    pub call_id: CallId,
    pub account_id: AccountId,
    pub agent_id: AgentId,
    pub contact_id: Option<ContactId>,
    pub agent_config: Option<AgentSnapshot>,
    pub stream_url: String,
    pub audio_format: AudioFormat,
    pub sample_rate: u32,
    pub direction: Direction,
    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub conversation_history: Vec<Turn>,
    pub status: ConversationStatus,
    pub stream: Option<StreamHandle>,
    pub provider_call_id: Option<String>,
    pub end_reason: Option<String>,
    pub failure: Option<String>,
}

impl CallContext {
    /// Build the initial `starting` context for a request
    pub fn from_request(request: &StartConversationRequest) -> Self {
        let now = Utc::now();
        Self {
            call_id: request.call_id.clone(),
            account_id: request.account_id.clone(),
            agent_id: request.agent_id.clone(),
            contact_id: request.contact_id.clone(),
            agent_config: None,
            stream_url: request.stream_url.clone(),
            audio_format: request.audio_format,
            sample_rate: request.sample_rate,
            direction: Direction::Inbound,
            start_time: now,
            last_activity: now,
            conversation_history: Vec::new(),
            status: ConversationStatus::Starting,
            stream: None,
            provider_call_id: None,
            end_reason: None,
            failure: None,
        }
    }

    pub fn provider_conversation_id(&self) -> Option<&str> {
        self.stream.as_ref().map(|s| s.conversation_id.as_str())
    }

    pub fn turn_count(&self) -> usize {
        self.conversation_history.len()
    }

    /// Elapsed time since the call started
    pub fn duration_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.start_time).max(chrono::Duration::zero())
    }

    /// Time since the last inbound audio chunk or event
    pub fn idle_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.last_activity).max(chrono::Duration::zero())
    }

    /// Append a turn and mark the call as active now. Returns the turn's sequence number.
    pub fn append_turn(&mut self, speaker: Speaker, content: TurnContent) -> u64 {
        let now = Utc::now();
        let sequence = self.conversation_history.len() as u64;
        self.conversation_history.push(Turn {
            sequence,
            speaker,
            content,
            timestamp: now,
        });
        self.last_activity = now;
        sequence
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Apply a status transition, refusing edges the state machine does not have
    pub fn transition(&mut self, next: ConversationStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }

    pub fn metrics(&self) -> ConversationMetrics {
        let now = Utc::now();
        ConversationMetrics {
            call_id: self.call_id.clone(),
            duration_ms: self.duration_at(now).num_milliseconds().max(0) as u64,
            turn_count: self.turn_count(),
            status: self.status,
            last_activity: self.last_activity,
        }
    }

    /// Build the summary persisted at the end of the call
    pub fn summary(&self, ended_at: DateTime<Utc>) -> CallSummary {
        CallSummary {
            call_id: self.call_id.clone(),
            account_id: self.account_id.clone(),
            agent_id: self.agent_id.clone(),
            contact_id: self.contact_id.clone(),
            status: self.status,
            end_reason: self.end_reason.clone().unwrap_or_else(|| "unknown".to_string()),
            duration_secs: self.duration_at(ended_at).num_seconds().max(0) as u64,
            turn_count: self.turn_count(),
            started_at: self.start_time,
            ended_at,
            provider_conversation_id: self.provider_conversation_id().map(str::to_string),
            transcript: self
                .conversation_history
                .iter()
                .filter(|t| t.content.text().is_some())
                .cloned()
                .collect(),
        }
    }
}

/// Point-in-time metrics for one conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMetrics {
    pub call_id: CallId,
    pub duration_ms: u64,
    pub turn_count: usize,
    pub status: ConversationStatus,
    pub last_activity: DateTime<Utc>,
}

/// Summary written to the persistence collaborator when a call finalizes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSummary {
    pub call_id: CallId,
    pub account_id: AccountId,
    pub agent_id: AgentId,
    pub contact_id: Option<ContactId>,
    /// `ended` for a normal finish, `failed` for a forced one
    pub status: ConversationStatus,
    pub end_reason: String,
    pub duration_secs: u64,
    pub turn_count: usize,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub provider_conversation_id: Option<String>,
    /// Text turns only
    pub transcript: Vec<Turn>,
}

/// Telephony call status, in the provider's vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallRecordStatus {
    Queued,
    Initiated,
    Ringing,
    InProgress,
    Completed,
    Busy,
    NoAnswer,
    Failed,
    Canceled,
}

impl CallRecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallRecordStatus::Queued => "queued",
            CallRecordStatus::Initiated => "initiated",
            CallRecordStatus::Ringing => "ringing",
            CallRecordStatus::InProgress => "in-progress",
            CallRecordStatus::Completed => "completed",
            CallRecordStatus::Busy => "busy",
            CallRecordStatus::NoAnswer => "no-answer",
            CallRecordStatus::Failed => "failed",
            CallRecordStatus::Canceled => "canceled",
        }
    }

    /// The telephony leg is over
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallRecordStatus::Completed
                | CallRecordStatus::Busy
                | CallRecordStatus::NoAnswer
                | CallRecordStatus::Failed
                | CallRecordStatus::Canceled
        )
    }
}

impl fmt::Display for CallRecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallRecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "queued" => Ok(CallRecordStatus::Queued),
            "initiated" => Ok(CallRecordStatus::Initiated),
            "ringing" => Ok(CallRecordStatus::Ringing),
            "in-progress" | "answered" => Ok(CallRecordStatus::InProgress),
            "completed" => Ok(CallRecordStatus::Completed),
            "busy" => Ok(CallRecordStatus::Busy),
            "no-answer" => Ok(CallRecordStatus::NoAnswer),
            "failed" => Ok(CallRecordStatus::Failed),
            "canceled" | "cancelled" => Ok(CallRecordStatus::Canceled),
            other => Err(format!("unknown call status: {}", other)),
        }
    }
}

/// Persisted call record, owned by the persistence collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    pub call_id: CallId,
    pub account_id: AccountId,
    pub agent_id: Option<AgentId>,
    pub contact_id: Option<ContactId>,
    pub campaign_id: Option<CampaignId>,
    /// Remote party number
    pub phone_number: Option<String>,
    /// Number on the agent's side of the call
    pub agent_phone_number: Option<String>,
    pub direction: Direction,
    pub call_type: String,
    pub status: CallRecordStatus,
    pub duration_secs: Option<u64>,
    pub turn_count: Option<usize>,
    pub end_reason: Option<String>,
    pub provider_call_id: Option<String>,
    pub provider_conversation_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl CallRecord {
    pub fn new(call_id: CallId, account_id: AccountId, direction: Direction) -> Self {
        let now = Utc::now();
        Self {
            call_id,
            account_id,
            agent_id: None,
            contact_id: None,
            campaign_id: None,
            phone_number: None,
            agent_phone_number: None,
            direction,
            call_type: "ai_agent".to_string(),
            status: CallRecordStatus::Queued,
            duration_secs: None,
            turn_count: None,
            end_reason: None,
            provider_call_id: None,
            provider_conversation_id: None,
            created_at: now,
            updated_at: now,
            ended_at: None,
        }
    }
}

/// Routing of a dialled platform number to an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberRoute {
    pub phone_number: String,
    pub account_id: AccountId,
    pub agent_id: AgentId,
}
