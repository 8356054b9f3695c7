//! ConvAI wire messages
//!
//! Client messages are JSON text frames. Audio chunks are the only untyped
//! message; every other frame carries a `type` discriminator.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use prixagent_conversation_core::{AgentSnapshot, AudioFormat, Direction, StreamParams};

/// Frames we send on the conversation socket
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ClientMessage {
    /// Base64 caller audio in the agent's input format
    Audio { user_audio_chunk: String },
    Control(ControlMessage),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    ConversationInitiationClientData(ConversationInitiation),
    Pong { event_id: u64 },
}

/// First frame of every conversation
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversationInitiation {
    pub conversation_config_override: ConfigOverride,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub dynamic_variables: HashMap<String, String>,
}

impl ConversationInitiation {
    /// Overrides taken from the agent snapshot, plus the platform call id as a
    /// dynamic variable so provider-side tools can reference it
    pub fn for_stream(params: &StreamParams) -> Self {
        let mut dynamic_variables = HashMap::new();
        dynamic_variables.insert("call_id".to_string(), params.call_id.to_string());
        Self {
            conversation_config_override: ConfigOverride::from_agent(&params.agent),
            dynamic_variables,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigOverride {
    pub agent: AgentOverride,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts: Option<TtsOverride>,
}

impl ConfigOverride {
    pub fn from_agent(agent: &AgentSnapshot) -> Self {
        let prompt = (!agent.prompt.is_empty()).then(|| PromptOverride {
            prompt: agent.prompt.clone(),
        });
        let tts = (!agent.voice_id.is_empty()).then(|| TtsOverride {
            voice_id: agent.voice_id.clone(),
        });
        Self {
            agent: AgentOverride {
                prompt,
                first_message: agent.first_message.clone(),
                language: agent.language.clone(),
            },
            tts,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<PromptOverride>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptOverride {
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TtsOverride {
    pub voice_id: String,
}

/// Frames the server sends; unknown types are ignored
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConversationInitiationMetadata {
        conversation_initiation_metadata_event: InitiationMetadata,
    },
    Audio {
        audio_event: AudioEvent,
    },
    AgentResponse {
        agent_response_event: AgentResponseEvent,
    },
    UserTranscript {
        user_transcription_event: UserTranscriptionEvent,
    },
    Interruption {
        #[serde(default)]
        interruption_event: Option<EventRef>,
    },
    Ping {
        ping_event: EventRef,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitiationMetadata {
    pub conversation_id: String,
    #[serde(default)]
    pub agent_output_audio_format: Option<String>,
    #[serde(default)]
    pub user_input_audio_format: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioEvent {
    pub audio_base_64: String,
    #[serde(default)]
    pub event_id: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentResponseEvent {
    pub agent_response: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserTranscriptionEvent {
    pub user_transcript: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventRef {
    pub event_id: u64,
}

/// ElevenLabs name for a media encoding, e.g. `ulaw_8000`
pub fn audio_format_name(format: AudioFormat, sample_rate: u32) -> String {
    match format {
        AudioFormat::Mulaw => format!("ulaw_{}", sample_rate),
        AudioFormat::Linear => format!("pcm_{}", sample_rate),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignedUrlReply {
    pub signed_url: String,
}

/// Body of `POST /v1/convai/twilio/outbound-call`
#[derive(Debug, Clone, Serialize)]
pub struct OutboundCallBody {
    pub agent_id: String,
    pub agent_phone_number_id: String,
    pub to_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_initiation_client_data: Option<ConversationInitiation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutboundCallReply {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default, rename = "callSid")]
    pub call_sid: Option<String>,
}

/// Subset of `GET /v1/convai/conversations/{id}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationDetails {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub metadata: ConversationMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationMetadata {
    #[serde(default)]
    pub phone_call: Option<PhoneCall>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PhoneCall {
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub agent_number: Option<String>,
    #[serde(default)]
    pub external_number: Option<String>,
    #[serde(default)]
    pub call_sid: Option<String>,
}

impl PhoneCall {
    pub fn direction(&self) -> Option<Direction> {
        self.direction.as_deref().and_then(|d| d.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prixagent_conversation_core::CallId;
    use serde_json::json;

    fn agent() -> AgentSnapshot {
        AgentSnapshot {
            name: "Receptionist".into(),
            voice_id: "voice-9".into(),
            prompt: "You answer the phone.".into(),
            first_message: Some("Hello!".into()),
            language: None,
            provider_agent_id: "el-agent".into(),
        }
    }

    #[test]
    fn test_initiation_frame_shape() {
        let params = StreamParams {
            call_id: CallId::from("c1"),
            stream_url: "wss://media".into(),
            audio_format: AudioFormat::Mulaw,
            sample_rate: 8000,
            agent: agent(),
        };
        let frame = ClientMessage::Control(ControlMessage::ConversationInitiationClientData(
            ConversationInitiation::for_stream(&params),
        ));

        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "conversation_initiation_client_data");
        assert_eq!(
            value["conversation_config_override"]["agent"]["prompt"]["prompt"],
            "You answer the phone."
        );
        assert_eq!(value["conversation_config_override"]["agent"]["first_message"], "Hello!");
        assert!(value["conversation_config_override"]["agent"].get("language").is_none());
        assert_eq!(value["conversation_config_override"]["tts"]["voice_id"], "voice-9");
        assert_eq!(value["dynamic_variables"]["call_id"], "c1");
    }

    #[test]
    fn test_audio_and_pong_frames() {
        let audio = ClientMessage::Audio {
            user_audio_chunk: "AAEC".into(),
        };
        assert_eq!(serde_json::to_value(&audio).unwrap(), json!({"user_audio_chunk": "AAEC"}));

        let pong = ClientMessage::Control(ControlMessage::Pong { event_id: 7 });
        assert_eq!(serde_json::to_value(&pong).unwrap(), json!({"type": "pong", "event_id": 7}));
    }

    #[test]
    fn test_server_frames() {
        let metadata: ServerMessage = serde_json::from_value(json!({
            "type": "conversation_initiation_metadata",
            "conversation_initiation_metadata_event": {
                "conversation_id": "conv-1",
                "agent_output_audio_format": "ulaw_8000"
            }
        }))
        .unwrap();
        assert!(matches!(
            metadata,
            ServerMessage::ConversationInitiationMetadata { conversation_initiation_metadata_event: ref m }
                if m.conversation_id == "conv-1"
        ));

        let ping: ServerMessage =
            serde_json::from_value(json!({"type": "ping", "ping_event": {"event_id": 3, "ping_ms": 40}})).unwrap();
        assert!(matches!(ping, ServerMessage::Ping { ping_event: EventRef { event_id: 3 } }));

        let bare_interruption: ServerMessage = serde_json::from_value(json!({"type": "interruption"})).unwrap();
        assert!(matches!(bare_interruption, ServerMessage::Interruption { .. }));

        let unknown: ServerMessage = serde_json::from_value(json!({"type": "vad_score", "vad_score_event": {}})).unwrap();
        assert!(matches!(unknown, ServerMessage::Other));
    }

    #[test]
    fn test_outbound_reply_and_details() {
        let reply: OutboundCallReply = serde_json::from_value(json!({
            "success": true,
            "message": "ok",
            "conversation_id": "conv-2",
            "callSid": "CA123"
        }))
        .unwrap();
        assert_eq!(reply.call_sid.as_deref(), Some("CA123"));

        let details: ConversationDetails = serde_json::from_value(json!({
            "conversation_id": "conv-2",
            "metadata": {"phone_call": {"direction": "outbound", "agent_number": "+1555", "external_number": "+1666"}}
        }))
        .unwrap();
        let phone = details.metadata.phone_call.unwrap();
        assert_eq!(phone.direction(), Some(Direction::Outbound));
        assert_eq!(phone.external_number.as_deref(), Some("+1666"));
    }

    #[test]
    fn test_audio_format_names() {
        assert_eq!(audio_format_name(AudioFormat::Mulaw, 8000), "ulaw_8000");
        assert_eq!(audio_format_name(AudioFormat::Linear, 16000), "pcm_16000");
    }
}
