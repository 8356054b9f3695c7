//! Outbound dialing through the ElevenLabs native Twilio integration

use async_trait::async_trait;
use tracing::{info, warn};

use prixagent_conversation_core::{
    AdapterError, AdapterResult, OutboundCallPlaced, OutboundCallRequest, TelephonyAdapter,
};

use super::protocol::{AgentOverride, ConfigOverride, ConversationInitiation, OutboundCallBody};
use super::{ElevenLabsClient, PROVIDER_NAME};

/// [`TelephonyAdapter`] that lets ElevenLabs place the call and host the
/// conversation, so both the call SID and the conversation id come back at once
pub struct ElevenLabsTwilioDialer {
    client: ElevenLabsClient,
}

impl ElevenLabsTwilioDialer {
    pub fn new(client: ElevenLabsClient) -> Self {
        Self { client }
    }

    fn body(request: &OutboundCallRequest) -> OutboundCallBody {
        let mut initiation = ConversationInitiation {
            conversation_config_override: ConfigOverride {
                agent: AgentOverride {
                    first_message: request.opening_message.clone(),
                    ..Default::default()
                },
                tts: None,
            },
            ..Default::default()
        };
        initiation
            .dynamic_variables
            .insert("call_id".to_string(), request.call_id.to_string());

        OutboundCallBody {
            agent_id: request.agent_voice_provider_id.clone(),
            agent_phone_number_id: request.from_number_id.clone(),
            to_number: request.to_number.clone(),
            conversation_initiation_client_data: Some(initiation),
        }
    }
}

#[async_trait]
impl TelephonyAdapter for ElevenLabsTwilioDialer {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn place_outbound_call(&self, request: OutboundCallRequest) -> AdapterResult<OutboundCallPlaced> {
        let reply = self
            .client
            .outbound_call(&Self::body(&request))
            .await
            .map_err(|e| e.into_adapter(PROVIDER_NAME))?;

        if !reply.success {
            warn!("ElevenLabs refused outbound call {}: {}", request.call_id, reply.message);
            return Err(AdapterError::rejected(PROVIDER_NAME, reply.message));
        }
        let provider_call_id = reply
            .call_sid
            .ok_or_else(|| AdapterError::transient(PROVIDER_NAME, "outbound call reply carried no callSid"))?;

        info!(
            "Outbound call {} placed as {} (conversation {:?})",
            request.call_id, provider_call_id, reply.conversation_id
        );
        Ok(OutboundCallPlaced {
            provider_call_id,
            provider_conversation_id: reply.conversation_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prixagent_conversation_core::CallId;

    #[test]
    fn test_outbound_body() {
        let request = OutboundCallRequest {
            to_number: "+15550002222".into(),
            from_number_id: "pn-1".into(),
            agent_voice_provider_id: "el-agent".into(),
            opening_message: Some("Hi, this is Ada".into()),
            call_id: CallId::from("c9"),
        };

        let value = serde_json::to_value(ElevenLabsTwilioDialer::body(&request)).unwrap();
        assert_eq!(value["agent_id"], "el-agent");
        assert_eq!(value["agent_phone_number_id"], "pn-1");
        assert_eq!(value["to_number"], "+15550002222");
        let data = &value["conversation_initiation_client_data"];
        assert_eq!(data["conversation_config_override"]["agent"]["first_message"], "Hi, this is Ada");
        assert_eq!(data["dynamic_variables"]["call_id"], "c9");
        assert!(data.get("type").is_none());
    }
}
