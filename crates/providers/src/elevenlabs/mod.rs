//! ElevenLabs Conversational AI
//!
//! Three pieces share one [`ElevenLabsClient`]:
//! - [`ElevenLabsConvAi`]: the [`VoiceAiAdapter`] that runs one websocket per
//!   call against `/v1/convai/conversation`
//! - [`ElevenLabsTwilioDialer`]: a [`TelephonyAdapter`] that asks ElevenLabs to
//!   place the call through its native Twilio integration
//! - the REST lookups for conversation metadata and recordings
//!
//! [`VoiceAiAdapter`]: prixagent_conversation_core::VoiceAiAdapter
//! [`TelephonyAdapter`]: prixagent_conversation_core::TelephonyAdapter

pub mod outbound;
pub mod protocol;
pub mod stream;

pub use outbound::ElevenLabsTwilioDialer;
pub use stream::ElevenLabsConvAi;

use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{check, ProviderError, Result};
use protocol::{ConversationDetails, OutboundCallBody, OutboundCallReply, SignedUrlReply};

pub const PROVIDER_NAME: &str = "elevenlabs";

const API_KEY_HEADER: &str = "xi-api-key";

/// ElevenLabs connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElevenLabsConfig {
    /// Workspace API key; without one only public agents can be reached
    pub api_key: Option<String>,
    pub api_base_url: String,
    pub ws_base_url: String,
    /// Fetch a signed websocket URL per conversation when an API key is set
    pub use_signed_url: bool,
    /// Seconds to wait for the socket and its initiation metadata
    pub start_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for ElevenLabsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base_url: "https://api.elevenlabs.io".to_string(),
            ws_base_url: "wss://api.elevenlabs.io".to_string(),
            use_signed_url: true,
            start_timeout_secs: 10,
            request_timeout_secs: 15,
        }
    }
}

impl ElevenLabsConfig {
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.api_base_url.is_empty() || self.ws_base_url.is_empty() {
            return Err("elevenlabs base urls must not be empty".to_string());
        }
        if self.start_timeout_secs == 0 {
            return Err("elevenlabs start_timeout_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// REST client for the ConvAI API
#[derive(Debug, Clone)]
pub struct ElevenLabsClient {
    http: Client,
    config: ElevenLabsConfig,
}

impl ElevenLabsClient {
    pub fn new(config: ElevenLabsConfig) -> Result<Self> {
        config.validate().map_err(ProviderError::Config)?;
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ElevenLabsConfig {
        &self.config
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url.trim_end_matches('/'), path)
    }

    fn api_key(&self) -> Result<&str> {
        self.config
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Config("elevenlabs api_key is not configured".to_string()))
    }

    /// Websocket URL for a conversation with `agent_id`
    ///
    /// Uses a signed URL when an API key is configured so private agents work.
    pub async fn conversation_url(&self, agent_id: &str) -> Result<String> {
        if self.config.use_signed_url && self.config.api_key.is_some() {
            return self.signed_url(agent_id).await;
        }

        let base = format!(
            "{}/v1/convai/conversation",
            self.config.ws_base_url.trim_end_matches('/')
        );
        let url = Url::parse_with_params(&base, &[("agent_id", agent_id)])
            .map_err(|e| ProviderError::Config(format!("invalid ws_base_url: {}", e)))?;
        Ok(url.to_string())
    }

    pub async fn signed_url(&self, agent_id: &str) -> Result<String> {
        let response = self
            .http
            .get(self.api_url("/v1/convai/conversation/get_signed_url"))
            .header(API_KEY_HEADER, self.api_key()?)
            .query(&[("agent_id", agent_id)])
            .send()
            .await?;

        let reply: SignedUrlReply = check(response).await?.json().await?;
        debug!("Obtained signed conversation URL for agent {}", agent_id);
        Ok(reply.signed_url)
    }

    pub async fn outbound_call(&self, body: &OutboundCallBody) -> Result<OutboundCallReply> {
        let response = self
            .http
            .post(self.api_url("/v1/convai/twilio/outbound-call"))
            .header(API_KEY_HEADER, self.api_key()?)
            .json(body)
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }

    pub async fn conversation_details(&self, conversation_id: &str) -> Result<ConversationDetails> {
        let response = self
            .http
            .get(self.api_url(&format!("/v1/convai/conversations/{}", conversation_id)))
            .header(API_KEY_HEADER, self.api_key()?)
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }

    pub async fn conversation_audio(&self, conversation_id: &str) -> Result<Bytes> {
        let response = self
            .http
            .get(self.api_url(&format!("/v1/convai/conversations/{}/audio", conversation_id)))
            .header(API_KEY_HEADER, self.api_key()?)
            .send()
            .await?;

        Ok(check(response).await?.bytes().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ElevenLabsConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.start_timeout(), Duration::from_secs(10));
        assert!(config.api_key.is_none());

        let broken = ElevenLabsConfig {
            start_timeout_secs: 0,
            ..Default::default()
        };
        assert!(broken.validate().is_err());
    }

    #[tokio::test]
    async fn test_public_conversation_url_without_key() {
        let client = ElevenLabsClient::new(ElevenLabsConfig::default()).unwrap();
        let url = client.conversation_url("agent 7").await.unwrap();
        assert_eq!(
            url,
            "wss://api.elevenlabs.io/v1/convai/conversation?agent_id=agent+7"
        );
    }

    #[tokio::test]
    async fn test_rest_calls_need_api_key() {
        let client = ElevenLabsClient::new(ElevenLabsConfig::default()).unwrap();
        let err = client.conversation_audio("conv-1").await.unwrap_err();
        assert!(matches!(err, ProviderError::Config(_)));
    }
}
