//! Twilio Programmable Voice
//!
//! [`TwilioRestDialer`] places calls through the REST API and points them at
//! the gateway's media-stream socket with an inline `<Connect><Stream>`
//! document. The submodules hold the webhook forms, TwiML rendering and the
//! Media Streams wire messages the gateway speaks.

pub mod media;
pub mod twiml;
pub mod webhook;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use prixagent_conversation_core::{AdapterResult, OutboundCallPlaced, OutboundCallRequest, TelephonyAdapter};

use crate::error::{check, ProviderError, Result};
use twiml::ConnectStream;

pub const PROVIDER_NAME: &str = "twilio";

/// Twilio account settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub api_base_url: String,
    /// Public `wss://` URL of the gateway's media-stream endpoint
    pub media_stream_url: String,
    /// Public URL of the gateway's status webhook
    pub status_callback_url: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            auth_token: String::new(),
            api_base_url: "https://api.twilio.com".to_string(),
            media_stream_url: String::new(),
            status_callback_url: None,
            request_timeout_secs: 15,
        }
    }
}

impl TwilioConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.account_sid.is_empty() || self.auth_token.is_empty() {
            return Err("twilio account_sid and auth_token are required".to_string());
        }
        if !self.media_stream_url.starts_with("wss://") && !self.media_stream_url.starts_with("ws://") {
            return Err(format!(
                "twilio media_stream_url must be a websocket URL, got '{}'",
                self.media_stream_url
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct CreatedCall {
    sid: String,
}

/// [`TelephonyAdapter`] that dials through the Twilio REST API
///
/// `from_number_id` must be an E.164 number owned by the account; the voice
/// conversation starts when Twilio connects the media stream.
pub struct TwilioRestDialer {
    http: Client,
    config: TwilioConfig,
}

impl TwilioRestDialer {
    pub fn new(config: TwilioConfig) -> Result<Self> {
        config.validate().map_err(ProviderError::Config)?;
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    fn form(&self, request: &OutboundCallRequest) -> Vec<(&'static str, String)> {
        let twiml = ConnectStream::new(&self.config.media_stream_url)
            .parameter("call_id", request.call_id.as_str())
            .render();

        let mut form = vec![
            ("To", request.to_number.clone()),
            ("From", request.from_number_id.clone()),
            ("Twiml", twiml),
        ];
        if let Some(callback) = &self.config.status_callback_url {
            form.push(("StatusCallback", callback.clone()));
            form.push(("StatusCallbackMethod", "POST".to_string()));
            for event in ["initiated", "ringing", "answered", "completed"] {
                form.push(("StatusCallbackEvent", event.to_string()));
            }
        }
        form
    }

    async fn create_call(&self, request: &OutboundCallRequest) -> Result<CreatedCall> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Calls.json",
            self.config.api_base_url.trim_end_matches('/'),
            self.config.account_sid
        );
        let response = self
            .http
            .post(url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&self.form(request))
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }
}

#[async_trait]
impl TelephonyAdapter for TwilioRestDialer {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn place_outbound_call(&self, request: OutboundCallRequest) -> AdapterResult<OutboundCallPlaced> {
        let created = self
            .create_call(&request)
            .await
            .map_err(|e| e.into_adapter(PROVIDER_NAME))?;

        info!("Twilio call {} created for call {}", created.sid, request.call_id);
        Ok(OutboundCallPlaced {
            provider_call_id: created.sid,
            provider_conversation_id: None,
        })
    }
}
