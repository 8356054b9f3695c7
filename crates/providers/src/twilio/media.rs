//! Twilio Media Streams wire messages
//!
//! Inbound events: `connected`, `start`, `media`, `mark`, `dtmf`, `stop`.
//! Outbound commands: `media`, `mark`, `clear`. Audio is base64 mu-law at
//! 8 kHz mono in both directions.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use prixagent_conversation_core::AudioFormat;

use crate::error::{ProviderError, Result};

/// Media Streams sample rate
pub const TWILIO_SAMPLE_RATE: u32 = 8000;

/// Message received on the media-stream socket
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum StreamEvent {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },
    Start {
        start: StartPayload,
    },
    Media {
        media: MediaPayload,
    },
    Mark {
        mark: MarkPayload,
    },
    Dtmf {
        dtmf: DtmfPayload,
    },
    Stop {
        #[serde(default)]
        stop: Option<StopPayload>,
    },
    #[serde(other)]
    Unknown,
}

impl StreamEvent {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| ProviderError::protocol(format!("media stream frame: {}", e)))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPayload {
    pub stream_sid: String,
    #[serde(default)]
    pub call_sid: Option<String>,
    #[serde(default)]
    pub account_sid: Option<String>,
    #[serde(default)]
    pub tracks: Vec<String>,
    /// `<Parameter>` values from the TwiML that opened the stream
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
    #[serde(default)]
    pub media_format: Option<MediaFormat>,
}

impl StartPayload {
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.custom_parameters.get(name).map(String::as_str)
    }

    /// Encoding and rate announced by Twilio, defaulting to mu-law 8 kHz
    pub fn audio(&self) -> (AudioFormat, u32) {
        match &self.media_format {
            Some(format) => (
                format.encoding.parse().unwrap_or(AudioFormat::Mulaw),
                format.sample_rate.unwrap_or(TWILIO_SAMPLE_RATE),
            ),
            None => (AudioFormat::Mulaw, TWILIO_SAMPLE_RATE),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    pub encoding: String,
    #[serde(default)]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub channels: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaPayload {
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub chunk: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    pub payload: String,
}

impl MediaPayload {
    pub fn decode(&self) -> Result<Bytes> {
        STANDARD
            .decode(self.payload.as_bytes())
            .map(Bytes::from)
            .map_err(|e| ProviderError::protocol(format!("media payload: {}", e)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DtmfPayload {
    pub digit: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopPayload {
    #[serde(default)]
    pub call_sid: Option<String>,
}

/// Command sent back on the media-stream socket
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum StreamCommand {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkPayload,
    },
    /// Drop audio Twilio has buffered but not yet played
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundMedia {
    pub payload: String,
}

impl StreamCommand {
    pub fn audio(stream_sid: &str, audio: &[u8]) -> Self {
        StreamCommand::Media {
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia {
                payload: STANDARD.encode(audio),
            },
        }
    }

    pub fn mark(stream_sid: &str, name: impl Into<String>) -> Self {
        StreamCommand::Mark {
            stream_sid: stream_sid.to_string(),
            mark: MarkPayload { name: name.into() },
        }
    }

    pub fn clear(stream_sid: &str) -> Self {
        StreamCommand::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProviderError::protocol(e.to_string()))
    }
}
