//! # PrixAgent Providers
//!
//! Concrete adapters behind the orchestrator's provider contracts:
//!
//! - [`elevenlabs::ElevenLabsConvAi`]: voice-AI conversation streams over the
//!   ElevenLabs ConvAI websocket, plus conversation metadata and recordings
//! - [`elevenlabs::ElevenLabsTwilioDialer`]: outbound calls placed by
//!   ElevenLabs through its Twilio integration
//! - [`twilio::TwilioRestDialer`]: outbound calls placed directly with Twilio
//!   and bridged to the gateway's media-stream socket
//!
//! The [`twilio`] module also carries the webhook forms, TwiML documents and
//! Media Streams messages the gateway parses and renders.

pub mod elevenlabs;
pub mod error;
pub mod twilio;

pub use elevenlabs::{ElevenLabsClient, ElevenLabsConfig, ElevenLabsConvAi, ElevenLabsTwilioDialer};
pub use error::{ProviderError, Result};
pub use twilio::{TwilioConfig, TwilioRestDialer};
