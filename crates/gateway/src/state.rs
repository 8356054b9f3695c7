//! Shared handler state

use std::sync::Arc;

use prixagent_conversation_core::{ConversationOrchestrator, NotificationHub};

use crate::auth::SharedVerifier;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ConversationOrchestrator>,
    pub hub: Arc<NotificationHub>,
    pub verifier: SharedVerifier,
    /// Public `wss://` URL Twilio connects media streams to
    pub media_stream_url: String,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<ConversationOrchestrator>,
        hub: Arc<NotificationHub>,
        verifier: SharedVerifier,
        media_stream_url: impl Into<String>,
    ) -> Self {
        Self {
            orchestrator,
            hub,
            verifier,
            media_stream_url: media_stream_url.into(),
        }
    }
}
