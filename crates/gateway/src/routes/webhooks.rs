//! Twilio voice webhooks

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Form;
use tracing::{debug, error, info, warn};

use prixagent_conversation_core::{CallRecordStatus, OrchestratorError};
use prixagent_providers::twilio::twiml::{say_and_hangup, ConnectStream};
use prixagent_providers::twilio::webhook::{StatusWebhook, VoiceWebhook};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const UNAVAILABLE_MESSAGE: &str = "Sorry, this number is not available right now. Goodbye.";

fn twiml(body: String) -> Response {
    ([(header::CONTENT_TYPE, "application/xml")], body).into_response()
}

/// `POST /webhooks/twilio/inbound`
///
/// Always answers with TwiML: a media stream for routed calls, a spoken
/// refusal otherwise.
pub async fn inbound_call(State(state): State<AppState>, Form(hook): Form<VoiceWebhook>) -> Response {
    let call_sid = hook.call_sid.clone();
    match state.orchestrator.accept_inbound_call(hook.into_inbound()).await {
        Ok(route) => {
            info!("Inbound call {} routed to agent {} as {}", call_sid, route.agent_id, route.call_id);
            let document = ConnectStream::new(&state.media_stream_url)
                .parameter("call_id", route.call_id.as_str())
                .parameter("account_id", route.account_id.as_str())
                .parameter("agent_id", route.agent_id.as_str())
                .render();
            twiml(document)
        }
        Err(
            e @ (OrchestratorError::NumberNotRouted { .. }
            | OrchestratorError::AgentNotFound { .. }
            | OrchestratorError::AgentInactive { .. }),
        ) => {
            warn!("Refusing inbound call {}: {}", call_sid, e);
            twiml(say_and_hangup(UNAVAILABLE_MESSAGE))
        }
        Err(e) => {
            error!("Failed to accept inbound call {}: {}", call_sid, e);
            twiml(say_and_hangup(UNAVAILABLE_MESSAGE))
        }
    }
}

/// `POST /webhooks/twilio/status`
pub async fn call_status(State(state): State<AppState>, Form(hook): Form<StatusWebhook>) -> ApiResult<StatusCode> {
    let callback = hook.into_callback().map_err(|e| ApiError::bad_request(e.to_string()))?;
    let status = callback.status;

    let Some(call_id) = state.orchestrator.relay_call_status(callback).await? else {
        return Ok(StatusCode::NO_CONTENT);
    };

    if status == CallRecordStatus::InProgress || status.is_terminal() {
        let orchestrator = state.orchestrator.clone();
        tokio::spawn(async move {
            match orchestrator.backfill_phone_numbers(&call_id).await {
                Ok(Some(_)) => debug!("Backfilled phone numbers for call {}", call_id),
                Ok(None) => {}
                Err(e) => debug!("Phone number backfill for call {} failed: {}", call_id, e),
            }
        });
    }
    Ok(StatusCode::NO_CONTENT)
}
