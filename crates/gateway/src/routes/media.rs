//! Twilio Media Streams socket
//!
//! One socket per call. The `start` message names the platform call through
//! its `call_id` custom parameter; the conversation is started from the call
//! record, caller audio is fed to the orchestrator, and agent audio comes back
//! through the media bridge as outbound `media` / `clear` commands.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, trace, warn};

use prixagent_conversation_core::{
    AccountId, AgentId, CallId, MediaFrame, OrchestratorError, StartConversationRequest,
};
use prixagent_providers::twilio::media::{StartPayload, StreamCommand, StreamEvent};

use crate::state::AppState;

/// Twilio stopped the stream or the socket closed
const HANGUP_REASON: &str = "caller_hangup";
const SOCKET_ERROR_REASON: &str = "media_stream_error";

/// `GET /media-stream`
pub async fn media_stream(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| run_media_stream(socket, state))
}

async fn run_media_stream(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let Some(start) = await_start(&mut receiver).await else {
        debug!("Media stream closed before start");
        return;
    };

    let call_id = match start.parameter("call_id") {
        Some(id) => CallId::from(id),
        None => {
            warn!("Media stream {} carries no call_id parameter", start.stream_sid);
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    let bridge = state.orchestrator.media_bridge().clone();
    let Some(mut frames) = bridge.attach(&call_id) else {
        warn!("Refusing media stream {}: call {} is already bridged", start.stream_sid, call_id);
        let _ = sender.send(Message::Close(None)).await;
        return;
    };

    if let Err(e) = start_conversation(&state, &call_id, &start).await {
        warn!("Could not start conversation for call {}: {}", call_id, e);
        bridge.release(&frames);
        let _ = sender.send(Message::Close(None)).await;
        return;
    }
    info!("Media stream {} bridged to call {}", start.stream_sid, call_id);

    let stream_sid = start.stream_sid.clone();
    let end_reason = loop {
        tokio::select! {
            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Text(text))) => match StreamEvent::parse(&text) {
                    Ok(StreamEvent::Media { media }) => {
                        let audio = match media.decode() {
                            Ok(audio) => audio,
                            Err(e) => {
                                debug!("Skipping media frame for call {}: {}", call_id, e);
                                continue;
                            }
                        };
                        if let Err(e) = state.orchestrator.process_incoming_audio(&call_id, audio).await {
                            debug!("Conversation for call {} no longer accepts audio: {}", call_id, e);
                            break None;
                        }
                    }
                    Ok(StreamEvent::Stop { .. }) => break Some(HANGUP_REASON),
                    Ok(StreamEvent::Dtmf { dtmf }) => debug!("Call {} pressed {}", call_id, dtmf.digit),
                    Ok(StreamEvent::Mark { mark }) => trace!("Call {} played mark {}", call_id, mark.name),
                    Ok(_) => {}
                    Err(e) => debug!("Ignoring media stream frame for call {}: {}", call_id, e),
                },
                Some(Ok(Message::Close(_))) | None => break Some(HANGUP_REASON),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Media stream for call {} failed: {}", call_id, e);
                    break Some(SOCKET_ERROR_REASON);
                }
            },
            frame = frames.recv() => {
                let command = match frame {
                    Some(MediaFrame::Audio(audio)) => StreamCommand::audio(&stream_sid, &audio),
                    Some(MediaFrame::Clear) => StreamCommand::clear(&stream_sid),
                    // Detached: the conversation was finalized elsewhere
                    None => break None,
                };
                if !send_command(&mut sender, &command).await {
                    break Some(SOCKET_ERROR_REASON);
                }
            }
        }
    };

    match end_reason {
        Some(reason) => match state.orchestrator.end_conversation(&call_id, reason).await {
            Ok(()) | Err(OrchestratorError::CallNotFound { .. }) => {}
            Err(e) => warn!("Failed to end call {} after media stream closed: {}", call_id, e),
        },
        None => {
            let _ = sender.send(Message::Close(None)).await;
        }
    }
    bridge.release(&frames);
    debug!("Media stream {} for call {} finished", stream_sid, call_id);
}

/// Skip `connected` and anything else until `start`
async fn await_start(receiver: &mut SplitStream<WebSocket>) -> Option<StartPayload> {
    while let Some(frame) = receiver.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        };
        match StreamEvent::parse(&text) {
            Ok(StreamEvent::Start { start }) => return Some(start),
            Ok(StreamEvent::Stop { .. }) => return None,
            Ok(_) => {}
            Err(e) => debug!("Ignoring frame before start: {}", e),
        }
    }
    None
}

async fn start_conversation(
    state: &AppState,
    call_id: &CallId,
    start: &StartPayload,
) -> prixagent_conversation_core::Result<()> {
    let record = state.orchestrator.call_record(call_id).await?;
    let agent_id = record
        .agent_id
        .clone()
        .or_else(|| start.parameter("agent_id").map(AgentId::from))
        .ok_or_else(|| OrchestratorError::internal(format!("call {} has no agent", call_id)))?;

    if let Some(account) = start.parameter("account_id") {
        if AccountId::from(account) != record.account_id {
            return Err(OrchestratorError::wrong_account(call_id, &AccountId::from(account)));
        }
    }

    let (format, sample_rate) = start.audio();
    let mut request = StartConversationRequest::new(
        call_id.clone(),
        record.account_id.clone(),
        agent_id,
        state.media_stream_url.clone(),
    )
    .with_audio(format, sample_rate);
    if let Some(contact_id) = record.contact_id {
        request = request.with_contact(contact_id);
    }

    state.orchestrator.start_conversation(request).await?;
    Ok(())
}

async fn send_command(sender: &mut SplitSink<WebSocket, Message>, command: &StreamCommand) -> bool {
    match command.to_json() {
        Ok(text) => sender.send(Message::Text(text)).await.is_ok(),
        Err(e) => {
            warn!("Failed to encode media command: {}", e);
            true
        }
    }
}
