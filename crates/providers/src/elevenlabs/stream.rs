//! Conversation streams over the ConvAI websocket
//!
//! Each call gets its own socket split into two tasks: a writer that drains an
//! unbounded frame queue (so `push_audio` never awaits the network) and a reader
//! that translates server frames into [`ProviderEvent`]s on the adapter's event
//! channel. Pings are answered from the reader through the same queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use prixagent_conversation_core::{
    AdapterError, AdapterResult, CallEvent, CallId, ConversationPhoneNumbers, ProviderEvent, StreamHandle,
    StreamParams, VoiceAiAdapter,
};

use super::protocol::{
    audio_format_name, ClientMessage, ControlMessage, ConversationInitiation, InitiationMetadata, ServerMessage,
};
use super::{ElevenLabsClient, PROVIDER_NAME};
use crate::error::{ProviderError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Reason reported when the provider closes the socket without one
const PROVIDER_CLOSED: &str = "provider_closed";

struct StreamSession {
    conversation_id: String,
    outgoing: mpsc::UnboundedSender<Message>,
    /// Cleared by the reader when the socket is gone
    open: Arc<AtomicBool>,
    /// Set by `close_stream` so the reader does not report our own close
    closing: Arc<AtomicBool>,
}

/// [`VoiceAiAdapter`] backed by ElevenLabs Conversational AI
pub struct ElevenLabsConvAi {
    client: ElevenLabsClient,
    sessions: Arc<DashMap<CallId, StreamSession>>,
    events: mpsc::UnboundedSender<CallEvent>,
}

impl ElevenLabsConvAi {
    /// Create the adapter and the receiver its streams report events on
    pub fn new(client: ElevenLabsClient) -> (Self, mpsc::UnboundedReceiver<CallEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let adapter = Self {
            client,
            sessions: Arc::new(DashMap::new()),
            events,
        };
        (adapter, rx)
    }

    pub fn client(&self) -> &ElevenLabsClient {
        &self.client
    }

    pub fn open_streams(&self) -> usize {
        self.sessions.len()
    }

    async fn connect(&self, agent_voice_id: &str, params: &StreamParams) -> Result<(WsStream, InitiationMetadata)> {
        let config = self.client.config();
        let limit = config.start_timeout();
        let url = self.client.conversation_url(agent_voice_id).await?;

        let (mut ws, _response) = tokio::time::timeout(limit, connect_async(url.as_str()))
            .await
            .map_err(|_| ProviderError::Timeout(config.start_timeout_secs))??;

        let initiation = ClientMessage::Control(ControlMessage::ConversationInitiationClientData(
            ConversationInitiation::for_stream(params),
        ));
        ws.send(Message::Text(encode(&initiation)?)).await?;

        let metadata = tokio::time::timeout(limit, await_metadata(&mut ws))
            .await
            .map_err(|_| ProviderError::Timeout(config.start_timeout_secs))??;
        Ok((ws, metadata))
    }
}

#[async_trait]
impl VoiceAiAdapter for ElevenLabsConvAi {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn start_conversation_stream(&self, agent_voice_id: &str, params: &StreamParams) -> AdapterResult<StreamHandle> {
        let (ws, metadata) = self
            .connect(agent_voice_id, params)
            .await
            .map_err(|e| e.into_adapter(PROVIDER_NAME))?;

        let expected = audio_format_name(params.audio_format, params.sample_rate);
        if let Some(input) = metadata.user_input_audio_format.as_deref() {
            if input != expected {
                warn!(
                    "Agent {} expects {} input but call {} carries {}",
                    agent_voice_id, input, params.call_id, expected
                );
            }
        }

        let (sink, stream) = ws.split();
        let (outgoing, queue) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        let closing = Arc::new(AtomicBool::new(false));

        tokio::spawn(write_loop(sink, queue));
        tokio::spawn(read_loop(
            params.call_id.clone(),
            stream,
            outgoing.clone(),
            self.events.clone(),
            open.clone(),
            closing.clone(),
        ));

        let session = StreamSession {
            conversation_id: metadata.conversation_id.clone(),
            outgoing,
            open,
            closing,
        };
        if let Some(previous) = self.sessions.insert(params.call_id.clone(), session) {
            warn!(
                "Replacing stream {} for call {}",
                previous.conversation_id, params.call_id
            );
            previous.closing.store(true, Ordering::Release);
            let _ = previous.outgoing.send(Message::Close(None));
        }

        info!(
            "Conversation {} started for call {}",
            metadata.conversation_id, params.call_id
        );
        Ok(StreamHandle {
            call_id: params.call_id.clone(),
            conversation_id: metadata.conversation_id,
        })
    }

    async fn push_audio(&self, handle: &StreamHandle, audio: Bytes) -> AdapterResult<()> {
        let session = self.sessions.get(&handle.call_id).ok_or_else(|| {
            AdapterError::fatal(PROVIDER_NAME, format!("no open stream for call {}", handle.call_id))
        })?;
        if !session.open.load(Ordering::Acquire) {
            return Err(AdapterError::fatal(
                PROVIDER_NAME,
                format!("stream {} is closed", session.conversation_id),
            ));
        }

        let frame = encode(&ClientMessage::Audio {
            user_audio_chunk: STANDARD.encode(&audio),
        })
        .map_err(|e| e.into_adapter(PROVIDER_NAME))?;

        session
            .outgoing
            .send(Message::Text(frame))
            .map_err(|_| AdapterError::fatal(PROVIDER_NAME, "stream writer has stopped"))
    }

    async fn close_stream(&self, handle: &StreamHandle) -> AdapterResult<()> {
        match self.sessions.remove(&handle.call_id) {
            Some((_, session)) => {
                session.closing.store(true, Ordering::Release);
                let _ = session.outgoing.send(Message::Close(None));
                debug!("Closed stream {} for call {}", session.conversation_id, handle.call_id);
            }
            None => debug!("No stream to close for call {}", handle.call_id),
        }
        Ok(())
    }

    async fn get_conversation_phone_numbers(&self, provider_conversation_id: &str) -> AdapterResult<ConversationPhoneNumbers> {
        let details = self
            .client
            .conversation_details(provider_conversation_id)
            .await
            .map_err(|e| e.into_adapter(PROVIDER_NAME))?;

        let phone = details.metadata.phone_call.unwrap_or_default();
        Ok(ConversationPhoneNumbers {
            direction: phone.direction(),
            agent_phone_number: phone.agent_number,
            contact_phone_number: phone.external_number,
        })
    }

    async fn get_conversation_audio(&self, provider_conversation_id: &str) -> AdapterResult<Bytes> {
        self.client
            .conversation_audio(provider_conversation_id)
            .await
            .map_err(|e| e.into_adapter(PROVIDER_NAME))
    }
}

fn encode(message: &ClientMessage) -> Result<String> {
    serde_json::to_string(message).map_err(|e| ProviderError::protocol(e.to_string()))
}

/// Read until the start acknowledgement, answering pings on the way
async fn await_metadata(ws: &mut WsStream) -> Result<InitiationMetadata> {
    while let Some(frame) = ws.next().await {
        let text = match frame? {
            Message::Text(text) => text,
            Message::Close(_) => return Err(ProviderError::closed("socket closed before initiation metadata")),
            _ => continue,
        };
        match serde_json::from_str::<ServerMessage>(&text) {
            Ok(ServerMessage::ConversationInitiationMetadata {
                conversation_initiation_metadata_event,
            }) => return Ok(conversation_initiation_metadata_event),
            Ok(ServerMessage::Ping { ping_event }) => {
                let pong = ClientMessage::Control(ControlMessage::Pong {
                    event_id: ping_event.event_id,
                });
                ws.send(Message::Text(encode(&pong)?)).await?;
            }
            Ok(_) => {}
            Err(e) => debug!("Ignoring frame before initiation metadata: {}", e),
        }
    }
    Err(ProviderError::closed("socket ended before initiation metadata"))
}

async fn write_loop(mut sink: SplitSink<WsStream, Message>, mut queue: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = queue.recv().await {
        let is_close = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            debug!("Conversation socket write failed: {}", e);
            break;
        }
        if is_close {
            break;
        }
    }
}

async fn read_loop(
    call_id: CallId,
    mut stream: SplitStream<WsStream>,
    outgoing: mpsc::UnboundedSender<Message>,
    events: mpsc::UnboundedSender<CallEvent>,
    open: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
) {
    let terminal = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                let event = match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(message) => translate(&call_id, message, &outgoing),
                    Err(e) => {
                        debug!("Ignoring unparseable frame for call {}: {}", call_id, e);
                        None
                    }
                };
                if let Some(event) = event {
                    if events.send((call_id.clone(), event)).is_err() {
                        debug!("Event receiver dropped; stopping reader for call {}", call_id);
                        break None;
                    }
                }
            }
            Some(Ok(Message::Close(frame))) => {
                let reason = frame
                    .map(|f| f.reason.to_string())
                    .filter(|reason| !reason.is_empty())
                    .unwrap_or_else(|| PROVIDER_CLOSED.to_string());
                break Some(ProviderEvent::ConversationEnded { reason });
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                break Some(ProviderEvent::StreamFailed {
                    fatal: true,
                    message: e.to_string(),
                })
            }
            None => {
                break Some(ProviderEvent::ConversationEnded {
                    reason: PROVIDER_CLOSED.to_string(),
                })
            }
        }
    };

    open.store(false, Ordering::Release);
    if closing.load(Ordering::Acquire) {
        debug!("Stream for call {} closed locally", call_id);
        return;
    }
    if let Some(event) = terminal {
        info!("Stream for call {} ended by provider: {:?}", call_id, event);
        let _ = events.send((call_id, event));
    }
}

fn translate(call_id: &CallId, message: ServerMessage, outgoing: &mpsc::UnboundedSender<Message>) -> Option<ProviderEvent> {
    match message {
        ServerMessage::Audio { audio_event } => match STANDARD.decode(audio_event.audio_base_64.as_bytes()) {
            Ok(audio) => Some(ProviderEvent::AgentAudio { audio: Bytes::from(audio) }),
            Err(e) => {
                warn!("Dropping undecodable agent audio for call {}: {}", call_id, e);
                None
            }
        },
        ServerMessage::AgentResponse { agent_response_event } => Some(ProviderEvent::AgentResponse {
            text: agent_response_event.agent_response,
        }),
        ServerMessage::UserTranscript {
            user_transcription_event,
        } => Some(ProviderEvent::UserTranscript {
            text: user_transcription_event.user_transcript,
        }),
        ServerMessage::Interruption { .. } => Some(ProviderEvent::Interruption),
        ServerMessage::Ping { ping_event } => {
            let pong = ClientMessage::Control(ControlMessage::Pong {
                event_id: ping_event.event_id,
            });
            match encode(&pong) {
                Ok(frame) => {
                    let _ = outgoing.send(Message::Text(frame));
                }
                Err(e) => warn!("Failed to encode pong for call {}: {}", call_id, e),
            }
            None
        }
        ServerMessage::ConversationInitiationMetadata { .. } | ServerMessage::Other => None,
    }
}
