//! Conversation start, inbound media and provider events

use bytes::Bytes;
use tracing::{debug, info, instrument, warn};

use super::ConversationOrchestrator;
use crate::adapters::{ProviderEvent, StreamParams};
use crate::error::{OrchestratorError, Result};
use crate::events::{AlertSeverity, ConversationStarted};
use crate::types::{
    AccountId, CallContext, CallId, CallRecordStatus, ConversationMetrics, ConversationStatus, Speaker,
    StartConversationRequest, TurnContent,
};

impl ConversationOrchestrator {
    /// Register a call and open its voice-AI stream.
    ///
    /// The call must have a record owned by the requesting account; nothing is
    /// registered otherwise. Returns the `active` context. A missing or
    /// inactive agent, or a stream the provider refuses to open, fails the
    /// call and returns the cause.
    #[instrument(skip(self, request), fields(call_id = %request.call_id, account_id = %request.account_id))]
    pub async fn start_conversation(&self, request: StartConversationRequest) -> Result<CallContext> {
        let record = self
            .calls
            .find_call(&request.call_id)
            .await?
            .ok_or_else(|| OrchestratorError::call_not_found(&request.call_id))?;
        if record.account_id != request.account_id {
            warn!("Rejected start for call {} from foreign account", request.call_id);
            return Err(OrchestratorError::wrong_account(&request.call_id, &request.account_id));
        }

        let mut context = CallContext::from_request(&request);
        context.direction = record.direction;
        context.provider_call_id = record.provider_call_id.clone();
        let guard = self.registry.create(context)?;

        let agent = match self.agents.find_agent(&request.account_id, &request.agent_id).await {
            Ok(Some(agent)) if agent.active => agent,
            Ok(Some(_)) => {
                let err = OrchestratorError::AgentInactive {
                    agent_id: request.agent_id.clone(),
                };
                return Err(self.abort_start(guard, err).await);
            }
            Ok(None) => {
                let err = OrchestratorError::AgentNotFound {
                    agent_id: request.agent_id.clone(),
                };
                return Err(self.abort_start(guard, err).await);
            }
            Err(err) => return Err(self.abort_start(guard, err).await),
        };

        let snapshot = agent.snapshot();
        guard.update(|ctx| ctx.agent_config = Some(snapshot.clone()));

        let params = StreamParams {
            call_id: request.call_id.clone(),
            stream_url: request.stream_url.clone(),
            audio_format: request.audio_format,
            sample_rate: request.sample_rate,
            agent: snapshot,
        };
        let started = self
            .bounded(
                self.voice.name(),
                self.voice.start_conversation_stream(&agent.provider_agent_id, &params),
            )
            .await;
        let handle = match started {
            Ok(handle) => handle,
            Err(err) => return Err(self.abort_start(guard, err.into()).await),
        };

        let conversation_id = handle.conversation_id.clone();
        guard.update(|ctx| {
            ctx.stream = Some(handle);
            ctx.transition(ConversationStatus::Active);
            ctx.touch();
        });
        let context = guard.context();
        drop(guard);

        if let Err(e) = self
            .calls
            .set_provider_ids(&request.call_id, None, Some(&conversation_id))
            .await
        {
            warn!("Failed to record conversation id for call {}: {}", request.call_id, e);
        }
        if !record.status.is_terminal() && record.status != CallRecordStatus::InProgress {
            if let Err(e) = self
                .calls
                .update_call_status(&request.call_id, CallRecordStatus::InProgress, None)
                .await
            {
                warn!("Failed to mark call {} in progress: {}", request.call_id, e);
            }
        }

        info!(
            "Conversation started for call {} with agent {} (conversation {})",
            request.call_id, request.agent_id, conversation_id
        );
        self.notifier.conversation_started(
            &context.account_id,
            ConversationStarted {
                call_id: context.call_id.clone(),
                agent_id: context.agent_id.clone(),
                contact_id: context.contact_id.clone(),
                direction: context.direction,
                provider_conversation_id: Some(conversation_id),
            },
        );

        Ok(context)
    }

    /// Forward a caller audio chunk to the voice-AI provider and record it.
    ///
    /// While the call is `ending` the chunk is recorded but not forwarded.
    #[instrument(skip(self, audio), fields(bytes = audio.len()))]
    pub async fn process_incoming_audio(&self, call_id: &CallId, audio: Bytes) -> Result<()> {
        let guard = self.registry.lock(call_id).await?;
        let size = audio.len();

        match guard.status() {
            status if status.forwards_audio() => {
                if let Some(handle) = guard.read(|ctx| ctx.stream.clone()) {
                    let pushed = self.bounded(self.voice.name(), self.voice.push_audio(&handle, audio)).await;
                    if let Err(err) = pushed {
                        if err.is_fatal() {
                            warn!("Voice stream for call {} is gone: {}", call_id, err);
                            let message = err.to_string();
                            self.fail_locked(guard, "stream_failed", &message).await;
                            return Err(err.into());
                        }
                        warn!("Dropped audio for call {}: {}", call_id, err);
                        let account_id = guard.read(|ctx| ctx.account_id.clone());
                        self.notifier.system_alert(
                            &account_id,
                            AlertSeverity::Warning,
                            &format!("Audio delivery degraded: {}", err),
                            Some(call_id),
                        );
                    }
                }
                guard.update(|ctx| ctx.append_turn(Speaker::Caller, TurnContent::Audio { bytes: size }));
                Ok(())
            }
            ConversationStatus::Ending => {
                debug!("Recording late audio for ending call {}", call_id);
                guard.update(|ctx| ctx.append_turn(Speaker::Caller, TurnContent::Audio { bytes: size }));
                Ok(())
            }
            status => Err(OrchestratorError::invalid_state(call_id, status, "push audio to")),
        }
    }

    /// Apply an event reported by the voice-AI provider for a call
    #[instrument(skip(self), fields(kind = event.kind()))]
    pub async fn process_provider_event(&self, call_id: &CallId, event: ProviderEvent) -> Result<()> {
        let guard = self.registry.lock(call_id).await?;
        let status = guard.status();
        if status.is_terminal() {
            return Err(OrchestratorError::invalid_state(call_id, status, "deliver provider event to"));
        }

        match event {
            ProviderEvent::AgentAudio { audio } => {
                let size = audio.len();
                if status == ConversationStatus::Active {
                    self.bridge.relay_audio(call_id, audio);
                }
                guard.update(|ctx| ctx.append_turn(Speaker::Agent, TurnContent::AgentAudio { bytes: size }));
            }
            ProviderEvent::AgentResponse { text } => {
                guard.update(|ctx| ctx.append_turn(Speaker::Agent, TurnContent::AgentText { text }));
            }
            ProviderEvent::UserTranscript { text } => {
                guard.update(|ctx| ctx.append_turn(Speaker::Caller, TurnContent::Transcript { text }));
            }
            ProviderEvent::Interruption => {
                self.bridge.relay_clear(call_id);
                guard.update(|ctx| {
                    ctx.append_turn(
                        Speaker::System,
                        TurnContent::Event {
                            name: "interruption".to_string(),
                        },
                    )
                });
            }
            ProviderEvent::ConversationEnded { reason } => {
                drop(guard);
                info!("Provider ended conversation for call {}: {}", call_id, reason);
                return self.end_conversation(call_id, &reason).await;
            }
            ProviderEvent::StreamFailed { fatal: true, message } => {
                self.fail_locked(guard, "stream_failed", &message).await;
            }
            ProviderEvent::StreamFailed { fatal: false, message } => {
                warn!("Voice stream hiccup on call {}: {}", call_id, message);
                let account_id = guard.read(|ctx| ctx.account_id.clone());
                guard.update(CallContext::touch);
                self.notifier
                    .system_alert(&account_id, AlertSeverity::Warning, &message, Some(call_id));
            }
        }
        Ok(())
    }

    /// Duration, turn count and status of a live conversation
    pub fn get_conversation_metrics(&self, call_id: &CallId) -> Option<ConversationMetrics> {
        self.registry
            .get(call_id)
            .ok()
            .filter(|ctx| !ctx.status.is_terminal())
            .map(|ctx| ctx.metrics())
    }

    /// Snapshot of the context of a live conversation
    pub fn get_conversation(&self, call_id: &CallId) -> Result<CallContext> {
        self.registry.get(call_id)
    }

    /// Snapshots of every live conversation, in start order
    pub fn get_active_conversations(&self) -> Vec<CallContext> {
        self.registry.snapshot()
    }

    /// Snapshots of one account's live conversations, in start order
    pub fn get_active_conversations_for(&self, account_id: &AccountId) -> Vec<CallContext> {
        self.registry.list_by_account(account_id)
    }
}
