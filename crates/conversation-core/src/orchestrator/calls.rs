//! Telephony-side call handling: dialing out, routing inbound calls, status
//! relay and phone number backfill

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::ConversationOrchestrator;
use crate::adapters::{ConversationPhoneNumbers, OutboundCallRequest};
use crate::error::{OrchestratorError, Result};
use crate::events::CallStatusUpdate;
use crate::types::{
    AccountId, AgentId, AgentRecord, CallId, CallRecord, CallRecordStatus, CampaignId, ContactId, Direction,
};

/// Request to place an outbound agent call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundCallParams {
    pub account_id: AccountId,
    pub agent_id: AgentId,
    #[serde(default)]
    pub contact_id: Option<ContactId>,
    #[serde(default)]
    pub campaign_id: Option<CampaignId>,
    pub to_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundCallResult {
    pub call_id: CallId,
    pub provider_call_id: String,
    pub provider_conversation_id: Option<String>,
}

/// Inbound call as reported by the telephony webhook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundCall {
    pub call_sid: String,
    pub from: String,
    pub to: String,
    pub status: Option<CallRecordStatus>,
}

/// Where an inbound call goes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundRoute {
    pub call_id: CallId,
    pub account_id: AccountId,
    pub agent_id: AgentId,
}

/// Telephony status callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallStatusCallback {
    pub call_sid: String,
    pub status: CallRecordStatus,
    pub duration_secs: Option<u64>,
}

impl ConversationOrchestrator {
    /// Dial a contact from the agent's number
    #[instrument(skip(self, params), fields(account_id = %params.account_id, agent_id = %params.agent_id))]
    pub async fn place_outbound_call(&self, params: OutboundCallParams) -> Result<OutboundCallResult> {
        let agent = self.active_agent(&params.account_id, &params.agent_id).await?;
        let from_number_id = agent.phone_number_id.clone().ok_or_else(|| {
            OrchestratorError::config(format!("agent {} has no outbound phone number", agent.agent_id))
        })?;

        let call_id = CallId::generate();
        let mut record = CallRecord::new(call_id.clone(), params.account_id.clone(), Direction::Outbound);
        record.agent_id = Some(params.agent_id.clone());
        record.contact_id = params.contact_id.clone();
        record.campaign_id = params.campaign_id.clone();
        record.phone_number = Some(params.to_number.clone());
        self.calls.create_call(record).await?;

        let request = OutboundCallRequest {
            to_number: params.to_number.clone(),
            from_number_id,
            agent_voice_provider_id: agent.provider_agent_id.clone(),
            opening_message: agent.first_message.clone(),
            call_id: call_id.clone(),
        };
        let placed = self
            .bounded(self.telephony.name(), self.telephony.place_outbound_call(request))
            .await;

        let placed = match placed {
            Ok(placed) => placed,
            Err(err) => {
                warn!("Outbound call {} could not be placed: {}", call_id, err);
                if let Err(e) = self
                    .calls
                    .update_call_status(&call_id, CallRecordStatus::Failed, None)
                    .await
                {
                    warn!("Failed to mark call {} failed: {}", call_id, e);
                }
                self.notifier.call_status_update(
                    &params.account_id,
                    CallStatusUpdate {
                        call_id: call_id.clone(),
                        status: CallRecordStatus::Failed.as_str().to_string(),
                        direction: Some(Direction::Outbound),
                        provider_call_id: None,
                        reason: Some(err.to_string()),
                    },
                );
                return Err(err.into());
            }
        };

        self.calls
            .set_provider_ids(
                &call_id,
                Some(&placed.provider_call_id),
                placed.provider_conversation_id.as_deref(),
            )
            .await?;
        self.calls
            .update_call_status(&call_id, CallRecordStatus::Initiated, None)
            .await?;

        info!(
            "Outbound call {} placed to {} (provider call {})",
            call_id, params.to_number, placed.provider_call_id
        );
        self.notifier.call_status_update(
            &params.account_id,
            CallStatusUpdate {
                call_id: call_id.clone(),
                status: CallRecordStatus::Initiated.as_str().to_string(),
                direction: Some(Direction::Outbound),
                provider_call_id: Some(placed.provider_call_id.clone()),
                reason: None,
            },
        );

        Ok(OutboundCallResult {
            call_id,
            provider_call_id: placed.provider_call_id,
            provider_conversation_id: placed.provider_conversation_id,
        })
    }

    /// Create the record for a conversation that has no telephony leg of its
    /// own, such as one started through the API without a call id.
    #[instrument(skip(self))]
    pub async fn register_call(
        &self,
        account_id: &AccountId,
        agent_id: &AgentId,
        contact_id: Option<ContactId>,
    ) -> Result<CallId> {
        let call_id = CallId::generate();
        let mut record = CallRecord::new(call_id.clone(), account_id.clone(), Direction::Inbound);
        record.agent_id = Some(agent_id.clone());
        record.contact_id = contact_id;
        record.call_type = "api".to_string();
        self.calls.create_call(record).await?;
        debug!("Registered call {} for agent {}", call_id, agent_id);
        Ok(call_id)
    }

    /// Route an inbound call to the agent answering the dialled number.
    ///
    /// A webhook retried for the same telephony call gets the same route.
    #[instrument(skip(self, call), fields(call_sid = %call.call_sid))]
    pub async fn accept_inbound_call(&self, call: InboundCall) -> Result<InboundRoute> {
        let route = self
            .agents
            .resolve_number(&call.to)
            .await?
            .ok_or_else(|| OrchestratorError::NumberNotRouted {
                number: call.to.clone(),
            })?;
        self.active_agent(&route.account_id, &route.agent_id).await?;

        if let Some(existing) = self.calls.find_call_by_provider_id(&call.call_sid).await? {
            debug!("Inbound webhook retry for call {}", existing.call_id);
            return Ok(InboundRoute {
                call_id: existing.call_id,
                account_id: route.account_id,
                agent_id: route.agent_id,
            });
        }

        let status = call.status.unwrap_or(CallRecordStatus::Ringing);
        let call_id = CallId::generate();
        let mut record = CallRecord::new(call_id.clone(), route.account_id.clone(), Direction::Inbound);
        record.agent_id = Some(route.agent_id.clone());
        record.phone_number = Some(call.from.clone());
        record.agent_phone_number = Some(call.to.clone());
        record.provider_call_id = Some(call.call_sid.clone());
        record.status = status;
        self.calls.create_call(record).await?;

        info!("Inbound call {} from {} routed to agent {}", call_id, call.from, route.agent_id);
        self.notifier.call_status_update(
            &route.account_id,
            CallStatusUpdate {
                call_id: call_id.clone(),
                status: status.as_str().to_string(),
                direction: Some(Direction::Inbound),
                provider_call_id: Some(call.call_sid),
                reason: None,
            },
        );

        Ok(InboundRoute {
            call_id,
            account_id: route.account_id,
            agent_id: route.agent_id,
        })
    }

    /// Record a telephony status change and end the conversation when the
    /// telephony leg is over. Returns the platform call id, or `None` for an
    /// unknown telephony call.
    #[instrument(skip(self, callback), fields(call_sid = %callback.call_sid, status = %callback.status))]
    pub async fn relay_call_status(&self, callback: CallStatusCallback) -> Result<Option<CallId>> {
        let Some(record) = self.calls.find_call_by_provider_id(&callback.call_sid).await? else {
            debug!("Status callback for unknown telephony call {}", callback.call_sid);
            return Ok(None);
        };
        let call_id = record.call_id.clone();

        self.calls
            .update_call_status(&call_id, callback.status, callback.duration_secs)
            .await?;
        self.notifier.call_status_update(
            &record.account_id,
            CallStatusUpdate {
                call_id: call_id.clone(),
                status: callback.status.as_str().to_string(),
                direction: Some(record.direction),
                provider_call_id: Some(callback.call_sid.clone()),
                reason: None,
            },
        );

        if callback.status.is_terminal() && self.registry.contains(&call_id) {
            let reason = match callback.status {
                CallRecordStatus::Completed => "completed",
                other => other.as_str(),
            };
            self.end_conversation(&call_id, reason).await?;
        }
        Ok(Some(call_id))
    }

    /// Copy the provider's view of the call's phone numbers onto the call record.
    ///
    /// Returns `None` when the call has no provider conversation yet.
    #[instrument(skip(self))]
    pub async fn backfill_phone_numbers(&self, call_id: &CallId) -> Result<Option<ConversationPhoneNumbers>> {
        let Some(conversation_id) = self.provider_conversation_id(call_id).await? else {
            return Ok(None);
        };

        let numbers = self
            .bounded(
                self.voice.name(),
                self.voice.get_conversation_phone_numbers(&conversation_id),
            )
            .await?;
        self.calls.update_phone_numbers(call_id, &numbers).await?;
        debug!("Backfilled phone numbers for call {}", call_id);
        Ok(Some(numbers))
    }

    /// Recording of a finished conversation, fetched from the voice-AI provider
    #[instrument(skip(self))]
    pub async fn conversation_recording(&self, call_id: &CallId) -> Result<Bytes> {
        let conversation_id = self
            .provider_conversation_id(call_id)
            .await?
            .ok_or_else(|| OrchestratorError::call_not_found(call_id))?;
        let audio = self
            .bounded(self.voice.name(), self.voice.get_conversation_audio(&conversation_id))
            .await?;
        Ok(audio)
    }

    /// Persisted call record, for account checks at the boundary
    pub async fn call_record(&self, call_id: &CallId) -> Result<CallRecord> {
        self.calls
            .find_call(call_id)
            .await?
            .ok_or_else(|| OrchestratorError::call_not_found(call_id))
    }

    async fn provider_conversation_id(&self, call_id: &CallId) -> Result<Option<String>> {
        if let Ok(ctx) = self.registry.get(call_id) {
            if let Some(id) = ctx.provider_conversation_id() {
                return Ok(Some(id.to_string()));
            }
        }
        let record = self.call_record(call_id).await?;
        Ok(record.provider_conversation_id)
    }

    async fn active_agent(&self, account_id: &AccountId, agent_id: &AgentId) -> Result<AgentRecord> {
        match self.agents.find_agent(account_id, agent_id).await? {
            Some(agent) if agent.active => Ok(agent),
            Some(_) => Err(OrchestratorError::AgentInactive {
                agent_id: agent_id.clone(),
            }),
            None => Err(OrchestratorError::AgentNotFound {
                agent_id: agent_id.clone(),
            }),
        }
    }
}
