//! Conversation and call API (bearer-authenticated)
//!
//! Every route is scoped to the caller's account. Calls of other accounts are
//! reported as not found.

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use prixagent_conversation_core::{
    AgentId, AudioFormat, AuthClaims, CallContext, CallId, CampaignId, ContactId, ConversationMetrics,
    ConversationStatus, Direction, OrchestratorError, OutboundCallParams, OutboundCallResult,
    StartConversationRequest,
};

use crate::auth::Authenticated;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const DEFAULT_END_REASON: &str = "ended_by_user";

#[derive(Debug, Deserialize)]
pub struct OutboundCallBody {
    pub agent_id: AgentId,
    pub to_number: String,
    #[serde(default)]
    pub contact_id: Option<ContactId>,
    #[serde(default)]
    pub campaign_id: Option<CampaignId>,
}

#[derive(Debug, Deserialize)]
pub struct StartConversationBody {
    #[serde(default)]
    pub call_id: Option<CallId>,
    pub agent_id: AgentId,
    pub stream_url: String,
    #[serde(default)]
    pub contact_id: Option<ContactId>,
    #[serde(default)]
    pub audio_format: Option<AudioFormat>,
    #[serde(default)]
    pub sample_rate: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EndQuery {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Conversation as listed to the dashboard, without the turn history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationView {
    pub call_id: CallId,
    pub agent_id: AgentId,
    pub contact_id: Option<ContactId>,
    pub status: ConversationStatus,
    pub direction: Direction,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub turn_count: usize,
    pub provider_conversation_id: Option<String>,
}

impl From<&CallContext> for ConversationView {
    fn from(ctx: &CallContext) -> Self {
        Self {
            call_id: ctx.call_id.clone(),
            agent_id: ctx.agent_id.clone(),
            contact_id: ctx.contact_id.clone(),
            status: ctx.status,
            direction: ctx.direction,
            started_at: ctx.start_time,
            last_activity: ctx.last_activity,
            turn_count: ctx.turn_count(),
            provider_conversation_id: ctx.provider_conversation_id().map(str::to_string),
        }
    }
}

/// `POST /api/calls/outbound`
pub async fn place_outbound_call(
    State(state): State<AppState>,
    Authenticated(claims): Authenticated,
    Json(body): Json<OutboundCallBody>,
) -> ApiResult<(StatusCode, Json<OutboundCallResult>)> {
    if body.to_number.trim().is_empty() {
        return Err(ApiError::bad_request("to_number must not be empty"));
    }
    let params = OutboundCallParams {
        account_id: claims.account_id,
        agent_id: body.agent_id,
        contact_id: body.contact_id,
        campaign_id: body.campaign_id,
        to_number: body.to_number,
    };
    let placed = state.orchestrator.place_outbound_call(params).await?;
    Ok((StatusCode::CREATED, Json(placed)))
}

/// `POST /api/conversations`
pub async fn start_conversation(
    State(state): State<AppState>,
    Authenticated(claims): Authenticated,
    Json(body): Json<StartConversationBody>,
) -> ApiResult<(StatusCode, Json<ConversationView>)> {
    let call_id = match body.call_id {
        Some(call_id) => call_id,
        None => {
            state
                .orchestrator
                .register_call(&claims.account_id, &body.agent_id, body.contact_id.clone())
                .await?
        }
    };
    let config = state.orchestrator.config();
    let mut request = StartConversationRequest::new(call_id.clone(), claims.account_id, body.agent_id, body.stream_url)
        .with_audio(
            body.audio_format.unwrap_or_default(),
            body.sample_rate.unwrap_or(config.default_sample_rate),
        );
    if let Some(contact_id) = body.contact_id {
        request = request.with_contact(contact_id);
    }

    let context = state
        .orchestrator
        .start_conversation(request)
        .await
        .map_err(|e| match e {
            OrchestratorError::Unauthorized { .. } => ApiError::not_found(format!("call {} not found", call_id)),
            other => other.into(),
        })?;
    Ok((StatusCode::CREATED, Json(ConversationView::from(&context))))
}

/// `GET /api/conversations`
pub async fn list_conversations(
    State(state): State<AppState>,
    Authenticated(claims): Authenticated,
) -> Json<Vec<ConversationView>> {
    let views = state
        .orchestrator
        .get_active_conversations_for(&claims.account_id)
        .iter()
        .map(ConversationView::from)
        .collect();
    Json(views)
}

/// `POST /api/conversations/:call_id/audio` with the raw chunk as body
pub async fn push_audio(
    State(state): State<AppState>,
    Authenticated(claims): Authenticated,
    Path(call_id): Path<CallId>,
    audio: Bytes,
) -> ApiResult<StatusCode> {
    owned_conversation(&state, &claims, &call_id)?;
    state.orchestrator.process_incoming_audio(&call_id, audio).await?;
    Ok(StatusCode::ACCEPTED)
}

/// `POST /api/conversations/:call_id/end?reason=...`
pub async fn end_conversation(
    State(state): State<AppState>,
    Authenticated(claims): Authenticated,
    Path(call_id): Path<CallId>,
    Query(query): Query<EndQuery>,
) -> ApiResult<StatusCode> {
    owned_conversation(&state, &claims, &call_id)?;
    let reason = query.reason.as_deref().unwrap_or(DEFAULT_END_REASON);
    state.orchestrator.end_conversation(&call_id, reason).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/conversations/:call_id/metrics`
pub async fn conversation_metrics(
    State(state): State<AppState>,
    Authenticated(claims): Authenticated,
    Path(call_id): Path<CallId>,
) -> ApiResult<Json<ConversationMetrics>> {
    owned_conversation(&state, &claims, &call_id)?;
    state
        .orchestrator
        .get_conversation_metrics(&call_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no active conversation for call {}", call_id)))
}

/// `GET /api/conversations/:call_id/recording`
pub async fn conversation_recording(
    State(state): State<AppState>,
    Authenticated(claims): Authenticated,
    Path(call_id): Path<CallId>,
) -> ApiResult<Response> {
    let record = state.orchestrator.call_record(&call_id).await?;
    if record.account_id != claims.account_id {
        return Err(not_found(&call_id));
    }
    let audio = state.orchestrator.conversation_recording(&call_id).await?;
    Ok(([(header::CONTENT_TYPE, "audio/mpeg")], audio).into_response())
}

fn owned_conversation(state: &AppState, claims: &AuthClaims, call_id: &CallId) -> ApiResult<CallContext> {
    let context = state.orchestrator.get_conversation(call_id)?;
    if context.account_id != claims.account_id {
        return Err(not_found(call_id));
    }
    Ok(context)
}

fn not_found(call_id: &CallId) -> ApiError {
    ApiError::not_found(format!("Call not found: {}", call_id))
}
