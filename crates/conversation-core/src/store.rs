//! Persistence collaborator contracts
//!
//! The orchestrator treats call records as a write-target it does not own.
//! [`CallStore`] covers call lookup and the end-of-call summary write;
//! [`AgentDirectory`] resolves agents and dialled numbers.
//! [`InMemoryCallStore`] implements both for tests and single-node development.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::adapters::ConversationPhoneNumbers;
use crate::error::{OrchestratorError, Result};
use crate::types::{
    AccountId, AgentId, AgentRecord, CallId, CallRecord, CallRecordStatus, CallSummary, ConversationStatus,
    NumberRoute,
};

#[async_trait]
pub trait CallStore: Send + Sync {
    async fn find_call(&self, call_id: &CallId) -> Result<Option<CallRecord>>;

    /// Look a call up by its telephony call id
    async fn find_call_by_provider_id(&self, provider_call_id: &str) -> Result<Option<CallRecord>>;

    async fn create_call(&self, record: CallRecord) -> Result<()>;

    async fn update_call_status(
        &self,
        call_id: &CallId,
        status: CallRecordStatus,
        duration_secs: Option<u64>,
    ) -> Result<()>;

    async fn set_provider_ids(
        &self,
        call_id: &CallId,
        provider_call_id: Option<&str>,
        provider_conversation_id: Option<&str>,
    ) -> Result<()>;

    async fn update_phone_numbers(&self, call_id: &CallId, numbers: &ConversationPhoneNumbers) -> Result<()>;

    async fn save_call_summary(&self, summary: &CallSummary) -> Result<()>;
}

#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn find_agent(&self, account_id: &AccountId, agent_id: &AgentId) -> Result<Option<AgentRecord>>;

    /// Which account and agent answer calls to `phone_number`
    async fn resolve_number(&self, phone_number: &str) -> Result<Option<NumberRoute>>;
}

/// Record status implied by a finished conversation
pub fn final_record_status(current: CallRecordStatus, summary: &CallSummary) -> CallRecordStatus {
    if current.is_terminal() && current != CallRecordStatus::InProgress {
        return current;
    }
    match summary.status {
        ConversationStatus::Failed => CallRecordStatus::Failed,
        _ => CallRecordStatus::Completed,
    }
}

/// Apply a summary to a record in place
pub fn apply_summary(record: &mut CallRecord, summary: &CallSummary) {
    record.status = final_record_status(record.status, summary);
    record.duration_secs = Some(summary.duration_secs);
    record.turn_count = Some(summary.turn_count);
    record.end_reason = Some(summary.end_reason.clone());
    if summary.provider_conversation_id.is_some() {
        record.provider_conversation_id = summary.provider_conversation_id.clone();
    }
    record.ended_at = Some(summary.ended_at);
    record.updated_at = Utc::now();
}

/// Map-backed store for tests and development
#[derive(Default)]
pub struct InMemoryCallStore {
    calls: RwLock<HashMap<CallId, CallRecord>>,
    agents: RwLock<HashMap<AgentId, AgentRecord>>,
    routes: RwLock<HashMap<String, NumberRoute>>,
    summaries: RwLock<HashMap<CallId, CallSummary>>,
}

impl InMemoryCallStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_call(&self, record: CallRecord) {
        self.calls.write().insert(record.call_id.clone(), record);
    }

    pub fn insert_agent(&self, agent: AgentRecord) {
        self.agents.write().insert(agent.agent_id.clone(), agent);
    }

    pub fn insert_route(&self, route: NumberRoute) {
        self.routes.write().insert(route.phone_number.clone(), route);
    }

    pub fn call(&self, call_id: &CallId) -> Option<CallRecord> {
        self.calls.read().get(call_id).cloned()
    }

    pub fn summary(&self, call_id: &CallId) -> Option<CallSummary> {
        self.summaries.read().get(call_id).cloned()
    }

    pub fn summary_count(&self) -> usize {
        self.summaries.read().len()
    }

    fn with_call<R>(&self, call_id: &CallId, f: impl FnOnce(&mut CallRecord) -> R) -> Result<R> {
        let mut calls = self.calls.write();
        let record = calls
            .get_mut(call_id)
            .ok_or_else(|| OrchestratorError::call_not_found(call_id))?;
        let result = f(record);
        record.updated_at = Utc::now();
        Ok(result)
    }
}

#[async_trait]
impl CallStore for InMemoryCallStore {
    async fn find_call(&self, call_id: &CallId) -> Result<Option<CallRecord>> {
        Ok(self.call(call_id))
    }

    async fn find_call_by_provider_id(&self, provider_call_id: &str) -> Result<Option<CallRecord>> {
        Ok(self
            .calls
            .read()
            .values()
            .find(|c| c.provider_call_id.as_deref() == Some(provider_call_id))
            .cloned())
    }

    async fn create_call(&self, record: CallRecord) -> Result<()> {
        let mut calls = self.calls.write();
        if calls.contains_key(&record.call_id) {
            return Err(OrchestratorError::persistence(format!(
                "call record {} already exists",
                record.call_id
            )));
        }
        calls.insert(record.call_id.clone(), record);
        Ok(())
    }

    async fn update_call_status(
        &self,
        call_id: &CallId,
        status: CallRecordStatus,
        duration_secs: Option<u64>,
    ) -> Result<()> {
        self.with_call(call_id, |record| {
            record.status = status;
            if duration_secs.is_some() {
                record.duration_secs = duration_secs;
            }
            if status.is_terminal() && record.ended_at.is_none() {
                record.ended_at = Some(Utc::now());
            }
        })
    }

    async fn set_provider_ids(
        &self,
        call_id: &CallId,
        provider_call_id: Option<&str>,
        provider_conversation_id: Option<&str>,
    ) -> Result<()> {
        self.with_call(call_id, |record| {
            if let Some(id) = provider_call_id {
                record.provider_call_id = Some(id.to_string());
            }
            if let Some(id) = provider_conversation_id {
                record.provider_conversation_id = Some(id.to_string());
            }
        })
    }

    async fn update_phone_numbers(&self, call_id: &CallId, numbers: &ConversationPhoneNumbers) -> Result<()> {
        self.with_call(call_id, |record| {
            if let Some(agent) = &numbers.agent_phone_number {
                record.agent_phone_number = Some(agent.clone());
            }
            if let Some(contact) = &numbers.contact_phone_number {
                record.phone_number = Some(contact.clone());
            }
            if let Some(direction) = numbers.direction {
                record.direction = direction;
            }
        })
    }

    async fn save_call_summary(&self, summary: &CallSummary) -> Result<()> {
        // A summary for a call without a record still creates one
        {
            let mut calls = self.calls.write();
            let record = calls.entry(summary.call_id.clone()).or_insert_with(|| {
                let mut record = CallRecord::new(
                    summary.call_id.clone(),
                    summary.account_id.clone(),
                    Default::default(),
                );
                record.agent_id = Some(summary.agent_id.clone());
                record.contact_id = summary.contact_id.clone();
                record.status = CallRecordStatus::InProgress;
                record
            });
            apply_summary(record, summary);
        }
        self.summaries.write().insert(summary.call_id.clone(), summary.clone());
        Ok(())
    }
}

#[async_trait]
impl AgentDirectory for InMemoryCallStore {
    async fn find_agent(&self, account_id: &AccountId, agent_id: &AgentId) -> Result<Option<AgentRecord>> {
        Ok(self
            .agents
            .read()
            .get(agent_id)
            .filter(|agent| agent.account_id == *account_id)
            .cloned())
    }

    async fn resolve_number(&self, phone_number: &str) -> Result<Option<NumberRoute>> {
        Ok(self.routes.read().get(phone_number).cloned())
    }
}
