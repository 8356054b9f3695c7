//! Typed dashboard events
//!
//! The dashboard only ever receives one of the [`DashboardEvent`] variants.
//! The wire name of each variant is fixed by its serde tag, so callers never
//! pass event names around as strings.
//!
//! On the socket every event is wrapped in an [`EventEnvelope`]:
//!
//! ```json
//! {"event":"call-completed","data":{"call_id":"c1", ...},"timestamp":"2024-05-01T12:00:00Z"}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AgentId, CallId, CampaignId, ContactId, ConversationStatus, Direction};

/// Severity of a [`SystemAlert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationStarted {
    pub call_id: CallId,
    pub agent_id: AgentId,
    pub contact_id: Option<ContactId>,
    pub direction: Direction,
    pub provider_conversation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallStatusUpdate {
    pub call_id: CallId,
    /// Telephony status (`ringing`, `in-progress`, ...) or `failed`
    pub status: String,
    pub direction: Option<Direction>,
    pub provider_call_id: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallCompleted {
    pub call_id: CallId,
    pub agent_id: AgentId,
    pub status: ConversationStatus,
    pub end_reason: String,
    pub duration_secs: u64,
    pub turn_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignUpdate {
    pub campaign_id: CampaignId,
    pub status: String,
    #[serde(default)]
    pub detail: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentUpdate {
    pub agent_id: AgentId,
    pub status: String,
    #[serde(default)]
    pub detail: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemAlert {
    pub severity: AlertSeverity,
    pub message: String,
    pub call_id: Option<CallId>,
}

/// Closed set of events pushed to dashboard clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum DashboardEvent {
    ConversationStarted(ConversationStarted),
    CallStatusUpdate(CallStatusUpdate),
    CallCompleted(CallCompleted),
    CampaignUpdate(CampaignUpdate),
    AgentUpdate(AgentUpdate),
    SystemAlert(SystemAlert),
}

impl DashboardEvent {
    /// Wire name of the event
    pub fn event_name(&self) -> &'static str {
        match self {
            DashboardEvent::ConversationStarted(_) => "conversation-started",
            DashboardEvent::CallStatusUpdate(_) => "call-status-update",
            DashboardEvent::CallCompleted(_) => "call-completed",
            DashboardEvent::CampaignUpdate(_) => "campaign-update",
            DashboardEvent::AgentUpdate(_) => "agent-update",
            DashboardEvent::SystemAlert(_) => "system-alert",
        }
    }

    /// Call the event is about, if any
    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            DashboardEvent::ConversationStarted(e) => Some(&e.call_id),
            DashboardEvent::CallStatusUpdate(e) => Some(&e.call_id),
            DashboardEvent::CallCompleted(e) => Some(&e.call_id),
            DashboardEvent::SystemAlert(e) => e.call_id.as_ref(),
            DashboardEvent::CampaignUpdate(_) | DashboardEvent::AgentUpdate(_) => None,
        }
    }

    pub fn alert(severity: AlertSeverity, message: impl Into<String>, call_id: Option<&CallId>) -> Self {
        DashboardEvent::SystemAlert(SystemAlert {
            severity,
            message: message.into(),
            call_id: call_id.cloned(),
        })
    }
}

/// An event stamped with its server-side delivery time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventEnvelope {
    #[serde(flatten)]
    pub event: DashboardEvent,
    pub timestamp: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(event: DashboardEvent) -> Self {
        Self {
            event,
            timestamp: Utc::now(),
        }
    }

    pub fn event_name(&self) -> &'static str {
        self.event.event_name()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_match_serde_tags() {
        let events = vec![
            DashboardEvent::ConversationStarted(ConversationStarted {
                call_id: "c1".into(),
                agent_id: "ag1".into(),
                contact_id: None,
                direction: Direction::Inbound,
                provider_conversation_id: None,
            }),
            DashboardEvent::CallStatusUpdate(CallStatusUpdate {
                call_id: "c1".into(),
                status: "ringing".into(),
                direction: None,
                provider_call_id: None,
                reason: None,
            }),
            DashboardEvent::CallCompleted(CallCompleted {
                call_id: "c1".into(),
                agent_id: "ag1".into(),
                status: ConversationStatus::Ended,
                end_reason: "completed".into(),
                duration_secs: 3,
                turn_count: 1,
            }),
            DashboardEvent::CampaignUpdate(CampaignUpdate {
                campaign_id: "cp1".into(),
                status: "running".into(),
                detail: serde_json::Value::Null,
            }),
            DashboardEvent::AgentUpdate(AgentUpdate {
                agent_id: "ag1".into(),
                status: "updated".into(),
                detail: serde_json::Value::Null,
            }),
            DashboardEvent::alert(AlertSeverity::Warning, "slow provider", None),
        ];

        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["event"], event.event_name());
        }
    }

    #[test]
    fn test_envelope_is_flat() {
        let envelope = EventEnvelope::new(DashboardEvent::alert(
            AlertSeverity::Error,
            "stream lost",
            Some(&CallId::from("c9")),
        ));
        let value: serde_json::Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();

        assert_eq!(value["event"], "system-alert");
        assert_eq!(value["data"]["severity"], "error");
        assert_eq!(value["data"]["call_id"], "c9");
        assert!(value["timestamp"].is_string());
    }
}
