//! Twilio voice webhooks (form-encoded)

use serde::Deserialize;
use tracing::warn;

use prixagent_conversation_core::{CallRecordStatus, CallStatusCallback, InboundCall};

use crate::error::{ProviderError, Result};

/// Body of the incoming-call webhook
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VoiceWebhook {
    pub call_sid: String,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub call_status: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub account_sid: Option<String>,
}

impl VoiceWebhook {
    pub fn into_inbound(self) -> InboundCall {
        let status = self.call_status.as_deref().and_then(|raw| match raw.parse() {
            Ok(status) => Some(status),
            Err(e) => {
                warn!("Ignoring status on inbound webhook {}: {}", self.call_sid, e);
                None
            }
        });
        InboundCall {
            call_sid: self.call_sid,
            from: self.from,
            to: self.to,
            status,
        }
    }
}

/// Body of the status callback
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusWebhook {
    pub call_sid: String,
    pub call_status: String,
    /// Whole seconds, sent as a string once the call is over
    #[serde(default)]
    pub call_duration: Option<String>,
    #[serde(default)]
    pub account_sid: Option<String>,
}

impl StatusWebhook {
    pub fn into_callback(self) -> Result<CallStatusCallback> {
        let status: CallRecordStatus = self.call_status.parse().map_err(ProviderError::Protocol)?;
        let duration_secs = self.call_duration.as_deref().and_then(|d| d.trim().parse().ok());
        Ok(CallStatusCallback {
            call_sid: self.call_sid,
            status,
            duration_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_voice_webhook() {
        let hook: VoiceWebhook = serde_json::from_value(json!({
            "CallSid": "CA1",
            "From": "+15550009999",
            "To": "+15550001111",
            "CallStatus": "ringing",
            "Direction": "inbound",
            "ApiVersion": "2010-04-01"
        }))
        .unwrap();

        let inbound = hook.into_inbound();
        assert_eq!(inbound.call_sid, "CA1");
        assert_eq!(inbound.to, "+15550001111");
        assert_eq!(inbound.status, Some(CallRecordStatus::Ringing));
    }

    #[test]
    fn test_status_webhook() {
        let hook: StatusWebhook = serde_json::from_value(json!({
            "CallSid": "CA1",
            "CallStatus": "no-answer",
            "CallDuration": "0"
        }))
        .unwrap();
        let callback = hook.into_callback().unwrap();
        assert_eq!(callback.status, CallRecordStatus::NoAnswer);
        assert_eq!(callback.duration_secs, Some(0));

        let bogus = StatusWebhook {
            call_sid: "CA1".into(),
            call_status: "exploded".into(),
            call_duration: None,
            account_sid: None,
        };
        assert!(matches!(bogus.into_callback(), Err(ProviderError::Protocol(_))));
    }
}
