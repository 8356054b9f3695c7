//! Background loops owned by the gateway

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use prixagent_conversation_core::{CallEvent, CallId, ConversationOrchestrator, OrchestratorError, ProviderEvent};

/// Periodically end conversations that saw no activity within the idle timeout
///
/// Returns `None` when the sweep is disabled (`idle_timeout_secs = 0`).
pub fn spawn_idle_sweeper(orchestrator: Arc<ConversationOrchestrator>) -> Option<JoinHandle<()>> {
    let max_idle = orchestrator.config().idle_timeout()?;
    let period = orchestrator.config().sweep_interval();
    info!("Idle sweep every {:?}, timeout {:?}", period, max_idle);

    Some(tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let swept = orchestrator.sweep_idle(max_idle).await;
            if !swept.is_empty() {
                info!("Idle sweep ended {} conversation(s)", swept.len());
            }
        }
    }))
}

/// Feed provider stream events into the orchestrator
///
/// Events that end a conversation run on their own task so a slow teardown
/// does not hold up audio for other calls. Everything else is applied in
/// arrival order.
pub fn spawn_event_pump(
    orchestrator: Arc<ConversationOrchestrator>,
    mut events: mpsc::UnboundedReceiver<CallEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some((call_id, event)) = events.recv().await {
            let terminal = matches!(
                event,
                ProviderEvent::ConversationEnded { .. } | ProviderEvent::StreamFailed { fatal: true, .. }
            );
            if terminal {
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move { apply(&orchestrator, call_id, event).await });
            } else {
                apply(&orchestrator, call_id, event).await;
            }
        }
        debug!("Provider event channel closed");
    })
}

async fn apply(orchestrator: &ConversationOrchestrator, call_id: CallId, event: ProviderEvent) {
    let kind = event.kind();
    match orchestrator.process_provider_event(&call_id, event).await {
        Ok(()) => {}
        // Late events for calls that already finished
        Err(OrchestratorError::CallNotFound { .. }) | Err(OrchestratorError::InvalidState { .. }) => {
            debug!("Dropped {} event for finished call {}", kind, call_id)
        }
        Err(e) => warn!("Failed to apply {} event for call {}: {}", kind, call_id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use prixagent_conversation_core::testing::{
        agent_record, CollectingNotifier, RecordingTelephony, RecordingVoiceAdapter, TestRig,
    };
    use prixagent_conversation_core::{
        AccountId, CallRecord, ConversationStatus, Direction, InMemoryCallStore, OrchestratorConfig,
        StartConversationRequest,
    };

    async fn wait_for<F: Fn() -> bool>(check: F) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_pump_applies_events_and_ends_call() {
        let rig = TestRig::new();
        let call_id = rig.seed_call("c1", "a1");
        rig.orchestrator
            .start_conversation(StartConversationRequest::new("c1", "a1", "ag1", "wss://x"))
            .await
            .unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let pump = spawn_event_pump(rig.orchestrator.clone(), rx);

        tx.send((call_id.clone(), ProviderEvent::AgentResponse { text: "Hello".into() }))
            .unwrap();
        let orchestrator = rig.orchestrator.clone();
        let id = call_id.clone();
        wait_for(move || orchestrator.get_conversation(&id).map(|c| c.turn_count() == 1).unwrap_or(false)).await;

        tx.send((call_id.clone(), ProviderEvent::ConversationEnded { reason: "agent_hangup".into() }))
            .unwrap();
        let store = rig.store.clone();
        let id = call_id.clone();
        wait_for(move || store.summary(&id).is_some()).await;
        assert_eq!(rig.store.summary(&call_id).unwrap().status, ConversationStatus::Ended);

        // Late events are dropped quietly
        tx.send((call_id, ProviderEvent::Interruption)).unwrap();
        drop(tx);
        pump.await.unwrap();
    }

    fn orchestrator_with(config: OrchestratorConfig) -> (Arc<ConversationOrchestrator>, Arc<InMemoryCallStore>) {
        let store = Arc::new(InMemoryCallStore::new());
        store.insert_agent(agent_record("a1", "ag1"));
        store.insert_call(CallRecord::new(CallId::from("c1"), AccountId::from("a1"), Direction::Inbound));
        let orchestrator = ConversationOrchestrator::builder()
            .voice(Arc::new(RecordingVoiceAdapter::new()))
            .telephony(Arc::new(RecordingTelephony::new()))
            .call_store(store.clone())
            .agent_directory(store.clone())
            .notifier(Arc::new(CollectingNotifier::new()))
            .config(config)
            .build()
            .unwrap();
        (Arc::new(orchestrator), store)
    }

    #[tokio::test]
    async fn test_sweeper_disabled_without_idle_timeout() {
        let (orchestrator, _) = orchestrator_with(OrchestratorConfig {
            idle_timeout_secs: 0,
            ..Default::default()
        });
        assert!(spawn_idle_sweeper(orchestrator).is_none());
    }

    #[tokio::test]
    async fn test_sweeper_ends_idle_conversation() {
        let (orchestrator, store) = orchestrator_with(OrchestratorConfig {
            idle_timeout_secs: 1,
            sweep_interval_secs: 1,
            ..Default::default()
        });
        orchestrator
            .start_conversation(StartConversationRequest::new("c1", "a1", "ag1", "wss://x"))
            .await
            .unwrap();

        let sweeper = spawn_idle_sweeper(orchestrator.clone()).unwrap();
        let id = CallId::from("c1");
        for _ in 0..50 {
            if orchestrator.active_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        sweeper.abort();

        assert_eq!(orchestrator.active_count(), 0);
        assert_eq!(store.summary(&id).unwrap().end_reason, "timeout");
    }
}
