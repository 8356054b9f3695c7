//! End-of-call paths: normal end, forced failure and the idle sweep

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn, Instrument};

use super::ConversationOrchestrator;
use crate::error::{OrchestratorError, Result};
use crate::events::{AlertSeverity, CallCompleted, CallStatusUpdate};
use crate::registry::CallGuard;
use crate::types::{CallId, CallSummary, ConversationStatus, StreamHandle};

impl ConversationOrchestrator {
    /// End a conversation and evict it.
    ///
    /// Idempotent: ending an unknown or already finished call succeeds. A call
    /// that is already ending is waited on, so once this returns the registry
    /// no longer holds the call. Finalization runs on its own task and
    /// completes even if the caller stops waiting.
    #[instrument(skip(self))]
    pub async fn end_conversation(&self, call_id: &CallId, reason: &str) -> Result<()> {
        let guard = match self.registry.lock(call_id).await {
            Ok(guard) => guard,
            Err(OrchestratorError::CallNotFound { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };

        let handle = match guard.status() {
            ConversationStatus::Active => guard.update(|ctx| {
                ctx.transition(ConversationStatus::Ending);
                ctx.end_reason = Some(reason.to_string());
                ctx.stream.clone()
            }),
            ConversationStatus::Ending => {
                // subscribe before releasing the gate so the eviction cannot be missed
                let watcher = self.registry.watch_status(call_id);
                drop(guard);
                if let Some(mut watcher) = watcher {
                    let _ = watcher.wait_for(|status| status.is_terminal()).await;
                }
                debug!("Call {} finished by a concurrent end", call_id);
                return Ok(());
            }
            ConversationStatus::Starting => {
                self.fail_locked(guard, reason, "ended before the voice stream was ready")
                    .await;
                return Ok(());
            }
            ConversationStatus::Ended | ConversationStatus::Failed => return Ok(()),
        };
        drop(guard);

        self.spawn_finish_end(call_id.clone(), handle).await
    }

    /// Force a live call into `failed`, persist what is known and evict it
    #[instrument(skip(self))]
    pub async fn fail_conversation(&self, call_id: &CallId, message: &str) -> Result<()> {
        match self.registry.lock(call_id).await {
            Ok(guard) => {
                self.fail_locked(guard, "error", message).await;
                Ok(())
            }
            Err(OrchestratorError::CallNotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// End every active conversation idle for longer than `max_idle` with
    /// reason `timeout`, and finalize calls left `ending` for as long.
    /// Returns the calls that were ended.
    pub async fn sweep_idle(&self, max_idle: Duration) -> Vec<CallId> {
        let now = Utc::now();
        let max_idle = match chrono::Duration::from_std(max_idle) {
            Ok(max_idle) => max_idle,
            Err(_) => return Vec::new(),
        };

        let stale: Vec<_> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|ctx| ctx.idle_for(now) > max_idle)
            .filter(|ctx| matches!(ctx.status, ConversationStatus::Active | ConversationStatus::Ending))
            .collect();

        let mut ended = Vec::with_capacity(stale.len());
        for ctx in stale {
            let call_id = ctx.call_id;
            let result = if ctx.status == ConversationStatus::Ending {
                warn!("Finalizing call {} left ending", call_id);
                self.spawn_finish_end(call_id.clone(), ctx.stream).await
            } else {
                info!("Ending idle call {}", call_id);
                self.end_conversation(&call_id, "timeout").await
            };
            match result {
                Ok(()) => ended.push(call_id),
                Err(e) => warn!("Idle sweep could not end call {}: {}", call_id, e),
            }
        }
        if !ended.is_empty() {
            debug!("Idle sweep ended {} call(s)", ended.len());
        }
        ended
    }

    /// Close the stream and finalize an `ending` call on a detached task
    async fn spawn_finish_end(&self, call_id: CallId, handle: Option<StreamHandle>) -> Result<()> {
        let this = self.clone();
        tokio::spawn(async move { this.finish_end(&call_id, handle).await }.in_current_span())
            .await
            .map_err(|e| OrchestratorError::internal(format!("call finalization aborted: {}", e)))
    }

    async fn finish_end(&self, call_id: &CallId, handle: Option<StreamHandle>) {
        // audio arriving while the stream closes is still recorded
        if let Some(handle) = &handle {
            self.close_quietly(handle).await;
        }

        let guard = match self.registry.lock(call_id).await {
            Ok(guard) => guard,
            Err(_) => return,
        };
        if guard.status() != ConversationStatus::Ending {
            return;
        }
        let ended_at = Utc::now();
        let mut summary = guard.read(|ctx| ctx.summary(ended_at));
        summary.status = ConversationStatus::Ended;

        self.persist_summary(&summary).await;
        self.notifier.call_completed(
            &summary.account_id,
            CallCompleted {
                call_id: summary.call_id.clone(),
                agent_id: summary.agent_id.clone(),
                status: ConversationStatus::Ended,
                end_reason: summary.end_reason.clone(),
                duration_secs: summary.duration_secs,
                turn_count: summary.turn_count,
            },
        );

        guard.update(|ctx| ctx.transition(ConversationStatus::Ended));
        self.evict(guard);
        info!(
            "Conversation for call {} ended ({}): {}s, {} turns",
            call_id, summary.end_reason, summary.duration_secs, summary.turn_count
        );
    }

    /// Fail a call during start and hand the cause back to the caller
    pub(super) async fn abort_start(&self, guard: CallGuard, cause: OrchestratorError) -> OrchestratorError {
        warn!("Start failed for call {}: {}", guard.call_id(), cause);
        self.fail_locked(guard, "start_failed", &cause.to_string()).await;
        cause
    }

    /// Failure path, run with the call's gate held. The gate moves to a
    /// detached task so the failure completes even if the caller goes away.
    pub(super) async fn fail_locked(&self, guard: CallGuard, reason: &str, message: &str) {
        let this = self.clone();
        let (reason, message) = (reason.to_string(), message.to_string());
        let failing = async move { this.fail_guarded(guard, &reason, &message).await };
        if let Err(e) = tokio::spawn(failing.in_current_span()).await {
            error!("Call failure handling aborted: {}", e);
        }
    }

    async fn fail_guarded(&self, guard: CallGuard, reason: &str, message: &str) {
        let call_id = guard.call_id().clone();
        let status = guard.status();
        if !status.can_transition_to(ConversationStatus::Failed) {
            debug!("Not failing call {} while {}", call_id, status);
            return;
        }

        let handle = guard.update(|ctx| {
            ctx.failure = Some(message.to_string());
            if ctx.end_reason.is_none() {
                ctx.end_reason = Some(reason.to_string());
            }
            ctx.stream.clone()
        });
        if let Some(handle) = &handle {
            self.close_quietly(handle).await;
        }

        let summary = guard.update(|ctx| {
            ctx.transition(ConversationStatus::Failed);
            ctx.summary(Utc::now())
        });
        self.persist_summary(&summary).await;

        self.notifier.call_status_update(
            &summary.account_id,
            CallStatusUpdate {
                call_id: call_id.clone(),
                status: ConversationStatus::Failed.as_str().to_string(),
                direction: Some(guard.read(|ctx| ctx.direction)),
                provider_call_id: guard.read(|ctx| ctx.provider_call_id.clone()),
                reason: Some(summary.end_reason.clone()),
            },
        );
        self.notifier.system_alert(
            &summary.account_id,
            AlertSeverity::Error,
            &format!("Call failed: {}", message),
            Some(&call_id),
        );

        self.evict(guard);
        error!("Conversation for call {} failed: {}", call_id, message);
    }

    async fn close_quietly(&self, handle: &StreamHandle) {
        let closed = self.bounded(self.voice.name(), self.voice.close_stream(handle)).await;
        if let Err(e) = closed {
            warn!("Closing voice stream for call {} failed: {}", handle.call_id, e);
        }
    }

    async fn persist_summary(&self, summary: &CallSummary) {
        if let Err(e) = self.calls.save_call_summary(summary).await {
            error!("Failed to persist summary for call {}: {}", summary.call_id, e);
            self.notifier.system_alert(
                &summary.account_id,
                AlertSeverity::Error,
                &format!("Call summary not saved: {}", e),
                Some(&summary.call_id),
            );
        }
    }

    /// Remove the call while its gate is still held, then release the gate
    fn evict(&self, guard: CallGuard) {
        let call_id = guard.call_id().clone();
        self.registry.remove(&call_id);
        self.bridge.detach(&call_id);
        drop(guard);
    }
}
