//! # Call Registry
//!
//! The single source of truth for which calls are currently being orchestrated,
//! keyed by [`CallId`].
//!
//! Each registered call owns a slot with two locks:
//!
//! - a **gate** (`tokio::sync::Mutex<()>`) that serialises whole multi-step
//!   operations on the call, including the adapter awaits inside them. tokio's
//!   mutex is fair, so operations on one call run in arrival order.
//! - the **context** itself behind a short-lived `parking_lot::RwLock`, so reads
//!   (metrics, snapshots, account listings) never wait for an operation that is
//!   parked on a provider round-trip.
//!
//! Operations on different calls never contend beyond the brief map lookup.
//!
//! ```text
//! ┌──────────── CallRegistry ────────────┐
//! │ IndexMap<CallId, Arc<CallSlot>>      │  (creation order)
//! │   CallSlot { gate, context, status } │
//! └──────────────────────────────────────┘
//! ```
//!
//! Registry contents are not persisted and are lost on restart.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::{OrchestratorError, Result};
use crate::types::{AccountId, CallContext, CallId, ConversationStatus};

struct CallSlot {
    gate: Arc<Mutex<()>>,
    context: RwLock<CallContext>,
    status_tx: watch::Sender<ConversationStatus>,
}

/// In-memory table of active call contexts
pub struct CallRegistry {
    slots: RwLock<IndexMap<CallId, Arc<CallSlot>>>,
    total_created: AtomicU64,
    total_removed: AtomicU64,
}

/// Counters describing registry activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryStats {
    pub active: usize,
    pub total_created: u64,
    pub total_removed: u64,
}

/// Exclusive access to one call for the duration of an operation
///
/// While a guard is alive no other guarded operation on the same call can
/// proceed. Reads through [`CallRegistry::get`] are still served.
pub struct CallGuard {
    call_id: CallId,
    slot: Arc<CallSlot>,
    _permit: OwnedMutexGuard<()>,
}

impl CallGuard {
    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    /// Clone of the current context
    pub fn context(&self) -> CallContext {
        self.slot.context.read().clone()
    }

    pub fn status(&self) -> ConversationStatus {
        self.slot.context.read().status
    }

    pub fn read<R>(&self, f: impl FnOnce(&CallContext) -> R) -> R {
        f(&self.slot.context.read())
    }

    /// Mutate the context. Non-terminal status changes are published to
    /// status watchers immediately; terminal ones only once the call leaves
    /// the registry.
    pub fn update<R>(&self, f: impl FnOnce(&mut CallContext) -> R) -> R {
        let (result, status) = {
            let mut ctx = self.slot.context.write();
            let result = f(&mut ctx);
            (result, ctx.status)
        };
        if !status.is_terminal() {
            self.slot.status_tx.send_if_modified(|current| {
                if *current != status {
                    *current = status;
                    true
                } else {
                    false
                }
            });
        }
        result
    }
}

impl CallRegistry {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(IndexMap::new()),
            total_created: AtomicU64::new(0),
            total_removed: AtomicU64::new(0),
        }
    }

    /// Register a new context and return the guard for it, already held.
    ///
    /// Fails with [`OrchestratorError::DuplicateCall`] when the call is already
    /// registered; the existing entry is left untouched.
    pub fn create(&self, context: CallContext) -> Result<CallGuard> {
        let call_id = context.call_id.clone();
        let mut slots = self.slots.write();
        if slots.contains_key(&call_id) {
            return Err(OrchestratorError::duplicate(&call_id));
        }

        let (status_tx, _) = watch::channel(context.status);
        let gate = Arc::new(Mutex::new(()));
        let permit = gate
            .clone()
            .try_lock_owned()
            .map_err(|_| OrchestratorError::internal("fresh call gate already locked"))?;
        let slot = Arc::new(CallSlot {
            gate,
            context: RwLock::new(context),
            status_tx,
        });
        slots.insert(call_id.clone(), slot.clone());
        drop(slots);

        self.total_created.fetch_add(1, Ordering::Relaxed);
        debug!("Registered call {}", call_id);

        Ok(CallGuard {
            call_id,
            slot,
            _permit: permit,
        })
    }

    /// Snapshot of the context for a call
    pub fn get(&self, call_id: &CallId) -> Result<CallContext> {
        self.slot(call_id)
            .map(|slot| slot.context.read().clone())
            .ok_or_else(|| OrchestratorError::call_not_found(call_id))
    }

    pub fn contains(&self, call_id: &CallId) -> bool {
        self.slots.read().contains_key(call_id)
    }

    /// Wait for exclusive access to a call.
    ///
    /// Fails with [`OrchestratorError::CallNotFound`] if the call is unknown, or
    /// if it was evicted while this caller was queued behind another operation.
    pub async fn lock(&self, call_id: &CallId) -> Result<CallGuard> {
        let slot = self
            .slot(call_id)
            .ok_or_else(|| OrchestratorError::call_not_found(call_id))?;
        let permit = slot.gate.clone().lock_owned().await;

        let still_registered = self
            .slot(call_id)
            .map(|current| Arc::ptr_eq(&current, &slot))
            .unwrap_or(false);
        if !still_registered {
            return Err(OrchestratorError::call_not_found(call_id));
        }

        Ok(CallGuard {
            call_id: call_id.clone(),
            slot,
            _permit: permit,
        })
    }

    /// Apply `mutator` atomically with respect to other operations on the same call
    pub async fn update<R>(&self, call_id: &CallId, mutator: impl FnOnce(&mut CallContext) -> R) -> Result<R> {
        let guard = self.lock(call_id).await?;
        Ok(guard.update(mutator))
    }

    /// Evict a call. Safe to call for an absent call.
    ///
    /// Status watchers see the call's final status only after it has left the table.
    pub fn remove(&self, call_id: &CallId) -> Option<CallContext> {
        let slot = self.slots.write().shift_remove(call_id)?;
        let context = slot.context.read().clone();
        slot.status_tx.send_replace(context.status);
        self.total_removed.fetch_add(1, Ordering::Relaxed);
        debug!("Evicted call {} ({})", call_id, context.status);
        Some(context)
    }

    /// Contexts owned by `account_id`, in creation order
    pub fn list_by_account(&self, account_id: &AccountId) -> Vec<CallContext> {
        self.slots
            .read()
            .values()
            .filter_map(|slot| {
                let ctx = slot.context.read();
                (ctx.account_id == *account_id).then(|| ctx.clone())
            })
            .collect()
    }

    /// All contexts, in creation order
    pub fn snapshot(&self) -> Vec<CallContext> {
        self.slots
            .read()
            .values()
            .map(|slot| slot.context.read().clone())
            .collect()
    }

    /// Subscribe to status changes of a call
    pub fn watch_status(&self, call_id: &CallId) -> Option<watch::Receiver<ConversationStatus>> {
        self.slot(call_id).map(|slot| slot.status_tx.subscribe())
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            active: self.len(),
            total_created: self.total_created.load(Ordering::Relaxed),
            total_removed: self.total_removed.load(Ordering::Relaxed),
        }
    }

    fn slot(&self, call_id: &CallId) -> Option<Arc<CallSlot>> {
        self.slots.read().get(call_id).cloned()
    }
}

impl Default for CallRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Speaker, StartConversationRequest, TurnContent};
    use std::time::Duration;

    fn context(call_id: &str, account_id: &str) -> CallContext {
        CallContext::from_request(&StartConversationRequest::new(call_id, account_id, "ag1", "wss://x"))
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let registry = CallRegistry::new();
        let guard = registry.create(context("c1", "a1")).unwrap();
        drop(guard);

        let ctx = registry.get(&CallId::from("c1")).unwrap();
        assert_eq!(ctx.account_id, AccountId::from("a1"));
        assert!(matches!(
            registry.get(&CallId::from("missing")),
            Err(OrchestratorError::CallNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_duplicate_create_is_rejected() {
        let registry = CallRegistry::new();
        let _guard = registry.create(context("c1", "a1")).unwrap();
        let err = registry.create(context("c1", "a2")).err().unwrap();
        assert!(matches!(err, OrchestratorError::DuplicateCall { .. }));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&CallId::from("c1")).unwrap().account_id, AccountId::from("a1"));
    }

    #[tokio::test]
    async fn test_remove_is_noop_when_absent() {
        let registry = CallRegistry::new();
        assert!(registry.remove(&CallId::from("c1")).is_none());
        drop(registry.create(context("c1", "a1")).unwrap());
        assert!(registry.remove(&CallId::from("c1")).is_some());
        assert!(registry.remove(&CallId::from("c1")).is_none());

        let stats = registry.stats();
        assert_eq!(stats.total_created, 1);
        assert_eq!(stats.total_removed, 1);
        assert_eq!(stats.active, 0);
    }

    #[tokio::test]
    async fn test_list_by_account_keeps_creation_order() {
        let registry = CallRegistry::new();
        for (call, account) in [("c3", "a1"), ("c1", "a2"), ("c2", "a1"), ("c4", "a1")] {
            drop(registry.create(context(call, account)).unwrap());
        }
        registry.remove(&CallId::from("c2"));

        let ids: Vec<String> = registry
            .list_by_account(&AccountId::from("a1"))
            .into_iter()
            .map(|c| c.call_id.0)
            .collect();
        assert_eq!(ids, vec!["c3", "c4"]);
    }

    #[tokio::test]
    async fn test_reads_do_not_wait_for_guard() {
        let registry = CallRegistry::new();
        let guard = registry.create(context("c1", "a1")).unwrap();
        guard.update(|ctx| ctx.append_turn(Speaker::Caller, TurnContent::Audio { bytes: 10 }));

        // guard still held: get() must answer immediately
        let ctx = registry.get(&CallId::from("c1")).unwrap();
        assert_eq!(ctx.turn_count(), 1);
        drop(guard);
    }

    #[tokio::test]
    async fn test_lock_fails_after_eviction_while_waiting() {
        let registry = Arc::new(CallRegistry::new());
        let guard = registry.create(context("c1", "a1")).unwrap();

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.lock(&CallId::from("c1")).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        registry.remove(&CallId::from("c1"));
        drop(guard);

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(OrchestratorError::CallNotFound { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_are_not_lost() {
        let registry = Arc::new(CallRegistry::new());
        drop(registry.create(context("c1", "a1")).unwrap());

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    registry
                        .update(&CallId::from("c1"), |ctx| {
                            ctx.append_turn(Speaker::Caller, TurnContent::Audio { bytes: 1 })
                        })
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(registry.get(&CallId::from("c1")).unwrap().turn_count(), 64);
    }

    #[tokio::test]
    async fn test_terminal_status_published_on_removal() {
        let registry = CallRegistry::new();
        let guard = registry.create(context("c1", "a1")).unwrap();
        let mut rx = registry.watch_status(&CallId::from("c1")).unwrap();

        guard.update(|ctx| ctx.transition(ConversationStatus::Active));
        assert_eq!(*rx.borrow_and_update(), ConversationStatus::Active);

        guard.update(|ctx| {
            ctx.transition(ConversationStatus::Ending);
            ctx.transition(ConversationStatus::Ended);
        });
        assert_eq!(*rx.borrow(), ConversationStatus::Active);

        registry.remove(&CallId::from("c1"));
        assert_eq!(*rx.borrow(), ConversationStatus::Ended);
    }
}
