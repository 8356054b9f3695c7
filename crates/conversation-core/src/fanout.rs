//! Realtime notification fan-out
//!
//! Dashboard sockets register with the [`NotificationHub`] on connect. A
//! connection presenting a valid token joins its account group and its user
//! group; a connection without a token is tracked for [`broadcast`] only and
//! never receives tenant-scoped events. An invalid token is rejected outright.
//!
//! Delivery is at-most-once with no replay: [`notify`] sends to the members of
//! a group at the moment it runs. A connection joining afterwards sees nothing
//! of it.
//!
//! [`broadcast`]: NotificationHub::broadcast
//! [`notify`]: NotificationHub::notify

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};
use crate::events::{
    AgentUpdate, AlertSeverity, CallCompleted, CallStatusUpdate, CampaignUpdate, ConversationStarted,
    DashboardEvent, EventEnvelope,
};
use crate::types::{AccountId, CallId, UserId};

/// Messages delivered to a connection's writer task
pub type OutboundMessage = Arc<EventEnvelope>;

/// Sending half handed to the hub by a socket
pub type ConnectionSender = mpsc::UnboundedSender<OutboundMessage>;

/// Identifier of one dashboard socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity carried by a verified token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthClaims {
    pub user_id: UserId,
    pub account_id: AccountId,
}

/// Verifies dashboard and API bearer tokens
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<AuthClaims>;
}

/// Sink for dashboard events, as seen by the orchestrator
pub trait Notifier: Send + Sync {
    /// Deliver `event` to every connection in the account group. Returns how
    /// many connections it was handed to.
    fn notify(&self, account_id: &AccountId, event: DashboardEvent) -> usize;

    fn conversation_started(&self, account_id: &AccountId, event: ConversationStarted) -> usize {
        self.notify(account_id, DashboardEvent::ConversationStarted(event))
    }

    fn call_status_update(&self, account_id: &AccountId, event: CallStatusUpdate) -> usize {
        self.notify(account_id, DashboardEvent::CallStatusUpdate(event))
    }

    fn call_completed(&self, account_id: &AccountId, event: CallCompleted) -> usize {
        self.notify(account_id, DashboardEvent::CallCompleted(event))
    }

    fn campaign_update(&self, account_id: &AccountId, event: CampaignUpdate) -> usize {
        self.notify(account_id, DashboardEvent::CampaignUpdate(event))
    }

    fn agent_update(&self, account_id: &AccountId, event: AgentUpdate) -> usize {
        self.notify(account_id, DashboardEvent::AgentUpdate(event))
    }

    fn system_alert(
        &self,
        account_id: &AccountId,
        severity: AlertSeverity,
        message: &str,
        call_id: Option<&CallId>,
    ) -> usize {
        self.notify(account_id, DashboardEvent::alert(severity, message, call_id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GroupKey {
    Account(AccountId),
    User(UserId),
}

struct ConnectionEntry {
    claims: Option<AuthClaims>,
    sender: ConnectionSender,
}

/// Registry of dashboard connections grouped by account and user
pub struct NotificationHub {
    verifier: Arc<dyn TokenVerifier>,
    connections: DashMap<ConnectionId, ConnectionEntry>,
    groups: DashMap<GroupKey, HashSet<ConnectionId>>,
}

impl NotificationHub {
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            verifier,
            connections: DashMap::new(),
            groups: DashMap::new(),
        }
    }

    /// Register a connection.
    ///
    /// Returns the verified claims, `None` for an anonymous connection, or
    /// [`OrchestratorError::Unauthorized`] when the token does not verify. A
    /// rejected connection is not registered and the caller must close it.
    pub fn on_connect(
        &self,
        connection_id: ConnectionId,
        sender: ConnectionSender,
        token: Option<&str>,
    ) -> Result<Option<AuthClaims>> {
        let claims = match token {
            Some(token) => match self.verifier.verify(token) {
                Ok(claims) => Some(claims),
                Err(e) => {
                    warn!("Rejecting dashboard connection {}: {}", connection_id, e);
                    return Err(e);
                }
            },
            None => None,
        };

        if let Some(claims) = &claims {
            self.join(GroupKey::Account(claims.account_id.clone()), connection_id);
            self.join(GroupKey::User(claims.user_id.clone()), connection_id);
            info!(
                "Dashboard connection {} joined account {} as user {}",
                connection_id, claims.account_id, claims.user_id
            );
        } else {
            debug!("Anonymous dashboard connection {}", connection_id);
        }

        self.connections.insert(
            connection_id,
            ConnectionEntry {
                claims: claims.clone(),
                sender,
            },
        );
        Ok(claims)
    }

    /// Remove a connection from every group. Safe to call repeatedly.
    pub fn on_disconnect(&self, connection_id: ConnectionId) {
        let Some((_, entry)) = self.connections.remove(&connection_id) else {
            return;
        };
        if let Some(claims) = entry.claims {
            self.leave(&GroupKey::Account(claims.account_id), connection_id);
            self.leave(&GroupKey::User(claims.user_id), connection_id);
        }
        debug!("Dashboard connection {} disconnected", connection_id);
    }

    /// Deliver an event to the members of an account group
    pub fn notify(&self, account_id: &AccountId, event: DashboardEvent) -> usize {
        self.deliver(&GroupKey::Account(account_id.clone()), event)
    }

    /// Deliver an event to every connection of one user
    pub fn notify_user(&self, user_id: &UserId, event: DashboardEvent) -> usize {
        self.deliver(&GroupKey::User(user_id.clone()), event)
    }

    /// Deliver an event to all connections, anonymous ones included
    pub fn broadcast(&self, event: DashboardEvent) -> usize {
        let envelope = Arc::new(EventEnvelope::new(event));
        let targets: Vec<ConnectionId> = self.connections.iter().map(|e| *e.key()).collect();
        self.send_all(&targets, &envelope)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn account_group_size(&self, account_id: &AccountId) -> usize {
        self.group_size(&GroupKey::Account(account_id.clone()))
    }

    pub fn user_group_size(&self, user_id: &UserId) -> usize {
        self.group_size(&GroupKey::User(user_id.clone()))
    }

    fn group_size(&self, key: &GroupKey) -> usize {
        self.groups.get(key).map(|members| members.len()).unwrap_or(0)
    }

    fn join(&self, key: GroupKey, connection_id: ConnectionId) {
        self.groups.entry(key).or_default().insert(connection_id);
    }

    fn leave(&self, key: &GroupKey, connection_id: ConnectionId) {
        let now_empty = match self.groups.get_mut(key) {
            Some(mut members) => {
                members.remove(&connection_id);
                members.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.groups.remove_if(key, |_, members| members.is_empty());
        }
    }

    fn deliver(&self, key: &GroupKey, event: DashboardEvent) -> usize {
        // membership is fixed here; later joiners do not see this event
        let targets: Vec<ConnectionId> = match self.groups.get(key) {
            Some(members) => members.iter().copied().collect(),
            None => return 0,
        };
        let envelope = Arc::new(EventEnvelope::new(event));
        self.send_all(&targets, &envelope)
    }

    fn send_all(&self, targets: &[ConnectionId], envelope: &OutboundMessage) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();
        for connection_id in targets {
            let sent = self
                .connections
                .get(connection_id)
                .map(|entry| entry.sender.send(envelope.clone()).is_ok());
            match sent {
                Some(true) => delivered += 1,
                Some(false) => closed.push(*connection_id),
                None => {}
            }
        }
        for connection_id in closed {
            self.on_disconnect(connection_id);
        }
        debug!("Delivered {} to {} connection(s)", envelope.event_name(), delivered);
        delivered
    }
}

impl Notifier for NotificationHub {
    fn notify(&self, account_id: &AccountId, event: DashboardEvent) -> usize {
        NotificationHub::notify(self, account_id, event)
    }
}

/// Verifier that accepts nothing, for deployments without dashboard auth
pub struct RejectAllVerifier;

impl TokenVerifier for RejectAllVerifier {
    fn verify(&self, _token: &str) -> Result<AuthClaims> {
        Err(OrchestratorError::Unauthorized {
            message: "token verification is not configured".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_all_verifier_fails_closed() {
        let hub = NotificationHub::new(Arc::new(RejectAllVerifier));
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = ConnectionId::new();

        assert!(hub.on_connect(conn, tx, Some("anything")).is_err());
        assert_eq!(hub.connection_count(), 0);
    }

    #[test]
    fn test_anonymous_gets_broadcast_only() {
        let hub = NotificationHub::new(Arc::new(RejectAllVerifier));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = ConnectionId::new();
        assert_eq!(hub.on_connect(conn, tx, None).unwrap(), None);

        let alert = DashboardEvent::alert(AlertSeverity::Info, "maintenance", None);
        assert_eq!(hub.broadcast(alert), 1);
        assert_eq!(rx.try_recv().unwrap().event_name(), "system-alert");

        hub.on_disconnect(conn);
        hub.on_disconnect(conn);
        assert_eq!(hub.connection_count(), 0);
    }

    #[test]
    fn test_closed_receivers_are_pruned() {
        let hub = NotificationHub::new(Arc::new(RejectAllVerifier));
        let (tx, rx) = mpsc::unbounded_channel();
        hub.on_connect(ConnectionId::new(), tx, None).unwrap();
        drop(rx);

        assert_eq!(hub.broadcast(DashboardEvent::alert(AlertSeverity::Info, "x", None)), 0);
        assert_eq!(hub.connection_count(), 0);
    }
}
