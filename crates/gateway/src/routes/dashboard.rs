//! Dashboard event socket

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use prixagent_conversation_core::ConnectionId;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DashboardQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// `GET /ws?token=...`
pub async fn dashboard_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<DashboardQuery>,
) -> Response {
    ws.on_upgrade(move |socket| run_dashboard(socket, state, query.token))
}

async fn run_dashboard(socket: WebSocket, state: AppState, token: Option<String>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut outbound) = mpsc::unbounded_channel();
    let connection_id = ConnectionId::new();

    if state.hub.on_connect(connection_id, tx, token.as_deref()).is_err() {
        let close = CloseFrame {
            code: close_code::POLICY,
            reason: "unauthorized".into(),
        };
        let _ = sender.send(Message::Close(Some(close))).await;
        return;
    }

    // The dashboard never sends anything we act on; reading only tracks closure
    let mut inbound = tokio::spawn(async move {
        while let Some(frame) = receiver.next().await {
            match frame {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("Dashboard socket read error: {}", e);
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(envelope) = message else { break };
                let text = match envelope.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode {} event: {}", envelope.event_name(), e);
                        continue;
                    }
                };
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            _ = &mut inbound => break,
        }
    }

    inbound.abort();
    state.hub.on_disconnect(connection_id);
}
