//! HTTP and websocket routes

pub mod conversations;
pub mod dashboard;
pub mod media;
pub mod webhooks;

use axum::extract::State;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
    pub active_conversations: usize,
    pub conversations_started: u64,
    pub conversations_finished: u64,
    pub dashboard_connections: usize,
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<Health> {
    let stats = state.orchestrator.registry().stats();
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        active_conversations: stats.active,
        conversations_started: stats.total_created,
        conversations_finished: stats.total_removed,
        dashboard_connections: state.hub.connection_count(),
    })
}

/// Build the full router
///
/// `cors_origins` restricts the JSON API to the listed dashboard origins;
/// an empty list allows any origin.
pub fn create_router(state: AppState, cors_origins: &[String]) -> Router {
    let api = Router::new()
        .route("/calls/outbound", post(conversations::place_outbound_call))
        .route(
            "/conversations",
            get(conversations::list_conversations).post(conversations::start_conversation),
        )
        .route("/conversations/:call_id/audio", post(conversations::push_audio))
        .route("/conversations/:call_id/end", post(conversations::end_conversation))
        .route("/conversations/:call_id/metrics", get(conversations::conversation_metrics))
        .route("/conversations/:call_id/recording", get(conversations::conversation_recording))
        .layer(middleware::from_fn(crate::middleware::security_headers))
        .layer(cors_layer(cors_origins));

    let webhooks = Router::new()
        .route("/inbound", post(webhooks::inbound_call))
        .route("/status", post(webhooks::call_status));

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(dashboard::dashboard_socket))
        .route("/media-stream", get(media::media_stream))
        .nest("/api", api)
        .nest("/webhooks/twilio", webhooks)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}
