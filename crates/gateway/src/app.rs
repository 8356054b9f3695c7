//! Gateway wiring: store, providers, orchestrator, router

use std::sync::Arc;

use axum::Router;
use tokio::task::JoinHandle;
use tracing::info;

use prixagent_conversation_core::{
    AgentDirectory, CallStore, ConversationOrchestrator, InMemoryCallStore, NotificationHub, TelephonyAdapter,
};
use prixagent_providers::{ElevenLabsClient, ElevenLabsConvAi, ElevenLabsTwilioDialer, TwilioRestDialer};

use crate::auth::{JwtVerifier, SharedVerifier};
use crate::config::{GatewayConfig, OutboundDialer};
use crate::error::GatewayError;
use crate::routes::create_router;
use crate::state::AppState;
use crate::store::SqliteCallStore;
use crate::tasks::{spawn_event_pump, spawn_idle_sweeper};

/// A fully wired gateway, ready to serve
pub struct Gateway {
    pub config: GatewayConfig,
    pub state: AppState,
    pub verifier: Arc<JwtVerifier>,
    tasks: Vec<JoinHandle<()>>,
}

impl Gateway {
    /// Connect the store, build provider clients and the orchestrator, and
    /// start the background loops
    pub async fn build(config: GatewayConfig) -> Result<Self, GatewayError> {
        let (calls, agents) = open_store(&config).await?;

        let verifier = Arc::new(JwtVerifier::new(config.auth.clone()).map_err(GatewayError::Config)?);
        let shared: SharedVerifier = verifier.clone();
        let hub = Arc::new(NotificationHub::new(shared.clone()));

        let client = ElevenLabsClient::new(config.elevenlabs.clone())?;
        let (voice, provider_events) = ElevenLabsConvAi::new(client.clone());
        let telephony: Arc<dyn TelephonyAdapter> = match config.telephony.outbound_dialer {
            OutboundDialer::Elevenlabs => Arc::new(ElevenLabsTwilioDialer::new(client)),
            OutboundDialer::Twilio => Arc::new(TwilioRestDialer::new(config.twilio.clone())?),
        };
        info!("Outbound calls placed via {:?}", config.telephony.outbound_dialer);

        let orchestrator = Arc::new(
            ConversationOrchestrator::builder()
                .voice(Arc::new(voice))
                .telephony(telephony)
                .call_store(calls)
                .agent_directory(agents)
                .notifier(hub.clone())
                .config(config.orchestrator.clone())
                .build()?,
        );

        let mut tasks = vec![spawn_event_pump(orchestrator.clone(), provider_events)];
        tasks.extend(spawn_idle_sweeper(orchestrator.clone()));

        let state = AppState::new(orchestrator, hub, shared, config.twilio.media_stream_url.clone());
        Ok(Self {
            config,
            state,
            verifier,
            tasks,
        })
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone(), &self.config.server.cors_origins)
    }

    /// Stop the background loops
    pub fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
        info!(
            "Gateway stopped with {} conversation(s) still registered",
            self.state.orchestrator.active_count()
        );
    }
}

async fn open_store(config: &GatewayConfig) -> Result<(Arc<dyn CallStore>, Arc<dyn AgentDirectory>), GatewayError> {
    let Some(url) = config.database.url.as_deref() else {
        info!("No database configured, keeping call records in memory");
        let store = Arc::new(InMemoryCallStore::new());
        return Ok((store.clone(), store));
    };

    let store = Arc::new(SqliteCallStore::connect(url, config.database.max_connections).await?);
    if config.database.reconcile_on_startup {
        store.reconcile_orphans(&config.database.restart_reason).await?;
    }
    Ok((store.clone(), store))
}
