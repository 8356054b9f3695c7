//! Test app for gateway integration tests
//!
//! Builds the real router over the in-memory store and recording provider
//! fakes, with the notification hub as notifier and JWT auth.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tokio::net::TcpListener;
use tower::ServiceExt;

use prixagent_conversation_core::testing::{agent_record, RecordingTelephony, RecordingVoiceAdapter};
use prixagent_conversation_core::{
    AccountId, CallId, CallRecord, ConversationOrchestrator, Direction, InMemoryCallStore, NotificationHub,
    NumberRoute, UserId,
};
use prixagent_gateway::auth::SharedVerifier;
use prixagent_gateway::{create_router, AppState, JwtConfig, JwtVerifier};

pub const ROUTED_NUMBER: &str = "+15550001111";
pub const MEDIA_STREAM_URL: &str = "wss://gateway.test/media-stream";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub orchestrator: Arc<ConversationOrchestrator>,
    pub voice: Arc<RecordingVoiceAdapter>,
    pub telephony: Arc<RecordingTelephony>,
    pub store: Arc<InMemoryCallStore>,
    pub hub: Arc<NotificationHub>,
    pub verifier: Arc<JwtVerifier>,
}

impl TestApp {
    /// Account `a1` owns active agent `ag1`, routed to [`ROUTED_NUMBER`];
    /// account `a2` owns agent `ag2`
    pub fn new() -> Self {
        let voice = Arc::new(RecordingVoiceAdapter::new());
        let telephony = Arc::new(RecordingTelephony::new());
        let store = Arc::new(InMemoryCallStore::new());
        store.insert_agent(agent_record("a1", "ag1"));
        store.insert_agent(agent_record("a2", "ag2"));
        store.insert_route(NumberRoute {
            phone_number: ROUTED_NUMBER.to_string(),
            account_id: AccountId::from("a1"),
            agent_id: "ag1".into(),
        });

        let verifier = Arc::new(
            JwtVerifier::new(JwtConfig {
                jwt_secret: "integration-test-secret-with-32-plus-bytes".to_string(),
                ..Default::default()
            })
            .unwrap(),
        );
        let shared: SharedVerifier = verifier.clone();
        let hub = Arc::new(NotificationHub::new(shared.clone()));

        let orchestrator = Arc::new(
            ConversationOrchestrator::builder()
                .voice(voice.clone())
                .telephony(telephony.clone())
                .call_store(store.clone())
                .agent_directory(store.clone())
                .notifier(hub.clone())
                .build()
                .unwrap(),
        );

        let state = AppState::new(orchestrator.clone(), hub.clone(), shared, MEDIA_STREAM_URL);
        let router = create_router(state.clone(), &[]);

        Self {
            router,
            state,
            orchestrator,
            voice,
            telephony,
            store,
            hub,
            verifier,
        }
    }

    /// Create the call record a conversation start needs
    pub fn seed_call(&self, call_id: &str, account: &str) -> CallId {
        let call_id = CallId::from(call_id);
        self.store
            .insert_call(CallRecord::new(call_id.clone(), AccountId::from(account), Direction::Inbound));
        call_id
    }

    pub fn token(&self, user: &str, account: &str) -> String {
        self.verifier
            .issue(&UserId::from(user), &AccountId::from(account))
            .unwrap()
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> Response<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post_json(&self, uri: &str, token: Option<&str>, body: serde_json::Value) -> Response<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap()).await
    }

    pub async fn post_form(&self, uri: &str, form: &str) -> Response<Body> {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Serve the router on an ephemeral port; returns the bound address
    pub async fn serve(&self) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = self.router.clone();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        addr
    }
}

pub async fn body_bytes(response: Response<Body>) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await.to_vec()).unwrap()
}

pub fn assert_status(response: &Response<Body>, status: StatusCode) {
    assert_eq!(response.status(), status, "unexpected status for response {:?}", response);
}

/// Poll `check` until it holds or a second has passed
pub async fn eventually<F: Fn() -> bool>(check: F) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
