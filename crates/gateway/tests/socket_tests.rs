//! Dashboard and media-stream websocket tests against a live listener

mod common;

use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use common::{eventually, TestApp, ROUTED_NUMBER};
use prixagent_conversation_core::{
    CallId, ConversationStatus, InboundCall, ProviderEvent, StartConversationRequest,
};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn next_text(socket: &mut Socket) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn test_dashboard_receives_account_events() {
    let app = TestApp::new();
    app.seed_call("c1", "a1");
    let addr = app.serve().await;
    let token = app.token("u1", "a1");

    let (mut socket, _) = connect_async(format!("ws://{}/ws?token={}", addr, token)).await.unwrap();
    let hub = app.hub.clone();
    eventually(move || hub.connection_count() == 1).await;

    app.orchestrator
        .start_conversation(StartConversationRequest::new("c1", "a1", "ag1", "wss://media.test"))
        .await
        .unwrap();

    let event = next_text(&mut socket).await;
    assert_eq!(event["event"], "conversation-started");
    assert_eq!(event["data"]["call_id"], "c1");
    assert!(event["timestamp"].is_string());

    socket.close(None).await.unwrap();
    let hub = app.hub.clone();
    eventually(move || hub.connection_count() == 0).await;
}

#[tokio::test]
async fn test_dashboard_does_not_see_other_accounts() {
    let app = TestApp::new();
    app.seed_call("c1", "a1");
    let addr = app.serve().await;
    let token = app.token("u2", "a2");

    let (mut socket, _) = connect_async(format!("ws://{}/ws?token={}", addr, token)).await.unwrap();
    let hub = app.hub.clone();
    eventually(move || hub.connection_count() == 1).await;

    app.orchestrator
        .start_conversation(StartConversationRequest::new("c1", "a1", "ag1", "wss://media.test"))
        .await
        .unwrap();

    let nothing = tokio::time::timeout(Duration::from_millis(200), socket.next()).await;
    assert!(nothing.is_err(), "a2 dashboard received an a1 event");
}

#[tokio::test]
async fn test_dashboard_rejects_bad_token() {
    let app = TestApp::new();
    let addr = app.serve().await;

    let (mut socket, _) = connect_async(format!("ws://{}/ws?token=forged", addr)).await.unwrap();
    let frame = tokio::time::timeout(Duration::from_secs(2), socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match frame {
        Message::Close(Some(close)) => {
            assert_eq!(close.code, CloseCode::Policy);
            assert_eq!(close.reason, "unauthorized");
        }
        other => panic!("expected close frame, got {:?}", other),
    }
    assert_eq!(app.hub.connection_count(), 0);
}

#[tokio::test]
async fn test_media_stream_bridges_call_audio() {
    let app = TestApp::new();
    let addr = app.serve().await;

    let route = app
        .orchestrator
        .accept_inbound_call(InboundCall {
            call_sid: "CA500".to_string(),
            from: "+15551230000".to_string(),
            to: ROUTED_NUMBER.to_string(),
            status: None,
        })
        .await
        .unwrap();
    let call_id = route.call_id.clone();

    let (mut socket, _) = connect_async(format!("ws://{}/media-stream", addr)).await.unwrap();
    let frames = [
        json!({ "event": "connected", "protocol": "Call", "version": "1.0.0" }),
        json!({
            "event": "start",
            "sequenceNumber": "1",
            "streamSid": "MZ500",
            "start": {
                "streamSid": "MZ500",
                "callSid": "CA500",
                "accountSid": "AC1",
                "tracks": ["inbound"],
                "customParameters": {
                    "call_id": call_id.as_str(),
                    "account_id": "a1",
                    "agent_id": "ag1"
                },
                "mediaFormat": { "encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1 }
            }
        }),
        json!({
            "event": "media",
            "streamSid": "MZ500",
            "media": { "track": "inbound", "chunk": "1", "timestamp": "5", "payload": "AAEC" }
        }),
    ];
    for frame in frames {
        socket.send(Message::Text(frame.to_string())).await.unwrap();
    }

    let voice = app.voice.clone();
    let id = call_id.clone();
    eventually(move || voice.push_count(&id) == 1).await;
    let context = app.orchestrator.get_conversation(&call_id).unwrap();
    assert_eq!(context.status, ConversationStatus::Active);
    assert_eq!(context.agent_id.as_str(), "ag1");

    // Agent speech comes back as a media command on the same socket
    app.orchestrator
        .process_provider_event(&call_id, ProviderEvent::AgentAudio { audio: Bytes::from_static(&[0, 1, 2]) })
        .await
        .unwrap();
    let command = next_text(&mut socket).await;
    assert_eq!(command["event"], "media");
    assert_eq!(command["streamSid"], "MZ500");
    assert_eq!(command["media"]["payload"], "AAEC");

    app.orchestrator
        .process_provider_event(&call_id, ProviderEvent::Interruption)
        .await
        .unwrap();
    let command = next_text(&mut socket).await;
    assert_eq!(command["event"], "clear");

    socket
        .send(Message::Text(json!({ "event": "stop", "streamSid": "MZ500", "stop": { "callSid": "CA500" } }).to_string()))
        .await
        .unwrap();

    let orchestrator = app.orchestrator.clone();
    eventually(move || orchestrator.active_count() == 0).await;
    let summary = app.store.summary(&call_id).unwrap();
    assert_eq!(summary.end_reason, "caller_hangup");
    assert_eq!(app.voice.closed(), vec![call_id.clone()]);
}

fn start_frame(stream_sid: &str, call_sid: &str, call_id: &CallId) -> Value {
    json!({
        "event": "start",
        "sequenceNumber": "1",
        "streamSid": stream_sid,
        "start": {
            "streamSid": stream_sid,
            "callSid": call_sid,
            "accountSid": "AC1",
            "tracks": ["inbound"],
            "customParameters": {
                "call_id": call_id.as_str(),
                "account_id": "a1",
                "agent_id": "ag1"
            },
            "mediaFormat": { "encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1 }
        }
    })
}

#[tokio::test]
async fn test_second_media_stream_leaves_live_call_intact() {
    let app = TestApp::new();
    let addr = app.serve().await;
    let route = app
        .orchestrator
        .accept_inbound_call(InboundCall {
            call_sid: "CA600".to_string(),
            from: "+15551230000".to_string(),
            to: ROUTED_NUMBER.to_string(),
            status: None,
        })
        .await
        .unwrap();
    let call_id = route.call_id.clone();

    let (mut first, _) = connect_async(format!("ws://{}/media-stream", addr)).await.unwrap();
    first
        .send(Message::Text(start_frame("MZ1", "CA600", &call_id).to_string()))
        .await
        .unwrap();
    let orchestrator = app.orchestrator.clone();
    let id = call_id.clone();
    eventually(move || {
        orchestrator
            .get_conversation(&id)
            .map(|c| c.status == ConversationStatus::Active)
            .unwrap_or(false)
    })
    .await;

    let (mut second, _) = connect_async(format!("ws://{}/media-stream", addr)).await.unwrap();
    second
        .send(Message::Text(start_frame("MZ2", "CA600", &call_id).to_string()))
        .await
        .unwrap();
    let frame = tokio::time::timeout(Duration::from_secs(2), second.next()).await.unwrap();
    assert!(matches!(frame, Some(Ok(Message::Close(_))) | None | Some(Err(_))));

    assert!(app.orchestrator.registry().contains(&call_id));
    assert!(app.orchestrator.media_bridge().is_attached(&call_id));
    assert_eq!(app.voice.started().len(), 1);

    // agent audio still reaches the first stream
    app.orchestrator
        .process_provider_event(&call_id, ProviderEvent::AgentAudio { audio: Bytes::from_static(&[0, 1, 2]) })
        .await
        .unwrap();
    let command = next_text(&mut first).await;
    assert_eq!(command["event"], "media");
    assert_eq!(command["streamSid"], "MZ1");
}

#[tokio::test]
async fn test_media_stream_without_call_id_is_closed() {
    let app = TestApp::new();
    let addr = app.serve().await;

    let (mut socket, _) = connect_async(format!("ws://{}/media-stream", addr)).await.unwrap();
    let start = json!({
        "event": "start",
        "start": { "streamSid": "MZ1", "customParameters": {} }
    });
    socket.send(Message::Text(start.to_string())).await.unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(2), socket.next()).await.unwrap();
    assert!(matches!(frame, Some(Ok(Message::Close(_))) | None | Some(Err(_))));
    assert_eq!(app.orchestrator.active_count(), 0);
}
