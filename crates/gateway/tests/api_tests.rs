//! Conversation API and Twilio webhook tests over the full router

mod common;

use axum::http::{header, StatusCode};
use serde_json::json;

use common::{assert_status, body_json, body_text, TestApp, MEDIA_STREAM_URL, ROUTED_NUMBER};
use prixagent_conversation_core::{CallId, CallRecordStatus, ConversationStatus, Direction};

fn start_body(call_id: &str) -> serde_json::Value {
    json!({
        "call_id": call_id,
        "agent_id": "ag1",
        "stream_url": "wss://media.test/stream",
        "audio_format": "mulaw",
        "sample_rate": 8000
    })
}

#[tokio::test]
async fn test_health_reports_active_conversations() {
    let app = TestApp::new();
    let response = app.get("/health", None).await;
    assert_status(&response, StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["active_conversations"], 0);
    assert_eq!(body["conversations_started"], 0);
}

#[tokio::test]
async fn test_health_counts_finished_conversations() {
    let app = TestApp::new();
    app.seed_call("c1", "a1");
    let token = app.token("u1", "a1");
    app.post_json("/api/conversations", Some(&token), start_body("c1")).await;
    app.post_json("/api/conversations/c1/end", Some(&token), json!({})).await;

    let body = body_json(app.get("/health", None).await).await;
    assert_eq!(body["active_conversations"], 0);
    assert_eq!(body["conversations_started"], 1);
    assert_eq!(body["conversations_finished"], 1);
}

#[tokio::test]
async fn test_api_requires_bearer_token() {
    let app = TestApp::new();

    let response = app.get("/api/conversations", None).await;
    assert_status(&response, StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "unauthorized");

    let response = app.get("/api/conversations", Some("not-a-jwt")).await;
    assert_status(&response, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_api_responses_carry_security_headers() {
    let app = TestApp::new();
    let token = app.token("u1", "a1");
    let response = app.get("/api/conversations", Some(&token)).await;
    assert_status(&response, StatusCode::OK);
    assert_eq!(response.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    assert_eq!(response.headers()[header::X_FRAME_OPTIONS], "DENY");
}

#[tokio::test]
async fn test_conversation_lifecycle() {
    let app = TestApp::new();
    app.seed_call("c1", "a1");
    let token = app.token("u1", "a1");

    let response = app.post_json("/api/conversations", Some(&token), start_body("c1")).await;
    assert_status(&response, StatusCode::CREATED);
    let view = body_json(response).await;
    assert_eq!(view["call_id"], "c1");
    assert_eq!(view["status"], "active");
    assert_eq!(view["provider_conversation_id"], "conv-c1");

    let list = body_json(app.get("/api/conversations", Some(&token)).await).await;
    assert_eq!(list.as_array().unwrap().len(), 1);

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/conversations/c1/audio")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .body(axum::body::Body::from(vec![0u8; 160]))
        .unwrap();
    assert_status(&app.send(request).await, StatusCode::ACCEPTED);
    assert_eq!(app.voice.push_count(&CallId::from("c1")), 1);

    let metrics = body_json(app.get("/api/conversations/c1/metrics", Some(&token)).await).await;
    assert_eq!(metrics["turn_count"], 1);

    let response = app
        .post_json("/api/conversations/c1/end?reason=done", Some(&token), json!({}))
        .await;
    assert_status(&response, StatusCode::NO_CONTENT);
    assert_eq!(app.orchestrator.active_count(), 0);

    let summary = app.store.summary(&CallId::from("c1")).unwrap();
    assert_eq!(summary.status, ConversationStatus::Ended);
    assert_eq!(summary.end_reason, "done");

    let response = app.get("/api/conversations/c1/metrics", Some(&token)).await;
    assert_status(&response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_start_without_call_id_registers_call() {
    let app = TestApp::new();
    let token = app.token("u1", "a1");
    let body = json!({ "agent_id": "ag1", "stream_url": "wss://media.test/stream" });

    let response = app.post_json("/api/conversations", Some(&token), body).await;
    assert_status(&response, StatusCode::CREATED);
    let view = body_json(response).await;
    let call_id = CallId::from(view["call_id"].as_str().unwrap());

    let record = app.store.call(&call_id).unwrap();
    assert_eq!(record.account_id.as_str(), "a1");
    assert_eq!(record.status, CallRecordStatus::InProgress);
}

#[tokio::test]
async fn test_start_for_unknown_or_foreign_call_is_not_found() {
    let app = TestApp::new();
    app.seed_call("theirs", "a2");
    let token = app.token("u1", "a1");

    let response = app.post_json("/api/conversations", Some(&token), start_body("missing")).await;
    assert_status(&response, StatusCode::NOT_FOUND);

    let response = app.post_json("/api/conversations", Some(&token), start_body("theirs")).await;
    assert_status(&response, StatusCode::NOT_FOUND);
    assert_eq!(app.orchestrator.active_count(), 0);
}

#[tokio::test]
async fn test_recording_of_finished_conversation() {
    let app = TestApp::new();
    app.seed_call("c1", "a1");
    let token = app.token("u1", "a1");
    app.post_json("/api/conversations", Some(&token), start_body("c1")).await;
    app.post_json("/api/conversations/c1/end", Some(&token), json!({})).await;

    let response = app.get("/api/conversations/c1/recording", Some(&token)).await;
    assert_status(&response, StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/mpeg");
    assert_eq!(body_text(response).await, "audio:conv-c1");

    let other = app.token("u2", "a2");
    let response = app.get("/api/conversations/c1/recording", Some(&other)).await;
    assert_status(&response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_duplicate_start_conflicts() {
    let app = TestApp::new();
    app.seed_call("c1", "a1");
    let token = app.token("u1", "a1");

    let first = app.post_json("/api/conversations", Some(&token), start_body("c1")).await;
    assert_status(&first, StatusCode::CREATED);

    let second = app.post_json("/api/conversations", Some(&token), start_body("c1")).await;
    assert_status(&second, StatusCode::CONFLICT);
    assert_eq!(body_json(second).await["error"], "duplicate_call");
    assert_eq!(app.orchestrator.active_count(), 1);
}

#[tokio::test]
async fn test_unknown_agent_is_not_found() {
    let app = TestApp::new();
    let token = app.token("u1", "a1");
    let body = json!({ "agent_id": "ag2", "stream_url": "wss://media.test/stream" });

    // ag2 belongs to a2
    let response = app.post_json("/api/conversations", Some(&token), body).await;
    assert_status(&response, StatusCode::NOT_FOUND);
    assert_eq!(app.orchestrator.active_count(), 0);
}

#[tokio::test]
async fn test_other_accounts_cannot_see_or_end_calls() {
    let app = TestApp::new();
    app.seed_call("c1", "a1");
    let owner = app.token("u1", "a1");
    let stranger = app.token("u2", "a2");
    app.post_json("/api/conversations", Some(&owner), start_body("c1")).await;

    let list = body_json(app.get("/api/conversations", Some(&stranger)).await).await;
    assert!(list.as_array().unwrap().is_empty());

    let response = app.get("/api/conversations/c1/metrics", Some(&stranger)).await;
    assert_status(&response, StatusCode::NOT_FOUND);

    let response = app.post_json("/api/conversations/c1/end", Some(&stranger), json!({})).await;
    assert_status(&response, StatusCode::NOT_FOUND);
    assert_eq!(app.orchestrator.active_count(), 1);
}

#[tokio::test]
async fn test_outbound_call_is_placed() {
    let app = TestApp::new();
    let token = app.token("u1", "a1");

    let response = app
        .post_json(
            "/api/calls/outbound",
            Some(&token),
            json!({ "agent_id": "ag1", "to_number": "+15557654321" }),
        )
        .await;
    assert_status(&response, StatusCode::CREATED);
    let placed = body_json(response).await;
    let call_id = CallId::from(placed["call_id"].as_str().unwrap());

    let requests = app.telephony.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].to_number, "+15557654321");
    assert_eq!(requests[0].from_number_id, "pn-ag1");

    let record = app.store.call(&call_id).unwrap();
    assert_eq!(record.direction, Direction::Outbound);
    assert_eq!(record.provider_call_id.as_deref(), placed["provider_call_id"].as_str());
}

#[tokio::test]
async fn test_outbound_call_rejects_empty_number() {
    let app = TestApp::new();
    let token = app.token("u1", "a1");
    let response = app
        .post_json("/api/calls/outbound", Some(&token), json!({ "agent_id": "ag1", "to_number": " " }))
        .await;
    assert_status(&response, StatusCode::BAD_REQUEST);
    assert!(app.telephony.requests().is_empty());
}

#[tokio::test]
async fn test_inbound_webhook_streams_routed_call() {
    let app = TestApp::new();
    let form = format!(
        "CallSid=CA100&From=%2B15551230000&To={}&CallStatus=ringing&Direction=inbound",
        ROUTED_NUMBER.replace('+', "%2B")
    );

    let response = app.post_form("/webhooks/twilio/inbound", &form).await;
    assert_status(&response, StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/xml");

    let twiml = body_text(response).await;
    assert!(twiml.contains("<Connect>"));
    assert!(twiml.contains(MEDIA_STREAM_URL));
    assert!(twiml.contains(r#"name="account_id" value="a1""#));
    assert!(twiml.contains(r#"name="agent_id" value="ag1""#));

    let record = prixagent_conversation_core::CallStore::find_call_by_provider_id(app.store.as_ref(), "CA100")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.direction, Direction::Inbound);
    assert_eq!(record.phone_number.as_deref(), Some("+15551230000"));
    assert!(twiml.contains(&format!(r#"name="call_id" value="{}""#, record.call_id)));
}

#[tokio::test]
async fn test_inbound_webhook_refuses_unrouted_number() {
    let app = TestApp::new();
    let response = app
        .post_form("/webhooks/twilio/inbound", "CallSid=CA101&From=%2B15551230000&To=%2B15559999999")
        .await;
    assert_status(&response, StatusCode::OK);

    let twiml = body_text(response).await;
    assert!(twiml.contains("<Say>"));
    assert!(twiml.contains("<Hangup/>"));
    assert!(!twiml.contains("<Connect>"));
}

#[tokio::test]
async fn test_status_webhook_updates_record() {
    let app = TestApp::new();
    let form = format!("CallSid=CA200&From=%2B15551230000&To={}", ROUTED_NUMBER.replace('+', "%2B"));
    app.post_form("/webhooks/twilio/inbound", &form).await;

    let response = app
        .post_form("/webhooks/twilio/status", "CallSid=CA200&CallStatus=completed&CallDuration=42")
        .await;
    assert_status(&response, StatusCode::NO_CONTENT);

    let record = prixagent_conversation_core::CallStore::find_call_by_provider_id(app.store.as_ref(), "CA200")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, CallRecordStatus::Completed);
    assert_eq!(record.duration_secs, Some(42));
}

#[tokio::test]
async fn test_status_webhook_for_unknown_call_is_accepted() {
    let app = TestApp::new();
    let response = app
        .post_form("/webhooks/twilio/status", "CallSid=CA999&CallStatus=ringing")
        .await;
    assert_status(&response, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_status_webhook_rejects_unknown_status() {
    let app = TestApp::new();
    let response = app
        .post_form("/webhooks/twilio/status", "CallSid=CA300&CallStatus=exploded")
        .await;
    assert_status(&response, StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "bad_request");
}
