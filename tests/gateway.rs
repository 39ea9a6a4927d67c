//! Router-level tests for the event stream and the publish endpoints.
//!
//! Requests run in-process through `tower::ServiceExt::oneshot`; the event
//! stream body is read frame by frame while other requests are issued.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use common::{is_heartbeat, parse_data, FrameReader};
use ssehub::api::router;
use ssehub::hub::{spawn_heartbeat, Hub, HubOptions};
use ssehub::registry::Registry;
use tower::ServiceExt;

async fn open_stream(app: &Router) -> FrameReader {
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/events").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");

    FrameReader::new(response.into_body().into_data_stream())
}

async fn post(app: &Router, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_welcome_then_message() {
    let state = common::create_test_state();
    let app = router(state.clone());

    let mut stream = open_stream(&app).await;
    assert_eq!(state.hub.subscriber_count(), 1);

    let (status, json) = post(&app, "/publish", r#"{"user":"alice","text":"hi"}"#).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["ok"], true);

    let welcome = stream.next_data().await;
    assert_eq!(welcome["type"], "system");
    assert_eq!(welcome["text"], "connected");

    let message = stream.next_data().await;
    assert_eq!(message["type"], "message");
    assert_eq!(message["user"], "alice");
    assert_eq!(message["text"], "hi");
    assert!(message["ts"].is_i64());
}

#[tokio::test]
async fn test_two_subscribers_get_anon_message() {
    let state = common::create_test_state();
    let app = router(state.clone());

    let mut first = open_stream(&app).await;
    let mut second = open_stream(&app).await;

    let (status, _) = post(&app, "/publish", r#"{"text":"x"}"#).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    for stream in [&mut first, &mut second] {
        assert_eq!(stream.next_data().await["type"], "system");
        let message = stream.next_data().await;
        assert_eq!(message["user"], "anon");
        assert_eq!(message["text"], "x");
        assert!(message["ts"].is_i64());
    }
}

#[tokio::test]
async fn test_disconnect_then_publish() {
    let state = common::create_test_state();
    let app = router(state.clone());

    let stream = open_stream(&app).await;
    assert_eq!(state.hub.subscriber_count(), 1);

    drop(stream);
    assert_eq!(state.hub.subscriber_count(), 0);

    let (status, _) = post(&app, "/publish", r#"{"user":"alice","text":"anyone?"}"#).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(state.hub.subscriber_count(), 0);
}

#[tokio::test]
async fn test_whitespace_text_is_rejected() {
    let state = common::create_test_state();
    let app = router(state.clone());

    let mut stream = open_stream(&app).await;
    assert_eq!(stream.next_data().await["type"], "system");

    let (status, json) = post(&app, "/publish", r#"{"user":"bob","text":"   \n "}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].is_string());

    let (status, _) = post(&app, "/publish", "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(&app, "/publish", "{broken").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    stream.assert_idle(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn test_oversized_fields_are_truncated() {
    let state = common::create_test_state();
    let app = router(state.clone());
    let mut stream = open_stream(&app).await;

    let body = serde_json::json!({
        "user": "u".repeat(100),
        "text": "t".repeat(5000),
    })
    .to_string();
    let (status, _) = post(&app, "/publish", &body).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let _ = stream.next_data().await;
    let message = stream.next_data().await;
    assert_eq!(message["user"].as_str().unwrap().len(), 32);
    assert_eq!(message["text"].as_str().unwrap().len(), 1000);
}

#[tokio::test]
async fn test_clear_is_broadcast() {
    let state = common::create_test_state();
    let app = router(state.clone());
    let mut stream = open_stream(&app).await;

    let (status, json) = post(&app, "/clear", "").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["ok"], true);

    let _ = stream.next_data().await;
    assert_eq!(stream.next_data().await, serde_json::json!({"type": "clear"}));
}

#[tokio::test]
async fn test_sequential_publishes_arrive_in_order() {
    let state = common::create_test_state();
    let app = router(state.clone());
    let mut stream = open_stream(&app).await;
    let _ = stream.next_data().await;

    for i in 0..10 {
        let body = serde_json::json!({ "text": format!("msg {i}") }).to_string();
        let (status, _) = post(&app, "/publish", &body).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }
    for i in 0..10 {
        assert_eq!(stream.next_data().await["text"], format!("msg {i}"));
    }
}

#[tokio::test]
async fn test_heartbeat_uses_comment_framing() {
    let state = common::create_test_state();
    let app = router(state.clone());
    let mut stream = open_stream(&app).await;
    let _ = stream.next_data().await;

    let heartbeat = spawn_heartbeat(
        state.hub.clone(),
        Duration::from_millis(20),
        state.shutdown.signal(),
    );

    for _ in 0..2 {
        let frame = stream.next_frame().await;
        assert!(is_heartbeat(&frame), "expected heartbeat, got {frame:?}");
        assert!(parse_data(&frame).is_none());
    }

    // Heartbeats do not disturb data events.
    let (status, _) = post(&app, "/publish", r#"{"text":"between pings"}"#).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(stream.next_data().await["text"], "between pings");

    heartbeat.abort();
}

#[tokio::test]
async fn test_shutdown_ends_open_streams() {
    let state = common::create_test_state();
    let app = router(state.clone());
    let mut stream = open_stream(&app).await;
    let _ = stream.next_data().await;
    assert_eq!(state.shutdown.open_count(), 1);

    state.shutdown.shutdown();

    assert_eq!(stream.try_next_frame(Duration::from_secs(1)).await, None);

    // The server drops a finished body; do the same here.
    drop(stream);
    tokio::time::timeout(Duration::from_secs(1), state.shutdown.wait_for_all_closed())
        .await
        .expect("streams should close");
    assert_eq!(state.hub.subscriber_count(), 0);
}

#[tokio::test]
async fn test_stream_guard_released_when_body_ends() {
    let state = common::create_test_state();
    let app = router(state.clone());
    let mut stream = open_stream(&app).await;
    let _ = stream.next_data().await;

    state.shutdown.shutdown();
    assert_eq!(stream.try_next_frame(Duration::from_secs(1)).await, None);

    // The body still exists, but the finished stream no longer counts as open.
    assert_eq!(state.shutdown.open_count(), 0);
    drop(stream);
}

#[tokio::test]
async fn test_slow_subscriber_body_ends() {
    let mut state = common::create_test_state();
    state.hub = Hub::with_options(
        Arc::new(Registry::new()),
        HubOptions {
            subscriber_buffer: 2,
            ..HubOptions::default()
        },
    );
    let app = router(state.clone());
    let mut stream = open_stream(&app).await;

    // Welcome plus two publishes overflow a queue of two nobody is reading.
    for text in ["one", "two"] {
        let body = serde_json::json!({ "text": text }).to_string();
        assert_eq!(post(&app, "/publish", &body).await.0, StatusCode::ACCEPTED);
    }
    assert_eq!(state.hub.subscriber_count(), 0);

    assert_eq!(stream.next_data().await["type"], "system");
    assert_eq!(stream.next_data().await["text"], "one");
    assert_eq!(stream.try_next_frame(Duration::from_secs(1)).await, None);
}

#[tokio::test]
async fn test_health_reports_subscribers() {
    let state = common::create_test_state();
    let app = router(state.clone());
    let _stream = open_stream(&app).await;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["ok"], true);
    assert_eq!(json["subscribers"], 1);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let app = router(common::create_test_state());

    let response = app
        .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "not found");
}

#[tokio::test]
async fn test_body_limit_is_enforced() {
    let mut state = common::create_test_state();
    state.max_body_bytes = 64;
    let app = router(state);

    let body = serde_json::json!({ "text": "x".repeat(200) }).to_string();
    let (status, _) = post(&app, "/publish", &body).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}
