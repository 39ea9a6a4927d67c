//! HTTP gateway: event stream subscription plus publish / clear / health.

use std::convert::Infallible;

use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::Serialize;
use serde_json::{Map, Value};
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::event::{now_ms, Event, Limits};
use crate::hub::Hub;
use crate::shutdown::ShutdownCoordinator;

pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
pub const DEFAULT_USER: &str = "anon";

#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub limits: Limits,
    pub shutdown: ShutdownCoordinator,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(hub: Hub, shutdown: ShutdownCoordinator) -> Self {
        Self {
            hub,
            limits: Limits::default(),
            shutdown,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

#[derive(Serialize)]
struct Ack {
    ok: bool,
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    subscribers: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        subscribers: state.hub.subscriber_count(),
    })
}

/// Body of a publish request after coercion and clipping.
#[derive(Debug, PartialEq, Eq)]
pub struct PublishRequest {
    pub user: String,
    pub text: String,
}

impl PublishRequest {
    /// Parse a publish body. Missing or null fields take their defaults and
    /// non-string values are coerced to their JSON text. A `user` that is
    /// empty or only whitespace also falls back to `anon`.
    pub fn parse(body: &[u8], limits: &Limits) -> Result<Self, ApiError> {
        let fields = if body.iter().all(u8::is_ascii_whitespace) {
            Map::new()
        } else {
            match serde_json::from_slice::<Value>(body) {
                Ok(Value::Object(map)) => map,
                Ok(_) => Map::new(),
                Err(e) => {
                    return Err(ApiError::Validation(format!("invalid JSON body: {e}")));
                }
            }
        };

        let user = coerce(fields.get("user"))
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_USER.to_string());
        let text = coerce(fields.get("text")).unwrap_or_default();

        let user = crate::event::clip_utf16(&user, limits.max_user);
        let text = crate::event::clip_utf16(&text, limits.max_text);
        if text.trim().is_empty() {
            return Err(ApiError::Validation("text required".to_string()));
        }
        Ok(Self { user, text })
    }

    pub fn into_event(self, ts: i64, limits: &Limits) -> Event {
        Event::message(&self.user, &self.text, ts, limits)
    }
}

fn coerce(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

async fn publish(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Ack>), ApiError> {
    let request = PublishRequest::parse(&body, &state.limits).inspect_err(|e| {
        tracing::debug!(error = %e, "publish rejected");
    })?;
    let event = request.into_event(now_ms(), &state.limits);
    state.hub.publish(&event);
    Ok((StatusCode::ACCEPTED, Json(Ack { ok: true })))
}

async fn clear(State(state): State<AppState>) -> (StatusCode, Json<Ack>) {
    state.hub.publish(&Event::Clear);
    (StatusCode::ACCEPTED, Json(Ack { ok: true }))
}

async fn subscribe(State(state): State<AppState>) -> Response {
    let (guard, mut shutdown_rx) = state.shutdown.register();
    let subscription = state.hub.subscribe();
    let id = subscription.id().clone();
    tracing::info!(subscriber = %id, "event stream opened");

    // The guard lives in the shutdown future, which lives as long as the body.
    let closed = async move {
        let _guard = guard;
        let _ = shutdown_rx.wait_for(|down| *down).await;
        tracing::debug!(subscriber = %id, "closing event stream for shutdown");
    };

    // Ends on shutdown, or when the hub drops a slow subscriber. A peer that
    // disconnects drops the body, and with it the subscription.
    let stream = subscription
        .map(Ok::<_, Infallible>)
        .take_until(closed);

    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(stream),
    )
        .into_response()
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}

pub fn router(state: AppState) -> Router {
    let max_body_bytes = state.max_body_bytes;
    let events = get(subscribe)
        .layer::<_, Infallible>(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache"),
        ))
        .layer::<_, Infallible>(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-accel-buffering"),
            HeaderValue::from_static("no"),
        ));

    Router::new()
        .route("/health", get(health))
        .route("/events", events)
        .route("/publish", post(publish))
        .route("/clear", post(clear))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
