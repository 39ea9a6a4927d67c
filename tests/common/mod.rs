#![allow(dead_code)]

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use ssehub::api::AppState;
use ssehub::hub::Hub;
use ssehub::registry::Registry;
use ssehub::shutdown::ShutdownCoordinator;

pub fn create_test_state() -> AppState {
    let hub = Hub::new(Arc::new(Registry::new()));
    AppState::new(hub, ShutdownCoordinator::new())
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>>;

/// Splits a streamed response body into `\n\n`-terminated frames.
pub struct FrameReader {
    stream: ByteStream,
    buf: Vec<u8>,
}

impl FrameReader {
    pub fn new<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: std::fmt::Display,
    {
        Self {
            stream: Box::pin(stream.map(|r| r.map_err(|e| e.to_string()))),
            buf: Vec::new(),
        }
    }

    /// Next complete frame, or `None` once the body has ended.
    pub async fn try_next_frame(&mut self, wait: Duration) -> Option<String> {
        loop {
            if let Some(pos) = self.buf.windows(2).position(|w| w == b"\n\n") {
                let frame: Vec<u8> = self.buf.drain(..pos + 2).collect();
                return Some(String::from_utf8(frame).expect("frames are utf-8"));
            }
            let chunk = tokio::time::timeout(wait, self.stream.next())
                .await
                .expect("body should make progress")?;
            self.buf.extend_from_slice(&chunk.expect("body chunk"));
        }
    }

    pub async fn next_frame(&mut self) -> String {
        self.try_next_frame(Duration::from_secs(2))
            .await
            .expect("stream ended early")
    }

    /// Next `data:` frame parsed as JSON, skipping heartbeat comments.
    pub async fn next_data(&mut self) -> serde_json::Value {
        loop {
            let frame = self.next_frame().await;
            if let Some(json) = parse_data(&frame) {
                return json;
            }
        }
    }

    /// Assert nothing arrives within `wait`.
    pub async fn assert_idle(&mut self, wait: Duration) {
        assert!(self.buf.is_empty(), "unexpected buffered bytes");
        let next = tokio::time::timeout(wait, self.stream.next()).await;
        assert!(next.is_err(), "unexpected frame: {:?}", next);
    }
}

pub fn parse_data(frame: &str) -> Option<serde_json::Value> {
    let payload = frame.strip_prefix("data: ")?.trim_end_matches('\n');
    Some(serde_json::from_str(payload).expect("data line is JSON"))
}

pub fn is_heartbeat(frame: &str) -> bool {
    frame == ": ping\n\n"
}
