//! Event model and the `text/event-stream` encoder.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::Serialize;

pub const DEFAULT_MAX_USER_LEN: usize = 32;
pub const DEFAULT_MAX_TEXT_LEN: usize = 1000;

const DATA_PREFIX: &str = "data: ";
const HEARTBEAT_FRAME: &[u8] = b": ping\n\n";

/// Length bounds for `message` fields, counted in UTF-16 code units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_user: usize,
    pub max_text: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_user: DEFAULT_MAX_USER_LEN,
            max_text: DEFAULT_MAX_TEXT_LEN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Connection acknowledgment, sent to one new subscriber only.
    System { text: String },
    Message { user: String, text: String, ts: i64 },
    /// Tells consumers to reset their local display state.
    Clear,
    /// Keepalive comment; has no JSON form.
    #[serde(skip)]
    Heartbeat,
}

impl Event {
    pub fn system(text: impl Into<String>) -> Self {
        Event::System { text: text.into() }
    }

    /// Build a `message`, clipping `user` and `text` to `limits`.
    pub fn message(user: &str, text: &str, ts: i64, limits: &Limits) -> Self {
        Event::Message {
            user: clip_utf16(user, limits.max_user),
            text: clip_utf16(text, limits.max_text),
            ts,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::System { .. } => "system",
            Event::Message { .. } => "message",
            Event::Clear => "clear",
            Event::Heartbeat => "heartbeat",
        }
    }

    /// Encode into one complete wire frame.
    ///
    /// Data events become a single `data: <json>` line; serde_json escapes
    /// newlines, so the payload never spans lines. Heartbeats are a comment.
    pub fn encode(&self) -> Bytes {
        if let Event::Heartbeat = self {
            return Bytes::from_static(HEARTBEAT_FRAME);
        }
        match serde_json::to_string(self) {
            Ok(json) => {
                let mut frame = String::with_capacity(DATA_PREFIX.len() + json.len() + 2);
                frame.push_str(DATA_PREFIX);
                frame.push_str(&json);
                frame.push_str("\n\n");
                Bytes::from(frame)
            }
            Err(e) => {
                tracing::error!(kind = self.kind(), "failed to serialize event: {e}");
                Bytes::new()
            }
        }
    }
}

/// Truncate `s` to at most `max` UTF-16 code units without splitting a
/// character. A character that would cross the bound is dropped whole.
pub fn clip_utf16(s: &str, max: usize) -> String {
    let mut units = 0;
    for (idx, ch) in s.char_indices() {
        units += ch.len_utf16();
        if units > max {
            return s[..idx].to_string();
        }
    }
    s.to_string()
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
