use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

use crate::api::DEFAULT_MAX_BODY_BYTES;
use crate::event::{Limits, DEFAULT_MAX_TEXT_LEN, DEFAULT_MAX_USER_LEN};
use crate::hub::{HubOptions, DEFAULT_SUBSCRIBER_BUFFER, DEFAULT_WELCOME};

/// In-memory publish/subscribe hub over server-sent events.
#[derive(Parser, Debug, Clone)]
#[command(name = "ssehub", version, about)]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "SSEHUB_BIND", default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,

    /// Seconds between heartbeat comments on every event stream
    #[arg(long, env = "SSEHUB_HEARTBEAT_SECS", default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    pub heartbeat_secs: u64,

    /// Maximum `user` length in UTF-16 code units; longer values are clipped
    #[arg(long, env = "SSEHUB_MAX_USER_LEN", default_value_t = DEFAULT_MAX_USER_LEN)]
    pub max_user_len: usize,

    /// Maximum `text` length in UTF-16 code units; longer values are clipped
    #[arg(long, env = "SSEHUB_MAX_TEXT_LEN", default_value_t = DEFAULT_MAX_TEXT_LEN)]
    pub max_text_len: usize,

    /// Largest accepted request body
    #[arg(long, env = "SSEHUB_MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
    pub max_body_bytes: usize,

    /// Frames a subscriber may have queued before it is dropped as too slow
    #[arg(long, env = "SSEHUB_SUBSCRIBER_BUFFER", default_value_t = DEFAULT_SUBSCRIBER_BUFFER)]
    pub subscriber_buffer: usize,

    /// Text of the system event sent to each new subscriber
    #[arg(long, env = "SSEHUB_WELCOME", default_value = DEFAULT_WELCOME)]
    pub welcome: String,
}

impl Config {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_user: self.max_user_len,
            max_text: self.max_text_len,
        }
    }

    pub fn hub_options(&self) -> HubOptions {
        HubOptions {
            subscriber_buffer: self.subscriber_buffer,
            welcome: self.welcome.clone(),
        }
    }
}
