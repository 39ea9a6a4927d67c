//! Boundaries to the services around the hub.
//!
//! Not wired into the server: nothing in `main` or the router builds these.
//!
//! Token acquisition, outbound mail and user records live outside the hub.
//! Only their contracts are fixed here; failures come back as a
//! [`CollabError`] and never touch broadcast state.

pub mod memory;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use memory::{LogMailer, MemoryUserStore, StaticCredentials};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CollabError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, CollabError>;

/// Supplies an access token from stored refresh credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync + 'static {
    async fn access_token(&self) -> Result<String>;
}

/// Hands a message to an outside mail service.
#[async_trait]
pub trait MailDelivery: Send + Sync + 'static {
    /// Returns the delivery identifier assigned to the message.
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub created_at_ms: i64,
}

#[async_trait]
pub trait UserStore: Send + Sync + 'static {
    async fn create(&self, email: &str) -> Result<UserRecord>;
    async fn get(&self, id: &str) -> Result<UserRecord>;
    async fn delete(&self, id: &str) -> Result<()>;
}
