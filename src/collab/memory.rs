//! In-process implementations of the collaborator traits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{CollabError, CredentialProvider, MailDelivery, Result, UserRecord, UserStore};
use crate::event::now_ms;

/// Token held in memory, e.g. loaded from the environment at startup.
pub struct StaticCredentials {
    token: Option<String>,
    revoked: AtomicBool,
}

impl StaticCredentials {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token,
            revoked: AtomicBool::new(false),
        }
    }

    pub fn revoke(&self) {
        self.revoked.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn access_token(&self) -> Result<String> {
        if self.revoked.load(Ordering::SeqCst) {
            return Err(CollabError::Authentication("credentials revoked".into()));
        }
        self.token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CollabError::Authentication("no stored credentials".into()))
    }
}

/// Mailer that records messages in the log instead of sending them.
#[derive(Default)]
pub struct LogMailer;

#[async_trait]
impl MailDelivery for LogMailer {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<String> {
        if !recipient.contains('@') {
            return Err(CollabError::Delivery(format!("invalid recipient {recipient:?}")));
        }
        let id = uuid::Uuid::new_v4().to_string();
        tracing::info!(%id, recipient, subject, bytes = body.len(), "mail accepted");
        Ok(id)
    }
}

#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, email: &str) -> Result<UserRecord> {
        let mut users = self.users.write();
        if users.values().any(|u| u.email.eq_ignore_ascii_case(email)) {
            return Err(CollabError::Conflict(format!("email {email} already registered")));
        }
        let record = UserRecord {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.to_string(),
            created_at_ms: now_ms(),
        };
        users.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<UserRecord> {
        self.users
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| CollabError::NotFound(format!("user {id}")))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.users
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CollabError::NotFound(format!("user {id}")))
    }
}
