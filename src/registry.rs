//! Concurrency-safe set of live subscriber handles.
//!
//! The registry is the only shared mutable state in the hub. Fan-out walks it
//! under the read lock; insertion and removal take the write lock, so a
//! handle removed from the registry can never be written to by a broadcast
//! that starts (or is still walking) after the removal was applied.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;

/// Opaque, server-generated identity of one subscriber connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberId(uuid::Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Why a write into a subscriber's queue did not go through.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TransportError {
    #[error("subscriber queue full")]
    Full,

    #[error("subscriber disconnected")]
    Closed,

    #[error("subscriber already marked dead")]
    Dead,
}

/// One open push connection as seen by the hub.
///
/// The sink is a bounded queue drained by the connection's own task; a write
/// never waits on the peer.
pub struct Subscriber {
    id: SubscriberId,
    sink: mpsc::Sender<Bytes>,
    alive: AtomicBool,
}

impl Subscriber {
    pub fn new(id: SubscriberId, sink: mpsc::Sender<Bytes>) -> Self {
        Self {
            id,
            sink,
            alive: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> &SubscriberId {
        &self.id
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Clear the liveness flag. Returns true if this call flipped it.
    pub fn mark_dead(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    /// Queue one whole frame. A failed write kills the handle.
    pub fn write(&self, frame: Bytes) -> Result<(), TransportError> {
        if !self.is_alive() {
            return Err(TransportError::Dead);
        }
        let result = self.sink.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Full,
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        });
        if result.is_err() {
            self.mark_dead();
        }
        result
    }
}

/// Mapping of live subscribers keyed by id.
#[derive(Default)]
pub struct Registry {
    subscribers: RwLock<HashMap<SubscriberId, Arc<Subscriber>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, subscriber: Subscriber) -> Arc<Subscriber> {
        let subscriber = Arc::new(subscriber);
        self.subscribers
            .write()
            .insert(subscriber.id().clone(), subscriber.clone());
        subscriber
    }

    /// Remove a handle if present. Removing an absent id is a no-op.
    pub fn remove(&self, id: &SubscriberId) -> bool {
        let removed = self.subscribers.write().remove(id);
        match removed {
            Some(subscriber) => {
                subscriber.mark_dead();
                true
            }
            None => false,
        }
    }

    /// Ids of every handle present at the moment of the call. Fan-out goes
    /// through [`Registry::for_each_live`]; this is for debugging and tests.
    pub fn snapshot(&self) -> Vec<SubscriberId> {
        self.subscribers.read().keys().cloned().collect()
    }

    /// Run `f` over every live handle while holding the read lock, so no
    /// removal can interleave with the walk.
    pub fn for_each_live<F>(&self, mut f: F)
    where
        F: FnMut(&Subscriber),
    {
        let subscribers = self.subscribers.read();
        for subscriber in subscribers.values().filter(|s| s.is_alive()) {
            f(subscriber);
        }
    }

    pub fn contains(&self, id: &SubscriberId) -> bool {
        self.subscribers.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }
}
