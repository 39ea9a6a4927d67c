//! Broadcast hub: subscription lifecycle, fan-out and heartbeats.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;

use crate::event::Event;
use crate::registry::{Registry, Subscriber, SubscriberId};

pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_WELCOME: &str = "connected";

#[derive(Debug, Clone)]
pub struct HubOptions {
    /// Frames a subscriber may have queued before it is considered too slow
    /// and dropped.
    pub subscriber_buffer: usize,
    pub welcome: String,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            welcome: DEFAULT_WELCOME.to_string(),
        }
    }
}

/// Outcome of one fan-out pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Clone)]
pub struct Hub {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<Registry>,
    options: HubOptions,
}

impl Hub {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_options(registry, HubOptions::default())
    }

    pub fn with_options(registry: Arc<Registry>, mut options: HubOptions) -> Self {
        // The welcome frame must always fit.
        options.subscriber_buffer = options.subscriber_buffer.max(1);
        Self {
            inner: Arc::new(Inner { registry, options }),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Encode `event` once and queue it for every live subscriber.
    ///
    /// Never waits on a subscriber. Handles whose queue is full or closed are
    /// removed and not retried; their failures are logged, not returned.
    pub fn publish(&self, event: &Event) -> Delivery {
        let frame = event.encode();
        let mut delivery = Delivery::default();
        let mut failed = Vec::new();

        self.inner.registry.for_each_live(|subscriber| {
            match subscriber.write(frame.clone()) {
                Ok(()) => delivery.delivered += 1,
                Err(e) => {
                    tracing::debug!(subscriber = %subscriber.id(), error = %e, "dropping subscriber");
                    failed.push(subscriber.id().clone());
                }
            }
        });

        for id in &failed {
            self.inner.registry.remove(id);
        }
        delivery.dropped = failed.len();

        if delivery.dropped > 0 {
            tracing::warn!(
                kind = event.kind(),
                delivered = delivery.delivered,
                dropped = delivery.dropped,
                "fan-out dropped subscribers"
            );
        } else {
            tracing::trace!(kind = event.kind(), delivered = delivery.delivered, "fan-out complete");
        }
        delivery
    }

    /// Register a new subscriber and queue its welcome event.
    ///
    /// The welcome is queued before the handle becomes visible to fan-out, so
    /// it is always the first frame the subscriber sees.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.options.subscriber_buffer);
        let id = SubscriberId::new();
        let subscriber = Subscriber::new(id.clone(), tx);

        let welcome = Event::system(self.inner.options.welcome.as_str()).encode();
        if let Err(e) = subscriber.write(welcome) {
            tracing::warn!(subscriber = %id, error = %e, "failed to queue welcome");
        }

        self.inner.registry.add(subscriber);
        tracing::debug!(subscriber = %id, total = self.subscriber_count(), "subscriber registered");

        Subscription {
            id,
            rx: ReceiverStream::new(rx),
            hub: self.clone(),
        }
    }

    /// Remove a subscriber. Safe to call repeatedly and during a publish.
    pub fn unsubscribe(&self, id: &SubscriberId) -> bool {
        let removed = self.inner.registry.remove(id);
        if removed {
            tracing::debug!(subscriber = %id, total = self.subscriber_count(), "subscriber removed");
        }
        removed
    }
}

/// Receiving end of one subscriber's queue.
///
/// Yields encoded frames. Dropping it (the peer went away) unregisters the
/// subscriber.
pub struct Subscription {
    id: SubscriberId,
    rx: ReceiverStream<Bytes>,
    hub: Hub,
}

impl Subscription {
    pub fn id(&self) -> &SubscriberId {
        &self.id
    }
}

impl Stream for Subscription {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(&self.id);
    }
}

/// Publish a heartbeat every `period` until `shutdown` flips to true or its
/// sender is dropped. Ticks are neither skipped nor coalesced, and fire even
/// with no subscribers.
pub fn spawn_heartbeat(
    hub: Hub,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    // First tick is one full period after the call, not after the task starts.
    let first = Instant::now() + period;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(first, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    hub.publish(&Event::Heartbeat);
                }
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        tracing::debug!("heartbeat stopped");
                        break;
                    }
                }
            }
        }
    })
}
