//! Message bus contract and the in-memory implementation.

use super::{BusMetrics, EventHandler};
use crate::core::Event;
use futures::FutureExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

/// The publish/subscribe fabric the engine runs on.
///
/// `publish` returns immediately. It never waits for handlers and never
/// reports their errors back to the caller.
pub trait MessageBus: Send + Sync {
    /// Enqueues delivery of `event` to every current subscriber of `topic`.
    fn publish(&self, topic: &str, event: Event);

    /// Registers a handler for a topic.
    fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>);
}

#[derive(Debug, Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

/// Decrements the in-flight counter when the delivery task finishes.
struct InFlightTicket(Arc<InFlight>);

impl InFlightTicket {
    fn issue(in_flight: &Arc<InFlight>) -> Self {
        in_flight.count.fetch_add(1, Ordering::SeqCst);
        Self(in_flight.clone())
    }
}

impl Drop for InFlightTicket {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// An in-memory bus that delivers each event to each subscriber on its own
/// tokio task.
///
/// There is no ordering between two publishes on the same topic, no
/// redelivery and no backpressure. Handler errors and panics are logged and
/// counted, then dropped.
#[derive(Default)]
pub struct InMemoryBus {
    subscribers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
    in_flight: Arc<InFlight>,
    metrics: Arc<BusMetrics>,
}

impl InMemoryBus {
    /// Creates a new bus with no subscribers.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the number of handlers registered on a topic.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers.read().get(topic).map_or(0, Vec::len)
    }

    /// Returns the number of deliveries still running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.count.load(Ordering::SeqCst)
    }

    /// Returns the delivery metrics.
    #[must_use]
    pub fn metrics(&self) -> &BusMetrics {
        &self.metrics
    }

    /// Waits until no delivery is running.
    ///
    /// Deliveries that publish follow-up events keep the bus busy until the
    /// follow-ups finish too, so this waits for a whole cascade.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.in_flight.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Like [`wait_idle`](Self::wait_idle) but gives up after `timeout`.
    /// Returns true if the bus went idle.
    pub async fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait_idle()).await.is_ok()
    }
}

impl std::fmt::Debug for InMemoryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBus")
            .field("topics", &self.subscribers.read().len())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl MessageBus for InMemoryBus {
    fn publish(&self, topic: &str, event: Event) {
        self.metrics.record_publish();

        let handlers = self
            .subscribers
            .read()
            .get(topic)
            .cloned()
            .unwrap_or_default();
        if handlers.is_empty() {
            self.metrics.record_unrouted();
            debug!(topic = %topic, event_id = %event.id, "No subscriber for topic");
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.metrics.record_failure();
            error!(topic = %topic, event_id = %event.id, "Publish outside a runtime; event dropped");
            return;
        };

        for handler in handlers {
            let ticket = InFlightTicket::issue(&self.in_flight);
            let metrics = self.metrics.clone();
            let topic = topic.to_string();
            let event = event.clone();

            runtime.spawn(async move {
                let _ticket = ticket;
                let event_id = event.id;
                let result = AssertUnwindSafe(handler.handle(&topic, event))
                    .catch_unwind()
                    .await;
                match result {
                    Ok(Ok(())) => metrics.record_delivery(),
                    Ok(Err(err)) => {
                        metrics.record_failure();
                        warn!(
                            topic = %topic,
                            event_id = %event_id,
                            error = %err,
                            "Handler failed; event dropped"
                        );
                    }
                    Err(_) => {
                        metrics.record_failure();
                        error!(topic = %topic, event_id = %event_id, "Handler panicked; event dropped");
                    }
                }
            });
        }
    }

    fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) {
        self.subscribers
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(handler);
    }
}
