//! In-process event bus.
//!
//! Topic-based, many-producer / many-consumer, lossy with policy: publishing
//! never blocks and never fails; a subscriber that falls behind its bounded
//! inbox loses the OLDEST messages first and its `dropped` counter grows.
//! Per-(topic, producer) ordering is preserved. No persistence, no replay.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use crate::alert::Alert;
use crate::envelope::ControlRequest;
use crate::event::{Event, FusedSignal};
use crate::DEFAULT_BUS_CAPACITY;

/// Aggregated drop counters, exposed through health.
#[derive(Debug, Default)]
pub struct BusCounters {
    dropped: Mutex<BTreeMap<String, u64>>,
}

impl BusCounters {
    fn add(&self, subscriber: &str, n: u64) {
        *self
            .dropped
            .lock()
            .entry(subscriber.to_string())
            .or_insert(0) += n;
    }

    /// Snapshot of per-subscriber dropped counts.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.dropped.lock().clone()
    }

    /// Total messages dropped across all subscribers.
    pub fn total(&self) -> u64 {
        self.dropped.lock().values().sum()
    }
}

/// Receiving side of one subscription.
///
/// Wraps a broadcast receiver; overflow shows up as a lag which is converted
/// into the subscriber's `dropped` counter rather than an error.
pub struct Subscription<T> {
    rx: broadcast::Receiver<T>,
    label: String,
    counters: Arc<BusCounters>,
    dropped: u64,
}

impl<T: Clone> Subscription<T> {
    /// Receives the next message, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.rx.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped += n;
                    self.counters.add(&self.label, n);
                    debug!(subscriber = %self.label, lost = n, "subscriber inbox overflowed, oldest dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive; `None` when the inbox is empty or closed.
    pub fn try_recv(&mut self) -> Option<T> {
        loop {
            match self.rx.try_recv() {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    self.dropped += n;
                    self.counters.add(&self.label, n);
                }
                Err(_) => return None,
            }
        }
    }

    /// Messages this subscriber has lost to overflow.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// The broker. One bounded broadcast channel per topic.
///
/// Senders are kept alive by the bus itself so publishing before the first
/// subscriber (or after the last one goes away) silently drops, as specified.
pub struct EventBus {
    events: broadcast::Sender<Event>,
    channels: broadcast::Sender<FusedSignal>,
    alerts: broadcast::Sender<Alert>,
    control: broadcast::Sender<ControlRequest>,
    counters: Arc<BusCounters>,
}

impl EventBus {
    /// Creates a bus with the default inbox depth.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    /// Creates a bus with a custom per-subscriber inbox depth.
    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        let (channels, _) = broadcast::channel(capacity);
        let (alerts, _) = broadcast::channel(capacity);
        let (control, _) = broadcast::channel(capacity.max(16));
        Self {
            events,
            channels,
            alerts,
            control,
            counters: Arc::new(BusCounters::default()),
        }
    }

    /// Drop counters for health reporting.
    pub fn counters(&self) -> Arc<BusCounters> {
        Arc::clone(&self.counters)
    }

    /// Publishes a detector event. Never fails.
    pub fn publish_event(&self, event: Event) {
        let _ = self.events.send(event);
    }

    /// Publishes a fused channel update. Never fails.
    pub fn publish_channel(&self, signal: FusedSignal) {
        let _ = self.channels.send(signal);
    }

    /// Publishes an alert record (new firing, ack, or resolution). Never fails.
    pub fn publish_alert(&self, alert: Alert) {
        let _ = self.alerts.send(alert);
    }

    /// Publishes a control request. Never fails.
    pub fn publish_control(&self, request: ControlRequest) {
        let _ = self.control.send(request);
    }

    /// Subscribes to detector events.
    pub fn subscribe_events(&self, label: &str) -> Subscription<Event> {
        self.subscription(self.events.subscribe(), label)
    }

    /// Subscribes to fused channel updates.
    pub fn subscribe_channels(&self, label: &str) -> Subscription<FusedSignal> {
        self.subscription(self.channels.subscribe(), label)
    }

    /// Subscribes to alerts.
    pub fn subscribe_alerts(&self, label: &str) -> Subscription<Alert> {
        self.subscription(self.alerts.subscribe(), label)
    }

    /// Subscribes to control requests.
    pub fn subscribe_control(&self, label: &str) -> Subscription<ControlRequest> {
        self.subscription(self.control.subscribe(), label)
    }

    fn subscription<T>(&self, rx: broadcast::Receiver<T>, label: &str) -> Subscription<T> {
        Subscription {
            rx,
            label: label.to_string(),
            counters: Arc::clone(&self.counters),
            dropped: 0,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
