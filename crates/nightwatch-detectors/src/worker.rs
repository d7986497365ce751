//! Shared detector scaffolding: event emission and per-detector counters.

use std::collections::BTreeMap;
use std::sync::Arc;

use nightwatch_core::{Clock, Event, EventBus, EventState, FieldValue};
use nightwatch_drivers::Backoff;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

/// Sleeps the next backoff delay, returning true if shutdown arrived first.
pub(crate) async fn wait_backoff(
    backoff: &mut Backoff,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    tokio::select! {
        _ = shutdown.changed() => true,
        _ = tokio::time::sleep(backoff.next_delay()) => false,
    }
}

/// Transient-error and resync counters per detector, surfaced in health.
#[derive(Debug, Default)]
pub struct DetectorCounters {
    transient: Mutex<BTreeMap<String, u64>>,
}

impl DetectorCounters {
    /// Creates an empty counter set.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Counts one transient error for `detector`.
    pub fn count_transient(&self, detector: &str) {
        *self
            .transient
            .lock()
            .entry(detector.to_string())
            .or_insert(0) += 1;
    }

    /// Transient errors recorded for `detector`.
    pub fn transient_errors(&self, detector: &str) -> u64 {
        self.transient.lock().get(detector).copied().unwrap_or(0)
    }
}

/// Emits events for one detector, owning its sequence and session.
///
/// `sequence` strictly increases within a session; [`rotate_session`]
/// starts a fresh session (used after reconnects), resetting the counter.
///
/// [`rotate_session`]: EventEmitter::rotate_session
pub struct EventEmitter {
    detector: String,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    sequence: u64,
    session_id: String,
}

impl EventEmitter {
    /// Creates an emitter with a fresh session.
    pub fn new(detector: impl Into<String>, bus: Arc<EventBus>, clock: Arc<dyn Clock>) -> Self {
        Self {
            detector: detector.into(),
            bus,
            clock,
            sequence: 0,
            session_id: Uuid::new_v4().to_string(),
        }
    }

    /// The detector this emitter belongs to.
    pub fn detector(&self) -> &str {
        &self.detector
    }

    /// Current session id.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Builds, publishes, and returns the next event.
    pub fn emit(
        &mut self,
        state: EventState,
        confidence: f64,
        value: BTreeMap<String, FieldValue>,
    ) -> Event {
        self.sequence += 1;
        let event = Event::new(
            self.detector.clone(),
            self.clock.now_monotonic(),
            self.sequence,
            self.session_id.clone(),
            state,
            confidence,
            value,
        );
        self.bus.publish_event(event.clone());
        event
    }

    /// Emits an uncertain tick with every listed feature null.
    pub fn emit_uncertain(&mut self, fields: &[&str]) -> Event {
        let value = fields
            .iter()
            .map(|f| (f.to_string(), FieldValue::Null))
            .collect();
        self.emit(EventState::Uncertain, 0.0, value)
    }

    /// Starts a new session after a reconnect; sequence restarts at zero.
    pub fn rotate_session(&mut self) {
        self.session_id = Uuid::new_v4().to_string();
        self.sequence = 0;
        info!(detector = %self.detector, session = %self.session_id, "detector session rotated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nightwatch_core::ManualClock;

    #[tokio::test]
    async fn sequence_increases_and_session_rotates() {
        let bus = Arc::new(EventBus::new());
        let clock = ManualClock::shared();
        let mut sub = bus.subscribe_events("test");
        let mut emitter = EventEmitter::new("radar", Arc::clone(&bus), clock.clone());

        let a = emitter.emit(EventState::Normal, 0.9, BTreeMap::new());
        clock.advance(0.1);
        let b = emitter.emit(EventState::Normal, 0.9, BTreeMap::new());
        assert_eq!(a.sequence, 1);
        assert_eq!(b.sequence, 2);
        assert_eq!(a.session_id, b.session_id);
        assert!(b.timestamp >= a.timestamp);

        emitter.rotate_session();
        let c = emitter.emit(EventState::Normal, 0.9, BTreeMap::new());
        assert_eq!(c.sequence, 1);
        assert_ne!(c.session_id, a.session_id);

        // All three arrived on the bus in order.
        assert_eq!(sub.recv().await.unwrap().sequence, 1);
        assert_eq!(sub.recv().await.unwrap().sequence, 2);
        assert_eq!(sub.recv().await.unwrap().sequence, 1);
    }

    #[tokio::test]
    async fn uncertain_tick_nullifies_fields() {
        let bus = Arc::new(EventBus::new());
        let mut emitter = EventEmitter::new("audio", Arc::clone(&bus), ManualClock::shared());

        let event = emitter.emit_uncertain(&["breathing_rate", "silence_duration"]);
        assert_eq!(event.state, EventState::Uncertain);
        assert_eq!(event.confidence, 0.0);
        assert!(event.field("breathing_rate").unwrap().is_null());
        assert!(event.field("silence_duration").unwrap().is_null());
    }

    #[test]
    fn counters_accumulate() {
        let counters = DetectorCounters::new();
        counters.count_transient("radar");
        counters.count_transient("radar");
        assert_eq!(counters.transient_errors("radar"), 2);
        assert_eq!(counters.transient_errors("audio"), 0);
    }
}
