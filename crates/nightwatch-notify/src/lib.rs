//! # Nightwatch Notify
//!
//! The notifier: subscribes to alerts on the bus and drives the local alarm
//! and push sinks. Delivery is at-most-once per `alert_id` per sink under
//! normal operation — retries share the alert's id, duplicates are
//! suppressed, and pause blocks every external dispatch while the pipeline
//! keeps flowing underneath.

#![forbid(unsafe_code)]

pub mod alarm;
pub mod push;
pub mod sink;

pub use alarm::AlarmSink;
pub use push::PushSink;
pub use sink::{NotificationSink, SinkError};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use nightwatch_core::{Alert, EventBus};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Whether external notification is currently suppressed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PauseState {
    /// True while paused.
    pub paused: bool,
    /// Monotonic time at which the pause lifts, if bounded.
    pub pause_until: Option<f64>,
}

impl PauseState {
    /// The unpaused state.
    pub fn active() -> Self {
        Self {
            paused: false,
            pause_until: None,
        }
    }
}

/// Retry delays after the initial attempt.
const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(15),
];

/// The notifier task.
pub struct Notifier {
    bus: Arc<EventBus>,
    alarm: AlarmSink,
    sinks: Vec<Arc<dyn NotificationSink>>,
    pause: watch::Receiver<PauseState>,
    dispatched: HashSet<String>,
}

impl Notifier {
    /// Creates a notifier over the given sinks.
    pub fn new(
        bus: Arc<EventBus>,
        alarm: AlarmSink,
        sinks: Vec<Arc<dyn NotificationSink>>,
        pause: watch::Receiver<PauseState>,
    ) -> Self {
        Self {
            bus,
            alarm,
            sinks,
            pause,
            dispatched: HashSet::new(),
        }
    }

    /// Handles one alert record from the bus.
    ///
    /// Resolution and acknowledgment updates stop the alarm; fresh firings
    /// dispatch to every sink unless paused or already dispatched.
    pub async fn handle_alert(&mut self, alert: Alert) {
        if alert.resolved || alert.acknowledged_at.is_some() {
            self.alarm.stop(&alert.id);
            return;
        }

        if self.pause.borrow().paused {
            debug!(alert_id = %alert.id, "paused; alert recorded but not dispatched");
            return;
        }

        if !self.dispatched.insert(alert.id.clone()) {
            debug!(alert_id = %alert.id, "duplicate alert suppressed");
            return;
        }

        self.alarm.trigger(&alert);

        let mut failed = alert.clone();
        let mut any_failure = false;
        for sink in &self.sinks {
            if let Err(reason) = dispatch_with_retry(sink.as_ref(), &alert).await {
                warn!(
                    alert_id = %alert.id,
                    sink = sink.name(),
                    %reason,
                    "delivery failed after retries"
                );
                failed.record_delivery_failure(sink.name(), &reason.to_string());
                any_failure = true;
            }
        }

        // Surface exhausted deliveries on the alert record for external
        // consumers; the republished record is already marked dispatched.
        if any_failure {
            self.bus.publish_alert(failed);
        }
    }

    /// Event-loop entry: consumes alerts until shutdown.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut alerts = self.bus.subscribe_alerts("notifier");
        info!(sinks = self.sinks.len(), "notifier started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                alert = alerts.recv() => match alert {
                    Some(alert) => self.handle_alert(alert).await,
                    None => break,
                },
            }
        }

        self.alarm.stop_all();
        debug!("notifier stopped");
    }
}

/// One initial attempt plus up to three retries at 1 s, 5 s, 15 s.
/// Permanent failures abort immediately.
async fn dispatch_with_retry(
    sink: &dyn NotificationSink,
    alert: &Alert,
) -> Result<(), SinkError> {
    let mut last_error = None;

    for attempt in 0..=RETRY_DELAYS.len() {
        match sink.notify(alert).await {
            Ok(()) => return Ok(()),
            Err(SinkError::Permanent(reason)) => {
                return Err(SinkError::Permanent(reason));
            }
            Err(SinkError::Retryable(reason)) => {
                debug!(
                    alert_id = %alert.id,
                    sink = sink.name(),
                    attempt,
                    %reason,
                    "delivery attempt failed"
                );
                last_error = Some(reason);
                if attempt < RETRY_DELAYS.len() {
                    tokio::time::sleep(RETRY_DELAYS[attempt]).await;
                }
            }
        }
    }

    Err(SinkError::Retryable(
        last_error.unwrap_or_else(|| "exhausted".to_string()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use nightwatch_config::AudioNotifierConfig;
    use nightwatch_core::Severity;
    use parking_lot::Mutex;

    struct RecordingSink {
        calls: Arc<Mutex<Vec<String>>>,
        failures_before_success: Arc<Mutex<u32>>,
        permanent: bool,
    }

    impl RecordingSink {
        fn ok() -> (Arc<Self>, Arc<Mutex<Vec<String>>>) {
            let calls = Arc::new(Mutex::new(Vec::new()));
            (
                Arc::new(Self {
                    calls: Arc::clone(&calls),
                    failures_before_success: Arc::new(Mutex::new(0)),
                    permanent: false,
                }),
                calls,
            )
        }

        fn flaky(failures: u32) -> (Arc<Self>, Arc<Mutex<Vec<String>>>) {
            let calls = Arc::new(Mutex::new(Vec::new()));
            (
                Arc::new(Self {
                    calls: Arc::clone(&calls),
                    failures_before_success: Arc::new(Mutex::new(failures)),
                    permanent: false,
                }),
                calls,
            )
        }

        fn rejecting() -> (Arc<Self>, Arc<Mutex<Vec<String>>>) {
            let calls = Arc::new(Mutex::new(Vec::new()));
            (
                Arc::new(Self {
                    calls: Arc::clone(&calls),
                    failures_before_success: Arc::new(Mutex::new(u32::MAX)),
                    permanent: true,
                }),
                calls,
            )
        }
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn notify(&self, alert: &Alert) -> Result<(), SinkError> {
            self.calls.lock().push(alert.id.clone());
            let mut remaining = self.failures_before_success.lock();
            if *remaining > 0 {
                if self.permanent {
                    return Err(SinkError::Permanent("rejected".to_string()));
                }
                *remaining -= 1;
                return Err(SinkError::Retryable("unavailable".to_string()));
            }
            Ok(())
        }
    }

    fn alert(mono: f64) -> Alert {
        Alert::create(
            "rule",
            Severity::Critical,
            "src",
            "msg",
            Utc::now(),
            mono,
        )
    }

    fn alarm() -> AlarmSink {
        AlarmSink::new(AudioNotifierConfig {
            enabled: false,
            ..AudioNotifierConfig::default()
        })
    }

    fn notifier(
        sinks: Vec<Arc<dyn NotificationSink>>,
    ) -> (Notifier, watch::Sender<PauseState>, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new());
        let (pause_tx, pause_rx) = watch::channel(PauseState::active());
        (
            Notifier::new(Arc::clone(&bus), alarm(), sinks, pause_rx),
            pause_tx,
            bus,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_once_and_suppresses_duplicates() {
        let (sink, calls) = RecordingSink::ok();
        let (mut notifier, _pause, _bus) = notifier(vec![sink]);
        let a = alert(1.0);

        notifier.handle_alert(a.clone()).await;
        notifier.handle_alert(a.clone()).await;
        notifier.handle_alert(a).await;

        assert_eq!(calls.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_share_the_alert_id() {
        let (sink, calls) = RecordingSink::flaky(2);
        let (mut notifier, _pause, _bus) = notifier(vec![sink]);
        let a = alert(2.0);

        notifier.handle_alert(a.clone()).await;

        let calls = calls.lock();
        assert_eq!(calls.len(), 3, "two failures then success");
        assert!(calls.iter().all(|id| id == &a.id));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_does_not_retry() {
        let (sink, calls) = RecordingSink::rejecting();
        let (mut notifier, _pause, bus) = notifier(vec![sink]);
        let mut failures = bus.subscribe_alerts("observer");
        let a = alert(3.0);

        notifier.handle_alert(a).await;

        assert_eq!(calls.lock().len(), 1, "4xx must not be retried");
        // The failure is recorded on the republished alert.
        let record = failures.try_recv().unwrap();
        assert_eq!(record.delivery_failures.len(), 1);
        assert!(record.delivery_failures[0].contains("recording"));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_record_failure() {
        let (sink, calls) = RecordingSink::flaky(10);
        let (mut notifier, _pause, bus) = notifier(vec![sink]);
        let mut failures = bus.subscribe_alerts("observer");

        notifier.handle_alert(alert(4.0)).await;

        // Initial attempt + three retries.
        assert_eq!(calls.lock().len(), 4);
        let record = failures.try_recv().unwrap();
        assert_eq!(record.delivery_failures.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_suppresses_and_resume_does_not_backfill() {
        let (sink, calls) = RecordingSink::ok();
        let (mut notifier, pause, _bus) = notifier(vec![sink]);

        pause
            .send(PauseState {
                paused: true,
                pause_until: Some(100.0),
            })
            .unwrap();
        let during_pause = alert(5.0);
        notifier.handle_alert(during_pause.clone()).await;
        assert!(calls.lock().is_empty(), "dispatched while paused");

        // Resume: the alert that fired during the pause stays informational.
        pause.send(PauseState::active()).unwrap();
        let fresh = alert(50.0);
        notifier.handle_alert(fresh.clone()).await;

        let calls = calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], fresh.id);
    }

    #[tokio::test(start_paused = true)]
    async fn resolution_updates_do_not_dispatch() {
        let (sink, calls) = RecordingSink::ok();
        let (mut notifier, _pause, _bus) = notifier(vec![sink]);

        let mut resolved = alert(6.0);
        resolved.resolve(Utc::now());
        notifier.handle_alert(resolved).await;
        assert!(calls.lock().is_empty());
    }
}
