//! # Nightwatch Alerts
//!
//! The rule engine: evaluates configured rules against fused channels and
//! raw detector events, manages the alert lifecycle
//! (idle → pending → firing → resolving → idle), and watches detector
//! health. Alerts are published on the bus; acknowledgments and resolutions
//! flow back in on the control topic only, so the engine never depends on
//! the notifier.

#![forbid(unsafe_code)]

mod health;
mod rules;

pub use health::HealthMonitor;
pub use rules::{compare, resolve, Resolved, RuleRuntime};

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use nightwatch_config::AlertEngineConfig;
use nightwatch_core::health::ComponentHealth;
use nightwatch_core::{
    Alert, Clock, ControlRequest, Event, EventBus, FusedSignal, SequenceGuard, Severity,
};
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Kept alert history depth.
const MAX_HISTORY: usize = 1000;

/// The alert engine. Owned by one task; every mutation happens inside a
/// single evaluation step.
pub struct AlertEngine {
    config: AlertEngineConfig,
    channel_max_age: f64,
    clock: Arc<dyn Clock>,
    bus: Arc<EventBus>,

    rules: Vec<RuleRuntime>,
    events: HashMap<String, Event>,
    channels: HashMap<String, FusedSignal>,

    active: Arc<RwLock<HashMap<String, Alert>>>,
    history: VecDeque<Alert>,
    health: HealthMonitor,
    health_view: Arc<RwLock<BTreeMap<String, ComponentHealth>>>,
    missing_logged: HashSet<(String, String)>,
    guard: SequenceGuard,
}

impl AlertEngine {
    /// Creates an engine. `expected_detectors` drives health monitoring;
    /// `channel_max_age` (usually twice the fusion staleness limit) bounds
    /// how long a channel value can back a rule after its last update.
    pub fn new(
        config: AlertEngineConfig,
        expected_detectors: Vec<String>,
        channel_max_age: f64,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let rules = config
            .rules
            .iter()
            .filter(|r| r.enabled)
            .cloned()
            .map(RuleRuntime::new)
            .collect();
        let health = HealthMonitor::new(config.detector_timeout_seconds, expected_detectors);

        Self {
            channel_max_age,
            rules,
            events: HashMap::new(),
            channels: HashMap::new(),
            active: Arc::new(RwLock::new(HashMap::new())),
            history: VecDeque::new(),
            health,
            health_view: Arc::new(RwLock::new(BTreeMap::new())),
            missing_logged: HashSet::new(),
            guard: SequenceGuard::new(),
            config,
            clock,
            bus,
        }
    }

    /// Shared view of the open alert set.
    pub fn active_handle(&self) -> Arc<RwLock<HashMap<String, Alert>>> {
        Arc::clone(&self.active)
    }

    /// Shared view of per-detector health, refreshed every tick.
    pub fn health_handle(&self) -> Arc<RwLock<BTreeMap<String, ComponentHealth>>> {
        Arc::clone(&self.health_view)
    }

    /// Currently open alerts.
    pub fn active_alerts(&self) -> Vec<Alert> {
        self.active.read().values().cloned().collect()
    }

    /// Recent resolved alerts, newest last.
    pub fn history(&self, limit: usize) -> Vec<Alert> {
        self.history
            .iter()
            .rev()
            .take(limit)
            .rev()
            .cloned()
            .collect()
    }

    /// Ingests a detector event: updates the latest-event table and health,
    /// then reevaluates every rule.
    pub fn process_event(&mut self, event: Event) {
        let now = self.clock.now_monotonic();

        if !event.detector.starts_with("fusion.") {
            if let Err(e) = self.guard.admit(&event) {
                warn!(error = %e, "dropping invariant-violating event");
                return;
            }
            if let Some(recovered) = self.health.update(&event.detector, now) {
                self.resolve_offline_alert(&recovered);
            }
            self.events.insert(event.detector.clone(), event);
        }

        self.evaluate_all();
    }

    /// Ingests a fused channel update, then reevaluates every rule.
    pub fn process_channel(&mut self, signal: FusedSignal) {
        self.channels.insert(signal.channel.clone(), signal);
        self.evaluate_all();
    }

    /// Timer tick: reevaluates dwell/cooldown/resolution, sweeps health and
    /// stale channels, refreshes the shared health view.
    pub fn tick(&mut self) {
        let now = self.clock.now_monotonic();

        self.channels
            .retain(|_, c| now - c.timestamp <= self.channel_max_age);
        self.evaluate_all();

        for name in self.health.newly_offline(now) {
            self.fire_offline_alert(&name);
        }

        let mut view = BTreeMap::new();
        for name in self.health.expected().to_vec() {
            view.insert(
                name.clone(),
                ComponentHealth {
                    status: self.health.status(&name, now),
                    last_update: self.health.last_update(&name),
                    transient_errors: 0,
                },
            );
        }
        *self.health_view.write() = view;
    }

    /// Applies a control request. Unknown alert ids are not an error — the
    /// operations are idempotent.
    pub fn handle_control(&mut self, request: &ControlRequest) {
        match request {
            ControlRequest::Acknowledge { alert_id } => {
                self.acknowledge_alert(alert_id);
            }
            ControlRequest::Resolve { alert_id } => {
                self.resolve_alert(alert_id);
            }
            ControlRequest::TestAlert { severity } => {
                self.fire_test_alert(*severity);
            }
            // Pause state is owned by the orchestrator; the pipeline
            // keeps evaluating while paused.
            ControlRequest::Pause { .. } | ControlRequest::Resume => {}
        }
    }

    /// Acknowledges an open alert. Idempotent; the first stamp wins.
    pub fn acknowledge_alert(&mut self, alert_id: &str) -> bool {
        let wall = self.clock.now_wall();
        let mut active = self.active.write();
        match active.get_mut(alert_id) {
            Some(alert) => {
                if alert.acknowledge(wall) {
                    info!(alert_id, rule = %alert.rule_name, "alert acknowledged");
                    self.bus.publish_alert(alert.clone());
                }
                true
            }
            None => false,
        }
    }

    /// Resolves an open alert (operator override or automatic path).
    pub fn resolve_alert(&mut self, alert_id: &str) -> bool {
        let wall = self.clock.now_wall();
        let removed = self.active.write().remove(alert_id);
        match removed {
            Some(mut alert) => {
                alert.resolve(wall);
                info!(alert_id, rule = %alert.rule_name, "alert resolved");
                self.bus.publish_alert(alert.clone());
                self.push_history(alert);
                for rule in &mut self.rules {
                    if rule.active_alert.as_deref() == Some(alert_id) {
                        rule.active_alert = None;
                        rule.unsatisfied_since = None;
                    }
                }
                true
            }
            None => false,
        }
    }

    /// Fires a synthetic alert to exercise the notification path.
    pub fn fire_test_alert(&mut self, severity: Severity) {
        let alert = Alert::create(
            "test_alert",
            severity,
            "operator",
            format!("Test alert ({severity})"),
            self.clock.now_wall(),
            self.clock.now_monotonic(),
        );
        info!(alert_id = %alert.id, %severity, "test alert fired");
        self.bus.publish_alert(alert);
    }

    fn evaluate_all(&mut self) {
        for i in 0..self.rules.len() {
            self.evaluate_rule(i);
        }
    }

    fn evaluate_rule(&mut self, i: usize) {
        let now = self.clock.now_monotonic();
        let (predicate, missing) = self.rules[i].predicate(now, &self.channels, &self.events);

        for (source, field) in missing {
            let key = (self.rules[i].rule.name.clone(), field.clone());
            if self.missing_logged.insert(key) {
                warn!(
                    rule = %self.rules[i].rule.name,
                    source, field,
                    "rule references a value that does not resolve; condition is false"
                );
            }
        }

        if predicate {
            self.rules[i].unsatisfied_since = None;
            let since = *self.rules[i].satisfied_since.get_or_insert(now);

            let runtime = &self.rules[i];
            let dwell_ok = now - since >= runtime.rule.duration_seconds;
            let cooldown_ok = runtime
                .last_fired_at
                .map_or(true, |t| now - t >= runtime.rule.cooldown_seconds);

            if dwell_ok && cooldown_ok && runtime.active_alert.is_none() {
                self.fire(i);
            }
        } else {
            self.rules[i].satisfied_since = None;
            if self.rules[i].active_alert.is_some() {
                let since = *self.rules[i].unsatisfied_since.get_or_insert(now);
                if now - since >= self.config.resolve_hold_seconds {
                    if let Some(id) = self.rules[i].active_alert.clone() {
                        debug!(rule = %self.rules[i].rule.name, "predicate clear, auto-resolving");
                        self.resolve_alert(&id);
                    }
                }
            } else {
                self.rules[i].unsatisfied_since = None;
            }
        }
    }

    fn fire(&mut self, i: usize) {
        let now = self.clock.now_monotonic();
        let wall = self.clock.now_wall();

        let message = self.rules[i].render_message(&self.channels, &self.events);
        let runtime = &mut self.rules[i];
        let alert = Alert::create(
            runtime.rule.name.clone(),
            runtime.rule.severity,
            runtime.primary_source(),
            message,
            wall,
            now,
        );

        runtime.active_alert = Some(alert.id.clone());
        runtime.last_fired_at = Some(now);

        info!(
            alert_id = %alert.id,
            rule = %alert.rule_name,
            severity = %alert.severity,
            message = %alert.message,
            "alert fired"
        );
        self.active.write().insert(alert.id.clone(), alert.clone());
        self.bus.publish_alert(alert);
    }

    fn offline_rule_name(detector: &str) -> String {
        format!("detector_offline:{detector}")
    }

    fn fire_offline_alert(&mut self, detector: &str) {
        let alert = Alert::create(
            Self::offline_rule_name(detector),
            Severity::Warning,
            detector,
            format!("Detector offline: {detector}"),
            self.clock.now_wall(),
            self.clock.now_monotonic(),
        );
        warn!(detector, alert_id = %alert.id, "detector offline");
        self.active.write().insert(alert.id.clone(), alert.clone());
        self.bus.publish_alert(alert);
    }

    fn resolve_offline_alert(&mut self, detector: &str) {
        let rule_name = Self::offline_rule_name(detector);
        let id = self
            .active
            .read()
            .values()
            .find(|a| a.rule_name == rule_name)
            .map(|a| a.id.clone());
        if let Some(id) = id {
            info!(detector, "detector back online");
            self.resolve_alert(&id);
        }
    }

    fn push_history(&mut self, alert: Alert) {
        self.history.push_back(alert);
        while self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }
    }

    /// Event-loop entry: consumes the bus until shutdown, ticking every
    /// 500 ms for dwell, cooldown, resolution, and health timers.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut events = self.bus.subscribe_events("alert-engine");
        let mut channels = self.bus.subscribe_channels("alert-engine");
        let mut control = self.bus.subscribe_control("alert-engine");
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(500));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => self.tick(),
                event = events.recv() => match event {
                    Some(event) => self.process_event(event),
                    None => break,
                },
                signal = channels.recv() => match signal {
                    Some(signal) => self.process_channel(signal),
                    None => break,
                },
                request = control.recv() => if let Some(request) = request {
                    self.handle_control(&request);
                },
            }
        }
        debug!("alert engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nightwatch_config::{
        AlertRule, CombineMode, Condition, ConditionValue, Operator,
    };
    use nightwatch_core::{EventState, FieldValue, ManualClock};
    use std::collections::BTreeMap;

    fn respiration_rule(duration: f64, cooldown: f64) -> AlertRule {
        AlertRule {
            name: "respiration_critical".to_string(),
            enabled: true,
            conditions: vec![Condition {
                source: "respiration_rate".to_string(),
                field: "value".to_string(),
                operator: Operator::Lt,
                value: ConditionValue::Number(4.0),
                duration_seconds: 0.0,
            }],
            combine: CombineMode::All,
            severity: Severity::Critical,
            duration_seconds: duration,
            cooldown_seconds: cooldown,
            message: "Respiration rate {value} BPM below safe minimum".to_string(),
        }
    }

    fn engine_with(
        rules: Vec<AlertRule>,
        detectors: Vec<&str>,
    ) -> (AlertEngine, Arc<ManualClock>, Arc<EventBus>) {
        let clock = ManualClock::shared();
        let bus = Arc::new(EventBus::new());
        let config = AlertEngineConfig {
            rules,
            ..AlertEngineConfig::default()
        };
        let engine = AlertEngine::new(
            config,
            detectors.into_iter().map(String::from).collect(),
            10.0,
            Arc::clone(&bus),
            clock.clone(),
        );
        (engine, clock, bus)
    }

    fn channel(value: f64, timestamp: f64) -> FusedSignal {
        FusedSignal {
            channel: "respiration_rate".to_string(),
            value: FieldValue::Number(value),
            confidence: 0.9,
            timestamp,
            sources: vec!["radar".to_string()],
            agreement: 1.0,
            degraded: false,
        }
    }

    /// Feeds a 3 BPM respiration channel at 1 Hz and returns when the first
    /// alert fired.
    fn drive_until_fire(
        engine: &mut AlertEngine,
        clock: &ManualClock,
        seconds: u64,
    ) -> Option<f64> {
        for s in 0..=seconds {
            clock.set(s as f64);
            engine.process_channel(channel(3.0, s as f64));
            engine.tick();
            if !engine.active_alerts().is_empty() {
                return Some(s as f64);
            }
        }
        None
    }

    #[test]
    fn fires_after_dwell_duration() {
        let (mut engine, clock, _bus) = engine_with(vec![respiration_rule(10.0, 30.0)], vec![]);

        let fired_at = drive_until_fire(&mut engine, &clock, 12).expect("alert fired");
        // Fires no earlier than the dwell, within one update of it.
        assert!((fired_at - 10.0).abs() <= 1.0, "fired at {fired_at}");

        let alerts = engine.active_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert!(alerts[0].message.contains("3.0"));
    }

    #[test]
    fn cooldown_suppresses_retrigger() {
        let (mut engine, clock, _bus) = engine_with(vec![respiration_rule(10.0, 30.0)], vec![]);

        let fired_at = drive_until_fire(&mut engine, &clock, 12).unwrap();
        let first_id = engine.active_alerts()[0].id.clone();

        // Operator resolves, condition persists for another 25 s: the
        // cooldown keeps the rule quiet.
        engine.resolve_alert(&first_id);
        for s in (fired_at as u64 + 1)..=(fired_at as u64 + 25) {
            clock.set(s as f64);
            engine.process_channel(channel(3.0, s as f64));
            engine.tick();
            assert!(
                engine.active_alerts().is_empty(),
                "refired during cooldown at {s}"
            );
        }
    }

    #[test]
    fn open_alert_blocks_second_fire() {
        let (mut engine, clock, _bus) = engine_with(vec![respiration_rule(5.0, 0.0)], vec![]);
        drive_until_fire(&mut engine, &clock, 8).unwrap();
        // Keep satisfying with zero cooldown: the open alert is the gate.
        for s in 9..30 {
            clock.set(s as f64);
            engine.process_channel(channel(3.0, s as f64));
            engine.tick();
        }
        assert_eq!(engine.active_alerts().len(), 1);
    }

    #[test]
    fn auto_resolves_after_hold() {
        let (mut engine, clock, _bus) = engine_with(vec![respiration_rule(5.0, 0.0)], vec![]);
        let fired_at = drive_until_fire(&mut engine, &clock, 8).unwrap();

        // Predicate goes false; resolution needs resolve_hold_seconds (10).
        for s in (fired_at as u64 + 1)..=(fired_at as u64 + 15) {
            clock.set(s as f64);
            engine.process_channel(channel(14.0, s as f64));
            engine.tick();
        }

        assert!(engine.active_alerts().is_empty());
        let resolved = engine.history(10);
        assert_eq!(resolved.len(), 1);
        assert!(resolved[0].resolved);
        assert!(resolved[0].resolved_at.unwrap() >= resolved[0].triggered_at);
    }

    #[test]
    fn brief_recovery_does_not_resolve() {
        let (mut engine, clock, _bus) = engine_with(vec![respiration_rule(5.0, 0.0)], vec![]);
        let fired_at = drive_until_fire(&mut engine, &clock, 8).unwrap();

        // 5 s of recovery (shorter than the 10 s hold), then bad again.
        for s in 1..=5u64 {
            clock.set(fired_at + s as f64);
            engine.process_channel(channel(14.0, fired_at + s as f64));
            engine.tick();
        }
        assert_eq!(engine.active_alerts().len(), 1);

        clock.set(fired_at + 6.0);
        engine.process_channel(channel(3.0, fired_at + 6.0));
        engine.tick();
        clock.set(fired_at + 20.0);
        engine.tick();
        // Hold restarted when the predicate came back true.
        assert_eq!(engine.active_alerts().len(), 1);
    }

    #[test]
    fn acknowledge_is_idempotent() {
        let (mut engine, clock, _bus) = engine_with(vec![respiration_rule(5.0, 0.0)], vec![]);
        drive_until_fire(&mut engine, &clock, 8).unwrap();
        let id = engine.active_alerts()[0].id.clone();

        assert!(engine.acknowledge_alert(&id));
        let first = engine.active_alerts()[0].acknowledged_at;
        assert!(first.is_some());

        clock.advance(5.0);
        assert!(engine.acknowledge_alert(&id));
        assert_eq!(engine.active_alerts()[0].acknowledged_at, first);

        assert!(!engine.acknowledge_alert("no-such-alert"));
    }

    #[test]
    fn detector_offline_fires_once_and_recovers() {
        let (mut engine, clock, _bus) = engine_with(vec![], vec!["radar"]);

        clock.set(1.0);
        engine.process_event(Event::new(
            "radar",
            1.0,
            1,
            "s",
            EventState::Normal,
            0.9,
            BTreeMap::new(),
        ));
        engine.tick();
        assert!(engine.active_alerts().is_empty());

        // Past twice the 10 s timeout with no events: exactly one warning.
        clock.set(25.0);
        engine.tick();
        let alerts = engine.active_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Warning);
        assert!(alerts[0].message.contains("radar"));

        clock.set(26.0);
        engine.tick();
        assert_eq!(engine.active_alerts().len(), 1, "offline alert duplicated");

        // Events return: the synthetic alert resolves.
        engine.process_event(Event::new(
            "radar",
            26.5,
            2,
            "s",
            EventState::Normal,
            0.9,
            BTreeMap::new(),
        ));
        assert!(engine.active_alerts().is_empty());
    }

    #[test]
    fn missing_field_is_false_not_fatal() {
        let mut rule = respiration_rule(0.0, 0.0);
        rule.conditions[0].source = "no_such_channel".to_string();
        let (mut engine, clock, _bus) = engine_with(vec![rule], vec![]);

        clock.set(1.0);
        engine.tick();
        assert!(engine.active_alerts().is_empty());
    }

    #[test]
    fn stale_channels_stop_backing_rules() {
        let (mut engine, clock, _bus) = engine_with(vec![respiration_rule(2.0, 0.0)], vec![]);

        clock.set(0.0);
        engine.process_channel(channel(3.0, 0.0));
        // The channel goes silent; after channel_max_age (10 s here) the
        // engine drops it and the pending rule never fires.
        clock.set(11.0);
        engine.tick();
        clock.set(12.0);
        engine.tick();
        assert!(engine.active_alerts().is_empty());
    }

    #[test]
    fn test_alert_reaches_the_bus() {
        let (mut engine, _clock, bus) = engine_with(vec![], vec![]);
        let mut sub = bus.subscribe_alerts("test");

        engine.fire_test_alert(Severity::Warning);
        let alert = sub.try_recv().unwrap();
        assert_eq!(alert.rule_name, "test_alert");
        assert_eq!(alert.severity, Severity::Warning);
        // Test alerts are informational; they never join the active set.
        assert!(engine.active_alerts().is_empty());
    }
}
