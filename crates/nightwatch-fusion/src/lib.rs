//! # Nightwatch Fusion
//!
//! Combines detector signals into named logical channels with redundancy,
//! cross-validation, and graceful degradation. The engine keeps the latest
//! value per `(detector, field)`, filters out stale inputs, applies the
//! channel's strategy, and publishes [`FusedSignal`] updates on the bus —
//! both on the `channels` topic and republished as `fusion.<channel>` events
//! for uniform downstream consumption.

#![forbid(unsafe_code)]

mod computed;
mod strategy;

pub use strategy::SignalValue;

use std::collections::HashMap;
use std::sync::Arc;

use nightwatch_config::{FusionConfig, FusionRule, FusionStrategy};
use nightwatch_core::{Clock, Event, EventBus, FusedSignal, SequenceGuard};
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

/// The fusion engine. Single writer (its own task); readers take snapshots.
pub struct FusionEngine {
    config: FusionConfig,
    clock: Arc<dyn Clock>,
    bus: Arc<EventBus>,
    latest: HashMap<String, HashMap<String, SignalValue>>,
    channels: Arc<RwLock<HashMap<String, FusedSignal>>>,
    guard: SequenceGuard,
}

impl FusionEngine {
    /// Creates an engine over the given bus and clock.
    pub fn new(config: FusionConfig, bus: Arc<EventBus>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            bus,
            latest: HashMap::new(),
            channels: Arc::new(RwLock::new(HashMap::new())),
            guard: SequenceGuard::new(),
        }
    }

    /// Shared handle to the channel table for health/API readers.
    pub fn channels_handle(&self) -> Arc<RwLock<HashMap<String, FusedSignal>>> {
        Arc::clone(&self.channels)
    }

    /// Current value of one channel.
    pub fn get_channel(&self, name: &str) -> Option<FusedSignal> {
        self.channels.read().get(name).cloned()
    }

    /// Ingests one detector event: updates the latest-value table and
    /// recomputes every channel that references one of the updated fields.
    pub fn process_event(&mut self, event: &Event) {
        // Fused events come back around on the same topic; never re-ingest.
        if event.detector.starts_with("fusion.") {
            return;
        }

        // Non-monotonic events violate the session invariant; drop them and
        // let the emitting detector rotate its session.
        if let Err(e) = self.guard.admit(event) {
            warn!(error = %e, "dropping invariant-violating event");
            return;
        }

        let row = self.latest.entry(event.detector.clone()).or_default();
        for (field, &value) in &event.value {
            row.insert(
                field.clone(),
                SignalValue {
                    value,
                    confidence: event.confidence,
                    timestamp: event.timestamp,
                    detector: event.detector.clone(),
                    field: field.clone(),
                    weight: 1.0,
                },
            );
        }

        let rules: Vec<FusionRule> = self
            .config
            .rules
            .iter()
            .filter(|rule| {
                rule.strategy == FusionStrategy::Computed
                    || rule
                        .sources
                        .iter()
                        .any(|s| s.detector == event.detector && event.value.contains_key(&s.field))
            })
            .cloned()
            .collect();

        for rule in rules {
            self.recompute(&rule);
        }
    }

    /// Marks channels degraded once their inputs age past
    /// `signal_max_age_seconds` and evicts them after twice that.
    pub fn sweep(&mut self) {
        let now = self.clock.now_monotonic();
        let max_age = self.config.signal_max_age_seconds;

        let mut to_republish = Vec::new();
        {
            let mut channels = self.channels.write();
            channels.retain(|name, signal| {
                let age = now - signal.timestamp;
                if age > 2.0 * max_age {
                    debug!(channel = %name, age, "channel evicted");
                    return false;
                }
                if age > max_age && !signal.degraded {
                    signal.degraded = true;
                    to_republish.push(signal.clone());
                }
                true
            });
        }
        for signal in to_republish {
            debug!(channel = %signal.channel, "channel degraded (stale inputs)");
            self.publish(&signal);
        }
    }

    /// Event-loop entry: consumes the bus until shutdown, sweeping for
    /// staleness once a second.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut events = self.bus.subscribe_events("fusion");
        let mut sweep = tokio::time::interval(std::time::Duration::from_secs(1));
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = sweep.tick() => self.sweep(),
                event = events.recv() => match event {
                    Some(event) => self.process_event(&event),
                    None => break,
                },
            }
        }
        debug!("fusion engine stopped");
    }

    fn recompute(&mut self, rule: &FusionRule) {
        let now = self.clock.now_monotonic();

        let fused = if rule.strategy == FusionStrategy::Computed {
            computed::evaluate(rule, &self.latest, &self.channels.read(), now, &self.config)
        } else {
            let sources = self.gather_sources(rule, now);
            if sources.len() < rule.min_sources {
                trace!(channel = %rule.signal, have = sources.len(), need = rule.min_sources,
                       "not enough fresh sources");
                return;
            }
            Some(strategy::fuse(rule, &sources, &self.config))
        };

        let Some(fused) = fused else { return };

        let should_emit = {
            let channels = self.channels.read();
            channels
                .get(&rule.signal)
                .map_or(true, |old| strategy::should_emit(old, &fused))
        };

        if should_emit {
            self.channels
                .write()
                .insert(rule.signal.clone(), fused.clone());
            self.publish(&fused);
        } else {
            // Keep the fresher timestamp so staleness tracks input age.
            if let Some(existing) = self.channels.write().get_mut(&rule.signal) {
                existing.timestamp = fused.timestamp;
            }
        }
    }

    fn gather_sources(&self, rule: &FusionRule, now: f64) -> Vec<SignalValue> {
        let max_age = self.config.signal_max_age_seconds;
        let mut sources = Vec::with_capacity(rule.sources.len());

        for spec in &rule.sources {
            let Some(signal) = self
                .latest
                .get(&spec.detector)
                .and_then(|row| row.get(&spec.field))
            else {
                continue;
            };
            if now - signal.timestamp > max_age {
                continue;
            }
            if signal.value.is_null() {
                continue;
            }
            let mut signal = signal.clone();
            signal.weight = spec.weight;
            sources.push(signal);
        }

        sources
    }

    fn publish(&self, fused: &FusedSignal) {
        trace!(channel = %fused.channel, value = ?fused.value, confidence = fused.confidence,
               degraded = fused.degraded, "channel update");
        self.bus.publish_channel(fused.clone());
        self.bus.publish_event(fused.to_event());
    }
}
