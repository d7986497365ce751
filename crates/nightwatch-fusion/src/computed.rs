//! Computed channels: named closures over the latest-value and channel
//! tables. Currently the only built-in is `apnea_risk`.

use std::collections::HashMap;

use nightwatch_config::{FusionConfig, FusionRule};
use nightwatch_core::{FieldValue, FusedSignal};
use tracing::warn;

use crate::strategy::SignalValue;

type LatestTable = HashMap<String, HashMap<String, SignalValue>>;
type ChannelTable = HashMap<String, FusedSignal>;

/// Evaluates a computed rule. Returns `None` when inputs are missing or the
/// computation name is unknown.
pub fn evaluate(
    rule: &FusionRule,
    latest: &LatestTable,
    channels: &ChannelTable,
    now: f64,
    config: &FusionConfig,
) -> Option<FusedSignal> {
    match rule.compute.as_deref() {
        Some("apnea_risk") => apnea_risk(rule, latest, channels, now, config),
        other => {
            warn!(channel = %rule.signal, compute = ?other, "unknown computed channel");
            None
        }
    }
}

fn fresh<'a>(
    latest: &'a LatestTable,
    detector: &str,
    field: &str,
    now: f64,
    max_age: f64,
) -> Option<&'a SignalValue> {
    let signal = latest.get(detector)?.get(field)?;
    if now - signal.timestamp > max_age || signal.value.is_null() {
        return None;
    }
    Some(signal)
}

/// Apnea risk: requires an occupied bed. Rises to 0.5 once silence reaches
/// 10 s, plus 0.05 per additional second of silence, plus 0.1 per BPM the
/// respiration channel sits below 6. Clamped to [0, 1].
fn apnea_risk(
    rule: &FusionRule,
    latest: &LatestTable,
    channels: &ChannelTable,
    now: f64,
    config: &FusionConfig,
) -> Option<FusedSignal> {
    let max_age = config.signal_max_age_seconds;

    let silence = fresh(latest, "audio", "silence_duration", now, max_age)?;
    let occupancy = fresh(latest, "capacitive", "bed_occupied", now, max_age)?;

    let silence_seconds = silence.value.as_number()?;
    let occupied = occupancy.value.as_bool()?;

    let mut sources = vec![silence.detector.clone(), occupancy.detector.clone()];
    let mut confidence = silence.confidence.min(occupancy.confidence);
    let mut timestamp = silence.timestamp.max(occupancy.timestamp);

    let mut risk = 0.0;
    if occupied {
        if silence_seconds >= 10.0 {
            risk += 0.5 + (silence_seconds - 10.0) * 0.05;
        }

        if let Some(resp) = channels.get("respiration_rate") {
            if let Some(rate) = resp.number() {
                if rate < 6.0 {
                    risk += (6.0 - rate) * 0.1;
                    sources.extend(resp.sources.iter().cloned());
                    confidence = confidence.min(resp.confidence);
                    timestamp = timestamp.max(resp.timestamp);
                }
            }
        }
    }

    sources.sort();
    sources.dedup();

    Some(FusedSignal {
        channel: rule.signal.clone(),
        value: FieldValue::Number(risk.clamp(0.0, 1.0)),
        confidence,
        timestamp,
        sources,
        agreement: 1.0,
        degraded: false,
    })
}
