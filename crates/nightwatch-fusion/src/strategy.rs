//! Fusion strategies.
//!
//! Pure functions from fresh [`SignalValue`] contributors to a
//! [`FusedSignal`]; the engine handles gathering, staleness, and emission.

use nightwatch_config::{FusionConfig, FusionRule, FusionStrategy};
use nightwatch_core::{FieldValue, FusedSignal};
use nightwatch_dsp::stats::std_dev;

/// The latest reading of one feature from one detector, as tracked by the
/// fusion engine's latest-value table.
#[derive(Debug, Clone)]
pub struct SignalValue {
    /// The reading.
    pub value: FieldValue,
    /// Detector confidence at the time of the reading.
    pub confidence: f64,
    /// Monotonic acquisition timestamp.
    pub timestamp: f64,
    /// Producing detector.
    pub detector: String,
    /// Feature name.
    pub field: String,
    /// Weight assigned by the channel's source spec.
    pub weight: f64,
}

/// Applies the rule's strategy to the gathered contributors.
pub fn fuse(rule: &FusionRule, sources: &[SignalValue], config: &FusionConfig) -> FusedSignal {
    match rule.strategy {
        FusionStrategy::WeightedAverage => weighted_average(rule, sources, config),
        FusionStrategy::BestConfidence => best_confidence(rule, sources),
        FusionStrategy::Voting => voting(rule, sources),
        FusionStrategy::Any => any(rule, sources),
        FusionStrategy::All => all(rule, sources),
        FusionStrategy::Max => max_value(rule, sources),
        // The engine routes computed rules elsewhere.
        FusionStrategy::Computed => empty(rule, sources),
    }
}

/// Change-detection: emit when the value, confidence, or contributor set
/// meaningfully moved.
pub fn should_emit(old: &FusedSignal, new: &FusedSignal) -> bool {
    if old.value != new.value || old.degraded != new.degraded {
        return true;
    }
    if (old.confidence - new.confidence).abs() > 0.1 {
        return true;
    }
    let mut old_sources = old.sources.clone();
    let mut new_sources = new.sources.clone();
    old_sources.sort();
    new_sources.sort();
    old_sources != new_sources
}

fn latest_timestamp(sources: &[SignalValue]) -> f64 {
    sources
        .iter()
        .map(|s| s.timestamp)
        .fold(f64::NEG_INFINITY, f64::max)
}

fn empty(rule: &FusionRule, sources: &[SignalValue]) -> FusedSignal {
    FusedSignal {
        channel: rule.signal.clone(),
        value: FieldValue::Null,
        confidence: 0.0,
        timestamp: latest_timestamp(sources),
        sources: Vec::new(),
        agreement: 0.0,
        degraded: true,
    }
}

/// v = Σ(vᵢ·wᵢ·cᵢ) / Σ(wᵢ·cᵢ), with agreement scoring and the
/// bonus/penalty/single-source confidence adjustments.
fn weighted_average(
    rule: &FusionRule,
    sources: &[SignalValue],
    config: &FusionConfig,
) -> FusedSignal {
    let numeric: Vec<&SignalValue> = sources
        .iter()
        .filter(|s| s.value.as_number().is_some())
        .collect();
    if numeric.is_empty() {
        return empty(rule, sources);
    }

    let values: Vec<f64> = numeric.iter().filter_map(|s| s.value.as_number()).collect();
    let denominator: f64 = numeric.iter().map(|s| s.weight * s.confidence).sum();
    if denominator <= 0.0 {
        return empty(rule, sources);
    }
    let combined: f64 = numeric
        .iter()
        .map(|s| s.value.as_number().unwrap_or(0.0) * s.weight * s.confidence)
        .sum::<f64>()
        / denominator;

    let total_weight: f64 = numeric.iter().map(|s| s.weight).sum();
    let base_confidence: f64 = numeric
        .iter()
        .map(|s| s.confidence * s.weight)
        .sum::<f64>()
        / total_weight;

    let agreement = if values.len() < 2 {
        1.0
    } else {
        (1.0 - std_dev(&values) / rule.max_deviation).clamp(0.0, 1.0)
    };

    let mut confidence = base_confidence;
    if config.cross_validation_enabled && values.len() >= 2 {
        if agreement >= rule.agreement_threshold {
            confidence += config.agreement_bonus;
        } else if agreement < 0.5 {
            confidence -= config.disagreement_penalty;
        }
    }
    if numeric.len() == 1 {
        confidence -= 0.1;
    }
    let confidence = confidence.clamp(0.0, 1.0);

    // Irreconcilable spread: degrade and let the highest-weight source win.
    let spread = values.iter().cloned().fold(f64::MIN, f64::max)
        - values.iter().cloned().fold(f64::MAX, f64::min);
    let disagreed = values.len() >= 2 && spread > rule.disagreement_limit;

    let value = if disagreed {
        let winner = numeric
            .iter()
            .max_by(|a, b| {
                (a.weight, a.confidence)
                    .partial_cmp(&(b.weight, b.confidence))
                    .unwrap()
            })
            .unwrap();
        winner.value.as_number().unwrap_or(combined)
    } else {
        combined
    };

    FusedSignal {
        channel: rule.signal.clone(),
        value: FieldValue::Number((value * 100.0).round() / 100.0),
        confidence,
        timestamp: latest_timestamp(sources),
        sources: numeric.iter().map(|s| s.detector.clone()).collect(),
        agreement,
        degraded: disagreed || numeric.len() == 1,
    }
}

/// Pass through the most confident contributor.
fn best_confidence(rule: &FusionRule, sources: &[SignalValue]) -> FusedSignal {
    let best = sources
        .iter()
        .max_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap())
        .expect("gather guarantees at least one source");

    FusedSignal {
        channel: rule.signal.clone(),
        value: best.value,
        confidence: best.confidence,
        timestamp: latest_timestamp(sources),
        sources: vec![best.detector.clone()],
        agreement: 1.0,
        degraded: sources.len() == 1,
    }
}

/// Boolean majority; confidence = |true − false| / total.
fn voting(rule: &FusionRule, sources: &[SignalValue]) -> FusedSignal {
    let votes_true = sources
        .iter()
        .filter(|s| s.value.as_bool().unwrap_or(false))
        .count();
    let votes_false = sources.len() - votes_true;
    let value = votes_true > votes_false;

    let agreement = if sources.is_empty() {
        0.0
    } else {
        (votes_true as f64 - votes_false as f64).abs() / sources.len() as f64
    };

    FusedSignal {
        channel: rule.signal.clone(),
        value: FieldValue::Bool(value),
        confidence: agreement,
        timestamp: latest_timestamp(sources),
        sources: sources.iter().map(|s| s.detector.clone()).collect(),
        agreement,
        degraded: sources.len() == 1,
    }
}

/// Boolean OR; confidence = max confidence among true voters, else 0.
fn any(rule: &FusionRule, sources: &[SignalValue]) -> FusedSignal {
    let true_voters: Vec<&SignalValue> = sources
        .iter()
        .filter(|s| s.value.as_bool().unwrap_or(false))
        .collect();
    let value = !true_voters.is_empty();

    let (confidence, contributors) = if value {
        (
            true_voters
                .iter()
                .map(|s| s.confidence)
                .fold(0.0, f64::max),
            true_voters.iter().map(|s| s.detector.clone()).collect(),
        )
    } else {
        (0.0, sources.iter().map(|s| s.detector.clone()).collect())
    };

    let agreement = if value {
        true_voters.len() as f64 / sources.len() as f64
    } else {
        1.0
    };

    FusedSignal {
        channel: rule.signal.clone(),
        value: FieldValue::Bool(value),
        confidence,
        timestamp: latest_timestamp(sources),
        sources: contributors,
        agreement,
        degraded: sources.len() == 1,
    }
}

/// Boolean AND; min confidence when all true, else 0.
fn all(rule: &FusionRule, sources: &[SignalValue]) -> FusedSignal {
    let value = sources.iter().all(|s| s.value.as_bool().unwrap_or(false));
    let confidence = if value {
        sources.iter().map(|s| s.confidence).fold(1.0, f64::min)
    } else {
        0.0
    };

    FusedSignal {
        channel: rule.signal.clone(),
        value: FieldValue::Bool(value),
        confidence,
        timestamp: latest_timestamp(sources),
        sources: sources.iter().map(|s| s.detector.clone()).collect(),
        agreement: if value { 1.0 } else { 0.0 },
        degraded: sources.len() == 1,
    }
}

/// Maximum numeric contributor (movement intensity).
fn max_value(rule: &FusionRule, sources: &[SignalValue]) -> FusedSignal {
    let numeric: Vec<&SignalValue> = sources
        .iter()
        .filter(|s| s.value.as_number().is_some())
        .collect();
    let Some(best) = numeric
        .iter()
        .max_by(|a, b| {
            a.value
                .as_number()
                .partial_cmp(&b.value.as_number())
                .unwrap()
        })
    else {
        return empty(rule, sources);
    };

    FusedSignal {
        channel: rule.signal.clone(),
        value: best.value,
        confidence: best.confidence,
        timestamp: latest_timestamp(sources),
        sources: vec![best.detector.clone()],
        agreement: 1.0,
        degraded: numeric.len() == 1,
    }
}
