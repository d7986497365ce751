//! Condition and rule evaluation.
//!
//! A condition references either a fused channel (preferred) or a
//! `(detector, field)` from that detector's latest event; the two reference
//! spaces are evaluated independently and never deduplicated. Null or
//! missing values evaluate false — a rule can only fire on data that exists.

use std::collections::HashMap;

use nightwatch_config::{AlertRule, CombineMode, Condition, ConditionValue, Operator};
use nightwatch_core::{Event, FieldValue, FusedSignal};

/// Where a condition's value came from this evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolved {
    /// A concrete value was found.
    Value(FieldValue),
    /// The reference does not currently resolve.
    Missing,
}

/// Looks up a condition's current value: channels first, detectors second.
pub fn resolve(
    condition: &Condition,
    channels: &HashMap<String, FusedSignal>,
    events: &HashMap<String, Event>,
) -> Resolved {
    if let Some(channel) = channels.get(&condition.source) {
        let value = match condition.field.as_str() {
            "value" => channel.value,
            "confidence" => FieldValue::Number(channel.confidence),
            "agreement" => FieldValue::Number(channel.agreement),
            "degraded" => FieldValue::Bool(channel.degraded),
            _ => FieldValue::Null,
        };
        return if value.is_null() {
            Resolved::Missing
        } else {
            Resolved::Value(value)
        };
    }

    match events
        .get(&condition.source)
        .and_then(|event| event.field(&condition.field))
    {
        Some(value) if !value.is_null() => Resolved::Value(value),
        _ => Resolved::Missing,
    }
}

/// Applies the condition's operator to a resolved value.
pub fn compare(value: FieldValue, operator: Operator, threshold: ConditionValue) -> bool {
    match (value, threshold) {
        (FieldValue::Number(v), ConditionValue::Number(t)) => match operator {
            Operator::Lt => v < t,
            Operator::Le => v <= t,
            Operator::Eq => (v - t).abs() < f64::EPSILON,
            Operator::Ne => (v - t).abs() >= f64::EPSILON,
            Operator::Ge => v >= t,
            Operator::Gt => v > t,
        },
        (FieldValue::Bool(v), ConditionValue::Bool(t)) => match operator {
            Operator::Eq => v == t,
            Operator::Ne => v != t,
            // Ordering operators are meaningless on booleans.
            _ => false,
        },
        // Mixed numeric/boolean comparisons via truthiness, == and != only.
        (FieldValue::Number(v), ConditionValue::Bool(t)) => match operator {
            Operator::Eq => (v != 0.0) == t,
            Operator::Ne => (v != 0.0) != t,
            _ => false,
        },
        (FieldValue::Bool(v), ConditionValue::Number(t)) => match operator {
            Operator::Eq => v == (t != 0.0),
            Operator::Ne => v != (t != 0.0),
            _ => false,
        },
        (FieldValue::Null, _) => false,
    }
}

/// Per-rule runtime state driving the idle → pending → firing → resolving
/// cycle.
#[derive(Debug)]
pub struct RuleRuntime {
    /// The configured rule.
    pub rule: AlertRule,
    /// Earliest time the combined predicate has been continuously true.
    pub satisfied_since: Option<f64>,
    /// Earliest time the predicate has been continuously false.
    pub unsatisfied_since: Option<f64>,
    /// Most recent firing.
    pub last_fired_at: Option<f64>,
    /// Currently open alert for this rule.
    pub active_alert: Option<String>,
    /// Per-condition dwell starts, keyed by condition index.
    condition_since: HashMap<usize, f64>,
}

impl RuleRuntime {
    /// Wraps a configured rule.
    pub fn new(rule: AlertRule) -> Self {
        Self {
            rule,
            satisfied_since: None,
            unsatisfied_since: None,
            last_fired_at: None,
            active_alert: None,
            condition_since: HashMap::new(),
        }
    }

    /// Evaluates the combined predicate at `now`, applying per-condition
    /// dwell. Returns `(predicate, missing_fields)` — the references that
    /// failed to resolve, for once-per-pair warning upstream.
    pub fn predicate(
        &mut self,
        now: f64,
        channels: &HashMap<String, FusedSignal>,
        events: &HashMap<String, Event>,
    ) -> (bool, Vec<(String, String)>) {
        let mut results = Vec::with_capacity(self.rule.conditions.len());
        let mut missing = Vec::new();

        for (i, condition) in self.rule.conditions.iter().enumerate() {
            let mut holds = match resolve(condition, channels, events) {
                Resolved::Value(value) => compare(value, condition.operator, condition.value),
                Resolved::Missing => {
                    missing.push((condition.source.clone(), condition.field.clone()));
                    false
                }
            };

            if condition.duration_seconds > 0.0 {
                if holds {
                    let since = *self.condition_since.entry(i).or_insert(now);
                    holds = now - since >= condition.duration_seconds;
                } else {
                    self.condition_since.remove(&i);
                }
            }

            results.push(holds);
        }

        let predicate = match self.rule.combine {
            CombineMode::All => !results.is_empty() && results.iter().all(|&r| r),
            CombineMode::Any => results.iter().any(|&r| r),
        };

        (predicate, missing)
    }

    /// Renders the message template with trigger-instant values. `{field}`
    /// and `{source.field}` placeholders are both recognized.
    pub fn render_message(
        &self,
        channels: &HashMap<String, FusedSignal>,
        events: &HashMap<String, Event>,
    ) -> String {
        let template = if self.rule.message.is_empty() {
            format!("Alert: {}", self.rule.name)
        } else {
            self.rule.message.clone()
        };

        let mut message = template;
        for condition in &self.rule.conditions {
            if let Resolved::Value(value) = resolve(condition, channels, events) {
                let rendered = match value {
                    FieldValue::Number(n) => format!("{n:.1}"),
                    FieldValue::Bool(b) => b.to_string(),
                    FieldValue::Null => continue,
                };
                message = message.replace(&format!("{{{}}}", condition.field), &rendered);
                message = message.replace(
                    &format!("{{{}.{}}}", condition.source, condition.field),
                    &rendered,
                );
            }
        }
        message
    }

    /// The primary source this rule watches, recorded on its alerts.
    pub fn primary_source(&self) -> String {
        self.rule
            .conditions
            .first()
            .map(|c| c.source.clone())
            .unwrap_or_default()
    }
}
