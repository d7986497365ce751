//! Alert records and severity levels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Alert severity.
///
/// Rules are configured as `warning` or `critical`; `info` exists for test
/// notifications and synthetic status alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational only.
    Info,
    /// Needs attention, not immediately dangerous.
    Warning,
    /// Immediate attention required.
    Critical,
}

impl Severity {
    /// Parses a severity name as it appears in configuration.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Some(Severity::Info),
            "warning" => Some(Severity::Warning),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// An alert produced by the rule engine.
///
/// Invariants: `resolved` implies `resolved_at >= triggered_at`;
/// `acknowledged_at`, when present, falls between trigger and resolution.
/// Wall-clock stamps are for records only — all timing decisions run on the
/// monotonic clock (`triggered_mono`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Stable id, deterministic for a given rule and trigger bucket.
    pub id: String,
    /// Name of the rule that fired.
    pub rule_name: String,
    /// Severity the rule was configured with.
    pub severity: Severity,
    /// The channel or detector the rule primarily watched.
    pub source: String,
    /// Rendered message with trigger-instant values substituted.
    pub message: String,
    /// Wall-clock trigger stamp.
    pub triggered_at: DateTime<Utc>,
    /// Monotonic trigger time, seconds since the process epoch.
    pub triggered_mono: f64,
    /// Wall-clock acknowledgment stamp, if acknowledged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// Whether the alert has been resolved.
    pub resolved: bool,
    /// Wall-clock resolution stamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Delivery failures recorded by the notifier, one entry per exhausted sink.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delivery_failures: Vec<String>,
}

/// Namespace for deterministic alert ids.
const ALERT_NAMESPACE: Uuid = Uuid::NAMESPACE_OID;

impl Alert {
    /// Creates a new open alert.
    ///
    /// The id is a v5 UUID over `(rule_name, trigger millisecond bucket)`, so
    /// retries and re-emissions of the same firing share one id.
    pub fn create(
        rule_name: impl Into<String>,
        severity: Severity,
        source: impl Into<String>,
        message: impl Into<String>,
        triggered_at: DateTime<Utc>,
        triggered_mono: f64,
    ) -> Self {
        let rule_name = rule_name.into();
        let bucket_ms = (triggered_mono * 1000.0).round() as u64;
        let id = Uuid::new_v5(
            &ALERT_NAMESPACE,
            format!("{rule_name}:{bucket_ms}").as_bytes(),
        )
        .to_string();

        Self {
            id,
            rule_name,
            severity,
            source: source.into(),
            message: message.into(),
            triggered_at,
            triggered_mono,
            acknowledged_at: None,
            resolved: false,
            resolved_at: None,
            delivery_failures: Vec::new(),
        }
    }

    /// Marks the alert acknowledged. Idempotent — the first stamp wins.
    pub fn acknowledge(&mut self, at: DateTime<Utc>) -> bool {
        if self.acknowledged_at.is_some() {
            return false;
        }
        self.acknowledged_at = Some(at);
        true
    }

    /// Marks the alert resolved. Idempotent.
    pub fn resolve(&mut self, at: DateTime<Utc>) -> bool {
        if self.resolved {
            return false;
        }
        self.resolved = true;
        self.resolved_at = Some(at);
        true
    }

    /// True while the alert is neither resolved.
    pub fn is_active(&self) -> bool {
        !self.resolved
    }

    /// Records a delivery failure from a sink.
    pub fn record_delivery_failure(&mut self, sink: &str, reason: &str) {
        self.delivery_failures.push(format!("{sink}: {reason}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_alert() -> Alert {
        Alert::create(
            "low_respiration",
            Severity::Critical,
            "respiration_rate",
            "Respiration rate 3.0 BPM below 4",
            Utc::now(),
            12.345,
        )
    }

    #[test]
    fn id_is_deterministic_for_same_bucket() {
        let now = Utc::now();
        let a = Alert::create("rule", Severity::Warning, "ch", "m", now, 10.0);
        let b = Alert::create("rule", Severity::Warning, "ch", "m", now, 10.0);
        let c = Alert::create("rule", Severity::Warning, "ch", "m", now, 10.5);
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn acknowledge_is_idempotent() {
        let mut alert = make_alert();
        let first = Utc::now();
        assert!(alert.acknowledge(first));
        let stamped = alert.acknowledged_at;

        assert!(!alert.acknowledge(Utc::now()));
        assert_eq!(alert.acknowledged_at, stamped);
    }

    #[test]
    fn resolve_sets_stamp_once() {
        let mut alert = make_alert();
        assert!(alert.is_active());
        assert!(alert.resolve(Utc::now()));
        assert!(!alert.is_active());
        assert!(alert.resolved_at.unwrap() >= alert.triggered_at);
        assert!(!alert.resolve(Utc::now()));
    }

    #[test]
    fn severity_ordering_and_parse() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
        assert_eq!(Severity::parse("CRITICAL"), Some(Severity::Critical));
        assert_eq!(Severity::parse("bogus"), None);
    }

    #[test]
    fn roundtrip_preserves_optional_fields() {
        let mut alert = make_alert();
        alert.acknowledge(Utc::now());

        let json = serde_json::to_string(&alert).unwrap();
        let restored: Alert = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, alert);
        assert_eq!(serde_json::to_string(&restored).unwrap(), json);
    }
}
