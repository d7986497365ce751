//! The canonical event model.
//!
//! Detectors emit [`Event`]s; the fusion engine combines them into
//! [`FusedSignal`] channel updates. Both are plain serde types so the same
//! records travel the in-process bus and the external stream endpoint.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Detector claim strength for a single event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventState {
    /// Everything within expected bounds.
    Normal,
    /// Something looks off but below alert level.
    Warning,
    /// The detector itself considers this alarming.
    Alert,
    /// Not enough recent data to make a claim.
    Uncertain,
}

/// A single feature value inside an event.
///
/// `Null` marks a feature the detector could not compute this tick; rules and
/// fusion treat it as absent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Boolean feature (presence, bed_occupied, ...).
    Bool(bool),
    /// Numeric feature (rates, durations, intensities).
    Number(f64),
    /// Feature not available this tick.
    Null,
}

impl FieldValue {
    /// Numeric view, `None` for booleans and nulls.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Boolean view. Numbers are truthy when non-zero, matching how boolean
    /// fusion strategies consume mixed sources.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            FieldValue::Number(n) => Some(*n != 0.0),
            FieldValue::Null => None,
        }
    }

    /// True when the feature carries no value.
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Number(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<Option<f64>> for FieldValue {
    fn from(v: Option<f64>) -> Self {
        v.map_or(FieldValue::Null, FieldValue::Number)
    }
}

/// The canonical unit produced by a detector.
///
/// For a given `(detector, session_id)` pair, `sequence` strictly increases
/// and `timestamp` is non-decreasing. `timestamp` is monotonic seconds since
/// the orchestrator epoch with microsecond resolution; wall-clock time never
/// appears here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Stable detector identifier (`radar`, `audio`, `bcg`, `capacitive`).
    pub detector: String,
    /// Monotonic seconds since the process epoch.
    pub timestamp: f64,
    /// Per-session strictly increasing counter.
    pub sequence: u64,
    /// Identifies one contiguous detector run; rotates on reconnect.
    pub session_id: String,
    /// Detector claim strength.
    pub state: EventState,
    /// Belief in this reading, [0, 1].
    pub confidence: f64,
    /// Feature map; schema depends on the detector.
    pub value: BTreeMap<String, FieldValue>,
}

impl Event {
    /// Builds an event, clamping confidence into [0, 1] and rounding the
    /// timestamp to microsecond resolution.
    pub fn new(
        detector: impl Into<String>,
        timestamp: f64,
        sequence: u64,
        session_id: impl Into<String>,
        state: EventState,
        confidence: f64,
        value: BTreeMap<String, FieldValue>,
    ) -> Self {
        Self {
            detector: detector.into(),
            timestamp: (timestamp * 1e6).round() / 1e6,
            sequence,
            session_id: session_id.into(),
            state,
            confidence: confidence.clamp(0.0, 1.0),
            value,
        }
    }

    /// Looks up a numeric feature.
    pub fn number(&self, field: &str) -> Option<f64> {
        self.value.get(field).and_then(FieldValue::as_number)
    }

    /// Looks up a boolean feature.
    pub fn boolean(&self, field: &str) -> Option<bool> {
        self.value.get(field).and_then(FieldValue::as_bool)
    }

    /// Raw feature lookup.
    pub fn field(&self, field: &str) -> Option<FieldValue> {
        self.value.get(field).copied()
    }

    /// Serializes to a JSON line. The feature map is a `BTreeMap`, so
    /// re-serializing a parsed event reproduces the bytes.
    pub fn to_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses an event from its JSON representation.
    pub fn from_json(data: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(data)?)
    }
}

/// A named logical signal produced by the fusion engine, independent of which
/// physical sensor currently supplies it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedSignal {
    /// Channel name (`respiration_rate`, `presence`, `apnea_risk`, ...).
    pub channel: String,
    /// Combined value.
    pub value: FieldValue,
    /// Combined confidence after agreement adjustments, [0, 1].
    pub confidence: f64,
    /// Monotonic timestamp of the most recent contributing input.
    pub timestamp: f64,
    /// Detector ids that contributed.
    pub sources: Vec<String>,
    /// How consistent contributors were, [0, 1].
    pub agreement: f64,
    /// Fewer sources than ideal, or sustained disagreement.
    pub degraded: bool,
}

impl FusedSignal {
    /// Republishes the channel as an event under the `fusion.` namespace so
    /// alert rules can reference channels and detectors uniformly.
    pub fn to_event(&self) -> Event {
        let mut value = BTreeMap::new();
        value.insert("value".to_string(), self.value);
        value.insert(
            "source_count".to_string(),
            FieldValue::Number(self.sources.len() as f64),
        );
        value.insert("agreement".to_string(), FieldValue::Number(self.agreement));
        value.insert("degraded".to_string(), FieldValue::Bool(self.degraded));
        Event::new(
            format!("fusion.{}", self.channel),
            self.timestamp,
            0,
            "",
            EventState::Normal,
            self.confidence,
            value,
        )
    }

    /// Numeric view of the channel value.
    pub fn number(&self) -> Option<f64> {
        self.value.as_number()
    }

    /// Boolean view of the channel value.
    pub fn boolean(&self) -> Option<bool> {
        self.value.as_bool()
    }
}

/// Guards the per-(detector, session) event-stream invariants.
///
/// Consumers run incoming events through the guard; a violating event is
/// dropped and logged at warn. The emitting detector rotates its session on
/// the next reconnect, which naturally resets the tracked state.
#[derive(Debug, Default)]
pub struct SequenceGuard {
    last: HashMap<(String, String), (u64, f64)>,
}

impl SequenceGuard {
    /// Creates an empty guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits or rejects an event. Returns `Ok(())` when the event preserves
    /// sequence and timestamp monotonicity for its session.
    pub fn admit(&mut self, event: &Event) -> CoreResult<()> {
        let key = (event.detector.clone(), event.session_id.clone());

        if let Some(&(last_seq, last_ts)) = self.last.get(&key) {
            if event.sequence <= last_seq {
                return Err(CoreError::invalid_event(
                    &event.detector,
                    format!(
                        "sequence {} not after {} in session {}",
                        event.sequence, last_seq, event.session_id
                    ),
                ));
            }
            if event.timestamp < last_ts {
                return Err(CoreError::invalid_event(
                    &event.detector,
                    format!(
                        "timestamp {:.6} before {:.6} in session {}",
                        event.timestamp, last_ts, event.session_id
                    ),
                ));
            }
        }

        self.last.insert(key, (event.sequence, event.timestamp));
        Ok(())
    }

    /// Forgets all sessions for a detector (used when it reconnects).
    pub fn forget(&mut self, detector: &str) {
        self.last.retain(|(d, _), _| d != detector);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_event(detector: &str, sequence: u64, timestamp: f64) -> Event {
        let mut value = BTreeMap::new();
        value.insert("respiration_rate".to_string(), FieldValue::Number(14.0));
        value.insert("presence".to_string(), FieldValue::Bool(true));
        Event::new(
            detector,
            timestamp,
            sequence,
            "session-1",
            EventState::Normal,
            0.9,
            value,
        )
    }

    #[test]
    fn confidence_is_clamped() {
        let event = Event::new(
            "radar",
            1.0,
            1,
            "s",
            EventState::Normal,
            1.5,
            BTreeMap::new(),
        );
        assert_eq!(event.confidence, 1.0);

        let event = Event::new(
            "radar",
            1.0,
            1,
            "s",
            EventState::Normal,
            -0.2,
            BTreeMap::new(),
        );
        assert_eq!(event.confidence, 0.0);
    }

    #[test]
    fn field_accessors() {
        let event = make_event("radar", 1, 1.0);
        assert_eq!(event.number("respiration_rate"), Some(14.0));
        assert_eq!(event.boolean("presence"), Some(true));
        assert_eq!(event.number("missing"), None);
    }

    #[test]
    fn null_fields_read_as_absent() {
        let mut value = BTreeMap::new();
        value.insert("heart_rate".to_string(), FieldValue::Null);
        let event = Event::new("bcg", 1.0, 1, "s", EventState::Uncertain, 0.0, value);
        assert_eq!(event.number("heart_rate"), None);
        assert!(event.field("heart_rate").unwrap().is_null());
    }

    #[test]
    fn serialization_roundtrip_is_byte_stable() {
        let event = make_event("radar", 42, 123.456789);
        let json = event.to_json().unwrap();
        let restored = Event::from_json(&json).unwrap();
        assert_eq!(restored, event);
        assert_eq!(restored.to_json().unwrap(), json);
    }

    #[test]
    fn sequence_guard_rejects_regressions() {
        let mut guard = SequenceGuard::new();
        guard.admit(&make_event("radar", 1, 1.0)).unwrap();
        guard.admit(&make_event("radar", 2, 1.1)).unwrap();

        assert!(guard.admit(&make_event("radar", 2, 1.2)).is_err());
        assert!(guard.admit(&make_event("radar", 3, 0.5)).is_err());

        // A different session starts fresh.
        let mut other = make_event("radar", 1, 0.1);
        other.session_id = "session-2".to_string();
        guard.admit(&other).unwrap();
    }

    #[test]
    fn fused_signal_republishes_as_event() {
        let fused = FusedSignal {
            channel: "respiration_rate".to_string(),
            value: FieldValue::Number(13.8),
            confidence: 0.91,
            timestamp: 10.0,
            sources: vec!["radar".to_string(), "audio".to_string()],
            agreement: 0.95,
            degraded: false,
        };

        let event = fused.to_event();
        assert_eq!(event.detector, "fusion.respiration_rate");
        assert_eq!(event.number("value"), Some(13.8));
        assert_eq!(event.number("source_count"), Some(2.0));
        assert_eq!(event.boolean("degraded"), Some(false));
    }
}
