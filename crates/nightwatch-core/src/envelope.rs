//! External framing: stream envelopes and control requests.
//!
//! The local stream endpoint emits [`StreamEnvelope`]s — a type tag plus a
//! JSON payload — over any framed, ordered-per-producer transport. The control
//! inbox accepts [`ControlRequest`]s; anything that fails to parse is rejected
//! with an error reply rather than ignored.

use serde::{Deserialize, Serialize};

use crate::alert::{Alert, Severity};
use crate::event::{Event, FusedSignal};
use crate::health::HealthSnapshot;

/// One message on the external stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum StreamEnvelope {
    /// Raw detector event.
    Event(Event),
    /// Fused channel update.
    Channel(FusedSignal),
    /// Alert record (firing, acknowledgment, or resolution).
    Alert(Alert),
    /// Periodic health/status snapshot.
    Status(HealthSnapshot),
}

impl StreamEnvelope {
    /// Serializes the envelope to one JSON frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// A request on the control topic. All operations are idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Suppress external notification for the given number of minutes.
    Pause {
        /// Pause duration in minutes.
        minutes: u64,
    },
    /// Lift an active pause.
    Resume,
    /// Acknowledge an open alert.
    Acknowledge {
        /// Id of the alert to acknowledge.
        alert_id: String,
    },
    /// Resolve an open alert (operator override of automatic resolution).
    Resolve {
        /// Id of the alert to resolve.
        alert_id: String,
    },
    /// Fire a synthetic alert to exercise the notification path.
    TestAlert {
        /// Severity of the synthetic alert.
        severity: Severity,
    },
}

impl ControlRequest {
    /// Parses a control request, rejecting unknown types.
    pub fn from_json(data: &str) -> Result<Self, crate::CoreError> {
        serde_json::from_str(data)
            .map_err(|e| crate::CoreError::UnknownControl(e.to_string()))
    }
}

/// Reply sent back for a control request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlReply {
    /// Whether the request was accepted.
    pub ok: bool,
    /// Error description when rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlReply {
    /// Success reply.
    pub fn accepted() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    /// Rejection with a reason.
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_requests_parse() {
        let pause = ControlRequest::from_json(r#"{"type":"pause","minutes":30}"#).unwrap();
        assert_eq!(pause, ControlRequest::Pause { minutes: 30 });

        let resume = ControlRequest::from_json(r#"{"type":"resume"}"#).unwrap();
        assert_eq!(resume, ControlRequest::Resume);

        let ack =
            ControlRequest::from_json(r#"{"type":"acknowledge","alert_id":"abc"}"#).unwrap();
        assert_eq!(
            ack,
            ControlRequest::Acknowledge {
                alert_id: "abc".to_string()
            }
        );

        let test =
            ControlRequest::from_json(r#"{"type":"test_alert","severity":"critical"}"#).unwrap();
        assert_eq!(
            test,
            ControlRequest::TestAlert {
                severity: Severity::Critical
            }
        );
    }

    #[test]
    fn unknown_control_type_is_rejected() {
        let err = ControlRequest::from_json(r#"{"type":"self_destruct"}"#);
        assert!(matches!(err, Err(crate::CoreError::UnknownControl(_))));

        let err = ControlRequest::from_json(r#"{"type":"pause"}"#);
        assert!(err.is_err(), "pause without minutes must not parse");
    }

    #[test]
    fn envelope_carries_type_tag() {
        let alert = Alert::create(
            "rule",
            Severity::Warning,
            "src",
            "msg",
            chrono::Utc::now(),
            1.0,
        );
        let json = StreamEnvelope::Alert(alert).to_json().unwrap();
        assert!(json.starts_with(r#"{"type":"alert","payload":"#));

        let parsed: StreamEnvelope = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, StreamEnvelope::Alert(_)));
    }
}
