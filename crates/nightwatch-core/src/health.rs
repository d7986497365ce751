//! Health reporting types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Status of one component (detector, fusion, notifier, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Producing data at its expected rate.
    Online,
    /// Alive but late, lossy, or partially failing.
    Degraded,
    /// Not producing data at all.
    Offline,
}

/// Overall system status derived from component states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemStatus {
    /// All components online.
    Online,
    /// At least one component degraded or offline.
    Degraded,
    /// Nothing is producing data.
    Error,
}

/// Health of a single component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Current status.
    pub status: ComponentStatus,
    /// Monotonic time of the last event/update from this component.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<f64>,
    /// Transient error count since startup.
    #[serde(default)]
    pub transient_errors: u64,
}

/// Point-in-time system health, published on the stream as `status` frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Derived overall status.
    pub status: SystemStatus,
    /// Per-component health keyed by component name.
    pub components: BTreeMap<String, ComponentHealth>,
    /// Per-subscriber bus drop counters.
    pub bus_dropped: BTreeMap<String, u64>,
    /// Number of currently open alerts.
    pub active_alerts: usize,
    /// Whether external notification is paused.
    pub paused: bool,
}

impl HealthSnapshot {
    /// Derives the overall status from component states: `Error` when every
    /// component is offline, `Degraded` when any is degraded or offline,
    /// `Online` otherwise.
    pub fn derive_status(components: &BTreeMap<String, ComponentHealth>) -> SystemStatus {
        if components.is_empty() {
            return SystemStatus::Degraded;
        }
        let all_offline = components
            .values()
            .all(|c| c.status == ComponentStatus::Offline);
        if all_offline {
            return SystemStatus::Error;
        }
        let any_bad = components
            .values()
            .any(|c| c.status != ComponentStatus::Online);
        if any_bad {
            SystemStatus::Degraded
        } else {
            SystemStatus::Online
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(status: ComponentStatus) -> ComponentHealth {
        ComponentHealth {
            status,
            last_update: Some(1.0),
            transient_errors: 0,
        }
    }

    #[test]
    fn status_derivation() {
        let mut components = BTreeMap::new();
        components.insert("radar".to_string(), component(ComponentStatus::Online));
        components.insert("audio".to_string(), component(ComponentStatus::Online));
        assert_eq!(
            HealthSnapshot::derive_status(&components),
            SystemStatus::Online
        );

        components.insert("bcg".to_string(), component(ComponentStatus::Degraded));
        assert_eq!(
            HealthSnapshot::derive_status(&components),
            SystemStatus::Degraded
        );

        let mut all_down = BTreeMap::new();
        all_down.insert("radar".to_string(), component(ComponentStatus::Offline));
        all_down.insert("audio".to_string(), component(ComponentStatus::Offline));
        assert_eq!(
            HealthSnapshot::derive_status(&all_down),
            SystemStatus::Error
        );
    }
}
