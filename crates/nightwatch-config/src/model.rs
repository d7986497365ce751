//! Typed configuration model.
//!
//! Every section has serde defaults so partial files work; `validate()`
//! enforces the semantic constraints the types cannot.

use std::collections::BTreeMap;

use nightwatch_core::Severity;
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Complete Nightwatch configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NightwatchConfig {
    /// Process-level settings.
    pub system: SystemConfig,
    /// Sensor detector settings.
    pub detectors: DetectorsConfig,
    /// Fusion engine settings and channel rules.
    pub fusion: FusionConfig,
    /// Alert engine settings and rules.
    pub alert_engine: AlertEngineConfig,
    /// Notification sinks.
    pub notifiers: NotifiersConfig,
    /// Local stream/control/health server.
    pub server: ServerConfig,
    /// Substitute deterministic synthetic drivers for all detectors.
    pub mock_sensors: bool,
}

/// Process-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Log filter level: trace | debug | info | warn | error.
    pub log_level: String,
    /// Writable directory for adaptive baselines; rebuilt if missing.
    pub data_dir: String,
    /// Seconds to wait before exiting when every detector fails at startup.
    pub hardware_startup_grace_seconds: f64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            data_dir: "/var/lib/nightwatch".to_string(),
            hardware_startup_grace_seconds: 30.0,
        }
    }
}

/// All detector sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorsConfig {
    /// mmWave radar over UART.
    pub radar: RadarConfig,
    /// USB microphone.
    pub audio: AudioConfig,
    /// Under-mattress capacitive/BCG ADC.
    pub capacitive: CapacitiveConfig,
}

/// Radar detector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadarConfig {
    /// Whether the detector runs.
    pub enabled: bool,
    /// Serial device path.
    pub device: String,
    /// UART baud rate.
    pub baud_rate: u32,
    /// Radar model: ld2450 | ld2410.
    pub model: String,
    /// Processing tick rate.
    pub update_rate_hz: f64,
}

impl Default for RadarConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device: "/dev/ttyAMA0".to_string(),
            baud_rate: 256_000,
            model: "ld2450".to_string(),
            update_rate_hz: 10.0,
        }
    }
}

/// Audio detector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Whether the detector runs.
    pub enabled: bool,
    /// Platform capture device selector (ALSA name), empty for default.
    pub device: String,
    /// PCM sample rate, Hz.
    pub sample_rate: u32,
    /// Multiplier over the noise floor below which a frame counts as silent.
    pub silence_margin: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device: String::new(),
            sample_rate: 16_000,
            silence_margin: 2.0,
        }
    }
}

/// Capacitive/BCG detector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacitiveConfig {
    /// Whether the detector runs.
    pub enabled: bool,
    /// I²C bus device path.
    pub i2c_bus: String,
    /// ADC address on the bus.
    pub i2c_address: u16,
    /// ADC sample rate, Hz.
    pub sample_rate: u32,
}

impl Default for CapacitiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            i2c_bus: "/dev/i2c-1".to_string(),
            i2c_address: 0x48,
            sample_rate: 100,
        }
    }
}

/// Fusion engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Signals older than this are excluded from fusion, seconds.
    pub signal_max_age_seconds: f64,
    /// Whether agreement bonuses/penalties apply.
    pub cross_validation_enabled: bool,
    /// Confidence bonus when sources agree.
    pub agreement_bonus: f64,
    /// Confidence penalty when sources disagree.
    pub disagreement_penalty: f64,
    /// Channel definitions.
    pub rules: Vec<FusionRule>,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            signal_max_age_seconds: 5.0,
            cross_validation_enabled: true,
            agreement_bonus: 0.1,
            disagreement_penalty: 0.2,
            rules: default_fusion_rules(),
        }
    }
}

/// One source feeding a fusion rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionSource {
    /// Detector id.
    pub detector: String,
    /// Feature name within that detector's events.
    pub field: String,
    /// Relative weight.
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

/// Fusion strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionStrategy {
    /// Confidence-and-weight weighted mean for numeric signals.
    WeightedAverage,
    /// Pass through the most confident source.
    BestConfidence,
    /// Boolean majority vote.
    Voting,
    /// Boolean OR.
    Any,
    /// Boolean AND.
    All,
    /// Maximum numeric value (movement intensity).
    Max,
    /// Named built-in computation (see `compute`).
    Computed,
}

/// One fused channel definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionRule {
    /// Channel name.
    pub signal: String,
    /// Contributing sources.
    #[serde(default)]
    pub sources: Vec<FusionSource>,
    /// Combination strategy.
    pub strategy: FusionStrategy,
    /// Minimum fresh contributors for an update.
    #[serde(default = "default_min_sources")]
    pub min_sources: usize,
    /// Spread (same units as the signal) at which agreement reaches zero.
    #[serde(default = "default_max_deviation")]
    pub max_deviation: f64,
    /// Agreement at or above this earns the bonus.
    #[serde(default = "default_agreement_threshold")]
    pub agreement_threshold: f64,
    /// Value spread beyond which the channel degrades and the
    /// highest-weight source wins.
    #[serde(default = "default_disagreement_limit")]
    pub disagreement_limit: f64,
    /// Built-in computation name for `strategy: computed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute: Option<String>,
}

fn default_min_sources() -> usize {
    1
}

fn default_max_deviation() -> f64 {
    5.0
}

fn default_agreement_threshold() -> f64 {
    0.8
}

fn default_disagreement_limit() -> f64 {
    10.0
}

/// Alert engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertEngineConfig {
    /// Detector with no events for this long is degraded; twice this, offline.
    pub detector_timeout_seconds: f64,
    /// Predicate must stay false this long before automatic resolution.
    pub resolve_hold_seconds: f64,
    /// Upper bound on a requested pause, minutes.
    pub max_pause_minutes: u64,
    /// Alert rules.
    pub rules: Vec<AlertRule>,
}

impl Default for AlertEngineConfig {
    fn default() -> Self {
        Self {
            detector_timeout_seconds: 10.0,
            resolve_hold_seconds: 10.0,
            max_pause_minutes: 60,
            rules: default_alert_rules(),
        }
    }
}

/// Comparison operator in a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    /// Less than.
    #[serde(rename = "<")]
    Lt,
    /// Less than or equal.
    #[serde(rename = "<=")]
    Le,
    /// Equal.
    #[serde(rename = "==")]
    Eq,
    /// Not equal.
    #[serde(rename = "!=")]
    Ne,
    /// Greater than or equal.
    #[serde(rename = ">=")]
    Ge,
    /// Greater than.
    #[serde(rename = ">")]
    Gt,
}

/// Threshold in a condition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    /// Boolean threshold.
    Bool(bool),
    /// Numeric threshold.
    Number(f64),
}

/// One condition in an alert rule. `source` names either a fused channel or
/// a detector; the two reference spaces are evaluated independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    /// Channel name or detector id.
    pub source: String,
    /// Feature name (`value` for a channel's own value).
    #[serde(default = "default_condition_field")]
    pub field: String,
    /// Comparison operator.
    pub operator: Operator,
    /// Threshold.
    pub value: ConditionValue,
    /// Per-condition dwell, seconds.
    #[serde(default)]
    pub duration_seconds: f64,
}

fn default_condition_field() -> String {
    "value".to_string()
}

/// How a rule combines its conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombineMode {
    /// Every condition must hold.
    All,
    /// At least one condition must hold.
    Any,
}

/// One alert rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    /// Unique rule name.
    pub name: String,
    /// Disabled rules are loaded but never evaluated.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Conditions.
    pub conditions: Vec<Condition>,
    /// Combination mode.
    #[serde(default = "default_combine")]
    pub combine: CombineMode,
    /// Severity of the resulting alert.
    pub severity: Severity,
    /// Rule-level dwell before firing, seconds.
    #[serde(default)]
    pub duration_seconds: f64,
    /// Minimum time between firings, seconds.
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: f64,
    /// Message template; `{field}` placeholders substitute trigger-time values.
    #[serde(default)]
    pub message: String,
}

fn default_true() -> bool {
    true
}

fn default_combine() -> CombineMode {
    CombineMode::All
}

fn default_cooldown() -> f64 {
    30.0
}

/// Notification sinks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifiersConfig {
    /// Local audio alarm.
    pub audio: AudioNotifierConfig,
    /// Push provider.
    pub push: PushNotifierConfig,
}

/// Local audio alarm settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioNotifierConfig {
    /// Whether the alarm plays.
    pub enabled: bool,
    /// Directory with severity-named sound files.
    pub sounds_dir: String,
    /// Starting volume, 0-100.
    pub initial_volume: u8,
    /// Ceiling for escalation, 0-100.
    pub max_volume: u8,
    /// Seconds between escalation steps for critical alerts.
    pub escalation_interval_seconds: f64,
    /// Hard stop for a single alarm, seconds.
    pub max_duration_seconds: f64,
    /// Player command; receives the sound file path as its last argument.
    pub player_command: String,
}

impl Default for AudioNotifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sounds_dir: "/usr/share/nightwatch/sounds".to_string(),
            initial_volume: 60,
            max_volume: 100,
            escalation_interval_seconds: 15.0,
            max_duration_seconds: 120.0,
            player_command: "aplay -q".to_string(),
        }
    }
}

/// Push provider selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushProvider {
    /// api.pushover.net.
    Pushover,
    /// ntfy.sh or self-hosted ntfy.
    Ntfy,
    /// Arbitrary JSON webhook.
    Webhook,
}

/// Push notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushNotifierConfig {
    /// Whether pushes are sent.
    pub enabled: bool,
    /// Which provider to use.
    pub provider: PushProvider,
    /// Pushover user key.
    pub pushover_user_key: String,
    /// Pushover application token.
    pub pushover_api_token: String,
    /// Ntfy server base URL.
    pub ntfy_server: String,
    /// Ntfy topic.
    pub ntfy_topic: String,
    /// Webhook URL.
    pub webhook_url: String,
    /// Extra webhook headers.
    pub webhook_headers: BTreeMap<String, String>,
    /// Per-request timeout, seconds (clamped to 5 by the sender).
    pub timeout_seconds: f64,
}

impl Default for PushNotifierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: PushProvider::Ntfy,
            pushover_user_key: String::new(),
            pushover_api_token: String::new(),
            ntfy_server: "https://ntfy.sh".to_string(),
            ntfy_topic: String::new(),
            webhook_url: String::new(),
            webhook_headers: BTreeMap::new(),
            timeout_seconds: 5.0,
        }
    }
}

/// Local server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5380,
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const RADAR_MODELS: [&str; 2] = ["ld2450", "ld2410"];

impl NightwatchConfig {
    /// Semantic validation; returns every problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if !LOG_LEVELS.contains(&self.system.log_level.as_str()) {
            errors.push(format!(
                "system.log_level '{}' not one of {:?}",
                self.system.log_level, LOG_LEVELS
            ));
        }
        if !RADAR_MODELS.contains(&self.detectors.radar.model.as_str()) {
            errors.push(format!(
                "detectors.radar.model '{}' not one of {:?}",
                self.detectors.radar.model, RADAR_MODELS
            ));
        }
        if self.detectors.audio.sample_rate < 8_000 {
            errors.push(format!(
                "detectors.audio.sample_rate {} below 8000 Hz",
                self.detectors.audio.sample_rate
            ));
        }
        if !(1.0..=30.0).contains(&self.detectors.radar.update_rate_hz) {
            errors.push(format!(
                "detectors.radar.update_rate_hz {} outside 1-30 Hz",
                self.detectors.radar.update_rate_hz
            ));
        }
        if self.detectors.capacitive.sample_rate < 60 {
            errors.push(format!(
                "detectors.capacitive.sample_rate {} below 60 Hz",
                self.detectors.capacitive.sample_rate
            ));
        }
        if self.fusion.signal_max_age_seconds <= 0.0 {
            errors.push("fusion.signal_max_age_seconds must be positive".to_string());
        }

        for rule in &self.fusion.rules {
            if rule.min_sources == 0 {
                errors.push(format!("fusion rule '{}': min_sources must be >= 1", rule.signal));
            }
            if rule.strategy == FusionStrategy::Computed && rule.compute.is_none() {
                errors.push(format!(
                    "fusion rule '{}': strategy 'computed' requires 'compute'",
                    rule.signal
                ));
            }
            if rule.strategy != FusionStrategy::Computed && rule.sources.is_empty() {
                errors.push(format!("fusion rule '{}': no sources", rule.signal));
            }
        }

        let mut names = std::collections::HashSet::new();
        for rule in &self.alert_engine.rules {
            if !names.insert(&rule.name) {
                errors.push(format!("duplicate alert rule name '{}'", rule.name));
            }
            if rule.conditions.is_empty() {
                errors.push(format!("alert rule '{}': no conditions", rule.name));
            }
            if rule.duration_seconds < 0.0 || rule.cooldown_seconds < 0.0 {
                errors.push(format!("alert rule '{}': negative duration/cooldown", rule.name));
            }
        }

        if self.notifiers.audio.initial_volume > 100 || self.notifiers.audio.max_volume > 100 {
            errors.push("notifiers.audio volume out of 0-100".to_string());
        }
        if self.notifiers.push.enabled {
            match self.notifiers.push.provider {
                PushProvider::Pushover => {
                    if self.notifiers.push.pushover_user_key.is_empty()
                        || self.notifiers.push.pushover_api_token.is_empty()
                    {
                        errors.push("pushover enabled without credentials".to_string());
                    }
                }
                PushProvider::Ntfy => {
                    if self.notifiers.push.ntfy_topic.is_empty() {
                        errors.push("ntfy enabled without a topic".to_string());
                    }
                }
                PushProvider::Webhook => {
                    if self.notifiers.push.webhook_url.is_empty() {
                        errors.push("webhook enabled without a url".to_string());
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    /// Names of all configured fused channels.
    pub fn channel_names(&self) -> Vec<String> {
        self.fusion.rules.iter().map(|r| r.signal.clone()).collect()
    }
}

/// The stock channel set: redundant respiration and heart-rate channels,
/// boolean presence/occupancy, movement intensity, seizure OR-channel and the
/// computed apnea risk.
pub fn default_fusion_rules() -> Vec<FusionRule> {
    fn src(detector: &str, field: &str, weight: f64) -> FusionSource {
        FusionSource {
            detector: detector.to_string(),
            field: field.to_string(),
            weight,
        }
    }

    vec![
        FusionRule {
            signal: "respiration_rate".to_string(),
            sources: vec![
                src("radar", "respiration_rate", 1.0),
                src("audio", "breathing_rate", 0.8),
                src("capacitive", "respiration_rate", 0.9),
            ],
            strategy: FusionStrategy::WeightedAverage,
            min_sources: 1,
            max_deviation: 5.0,
            agreement_threshold: 0.8,
            disagreement_limit: 10.0,
            compute: None,
        },
        FusionRule {
            signal: "heart_rate".to_string(),
            sources: vec![
                src("capacitive", "heart_rate", 1.0),
                src("radar", "heart_rate", 0.5),
            ],
            strategy: FusionStrategy::BestConfidence,
            min_sources: 1,
            max_deviation: 10.0,
            agreement_threshold: 0.8,
            disagreement_limit: 25.0,
            compute: None,
        },
        FusionRule {
            signal: "presence".to_string(),
            sources: vec![
                src("radar", "presence", 1.0),
                src("capacitive", "bed_occupied", 1.0),
            ],
            strategy: FusionStrategy::Voting,
            min_sources: 1,
            max_deviation: 5.0,
            agreement_threshold: 0.8,
            disagreement_limit: 10.0,
            compute: None,
        },
        FusionRule {
            signal: "movement".to_string(),
            sources: vec![
                src("radar", "movement", 1.0),
                src("capacitive", "movement", 0.8),
            ],
            strategy: FusionStrategy::Max,
            min_sources: 1,
            max_deviation: 0.5,
            agreement_threshold: 0.8,
            disagreement_limit: 1.0,
            compute: None,
        },
        FusionRule {
            signal: "seizure_activity".to_string(),
            sources: vec![
                src("audio", "seizure_detected", 1.0),
                src("radar", "movement_macro", 0.6),
            ],
            strategy: FusionStrategy::Any,
            min_sources: 1,
            max_deviation: 5.0,
            agreement_threshold: 0.8,
            disagreement_limit: 10.0,
            compute: None,
        },
        FusionRule {
            signal: "apnea_risk".to_string(),
            sources: Vec::new(),
            strategy: FusionStrategy::Computed,
            min_sources: 1,
            max_deviation: 5.0,
            agreement_threshold: 0.8,
            disagreement_limit: 10.0,
            compute: Some("apnea_risk".to_string()),
        },
    ]
}

/// The stock rule set covering the critical vitals.
pub fn default_alert_rules() -> Vec<AlertRule> {
    vec![
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
            duration_seconds: 10.0,
            cooldown_seconds: 30.0,
            message: "Respiration rate {value} BPM below safe minimum".to_string(),
        },
        AlertRule {
            name: "seizure_suspected".to_string(),
            enabled: true,
            conditions: vec![Condition {
                source: "seizure_activity".to_string(),
                field: "value".to_string(),
                operator: Operator::Eq,
                value: ConditionValue::Bool(true),
                duration_seconds: 0.0,
            }],
            combine: CombineMode::All,
            severity: Severity::Critical,
            duration_seconds: 5.0,
            cooldown_seconds: 60.0,
            message: "Seizure-like activity detected".to_string(),
        },
        AlertRule {
            name: "apnea_risk_high".to_string(),
            enabled: true,
            conditions: vec![Condition {
                source: "apnea_risk".to_string(),
                field: "value".to_string(),
                operator: Operator::Ge,
                value: ConditionValue::Number(0.7),
                duration_seconds: 0.0,
            }],
            combine: CombineMode::All,
            severity: Severity::Warning,
            duration_seconds: 5.0,
            cooldown_seconds: 60.0,
            message: "Apnea risk {value}".to_string(),
        },
    ]
}
