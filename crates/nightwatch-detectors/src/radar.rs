//! mmWave radar detector.
//!
//! Tracks the primary target's depth over a 30-second window and derives
//! respiration (bandpassed peak intervals), a low-confidence heart-rate
//! estimate (FFT peak), movement classification (rolling position spread) and
//! presence (target seen for at least 1 s of the last 3 s).

use std::collections::BTreeMap;
use std::sync::Arc;

use nightwatch_dsp::stats::{mean, median, percentile, std_dev};
use nightwatch_dsp::{find_peaks, BandpassFilter, PeakOptions, Spectrum, TimedRing};
use nightwatch_core::{EventState, FieldValue};
use nightwatch_drivers::{Backoff, DriverError, RadarFrame, RadarSource};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::worker::{wait_backoff, DetectorCounters, EventEmitter};

/// Feature names the radar emits; uncertain ticks null all of them.
pub const RADAR_FIELDS: [&str; 7] = [
    "respiration_rate",
    "respiration_amplitude",
    "heart_rate",
    "movement",
    "movement_macro",
    "presence",
    "target_distance_mm",
];

/// Radar analysis configuration.
#[derive(Debug, Clone)]
pub struct RadarDetectorConfig {
    /// Frame rate of the sensor, Hz.
    pub update_rate_hz: f64,
    /// Respiration band, Hz.
    pub respiration_band: (f64, f64),
    /// Heart-rate band, Hz.
    pub heart_band: (f64, f64),
    /// Respiration analysis window, seconds.
    pub window_seconds: f64,
    /// Heart-rate analysis window, seconds.
    pub heart_window_seconds: f64,
    /// Minimum peaks in the window before a rate is claimed.
    pub min_peaks: usize,
    /// Minimum spacing between breath peaks, seconds.
    pub min_peak_spacing_seconds: f64,
    /// Position spread that counts as macro movement, mm.
    pub macro_threshold_mm: f64,
    /// Presence lookback, seconds.
    pub presence_window_seconds: f64,
    /// Seconds of target sightings within the lookback required for presence.
    pub presence_min_seconds: f64,
}

impl Default for RadarDetectorConfig {
    fn default() -> Self {
        Self {
            update_rate_hz: 10.0,
            respiration_band: (0.1, 0.5),
            heart_band: (0.8, 2.0),
            window_seconds: 30.0,
            heart_window_seconds: 15.0,
            min_peaks: 3,
            min_peak_spacing_seconds: 1.5,
            macro_threshold_mm: 100.0,
            presence_window_seconds: 3.0,
            presence_min_seconds: 1.0,
        }
    }
}

/// One analysis result, ready for emission.
#[derive(Debug, Clone)]
pub struct RadarReading {
    /// Event state.
    pub state: EventState,
    /// Event confidence.
    pub confidence: f64,
    /// Feature map.
    pub value: BTreeMap<String, FieldValue>,
}

/// Pure DSP over the radar frame stream.
pub struct RadarAnalyzer {
    config: RadarDetectorConfig,
    depth: TimedRing,
    move_x: TimedRing,
    move_y: TimedRing,
    sightings: TimedRing,
    resp_filter: BandpassFilter,
    frames_seen: u64,
}

impl RadarAnalyzer {
    /// Creates an analyzer for the given configuration.
    pub fn new(config: RadarDetectorConfig) -> Self {
        let resp_filter = BandpassFilter::new(
            config.respiration_band.0,
            config.respiration_band.1,
            config.update_rate_hz,
            4,
        )
        .expect("respiration band within radar rate");
        Self {
            depth: TimedRing::new(config.window_seconds),
            move_x: TimedRing::new(1.0),
            move_y: TimedRing::new(1.0),
            sightings: TimedRing::new(config.presence_window_seconds),
            resp_filter,
            config,
            frames_seen: 0,
        }
    }

    /// Analyzer with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(RadarDetectorConfig::default())
    }

    /// Clears all windows (after a reconnect).
    pub fn reset(&mut self) {
        self.depth.clear();
        self.move_x.clear();
        self.move_y.clear();
        self.sightings.clear();
        self.frames_seen = 0;
    }

    /// Ingests one frame and produces the tick's reading.
    pub fn push_frame(&mut self, frame: &RadarFrame) -> RadarReading {
        let t = frame.timestamp;
        self.frames_seen += 1;

        let primary = frame.primary();
        self.sightings.push(t, primary.is_some() as u8 as f64);

        if let Some(target) = primary {
            self.depth.push(t, f64::from(target.y_mm));
            self.move_x.push(t, f64::from(target.x_mm));
            self.move_y.push(t, f64::from(target.y_mm));
        }

        // Warmup: no claims until the window has substance.
        let warmup_samples = (self.config.update_rate_hz * 5.0) as usize;
        if self.frames_seen < warmup_samples as u64 {
            return self.uncertain();
        }

        let present = self.presence();
        let (movement, movement_macro) = self.movement();

        let mut value = BTreeMap::new();
        value.insert("presence".to_string(), FieldValue::Bool(present));
        value.insert("movement".to_string(), FieldValue::Number(movement));
        value.insert("movement_macro".to_string(), FieldValue::Bool(movement_macro));
        value.insert(
            "target_distance_mm".to_string(),
            primary.map(|p| p.distance_mm()).into(),
        );

        if !present {
            value.insert("respiration_rate".to_string(), FieldValue::Null);
            value.insert("respiration_amplitude".to_string(), FieldValue::Null);
            value.insert("heart_rate".to_string(), FieldValue::Null);
            return RadarReading {
                state: EventState::Normal,
                confidence: 0.8,
                value,
            };
        }

        let respiration = self.respiration();
        let heart = self.heart_rate();

        value.insert(
            "respiration_rate".to_string(),
            respiration.map(|r| r.rate).into(),
        );
        value.insert(
            "respiration_amplitude".to_string(),
            respiration.map(|r| r.amplitude).into(),
        );
        value.insert("heart_rate".to_string(), heart.map(|h| h.0).into());

        match respiration {
            None => RadarReading {
                state: EventState::Uncertain,
                confidence: 0.2,
                value,
            },
            Some(resp) => {
                let state = if resp.rate < 5.0 {
                    EventState::Alert
                } else if resp.rate < 8.0 {
                    EventState::Warning
                } else {
                    EventState::Normal
                };
                RadarReading {
                    state,
                    confidence: resp.confidence,
                    value,
                }
            }
        }
    }

    fn uncertain(&self) -> RadarReading {
        let value = RADAR_FIELDS
            .iter()
            .map(|f| (f.to_string(), FieldValue::Null))
            .collect();
        RadarReading {
            state: EventState::Uncertain,
            confidence: 0.0,
            value,
        }
    }

    fn presence(&self) -> bool {
        let needed = self.config.presence_min_seconds * self.config.update_rate_hz;
        let seen: f64 = self.sightings.values().iter().sum();
        seen >= needed
    }

    fn movement(&self) -> (f64, bool) {
        let xs = self.move_x.values();
        let ys = self.move_y.values();
        if xs.len() < 3 {
            return (0.0, false);
        }
        let spread = (std_dev(&xs).powi(2) + std_dev(&ys).powi(2)).sqrt();
        let is_macro = spread > self.config.macro_threshold_mm;
        ((spread / self.config.macro_threshold_mm).min(1.0), is_macro)
    }

    fn respiration(&self) -> Option<Respiration> {
        let rate_hz = self.config.update_rate_hz;
        let values = self.depth.values();
        if (values.len() as f64) < rate_hz * 5.0 {
            return None;
        }

        let filtered = self.resp_filter.apply(&values);
        let envelope: Vec<f64> = filtered.iter().map(|v| v.abs()).collect();
        let prominence = percentile(&envelope, 75.0);

        let peaks = find_peaks(
            &filtered,
            &PeakOptions {
                min_distance: (self.config.min_peak_spacing_seconds * rate_hz) as usize,
                min_prominence: Some(prominence),
                min_height: None,
            },
        );
        if peaks.len() < self.config.min_peaks {
            return None;
        }

        let intervals: Vec<f64> = peaks
            .windows(2)
            .map(|w| (w[1] - w[0]) as f64 / rate_hz)
            .collect();
        let rate = (60.0 / median(&intervals)).clamp(4.0, 40.0);

        let cv = if mean(&intervals) > 0.0 {
            std_dev(&intervals) / mean(&intervals)
        } else {
            1.0
        };
        let confidence = (1.0 - cv).clamp(0.2, 0.95);

        let q75 = percentile(&filtered, 75.0);
        let q25 = percentile(&filtered, 25.0);
        let amplitude = ((q75 - q25) / 10.0).min(1.0);

        Some(Respiration {
            rate,
            amplitude,
            confidence,
        })
    }

    fn heart_rate(&self) -> Option<(f64, f64)> {
        let rate_hz = self.config.update_rate_hz;
        let horizon = self.depth.timestamps().last().copied()?
            - self.config.heart_window_seconds;
        let values = self.depth.values_since(horizon);
        if (values.len() as f64) < rate_hz * 10.0 {
            return None;
        }

        let spectrum = Spectrum::compute(&values, rate_hz);
        let (freq, _) =
            spectrum.dominant_in_band(self.config.heart_band.0, self.config.heart_band.1)?;
        let ratio =
            spectrum.peak_to_sidelobe(self.config.heart_band.0, self.config.heart_band.1)?;

        let bpm = freq * 60.0;
        if !(45.0..=130.0).contains(&bpm) {
            return None;
        }
        // Radar HR is inherently rough; cap the confidence at 0.5.
        let confidence = (ratio / 10.0).clamp(0.0, 0.5);
        Some((bpm, confidence))
    }
}

#[derive(Debug, Clone, Copy)]
struct Respiration {
    rate: f64,
    amplitude: f64,
    confidence: f64,
}

/// Radar detector worker: drives the driver, feeds the analyzer, emits.
pub struct RadarDetector {
    driver: Box<dyn RadarSource>,
    analyzer: RadarAnalyzer,
    emitter: EventEmitter,
    counters: Arc<DetectorCounters>,
}

impl RadarDetector {
    /// Wires a detector from its parts.
    pub fn new(
        driver: Box<dyn RadarSource>,
        config: RadarDetectorConfig,
        emitter: EventEmitter,
        counters: Arc<DetectorCounters>,
    ) -> Self {
        Self {
            driver,
            analyzer: RadarAnalyzer::new(config),
            emitter,
            counters,
        }
    }

    /// Runs until shutdown. Transient read errors back off and emit
    /// uncertain ticks; fatal errors reconnect with a fresh session.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Backoff::new();

        'lifecycle: loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.driver.connect().await {
                warn!(detector = "radar", error = %e, "connect failed");
                if wait_backoff(&mut backoff, &mut shutdown).await {
                    break;
                }
                continue;
            }
            backoff.reset();
            debug!(detector = "radar", "connected");

            loop {
                let frame = tokio::select! {
                    _ = shutdown.changed() => break 'lifecycle,
                    frame = self.driver.read_frame() => frame,
                };

                match frame {
                    Ok(frame) => {
                        backoff.reset();
                        let reading = self.analyzer.push_frame(&frame);
                        self.emitter
                            .emit(reading.state, reading.confidence, reading.value);
                    }
                    Err(DriverError::Transient(reason)) => {
                        self.counters.count_transient("radar");
                        debug!(detector = "radar", %reason, "transient read error");
                        self.emitter.emit_uncertain(&RADAR_FIELDS);
                        if wait_backoff(&mut backoff, &mut shutdown).await {
                            break 'lifecycle;
                        }
                    }
                    Err(e) => {
                        warn!(detector = "radar", error = %e, "fatal, reconnecting");
                        let _ = self.driver.disconnect().await;
                        self.emitter.rotate_session();
                        self.analyzer.reset();
                        if wait_backoff(&mut backoff, &mut shutdown).await {
                            break 'lifecycle;
                        }
                        continue 'lifecycle;
                    }
                }
            }
        }

        let _ = self.driver.disconnect().await;
        debug!(detector = "radar", "stopped");
    }
}
