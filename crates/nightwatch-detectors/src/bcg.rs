//! Capacitive/BCG detector.
//!
//! Processes 100 Hz ADC blocks from the under-mattress piezo. J-peaks
//! (heartbeats) come from the 0.5-25 Hz band with an adaptive 75th-percentile
//! threshold and a 0.4 s refractory; heart rate is the median of recent
//! inter-beat intervals, HRV is RMSSD. Respiration is read from the
//! 0.1-0.5 Hz spectral band and bed occupancy from 5-second RMS against the
//! calibrated threshold.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use nightwatch_core::{EventState, FieldValue};
use nightwatch_drivers::{AdcSource, Backoff, DriverError, SampleBlock};
use nightwatch_dsp::stats::{median, percentile, rms, rmssd};
use nightwatch_dsp::{BandpassFilter, Ring, Spectrum, TimedRing};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::worker::{wait_backoff, DetectorCounters, EventEmitter};

/// Feature names the BCG detector emits.
pub const BCG_FIELDS: [&str; 6] = [
    "heart_rate",
    "hrv",
    "respiration_rate",
    "bed_occupied",
    "movement",
    "signal_quality",
];

/// BCG analysis configuration.
#[derive(Debug, Clone)]
pub struct BcgDetectorConfig {
    /// ADC sample rate, Hz.
    pub sample_rate: f64,
    /// Cardiac band, Hz.
    pub heart_band: (f64, f64),
    /// Respiration band, Hz.
    pub respiration_band: (f64, f64),
    /// Refractory period between beats, seconds (0.4 s = 150 BPM ceiling).
    pub min_beat_spacing_seconds: f64,
    /// Window for the adaptive peak threshold, seconds.
    pub threshold_window_seconds: f64,
    /// Intervals required before a heart rate is claimed.
    pub min_intervals: usize,
    /// Intervals used for RMSSD.
    pub hrv_intervals: usize,
    /// Occupancy energy window, seconds.
    pub occupancy_window_seconds: f64,
    /// RMS above this means the bed is occupied; overwritten by calibration.
    pub occupancy_threshold: f64,
    /// Respiration analysis window, seconds.
    pub respiration_window_seconds: f64,
}

impl Default for BcgDetectorConfig {
    fn default() -> Self {
        Self {
            sample_rate: 100.0,
            heart_band: (0.5, 25.0),
            respiration_band: (0.1, 0.5),
            min_beat_spacing_seconds: 0.4,
            threshold_window_seconds: 5.0,
            min_intervals: 5,
            hrv_intervals: 20,
            occupancy_window_seconds: 5.0,
            occupancy_threshold: 0.01,
            respiration_window_seconds: 30.0,
        }
    }
}

/// One emitted analysis result.
#[derive(Debug, Clone)]
pub struct BcgReading {
    /// Event state.
    pub state: EventState,
    /// Event confidence.
    pub confidence: f64,
    /// Feature map.
    pub value: BTreeMap<String, FieldValue>,
}

/// Pure DSP over the ADC block stream.
pub struct BcgAnalyzer {
    config: BcgDetectorConfig,
    heart_filter: BandpassFilter,

    filtered_history: TimedRing,
    raw_history: TimedRing,
    energy_history: TimedRing,
    ptp_history: Ring,

    prev2: f64,
    prev1: f64,
    prev1_time: f64,
    last_peak_time: Option<f64>,
    intervals: VecDeque<f64>,

    samples_seen: u64,
}

impl BcgAnalyzer {
    /// Creates an analyzer for the given configuration.
    pub fn new(config: BcgDetectorConfig) -> Self {
        let heart_filter = BandpassFilter::new(
            config.heart_band.0,
            config.heart_band.1,
            config.sample_rate,
            4,
        )
        .expect("cardiac band within sample rate");
        Self {
            filtered_history: TimedRing::new(config.threshold_window_seconds),
            raw_history: TimedRing::new(config.respiration_window_seconds),
            energy_history: TimedRing::new(config.occupancy_window_seconds),
            ptp_history: Ring::new(50),
            heart_filter,
            prev2: 0.0,
            prev1: 0.0,
            prev1_time: 0.0,
            last_peak_time: None,
            intervals: VecDeque::with_capacity(32),
            samples_seen: 0,
            config,
        }
    }

    /// Analyzer with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(BcgDetectorConfig::default())
    }

    /// Overrides the occupancy threshold with a calibrated value.
    pub fn set_occupancy_threshold(&mut self, threshold: f64) {
        self.config.occupancy_threshold = threshold.max(1e-6);
    }

    /// Clears state (after a reconnect).
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }

    /// Ingests one block and produces the tick's reading.
    pub fn push_block(&mut self, block: &SampleBlock) -> BcgReading {
        // Raw history feeds respiration and movement regardless of
        // occupancy so the windows are warm the moment someone lies down.
        let dt = 1.0 / self.config.sample_rate;
        for (i, &s) in block.samples.iter().enumerate() {
            self.raw_history.push(block.timestamp + i as f64 * dt, s);
        }

        let occupied = self.track_occupancy(block);
        let movement = self.track_movement(block);

        // Beat detection only makes sense on a still, occupied bed.
        if occupied && !movement {
            for (i, &s) in block.samples.iter().enumerate() {
                let t = block.timestamp + i as f64 * dt;
                let filtered = self.heart_filter.process(s);
                self.filtered_history.push(t, filtered.abs());
                self.detect_beat(t, filtered);
            }
        }
        self.samples_seen += block.samples.len() as u64;

        if (self.samples_seen as f64) < self.config.sample_rate * 5.0 {
            let value = BCG_FIELDS
                .iter()
                .map(|f| (f.to_string(), FieldValue::Null))
                .collect();
            return BcgReading {
                state: EventState::Uncertain,
                confidence: 0.0,
                value,
            };
        }

        let heart_rate = self.heart_rate();
        let hrv = self.hrv();
        let respiration = self.respiration();
        let quality = self.signal_quality(occupied, movement, heart_rate);

        let mut value = BTreeMap::new();
        value.insert("heart_rate".to_string(), heart_rate.into());
        value.insert("hrv".to_string(), hrv.into());
        value.insert("respiration_rate".to_string(), respiration.into());
        value.insert("bed_occupied".to_string(), FieldValue::Bool(occupied));
        value.insert("movement".to_string(), FieldValue::Bool(movement));
        value.insert("signal_quality".to_string(), FieldValue::Number(quality));

        let state = if !occupied {
            EventState::Normal
        } else if heart_rate.is_none() {
            EventState::Uncertain
        } else {
            EventState::Normal
        };

        BcgReading {
            state,
            confidence: quality,
            value,
        }
    }

    fn track_occupancy(&mut self, block: &SampleBlock) -> bool {
        self.energy_history.push(block.timestamp, rms(&block.samples));
        let values = self.energy_history.values();
        if values.len() < 10 {
            return false;
        }
        median(&values) > self.config.occupancy_threshold
    }

    fn track_movement(&mut self, block: &SampleBlock) -> bool {
        // Peak-to-peak over the last second; a window that long always
        // contains heartbeats, so the baseline reflects cardiac amplitude
        // and only gross body movement exceeds it.
        let window = self
            .raw_history
            .values_since(block.timestamp - 1.0 + 0.1);
        if window.len() < 10 {
            return false;
        }
        let max = window.iter().cloned().fold(f64::MIN, f64::max);
        let min = window.iter().cloned().fold(f64::MAX, f64::min);
        let ptp = max - min;
        self.ptp_history.push(ptp);

        let history = self.ptp_history.to_vec();
        if history.len() < 20 {
            return false;
        }
        let baseline = percentile(&history, 25.0).max(1e-6);
        ptp > baseline * 5.0
    }

    fn detect_beat(&mut self, t: f64, filtered: f64) {
        // Online local-maximum test on the previous sample.
        let is_peak = self.prev1 > self.prev2 && self.prev1 >= filtered;
        let threshold = {
            let history = self.filtered_history.values();
            if history.len() >= 50 {
                percentile(&history, 75.0)
            } else {
                f64::MAX
            }
        };

        if is_peak && self.prev1 >= threshold {
            let refractory_ok = self
                .last_peak_time
                .map_or(true, |last| self.prev1_time - last >= self.config.min_beat_spacing_seconds);
            if refractory_ok {
                if let Some(last) = self.last_peak_time {
                    let interval = self.prev1_time - last;
                    // 0.4-2.0 s covers 30-150 BPM.
                    if (0.4..=2.0).contains(&interval) {
                        self.intervals.push_back(interval);
                        while self.intervals.len() > 30 {
                            self.intervals.pop_front();
                        }
                    }
                }
                self.last_peak_time = Some(self.prev1_time);
            }
        }

        self.prev2 = self.prev1;
        self.prev1 = filtered;
        self.prev1_time = t;
    }

    fn heart_rate(&self) -> Option<f64> {
        if self.intervals.len() < self.config.min_intervals {
            return None;
        }
        let intervals: Vec<f64> = self.intervals.iter().copied().collect();
        let rate = 60.0 / median(&intervals);
        Some(rate.clamp(30.0, 200.0))
    }

    fn hrv(&self) -> Option<f64> {
        if self.intervals.len() < self.config.hrv_intervals {
            return None;
        }
        let ms: Vec<f64> = self
            .intervals
            .iter()
            .rev()
            .take(self.config.hrv_intervals)
            .map(|s| s * 1000.0)
            .collect();
        rmssd(&ms)
    }

    fn respiration(&self) -> Option<f64> {
        if self.raw_history.span() < 15.0 {
            return None;
        }
        let values = self.raw_history.values();
        let spectrum = Spectrum::compute(&values, self.config.sample_rate);
        let (freq, _) = spectrum.dominant_in_band(
            self.config.respiration_band.0,
            self.config.respiration_band.1,
        )?;
        let ratio = spectrum.peak_to_sidelobe(
            self.config.respiration_band.0,
            self.config.respiration_band.1,
        )?;
        if ratio < 1.5 {
            return None;
        }
        Some((freq * 60.0).clamp(6.0, 30.0))
    }

    fn signal_quality(&self, occupied: bool, movement: bool, heart_rate: Option<f64>) -> f64 {
        if !occupied {
            return 0.0;
        }
        if movement {
            return 0.2;
        }
        match heart_rate {
            None => 0.4,
            Some(hr) if (40.0..=120.0).contains(&hr) => 0.9,
            Some(hr) if (30.0..=150.0).contains(&hr) => 0.7,
            Some(_) => 0.5,
        }
    }
}

/// BCG detector worker.
pub struct BcgDetector {
    driver: Box<dyn AdcSource>,
    analyzer: BcgAnalyzer,
    emitter: EventEmitter,
    counters: Arc<DetectorCounters>,
}

impl BcgDetector {
    /// Wires a detector from its parts.
    pub fn new(
        driver: Box<dyn AdcSource>,
        config: BcgDetectorConfig,
        emitter: EventEmitter,
        counters: Arc<DetectorCounters>,
    ) -> Self {
        Self {
            driver,
            analyzer: BcgAnalyzer::new(config),
            emitter,
            counters,
        }
    }

    /// Applies a persisted calibration baseline before the run starts.
    pub fn apply_baseline(&mut self, baseline: &BTreeMap<String, f64>) {
        if let Some(&threshold) = baseline.get("occupancy_threshold") {
            self.analyzer.set_occupancy_threshold(threshold);
            debug!(detector = "capacitive", threshold, "occupancy threshold from baseline");
        }
    }

    /// Runs until shutdown; same lifecycle as the other workers.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Backoff::new();

        'lifecycle: loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.driver.connect().await {
                warn!(detector = "capacitive", error = %e, "connect failed");
                if wait_backoff(&mut backoff, &mut shutdown).await {
                    break;
                }
                continue;
            }
            backoff.reset();
            debug!(detector = "capacitive", "connected");

            loop {
                let block = tokio::select! {
                    _ = shutdown.changed() => break 'lifecycle,
                    block = self.driver.read_block() => block,
                };

                match block {
                    Ok(block) => {
                        backoff.reset();
                        let reading = self.analyzer.push_block(&block);
                        self.emitter
                            .emit(reading.state, reading.confidence, reading.value);
                    }
                    Err(DriverError::Transient(reason)) => {
                        self.counters.count_transient("capacitive");
                        debug!(detector = "capacitive", %reason, "transient read error");
                        self.emitter.emit_uncertain(&BCG_FIELDS);
                        if wait_backoff(&mut backoff, &mut shutdown).await {
                            break 'lifecycle;
                        }
                    }
                    Err(e) => {
                        warn!(detector = "capacitive", error = %e, "fatal, reconnecting");
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
        debug!(detector = "capacitive", "stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const FS: f64 = 100.0;

    /// Heartbeat pulse train with respiration modulation, like a real BCG.
    fn bcg_sample(t: f64, heart_hz: f64) -> f64 {
        let phase = (t * heart_hz).fract();
        let pulse = (-((phase - 0.1) / 0.025).powi(2)).exp() * 0.3;
        let respiration = 0.03 * (2.0 * PI * 0.25 * t).sin();
        pulse + respiration + 0.002 * (t * 997.0).sin()
    }

    fn feed(
        analyzer: &mut BcgAnalyzer,
        seconds: f64,
        start: f64,
        f: impl Fn(f64) -> f64,
    ) -> BcgReading {
        let mut last = None;
        let blocks = (seconds * 10.0) as usize;
        for b in 0..blocks {
            let t0 = start + b as f64 * 0.1;
            let samples: Vec<f64> = (0..10).map(|i| f(t0 + i as f64 / FS)).collect();
            last = Some(analyzer.push_block(&SampleBlock {
                samples,
                timestamp: t0,
                sample_rate: FS,
            }));
        }
        last.unwrap()
    }

    #[test]
    fn warmup_is_uncertain() {
        let mut analyzer = BcgAnalyzer::with_defaults();
        let reading = feed(&mut analyzer, 2.0, 0.0, |t| bcg_sample(t, 1.2));
        assert_eq!(reading.state, EventState::Uncertain);
    }

    #[test]
    fn detects_heart_rate() {
        let mut analyzer = BcgAnalyzer::with_defaults();
        // 1.2 Hz pulses = 72 BPM.
        let reading = feed(&mut analyzer, 40.0, 0.0, |t| bcg_sample(t, 1.2));

        let hr = reading.value["heart_rate"].as_number();
        assert!(hr.is_some(), "no heart rate claimed");
        let hr = hr.unwrap();
        assert!((hr - 72.0).abs() < 8.0, "hr {hr}");
        assert_eq!(reading.value["bed_occupied"].as_bool(), Some(true));
        assert!(reading.value["signal_quality"].as_number().unwrap() >= 0.7);
    }

    #[test]
    fn empty_bed_reads_unoccupied() {
        let mut analyzer = BcgAnalyzer::with_defaults();
        let reading = feed(&mut analyzer, 10.0, 0.0, |t| 0.0005 * (t * 313.0).sin());

        assert_eq!(reading.value["bed_occupied"].as_bool(), Some(false));
        assert_eq!(reading.value["signal_quality"].as_number(), Some(0.0));
        assert_eq!(reading.state, EventState::Normal);
    }

    #[test]
    fn hrv_appears_after_enough_beats() {
        let mut analyzer = BcgAnalyzer::with_defaults();
        // 72 BPM for 40 s yields well over 20 intervals.
        let reading = feed(&mut analyzer, 40.0, 0.0, |t| bcg_sample(t, 1.2));

        let hrv = reading.value["hrv"].as_number();
        assert!(hrv.is_some(), "no hrv claimed");
        // A metronomic pulse train has near-zero RMSSD.
        assert!(hrv.unwrap() < 50.0, "hrv {:?}", hrv);
    }

    #[test]
    fn respiration_from_modulation() {
        let mut analyzer = BcgAnalyzer::with_defaults();
        let reading = feed(&mut analyzer, 40.0, 0.0, |t| bcg_sample(t, 1.2));

        let resp = reading.value["respiration_rate"].as_number();
        assert!(resp.is_some(), "no respiration claimed");
        let resp = resp.unwrap();
        assert!((resp - 15.0).abs() < 3.0, "resp {resp}");
    }

    #[test]
    fn calibrated_threshold_changes_occupancy() {
        let mut analyzer = BcgAnalyzer::with_defaults();
        analyzer.set_occupancy_threshold(0.5);
        // A signal that would normally read occupied now falls below the
        // calibrated threshold.
        let reading = feed(&mut analyzer, 10.0, 0.0, |t| bcg_sample(t, 1.2));
        assert_eq!(reading.value["bed_occupied"].as_bool(), Some(false));
    }
}
