//! Audio detector.
//!
//! Operates on 20 ms PCM frames. Breathing is read from the 200-800 Hz band
//! envelope, silence from frame RMS against an adaptive noise floor,
//! vocalizations from broadband transients, and seizure-like sound from
//! sustained 1.5-8 Hz rhythm in the envelope that is not breathing-modulated.

use std::collections::BTreeMap;
use std::sync::Arc;

use nightwatch_core::{EventState, FieldValue};
use nightwatch_drivers::{AudioSource, Backoff, DriverError, PcmBlock};
use nightwatch_dsp::stats::{mean, median, percentile, rms, std_dev};
use nightwatch_dsp::{
    find_peaks, BandpassFilter, EnvelopeExtractor, PeakOptions, Ring, Spectrum, TimedRing,
};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::worker::{wait_backoff, DetectorCounters, EventEmitter};

/// Feature names the audio detector emits.
pub const AUDIO_FIELDS: [&str; 8] = [
    "breathing_rate",
    "breathing_amplitude",
    "breathing_detected",
    "silence_duration",
    "vocalization",
    "seizure_detected",
    "seizure_confidence",
    "energy_level",
];

/// Audio analysis configuration.
#[derive(Debug, Clone)]
pub struct AudioDetectorConfig {
    /// PCM sample rate, Hz.
    pub sample_rate: u32,
    /// Silence threshold = noise floor × this margin.
    pub silence_margin: f64,
    /// Absolute floor under the adaptive silence threshold.
    pub silence_threshold: f64,
    /// Breathing sound band, Hz.
    pub breathing_band: (f64, f64),
    /// Vocalization band, Hz.
    pub vocal_band: (f64, f64),
    /// Transient factor over baseline that counts as a vocalization.
    pub vocal_factor: f64,
    /// Minimum vocalization duration, seconds.
    pub vocal_min_duration: f64,
    /// Seizure sound band, Hz.
    pub seizure_band: (f64, f64),
    /// Envelope rhythm band flagged as seizure-like, Hz.
    pub seizure_rhythm_band: (f64, f64),
    /// Envelope rhythm band owned by breathing/snoring, Hz.
    pub breathing_rhythm_band: (f64, f64),
    /// Required seizure:breathing envelope energy ratio.
    pub seizure_breathing_ratio: f64,
    /// Minimum mean envelope level before rhythm is considered at all.
    pub seizure_energy_threshold: f64,
    /// Rhythm must persist this long before a claim, seconds.
    pub seizure_min_duration: f64,
    /// Rate/noise analysis window, seconds.
    pub window_seconds: f64,
    /// Breath peaks needed before a rate is claimed.
    pub min_breaths: usize,
    /// Emit one event every this many 20 ms frames.
    pub emit_every: usize,
}

impl Default for AudioDetectorConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            silence_margin: 2.0,
            silence_threshold: 0.005,
            breathing_band: (200.0, 800.0),
            vocal_band: (200.0, 3000.0),
            vocal_factor: 3.0,
            vocal_min_duration: 0.2,
            seizure_band: (100.0, 3000.0),
            seizure_rhythm_band: (1.5, 8.0),
            breathing_rhythm_band: (0.15, 0.6),
            seizure_breathing_ratio: 2.0,
            seizure_energy_threshold: 0.005,
            seizure_min_duration: 5.0,
            window_seconds: 30.0,
            min_breaths: 3,
            emit_every: 5,
        }
    }
}

/// One emitted analysis result.
#[derive(Debug, Clone)]
pub struct AudioReading {
    /// Event state.
    pub state: EventState,
    /// Event confidence.
    pub confidence: f64,
    /// Feature map.
    pub value: BTreeMap<String, FieldValue>,
}

/// Frames per second of envelope history (one sample per 20 ms frame).
const FRAME_RATE: f64 = 50.0;

/// Pure DSP over the PCM frame stream.
pub struct AudioAnalyzer {
    config: AudioDetectorConfig,

    breathing_filter: BandpassFilter,
    breathing_env: EnvelopeExtractor,
    vocal_filter: BandpassFilter,
    seizure_filter: BandpassFilter,
    seizure_env: EnvelopeExtractor,

    rms_history: TimedRing,
    breath_env_history: TimedRing,
    seizure_env_history: TimedRing,
    vocal_energy_history: Ring,

    silence_start: Option<f64>,
    silence_duration: f64,
    vocal_streak: usize,
    seizure_start: Option<f64>,
    seizure_rhythmic: bool,
    seizure_confidence: f64,

    frames_seen: u64,
}

impl AudioAnalyzer {
    /// Creates an analyzer for the given configuration.
    pub fn new(config: AudioDetectorConfig) -> Self {
        let fs = f64::from(config.sample_rate);
        Self {
            breathing_filter: BandpassFilter::new(
                config.breathing_band.0,
                config.breathing_band.1,
                fs,
                4,
            )
            .expect("breathing band within sample rate"),
            breathing_env: EnvelopeExtractor::new(2.0, fs).expect("envelope cutoff"),
            vocal_filter: BandpassFilter::new(config.vocal_band.0, config.vocal_band.1, fs, 4)
                .expect("vocal band within sample rate"),
            seizure_filter: BandpassFilter::new(
                config.seizure_band.0,
                config.seizure_band.1,
                fs,
                4,
            )
            .expect("seizure band within sample rate"),
            seizure_env: EnvelopeExtractor::new(15.0, fs).expect("envelope cutoff"),
            rms_history: TimedRing::new(config.window_seconds),
            breath_env_history: TimedRing::new(config.window_seconds),
            seizure_env_history: TimedRing::new(10.0),
            vocal_energy_history: Ring::new(100),
            silence_start: None,
            silence_duration: 0.0,
            vocal_streak: 0,
            seizure_start: None,
            seizure_rhythmic: false,
            seizure_confidence: 0.0,
            frames_seen: 0,
            config,
        }
    }

    /// Analyzer with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(AudioDetectorConfig::default())
    }

    /// Clears state (after a reconnect).
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }

    /// Ingests one 20 ms frame; returns a reading on emission ticks.
    pub fn push_block(&mut self, block: &PcmBlock) -> Option<AudioReading> {
        let t = block.timestamp;
        self.frames_seen += 1;

        let frame_rms = rms(&block.samples);
        self.rms_history.push(t, frame_rms);

        // Breathing band envelope, one history point per frame.
        let filtered: Vec<f64> = block
            .samples
            .iter()
            .map(|&s| self.breathing_filter.process(s))
            .collect();
        let envelope = self.breathing_env.process_block(&filtered);
        let frame_env = mean(&envelope);
        self.breath_env_history.push(t, frame_env);

        self.track_silence(t, frame_rms);
        let vocalization = self.track_vocalization(&block.samples);
        self.track_seizure(t, &block.samples);

        if self.frames_seen % self.config.emit_every as u64 != 0 {
            return None;
        }

        // Warmup: claim nothing for the first couple of seconds.
        if self.frames_seen < (FRAME_RATE * 2.0) as u64 {
            let value = AUDIO_FIELDS
                .iter()
                .map(|f| (f.to_string(), FieldValue::Null))
                .collect();
            return Some(AudioReading {
                state: EventState::Uncertain,
                confidence: 0.0,
                value,
            });
        }

        let breathing = self.breathing_rate();
        let seizure_detected = self.seizure_active(t);

        let env_values = self.breath_env_history.values();
        let env_max = env_values.iter().cloned().fold(0.0f64, f64::max);
        let amplitude = if env_max > 1e-9 {
            (frame_env / env_max).min(1.0)
        } else {
            0.0
        };
        let baseline_env = percentile(&env_values, 25.0);
        let breathing_detected = frame_env > (baseline_env * 2.0).max(1e-6);

        let mut value = BTreeMap::new();
        value.insert(
            "breathing_rate".to_string(),
            breathing.map(|b| b.0).into(),
        );
        value.insert("breathing_amplitude".to_string(), FieldValue::Number(amplitude));
        value.insert(
            "breathing_detected".to_string(),
            FieldValue::Bool(breathing_detected),
        );
        value.insert(
            "silence_duration".to_string(),
            FieldValue::Number(self.silence_duration),
        );
        value.insert("vocalization".to_string(), FieldValue::Bool(vocalization));
        value.insert(
            "seizure_detected".to_string(),
            FieldValue::Bool(seizure_detected),
        );
        value.insert(
            "seizure_confidence".to_string(),
            FieldValue::Number(if seizure_detected {
                self.seizure_confidence
            } else {
                0.0
            }),
        );
        value.insert("energy_level".to_string(), FieldValue::Number(frame_rms));

        let state = if seizure_detected {
            EventState::Alert
        } else if self.silence_duration >= 10.0 {
            EventState::Warning
        } else {
            EventState::Normal
        };
        let confidence = breathing.map_or(0.5, |b| b.1);

        Some(AudioReading {
            state,
            confidence,
            value,
        })
    }

    fn track_silence(&mut self, t: f64, frame_rms: f64) {
        let noise_floor = {
            let values = self.rms_history.values();
            if values.len() >= 50 {
                percentile(&values, 5.0)
            } else {
                self.config.silence_threshold
            }
        };
        let threshold = (noise_floor * self.config.silence_margin)
            .max(self.config.silence_threshold);

        if frame_rms < threshold {
            let start = *self.silence_start.get_or_insert(t);
            self.silence_duration = t - start;
        } else {
            self.silence_start = None;
            self.silence_duration = 0.0;
        }
    }

    fn track_vocalization(&mut self, samples: &[f64]) -> bool {
        let filtered: Vec<f64> = samples
            .iter()
            .map(|&s| self.vocal_filter.process(s))
            .collect();
        let energy = rms(&filtered);

        let baseline = mean(&self.vocal_energy_history.to_vec());
        let spike = self.vocal_energy_history.len() >= 20
            && energy > baseline * self.config.vocal_factor
            && energy > self.config.silence_threshold * 2.0;

        self.vocal_energy_history.push(energy);

        if spike {
            self.vocal_streak += 1;
        } else {
            self.vocal_streak = 0;
        }
        self.vocal_streak as f64 * 0.020 >= self.config.vocal_min_duration
    }

    fn track_seizure(&mut self, t: f64, samples: &[f64]) {
        let filtered: Vec<f64> = samples
            .iter()
            .map(|&s| self.seizure_filter.process(s))
            .collect();
        let envelope = self.seizure_env.process_block(&filtered);
        self.seizure_env_history.push(t, mean(&envelope));

        // Rhythm analysis every half second over the last 10 s of envelope.
        if self.frames_seen % 25 != 0 || self.seizure_env_history.span() < 3.0 {
            return;
        }

        let env = self.seizure_env_history.values();

        // Rhythm on a near-silent envelope is numerical noise, not seizure.
        if mean(&env) < self.config.seizure_energy_threshold {
            self.seizure_start = None;
            self.seizure_rhythmic = false;
            self.seizure_confidence = 0.0;
            return;
        }

        let spectrum = Spectrum::compute(&env, FRAME_RATE);

        let rhythm = spectrum.dominant_in_band(
            self.config.seizure_rhythm_band.0,
            self.config.seizure_rhythm_band.1,
        );
        // Spec'd prominence measure: band peak over band average magnitude.
        let prominence = spectrum.peak_to_band_mean(
            self.config.seizure_rhythm_band.0,
            self.config.seizure_rhythm_band.1,
        );

        let seizure_energy = spectrum.band_energy(
            self.config.seizure_rhythm_band.0,
            self.config.seizure_rhythm_band.1,
        );
        let breathing_energy = spectrum.band_energy(
            self.config.breathing_rhythm_band.0,
            self.config.breathing_rhythm_band.1,
        );

        let breathing_dominant = breathing_energy > 0.0
            && seizure_energy / breathing_energy < self.config.seizure_breathing_ratio;

        let rhythmic = match (rhythm, prominence) {
            (Some(_), Some(p)) => p > 1.5 && !breathing_dominant,
            _ => false,
        };

        if rhythmic {
            let start = *self.seizure_start.get_or_insert(t);
            let held = t - start;
            self.seizure_rhythmic = true;
            let base = (prominence.unwrap_or(0.0) / 5.0).clamp(0.2, 0.8);
            let boost = ((held - self.config.seizure_min_duration) * 0.05).max(0.0);
            self.seizure_confidence = (base + boost).min(1.0);
        } else {
            self.seizure_start = None;
            self.seizure_rhythmic = false;
            self.seizure_confidence = 0.0;
        }
    }

    fn seizure_active(&self, t: f64) -> bool {
        match self.seizure_start {
            Some(start) => {
                self.seizure_rhythmic && t - start >= self.config.seizure_min_duration
            }
            None => false,
        }
    }

    fn breathing_rate(&self) -> Option<(f64, f64)> {
        let env = self.breath_env_history.values();
        if (env.len() as f64) < FRAME_RATE * 10.0 {
            return None;
        }

        let prominence = (percentile(&env, 75.0) - percentile(&env, 25.0)) * 0.5;
        if prominence <= 1e-9 {
            return None;
        }
        let peaks = find_peaks(
            &env,
            &PeakOptions {
                min_distance: (1.5 * FRAME_RATE) as usize,
                min_prominence: Some(prominence),
                min_height: None,
            },
        );
        if peaks.len() < self.config.min_breaths {
            return None;
        }

        let intervals: Vec<f64> = peaks
            .windows(2)
            .map(|w| (w[1] - w[0]) as f64 / FRAME_RATE)
            .collect();
        let rate = (60.0 / median(&intervals)).clamp(4.0, 40.0);

        let cv = if mean(&intervals) > 0.0 {
            std_dev(&intervals) / mean(&intervals)
        } else {
            1.0
        };
        Some((rate, (1.0 - cv).clamp(0.3, 0.95)))
    }
}

/// Audio detector worker.
pub struct AudioDetector {
    driver: Box<dyn AudioSource>,
    analyzer: AudioAnalyzer,
    emitter: EventEmitter,
    counters: Arc<DetectorCounters>,
}

impl AudioDetector {
    /// Wires a detector from its parts.
    pub fn new(
        driver: Box<dyn AudioSource>,
        config: AudioDetectorConfig,
        emitter: EventEmitter,
        counters: Arc<DetectorCounters>,
    ) -> Self {
        Self {
            driver,
            analyzer: AudioAnalyzer::new(config),
            emitter,
            counters,
        }
    }

    /// Runs until shutdown; same lifecycle as the radar worker.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Backoff::new();

        'lifecycle: loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.driver.connect().await {
                warn!(detector = "audio", error = %e, "connect failed");
                if wait_backoff(&mut backoff, &mut shutdown).await {
                    break;
                }
                continue;
            }
            backoff.reset();
            debug!(detector = "audio", "capture started");

            loop {
                let block = tokio::select! {
                    _ = shutdown.changed() => break 'lifecycle,
                    block = self.driver.read_block() => block,
                };

                match block {
                    Ok(block) => {
                        backoff.reset();
                        if let Some(reading) = self.analyzer.push_block(&block) {
                            self.emitter
                                .emit(reading.state, reading.confidence, reading.value);
                        }
                    }
                    Err(DriverError::Transient(reason)) => {
                        self.counters.count_transient("audio");
                        debug!(detector = "audio", %reason, "transient read error");
                        self.emitter.emit_uncertain(&AUDIO_FIELDS);
                        if wait_backoff(&mut backoff, &mut shutdown).await {
                            break 'lifecycle;
                        }
                    }
                    Err(e) => {
                        warn!(detector = "audio", error = %e, "fatal, reconnecting");
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
        debug!(detector = "audio", "stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const FS: f64 = 16_000.0;

    fn block(t0: f64, f: impl Fn(f64) -> f64) -> PcmBlock {
        let n = (FS * 0.020) as usize;
        PcmBlock {
            samples: (0..n).map(|i| f(t0 + i as f64 / FS)).collect(),
            timestamp: t0,
            sample_rate: FS,
        }
    }

    fn feed(
        analyzer: &mut AudioAnalyzer,
        seconds: f64,
        start: f64,
        f: impl Fn(f64) -> f64,
    ) -> Option<AudioReading> {
        let mut last = None;
        let frames = (seconds / 0.020) as usize;
        for i in 0..frames {
            let t0 = start + i as f64 * 0.020;
            if let Some(reading) = analyzer.push_block(&block(t0, &f)) {
                last = Some(reading);
            }
        }
        last
    }

    fn breath_wave(t: f64) -> f64 {
        // 400 Hz breath noise gated at 15 BPM.
        let gate = (2.0 * PI * 0.25 * t).sin().max(0.0).powi(2);
        gate * 0.05 * (2.0 * PI * 400.0 * t).sin()
    }

    #[test]
    fn warmup_is_uncertain() {
        let mut analyzer = AudioAnalyzer::with_defaults();
        let reading = feed(&mut analyzer, 0.5, 0.0, breath_wave).unwrap();
        assert_eq!(reading.state, EventState::Uncertain);
    }

    #[test]
    fn detects_breathing_rate() {
        let mut analyzer = AudioAnalyzer::with_defaults();
        let reading = feed(&mut analyzer, 30.0, 0.0, breath_wave).unwrap();

        let rate = reading.value["breathing_rate"].as_number();
        assert!(rate.is_some(), "no rate claimed");
        let rate = rate.unwrap();
        assert!((rate - 15.0).abs() < 3.0, "rate {rate}");
        assert_eq!(reading.state, EventState::Normal);
    }

    #[test]
    fn silence_duration_accumulates() {
        let mut analyzer = AudioAnalyzer::with_defaults();
        // Audible breathing first, then 12 s of near-silence.
        feed(&mut analyzer, 10.0, 0.0, breath_wave);
        let reading = feed(&mut analyzer, 12.0, 10.0, |_| 0.0001).unwrap();

        let silence = reading.value["silence_duration"].as_number().unwrap();
        assert!(silence >= 10.0, "silence {silence}");
        assert_eq!(reading.state, EventState::Warning);
    }

    #[test]
    fn silence_resets_on_sound() {
        let mut analyzer = AudioAnalyzer::with_defaults();
        feed(&mut analyzer, 5.0, 0.0, |_| 0.0001);
        let reading = feed(&mut analyzer, 5.0, 5.0, breath_wave).unwrap();
        let silence = reading.value["silence_duration"].as_number().unwrap();
        assert_eq!(silence, 0.0);
    }

    #[test]
    fn vocalization_flags_loud_transient() {
        let mut analyzer = AudioAnalyzer::with_defaults();
        feed(&mut analyzer, 5.0, 0.0, |t| 0.003 * (2.0 * PI * 300.0 * t).sin());
        // 400 ms scream-like burst, 30x the baseline.
        let reading = feed(&mut analyzer, 0.4, 5.0, |t| {
            0.3 * (2.0 * PI * 900.0 * t).sin()
        })
        .unwrap();
        assert_eq!(reading.value["vocalization"].as_bool(), Some(true));
    }

    #[test]
    fn sustained_rhythm_reads_as_seizure() {
        let mut analyzer = AudioAnalyzer::with_defaults();
        // 3 Hz gated broadband bursts, well above the breathing rhythm band,
        // sustained for 12 s.
        let reading = feed(&mut analyzer, 12.0, 0.0, |t| {
            let gate = ((2.0 * PI * 3.0 * t).sin() > 0.0) as u8 as f64;
            gate * 0.2 * (2.0 * PI * 700.0 * t).sin()
        })
        .unwrap();

        assert_eq!(reading.value["seizure_detected"].as_bool(), Some(true));
        assert!(reading.value["seizure_confidence"].as_number().unwrap() > 0.2);
        assert_eq!(reading.state, EventState::Alert);
    }

    #[test]
    fn breathing_is_not_seizure() {
        let mut analyzer = AudioAnalyzer::with_defaults();
        let reading = feed(&mut analyzer, 20.0, 0.0, breath_wave).unwrap();
        assert_eq!(reading.value["seizure_detected"].as_bool(), Some(false));
    }
}
