//! Deterministic synthetic drivers for development and tests.
//!
//! Each mock generates a plausible physiological waveform from a seeded RNG
//! plus pure sinusoids, so runs are reproducible. Anomalies can be injected
//! at runtime to exercise the detection and alerting paths without hardware.

use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Duration;

use std::sync::Mutex;

use async_trait::async_trait;
use nightwatch_core::Clock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::DriverResult;
use crate::ld2450::{RadarFrame, RadarTarget};
use crate::traits::{
    AdcSource, AudioSource, CalibrationOutcome, PcmBlock, RadarSource, SampleBlock,
};

/// Injectable anomaly kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anomaly {
    /// Breathing stops.
    Apnea,
    /// Heart rate drops to half.
    Bradycardia,
    /// Rhythmic 3 Hz movement and sound.
    Seizure,
    /// Subject leaves the bed / monitored area.
    BedExit,
}

/// Shared anomaly switch usable from the control surface.
#[derive(Debug, Clone, Default)]
pub struct AnomalyHandle {
    inner: Arc<Mutex<Option<(Anomaly, f64)>>>,
}

impl AnomalyHandle {
    /// Creates an idle handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Activates `anomaly` until monotonic time `until`.
    pub fn inject(&self, anomaly: Anomaly, until: f64) {
        *self.inner.lock().unwrap() = Some((anomaly, until));
    }

    /// Clears any active anomaly.
    pub fn clear(&self) {
        *self.inner.lock().unwrap() = None;
    }

    /// The anomaly active at monotonic time `now`, if any.
    pub fn active(&self, now: f64) -> Option<Anomaly> {
        let mut guard = self.inner.lock().unwrap();
        match *guard {
            Some((anomaly, until)) if now < until => Some(anomaly),
            Some(_) => {
                *guard = None;
                None
            }
            None => None,
        }
    }
}

/// Synthetic radar: a subject at ~1.5 m whose chest moves with breathing.
pub struct MockRadarSource {
    clock: Arc<dyn Clock>,
    anomalies: AnomalyHandle,
    rng: StdRng,
    tick: u64,
    respiration_hz: f64,
}

impl MockRadarSource {
    /// Creates the mock with a 15 BPM breathing rate.
    pub fn new(clock: Arc<dyn Clock>, anomalies: AnomalyHandle) -> Self {
        Self {
            clock,
            anomalies,
            rng: StdRng::seed_from_u64(0x4e57_0001),
            tick: 0,
            respiration_hz: 0.25,
        }
    }
}

#[async_trait]
impl RadarSource for MockRadarSource {
    async fn connect(&mut self) -> DriverResult<()> {
        Ok(())
    }

    async fn disconnect(&mut self) -> DriverResult<()> {
        Ok(())
    }

    async fn read_frame(&mut self) -> DriverResult<RadarFrame> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let timestamp = self.clock.now_monotonic();
        let t = self.tick as f64 / 10.0;
        self.tick += 1;

        let anomaly = self.anomalies.active(timestamp);

        if anomaly == Some(Anomaly::BedExit) {
            return Ok(RadarFrame {
                targets: Vec::new(),
                timestamp,
            });
        }

        let breathing = match anomaly {
            Some(Anomaly::Apnea) => 0.0,
            _ => 8.0 * (2.0 * PI * self.respiration_hz * t).sin(),
        };
        let jitter = match anomaly {
            Some(Anomaly::Seizure) => 60.0 * (2.0 * PI * 3.0 * t).sin(),
            _ => self.rng.gen_range(-0.5..0.5),
        };

        let target = RadarTarget {
            x_mm: 100,
            y_mm: (1500.0 + breathing + jitter) as i32,
            speed_cm_s: if anomaly == Some(Anomaly::Seizure) { 20 } else { 1 },
            resolution: 360,
        };

        Ok(RadarFrame {
            targets: vec![target],
            timestamp,
        })
    }
}

/// Synthetic microphone: breath noise bursts over a quiet floor.
pub struct MockAudioSource {
    clock: Arc<dyn Clock>,
    anomalies: AnomalyHandle,
    rng: StdRng,
    tick: u64,
    sample_rate: u32,
}

impl MockAudioSource {
    /// Creates the mock at the given sample rate.
    pub fn new(sample_rate: u32, clock: Arc<dyn Clock>, anomalies: AnomalyHandle) -> Self {
        Self {
            clock,
            anomalies,
            rng: StdRng::seed_from_u64(0x4e57_0002),
            tick: 0,
            sample_rate,
        }
    }
}

#[async_trait]
impl AudioSource for MockAudioSource {
    async fn connect(&mut self) -> DriverResult<()> {
        Ok(())
    }

    async fn disconnect(&mut self) -> DriverResult<()> {
        Ok(())
    }

    async fn read_block(&mut self) -> DriverResult<PcmBlock> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let timestamp = self.clock.now_monotonic();
        let fs = f64::from(self.sample_rate);
        let n = (fs * 0.020).round() as usize;
        let block_start = self.tick as f64 * 0.020;
        self.tick += 1;

        let anomaly = self.anomalies.active(timestamp);

        let samples = (0..n)
            .map(|i| {
                let t = block_start + i as f64 / fs;
                let floor = self.rng.gen_range(-0.002..0.002);
                match anomaly {
                    Some(Anomaly::Apnea) | Some(Anomaly::BedExit) => floor,
                    Some(Anomaly::Seizure) => {
                        // Rhythmic 3 Hz bursts of broadband sound.
                        let gate = ((2.0 * PI * 3.0 * t).sin() > 0.0) as u8 as f64;
                        floor + gate * 0.2 * (2.0 * PI * 700.0 * t).sin()
                    }
                    _ => {
                        // Breath noise: 400 Hz band noise gated at 15 BPM.
                        let breath = (2.0 * PI * 0.25 * t).sin().max(0.0).powi(2);
                        floor + breath * 0.05 * (2.0 * PI * 400.0 * t).sin()
                    }
                }
            })
            .collect();

        Ok(PcmBlock {
            samples,
            timestamp,
            sample_rate: fs,
        })
    }
}

/// Synthetic BCG: heartbeat pulses plus respiration modulation while the bed
/// is occupied.
pub struct MockAdcSource {
    clock: Arc<dyn Clock>,
    anomalies: AnomalyHandle,
    rng: StdRng,
    tick: u64,
    heart_hz: f64,
}

impl MockAdcSource {
    /// Creates the mock with a 72 BPM pulse.
    pub fn new(clock: Arc<dyn Clock>, anomalies: AnomalyHandle) -> Self {
        Self {
            clock,
            anomalies,
            rng: StdRng::seed_from_u64(0x4e57_0003),
            tick: 0,
            heart_hz: 1.2,
        }
    }
}

#[async_trait]
impl AdcSource for MockAdcSource {
    async fn connect(&mut self) -> DriverResult<()> {
        Ok(())
    }

    async fn disconnect(&mut self) -> DriverResult<()> {
        Ok(())
    }

    async fn read_block(&mut self) -> DriverResult<SampleBlock> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let timestamp = self.clock.now_monotonic();
        let fs = 100.0;
        let block_start = self.tick as f64 * 0.1;
        self.tick += 1;

        let anomaly = self.anomalies.active(timestamp);
        let heart_hz = match anomaly {
            Some(Anomaly::Bradycardia) => self.heart_hz / 2.0,
            _ => self.heart_hz,
        };

        let samples = (0..10)
            .map(|i| {
                let t = block_start + i as f64 / fs;
                if anomaly == Some(Anomaly::BedExit) {
                    return self.rng.gen_range(-0.001..0.001);
                }

                // Narrow J-peak-like pulse each cardiac cycle.
                let phase = (t * heart_hz).fract();
                let pulse = (-((phase - 0.1) / 0.025).powi(2)).exp() * 0.3;

                let respiration = match anomaly {
                    Some(Anomaly::Apnea) => 0.0,
                    _ => 0.03 * (2.0 * PI * 0.25 * t).sin(),
                };

                pulse + respiration + self.rng.gen_range(-0.005..0.005)
            })
            .collect();

        Ok(SampleBlock {
            samples,
            timestamp,
            sample_rate: fs,
        })
    }

    async fn calibrate(&mut self) -> DriverResult<CalibrationOutcome> {
        let mut baseline = BTreeMap::new();
        baseline.insert("occupancy_empty_rms".to_string(), 0.001);
        baseline.insert("occupancy_threshold".to_string(), 0.01);
        Ok(CalibrationOutcome {
            success: true,
            message: "mock calibration".to_string(),
            baseline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nightwatch_core::ManualClock;

    #[tokio::test(start_paused = true)]
    async fn radar_breathing_modulates_depth() {
        let clock = ManualClock::shared();
        let mut source = MockRadarSource::new(clock, AnomalyHandle::new());
        source.connect().await.unwrap();

        let mut depths = Vec::new();
        for _ in 0..40 {
            let frame = source.read_frame().await.unwrap();
            depths.push(frame.primary().unwrap().y_mm as f64);
        }

        let max = depths.iter().cloned().fold(f64::MIN, f64::max);
        let min = depths.iter().cloned().fold(f64::MAX, f64::min);
        assert!(max - min > 10.0, "span {}", max - min);
    }

    #[tokio::test(start_paused = true)]
    async fn bed_exit_removes_targets() {
        let clock = ManualClock::shared();
        let anomalies = AnomalyHandle::new();
        anomalies.inject(Anomaly::BedExit, 1e9);
        let mut source = MockRadarSource::new(clock, anomalies);

        let frame = source.read_frame().await.unwrap();
        assert!(frame.targets.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn apnea_silences_audio() {
        let clock = ManualClock::shared();
        let anomalies = AnomalyHandle::new();
        let mut source = MockAudioSource::new(16_000, clock, anomalies.clone());

        let loud: f64 = {
            let mut acc: f64 = 0.0;
            for _ in 0..50 {
                let block = source.read_block().await.unwrap();
                acc = acc.max(block.samples.iter().cloned().fold(0.0f64, |a, s| a.max(s.abs())));
            }
            acc
        };

        anomalies.inject(Anomaly::Apnea, 1e9);
        let quiet: f64 = {
            let mut acc: f64 = 0.0;
            for _ in 0..50 {
                let block = source.read_block().await.unwrap();
                acc = acc.max(block.samples.iter().cloned().fold(0.0f64, |a, s| a.max(s.abs())));
            }
            acc
        };

        assert!(loud > 0.02, "loud {loud}");
        assert!(quiet < 0.01, "quiet {quiet}");
    }

    #[test]
    fn anomaly_expires() {
        let handle = AnomalyHandle::new();
        handle.inject(Anomaly::Apnea, 5.0);
        assert_eq!(handle.active(4.0), Some(Anomaly::Apnea));
        assert_eq!(handle.active(6.0), None);
        // Expired entries clear themselves.
        assert_eq!(handle.active(4.0), None);
    }
}
