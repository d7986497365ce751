//! Driver capability traits.
//!
//! Each hardware family gets a typed read method on top of the shared
//! connect/disconnect/calibrate lifecycle, so detectors depend on the trait
//! and accept either the real driver or its mock.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::DriverResult;
use crate::ld2450::RadarFrame;

/// Result of a calibration run: learned baseline parameters plus a human
/// summary. Persisted by [`crate::BaselineStore`].
#[derive(Debug, Clone, Default)]
pub struct CalibrationOutcome {
    /// Whether calibration succeeded.
    pub success: bool,
    /// Operator-facing summary.
    pub message: String,
    /// Learned parameters (e.g. `occupancy_empty_rms`, `occupancy_occupied_rms`).
    pub baseline: BTreeMap<String, f64>,
}

/// A block of normalized PCM samples.
#[derive(Debug, Clone)]
pub struct PcmBlock {
    /// Samples in [-1, 1], 20 ms worth at the configured rate.
    pub samples: Vec<f64>,
    /// Monotonic acquisition timestamp of the first sample.
    pub timestamp: f64,
    /// Sample rate, Hz.
    pub sample_rate: f64,
}

/// A block of normalized ADC samples.
#[derive(Debug, Clone)]
pub struct SampleBlock {
    /// Samples in [-1, 1].
    pub samples: Vec<f64>,
    /// Monotonic acquisition timestamp of the first sample.
    pub timestamp: f64,
    /// Sample rate, Hz.
    pub sample_rate: f64,
}

/// mmWave radar: yields target-position frames at ~10 Hz.
#[async_trait]
pub trait RadarSource: Send {
    /// Opens the device.
    async fn connect(&mut self) -> DriverResult<()>;

    /// Releases the device handle.
    async fn disconnect(&mut self) -> DriverResult<()>;

    /// Next parsed frame, timestamped at acquisition.
    async fn read_frame(&mut self) -> DriverResult<RadarFrame>;

    /// Frames discarded by resynchronization so far.
    fn resync_count(&self) -> u64 {
        0
    }

    /// Optional calibration; default is a no-op success.
    async fn calibrate(&mut self) -> DriverResult<CalibrationOutcome> {
        Ok(CalibrationOutcome {
            success: true,
            message: "no calibration required".to_string(),
            baseline: BTreeMap::new(),
        })
    }
}

/// Microphone: yields PCM blocks.
#[async_trait]
pub trait AudioSource: Send {
    /// Starts capture.
    async fn connect(&mut self) -> DriverResult<()>;

    /// Stops capture.
    async fn disconnect(&mut self) -> DriverResult<()>;

    /// Next 20 ms block.
    async fn read_block(&mut self) -> DriverResult<PcmBlock>;

    /// Optional calibration; default measures nothing.
    async fn calibrate(&mut self) -> DriverResult<CalibrationOutcome> {
        Ok(CalibrationOutcome {
            success: true,
            message: "no calibration required".to_string(),
            baseline: BTreeMap::new(),
        })
    }
}

/// Capacitive/BCG ADC: yields sample blocks at 100 Hz.
#[async_trait]
pub trait AdcSource: Send {
    /// Opens the bus.
    async fn connect(&mut self) -> DriverResult<()>;

    /// Releases the bus.
    async fn disconnect(&mut self) -> DriverResult<()>;

    /// Next block of samples.
    async fn read_block(&mut self) -> DriverResult<SampleBlock>;

    /// Learns empty-bed vs occupied signal levels.
    async fn calibrate(&mut self) -> DriverResult<CalibrationOutcome>;
}
