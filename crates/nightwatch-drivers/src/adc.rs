//! Capacitive/BCG sampling from an ADS1115-class I²C ADC.
//!
//! The piezo film under the mattress feeds one single-ended ADC channel. The
//! blocking I²C transactions run on the blocking pool in 100 ms batches so
//! the async runtime never stalls on the bus.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use i2cdev::core::I2CDevice;
use i2cdev::linux::LinuxI2CDevice;
use nightwatch_core::Clock;
use tracing::debug;

use crate::error::{DriverError, DriverResult};
use crate::traits::{AdcSource, CalibrationOutcome, SampleBlock};

/// Conversion register.
const REG_CONVERSION: u8 = 0x00;
/// Config register.
const REG_CONFIG: u8 = 0x01;
/// Single-shot, AIN0 vs GND, ±2.048 V, 860 SPS.
const CONFIG_WORD: u16 = 0b1100_0101_1110_0011;

/// Samples per blocking batch (100 ms at 100 Hz).
const BATCH: usize = 10;

/// ADS1115 driver sampling one channel at a fixed rate.
pub struct I2cAdcDriver {
    bus: String,
    address: u16,
    sample_rate: u32,
    clock: Arc<dyn Clock>,
    device: Option<LinuxI2CDevice>,
}

impl I2cAdcDriver {
    /// Creates a driver for `address` on the given bus device.
    pub fn new(
        bus: impl Into<String>,
        address: u16,
        sample_rate: u32,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            bus: bus.into(),
            address,
            sample_rate: sample_rate.max(1),
            clock,
            device: None,
        }
    }

    fn sample_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.sample_rate))
    }
}

fn read_one(device: &mut LinuxI2CDevice) -> Result<f64, String> {
    // Kick a single-shot conversion, then read the result. At 860 SPS the
    // conversion completes well inside our sample period.
    device
        .smbus_write_word_data(REG_CONFIG, CONFIG_WORD.swap_bytes())
        .map_err(|e| format!("config write: {e}"))?;
    std::thread::sleep(Duration::from_micros(1200));
    let raw = device
        .smbus_read_word_data(REG_CONVERSION)
        .map_err(|e| format!("conversion read: {e}"))?;
    // SMBus word transfers are little-endian; the ADS1115 registers are
    // big-endian, so the bytes come back swapped.
    let value = i16::from_be_bytes(raw.to_le_bytes());
    Ok(f64::from(value) / 32768.0)
}

#[async_trait]
impl AdcSource for I2cAdcDriver {
    async fn connect(&mut self) -> DriverResult<()> {
        let device = LinuxI2CDevice::new(&self.bus, self.address)
            .map_err(|e| DriverError::init(format!("open {} @0x{:02x}: {e}", self.bus, self.address)))?;
        self.device = Some(device);
        debug!(bus = %self.bus, address = self.address, "adc connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> DriverResult<()> {
        self.device = None;
        Ok(())
    }

    async fn read_block(&mut self) -> DriverResult<SampleBlock> {
        let mut device = self
            .device
            .take()
            .ok_or_else(|| DriverError::fatal("adc not connected"))?;
        let period = self.sample_period();
        let timestamp = self.clock.now_monotonic();

        let result = tokio::task::spawn_blocking(move || {
            let mut samples = Vec::with_capacity(BATCH);
            for _ in 0..BATCH {
                match read_one(&mut device) {
                    Ok(v) => samples.push(v),
                    Err(e) => return (device, Err(e)),
                }
                std::thread::sleep(period.saturating_sub(Duration::from_micros(1200)));
            }
            (device, Ok(samples))
        })
        .await
        .map_err(|e| DriverError::fatal(format!("adc task: {e}")))?;

        let (device, samples) = result;
        self.device = Some(device);

        match samples {
            Ok(samples) => Ok(SampleBlock {
                samples,
                timestamp,
                sample_rate: f64::from(self.sample_rate),
            }),
            Err(e) => Err(DriverError::transient(format!("adc read: {e}"))),
        }
    }

    async fn calibrate(&mut self) -> DriverResult<CalibrationOutcome> {
        // Measure the quiescent level for a couple of seconds. Run with the
        // bed empty; the occupancy threshold is derived from this floor.
        let mut values = Vec::new();
        let blocks = (2 * self.sample_rate as usize) / BATCH;
        for _ in 0..blocks.max(1) {
            let block = self.read_block().await?;
            values.extend(block.samples);
        }

        let rms = (values.iter().map(|v| v * v).sum::<f64>() / values.len().max(1) as f64).sqrt();
        let mut baseline = BTreeMap::new();
        baseline.insert("occupancy_empty_rms".to_string(), rms);
        baseline.insert("occupancy_threshold".to_string(), (rms * 3.0).max(0.01));

        Ok(CalibrationOutcome {
            success: true,
            message: format!("empty-bed RMS {rms:.5}, threshold {:.5}", (rms * 3.0).max(0.01)),
            baseline,
        })
    }
}
