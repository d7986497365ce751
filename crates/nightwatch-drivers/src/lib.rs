//! # Nightwatch Drivers
//!
//! One driver per hardware family, each behind an async trait so the
//! detectors run identically against real hardware and the deterministic
//! mocks:
//!
//! - [`Ld2450Driver`] — HLK-LD2450 mmWave radar over UART, with a
//!   resynchronizing frame assembler that tolerates byte loss.
//! - [`PcmCaptureDriver`] — 16-bit mono PCM pulled from a capture child
//!   process in 20 ms blocks.
//! - [`I2cAdcDriver`] — capacitive/BCG samples from an ADS1115-class ADC.
//! - [`mock`] — seeded synthetic sources with anomaly injection.
//!
//! Raw frames are timestamped at acquisition. `read` failures are categorized
//! [`DriverError::Transient`] (retry with [`Backoff`]) or
//! [`DriverError::Fatal`] (disconnect and reconnect).

#![forbid(unsafe_code)]

pub mod adc;
pub mod audio;
pub mod backoff;
pub mod baseline;
pub mod error;
pub mod ld2450;
pub mod mock;
pub mod traits;

pub use adc::I2cAdcDriver;
pub use audio::PcmCaptureDriver;
pub use backoff::Backoff;
pub use baseline::BaselineStore;
pub use error::{DriverError, DriverResult};
pub use ld2450::{FrameAssembler, Ld2450Driver, RadarFrame, RadarTarget};
pub use traits::{AdcSource, AudioSource, CalibrationOutcome, PcmBlock, RadarSource, SampleBlock};
