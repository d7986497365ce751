//! # Nightwatch Detectors
//!
//! One detector per sensor family. Each wraps its driver, runs
//! sensor-specific DSP over sliding windows, and emits exactly one [`Event`]
//! per processing tick on the bus — `state: uncertain` with null features
//! when the window is not yet conclusive.
//!
//! [`Event`]: nightwatch_core::Event

#![forbid(unsafe_code)]

pub mod audio;
pub mod bcg;
pub mod radar;
pub mod worker;

pub use audio::{AudioAnalyzer, AudioDetector, AudioDetectorConfig};
pub use bcg::{BcgAnalyzer, BcgDetector, BcgDetectorConfig};
pub use radar::{RadarAnalyzer, RadarDetector, RadarDetectorConfig};
pub use worker::{DetectorCounters, EventEmitter};
