//! # Nightwatch DSP
//!
//! Signal-processing primitives shared by the detectors:
//!
//! - [`BandpassFilter`] / [`LowpassFilter`] — Butterworth IIR filters as
//!   cascaded biquad sections, usable sample-by-sample or over whole windows.
//! - [`EnvelopeExtractor`] — rectify + low-pass amplitude envelope.
//! - [`find_peaks`] — peak detection with height, spacing, and prominence
//!   constraints.
//! - [`Spectrum`] — Hann-windowed FFT magnitude spectrum with band queries.
//! - [`Ring`] / [`TimedRing`] — fixed-size sliding windows for samples.
//! - [`stats`] — percentile, median, RMS, RMSSD and friends.
//!
//! DSP passes over a window are bounded and never yield; all types here are
//! synchronous and allocation-light so they can run inside a detector tick.

#![forbid(unsafe_code)]

pub mod envelope;
pub mod filter;
pub mod peaks;
pub mod ring;
pub mod spectrum;
pub mod stats;

pub use envelope::EnvelopeExtractor;
pub use filter::{BandpassFilter, Biquad, FilterError, HighpassFilter, LowpassFilter};
pub use peaks::{find_peaks, PeakOptions};
pub use ring::{Ring, TimedRing};
pub use spectrum::Spectrum;
