//! Butterworth IIR filters as cascaded biquad sections.
//!
//! Coefficients come from the bilinear transform of the analog Butterworth
//! prototype; an order-N filter is a cascade of N/2 second-order sections with
//! the standard Butterworth Q ladder. Bandpass is built as highpass at the low
//! edge followed by lowpass at the high edge, which keeps each section well
//! conditioned at the very low normalized frequencies the vital-sign bands sit
//! at (0.1 Hz at a 10 Hz sample rate).

use std::f64::consts::PI;

use thiserror::Error;

/// Errors from filter construction.
#[derive(Error, Debug, PartialEq)]
pub enum FilterError {
    /// Cutoff did not fall inside (0, nyquist).
    #[error("cutoff {cutoff_hz} Hz out of range for sample rate {sample_rate} Hz")]
    BadCutoff {
        /// Requested cutoff.
        cutoff_hz: f64,
        /// Sample rate the filter was built for.
        sample_rate: f64,
    },
    /// Unsupported filter order (2 and 4 are supported).
    #[error("unsupported filter order {0}, expected 2 or 4")]
    BadOrder(usize),
    /// Band edges inverted or degenerate.
    #[error("invalid band {low_hz}-{high_hz} Hz")]
    BadBand {
        /// Low edge.
        low_hz: f64,
        /// High edge.
        high_hz: f64,
    },
}

/// Butterworth Q values for each cascaded second-order section.
fn butterworth_qs(order: usize) -> Result<&'static [f64], FilterError> {
    match order {
        2 => Ok(&[std::f64::consts::FRAC_1_SQRT_2]),
        4 => Ok(&[0.541_196_100_146_197, 1.306_562_964_876_376_5]),
        _ => Err(FilterError::BadOrder(order)),
    }
}

/// Clamps a cutoff into the filter's usable range, matching how the source
/// windows are configured (edges are specified in Hz, never normalized).
fn checked_cutoff(cutoff_hz: f64, sample_rate: f64) -> Result<f64, FilterError> {
    let nyquist = sample_rate / 2.0;
    if !(cutoff_hz > 0.0 && cutoff_hz < nyquist) {
        return Err(FilterError::BadCutoff {
            cutoff_hz,
            sample_rate,
        });
    }
    Ok(cutoff_hz.min(nyquist * 0.99))
}

/// One second-order IIR section, direct form II transposed.
#[derive(Debug, Clone)]
pub struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    z1: f64,
    z2: f64,
}

impl Biquad {
    /// Butterworth-style lowpass section.
    pub fn lowpass(cutoff_hz: f64, sample_rate: f64, q: f64) -> Self {
        let omega = 2.0 * PI * cutoff_hz / sample_rate;
        let (sin_o, cos_o) = omega.sin_cos();
        let alpha = sin_o / (2.0 * q);
        let a0 = 1.0 + alpha;
        Self {
            b0: ((1.0 - cos_o) / 2.0) / a0,
            b1: (1.0 - cos_o) / a0,
            b2: ((1.0 - cos_o) / 2.0) / a0,
            a1: (-2.0 * cos_o) / a0,
            a2: (1.0 - alpha) / a0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    /// Butterworth-style highpass section.
    pub fn highpass(cutoff_hz: f64, sample_rate: f64, q: f64) -> Self {
        let omega = 2.0 * PI * cutoff_hz / sample_rate;
        let (sin_o, cos_o) = omega.sin_cos();
        let alpha = sin_o / (2.0 * q);
        let a0 = 1.0 + alpha;
        Self {
            b0: ((1.0 + cos_o) / 2.0) / a0,
            b1: -(1.0 + cos_o) / a0,
            b2: ((1.0 + cos_o) / 2.0) / a0,
            a1: (-2.0 * cos_o) / a0,
            a2: (1.0 - alpha) / a0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    /// Filters one sample.
    #[inline]
    pub fn process(&mut self, x: f64) -> f64 {
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y
    }

    /// Clears internal state.
    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

/// Cascade of biquad sections.
#[derive(Debug, Clone)]
struct Cascade {
    sections: Vec<Biquad>,
}

impl Cascade {
    fn process(&mut self, x: f64) -> f64 {
        self.sections.iter_mut().fold(x, |acc, s| s.process(acc))
    }

    fn reset(&mut self) {
        for s in &mut self.sections {
            s.reset();
        }
    }
}

/// Butterworth lowpass of order 2 or 4.
#[derive(Debug, Clone)]
pub struct LowpassFilter {
    cascade: Cascade,
}

impl LowpassFilter {
    /// Designs a lowpass for the given cutoff and sample rate.
    pub fn new(cutoff_hz: f64, sample_rate: f64, order: usize) -> Result<Self, FilterError> {
        let cutoff = checked_cutoff(cutoff_hz, sample_rate)?;
        let sections = butterworth_qs(order)?
            .iter()
            .map(|&q| Biquad::lowpass(cutoff, sample_rate, q))
            .collect();
        Ok(Self {
            cascade: Cascade { sections },
        })
    }

    /// Filters one sample, keeping state between calls.
    pub fn process(&mut self, x: f64) -> f64 {
        self.cascade.process(x)
    }

    /// Clears internal state.
    pub fn reset(&mut self) {
        self.cascade.reset();
    }
}

/// Butterworth highpass of order 2 or 4.
#[derive(Debug, Clone)]
pub struct HighpassFilter {
    cascade: Cascade,
}

impl HighpassFilter {
    /// Designs a highpass for the given cutoff and sample rate.
    pub fn new(cutoff_hz: f64, sample_rate: f64, order: usize) -> Result<Self, FilterError> {
        let cutoff = checked_cutoff(cutoff_hz, sample_rate)?;
        let sections = butterworth_qs(order)?
            .iter()
            .map(|&q| Biquad::highpass(cutoff, sample_rate, q))
            .collect();
        Ok(Self {
            cascade: Cascade { sections },
        })
    }

    /// Filters one sample, keeping state between calls.
    pub fn process(&mut self, x: f64) -> f64 {
        self.cascade.process(x)
    }

    /// Clears internal state.
    pub fn reset(&mut self) {
        self.cascade.reset();
    }
}

/// Butterworth bandpass: highpass at the low edge, lowpass at the high edge,
/// each of the given order.
#[derive(Debug, Clone)]
pub struct BandpassFilter {
    highpass: HighpassFilter,
    lowpass: LowpassFilter,
}

impl BandpassFilter {
    /// Designs a bandpass for `low_hz..high_hz` at `sample_rate`.
    pub fn new(
        low_hz: f64,
        high_hz: f64,
        sample_rate: f64,
        order: usize,
    ) -> Result<Self, FilterError> {
        if low_hz >= high_hz {
            return Err(FilterError::BadBand { low_hz, high_hz });
        }
        Ok(Self {
            highpass: HighpassFilter::new(low_hz, sample_rate, order)?,
            lowpass: LowpassFilter::new(high_hz, sample_rate, order)?,
        })
    }

    /// Filters one sample, keeping state between calls.
    pub fn process(&mut self, x: f64) -> f64 {
        self.lowpass.process(self.highpass.process(x))
    }

    /// Filters a whole window from fresh state, removing the window mean
    /// first. Used by detectors that reanalyze their ring on every tick.
    pub fn apply(&self, window: &[f64]) -> Vec<f64> {
        let mut filter = self.clone();
        filter.reset();
        let mean = if window.is_empty() {
            0.0
        } else {
            window.iter().sum::<f64>() / window.len() as f64
        };
        window.iter().map(|&x| filter.process(x - mean)).collect()
    }

    /// Clears internal state.
    pub fn reset(&mut self) {
        self.highpass.reset();
        self.lowpass.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, sample_rate: f64, seconds: f64) -> Vec<f64> {
        let n = (sample_rate * seconds) as usize;
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f64 / sample_rate).sin())
            .collect()
    }

    fn rms(signal: &[f64]) -> f64 {
        (signal.iter().map(|x| x * x).sum::<f64>() / signal.len() as f64).sqrt()
    }

    #[test]
    fn bandpass_passes_in_band_sine() {
        // Respiration band at the radar sample rate.
        let filter = BandpassFilter::new(0.1, 0.5, 10.0, 4).unwrap();
        let input = sine(0.25, 10.0, 60.0);
        let output = filter.apply(&input);

        // Skip the settling transient, then expect most energy retained.
        let steady = &output[output.len() / 2..];
        assert!(rms(steady) > 0.5, "in-band rms {}", rms(steady));
    }

    #[test]
    fn bandpass_rejects_out_of_band() {
        let filter = BandpassFilter::new(0.1, 0.5, 10.0, 4).unwrap();

        let slow = filter.apply(&sine(0.01, 10.0, 120.0));
        let fast = filter.apply(&sine(2.0, 10.0, 120.0));

        assert!(rms(&slow[slow.len() / 2..]) < 0.2, "dc-ish leak {}", rms(&slow));
        assert!(rms(&fast[fast.len() / 2..]) < 0.2, "hf leak {}", rms(&fast));
    }

    #[test]
    fn lowpass_smooths_high_frequency() {
        let mut filter = LowpassFilter::new(2.0, 50.0, 2).unwrap();
        let input = sine(20.0, 50.0, 10.0);
        let output: Vec<f64> = input.iter().map(|&x| filter.process(x)).collect();
        assert!(rms(&output[output.len() / 2..]) < 0.1);
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(matches!(
            BandpassFilter::new(0.5, 0.1, 10.0, 4),
            Err(FilterError::BadBand { .. })
        ));
        assert!(matches!(
            LowpassFilter::new(6.0, 10.0, 2),
            Err(FilterError::BadCutoff { .. })
        ));
        assert!(matches!(
            LowpassFilter::new(1.0, 10.0, 3),
            Err(FilterError::BadOrder(3))
        ));
    }

    #[test]
    fn reset_clears_state() {
        let mut filter = BandpassFilter::new(0.5, 2.0, 10.0, 2).unwrap();
        for i in 0..100 {
            filter.process(i as f64);
        }
        filter.reset();
        // After reset, a zero input yields exactly zero.
        assert_eq!(filter.process(0.0), 0.0);
    }
}
