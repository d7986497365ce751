//! Amplitude envelope extraction: rectify, then low-pass.

use crate::filter::{FilterError, LowpassFilter};

/// Stateful envelope extractor.
///
/// Rectifies the input and smooths it with a second-order Butterworth
/// lowpass; the cutoff sets how fast the envelope can move (2 Hz for
/// breathing envelopes, ~15 Hz when the envelope itself is analyzed for
/// rhythm).
#[derive(Debug, Clone)]
pub struct EnvelopeExtractor {
    smoother: LowpassFilter,
}

impl EnvelopeExtractor {
    /// Creates an extractor with the given smoothing cutoff.
    pub fn new(smoothing_hz: f64, sample_rate: f64) -> Result<Self, FilterError> {
        Ok(Self {
            smoother: LowpassFilter::new(smoothing_hz, sample_rate, 2)?,
        })
    }

    /// Processes one sample, returning the current envelope value.
    pub fn process(&mut self, x: f64) -> f64 {
        self.smoother.process(x.abs()).max(0.0)
    }

    /// Processes a block, returning the envelope of each sample.
    pub fn process_block(&mut self, block: &[f64]) -> Vec<f64> {
        block.iter().map(|&x| self.process(x)).collect()
    }

    /// Stateless envelope of a whole window.
    pub fn apply(&self, window: &[f64]) -> Vec<f64> {
        let mut fresh = self.clone();
        fresh.smoother.reset();
        fresh.process_block(window)
    }

    /// Clears internal state.
    pub fn reset(&mut self) {
        self.smoother.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn envelope_tracks_amplitude_modulation() {
        // 300 Hz carrier modulated at 0.25 Hz, like breath noise bursts.
        let fs = 4000.0;
        let n = (fs * 12.0) as usize;
        let signal: Vec<f64> = (0..n)
            .map(|i| {
                let t = i as f64 / fs;
                let modulation = 0.5 * (1.0 + (2.0 * PI * 0.25 * t).sin());
                modulation * (2.0 * PI * 300.0 * t).sin()
            })
            .collect();

        let extractor = EnvelopeExtractor::new(2.0, fs).unwrap();
        let envelope = extractor.apply(&signal);

        // The envelope must be non-negative and vary with the modulation.
        let tail = &envelope[n / 2..];
        let max = tail.iter().cloned().fold(f64::MIN, f64::max);
        let min = tail.iter().cloned().fold(f64::MAX, f64::min);
        assert!(min >= 0.0);
        assert!(max > 3.0 * (min + 1e-3), "max {max} min {min}");
    }

    #[test]
    fn silent_input_gives_near_zero_envelope() {
        let extractor = EnvelopeExtractor::new(2.0, 1000.0).unwrap();
        let envelope = extractor.apply(&vec![0.0; 2000]);
        assert!(envelope.iter().all(|&e| e.abs() < 1e-12));
    }
}
