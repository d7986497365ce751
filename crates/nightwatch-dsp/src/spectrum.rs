//! Short-time magnitude spectrum over a window.

use rustfft::{num_complex::Complex, FftPlanner};

/// Hann-windowed FFT magnitude spectrum of one analysis window.
#[derive(Debug, Clone)]
pub struct Spectrum {
    mags: Vec<f64>,
    freq_resolution: f64,
    /// Padded-bin halfwidth of the window mainlobe, used to exclude a
    /// peak's own leakage when measuring its sidelobes.
    mainlobe_bins: usize,
}

impl Spectrum {
    /// Computes the spectrum of `signal` sampled at `sample_rate`.
    ///
    /// The signal is mean-removed, Hann-windowed, and zero-padded to the next
    /// power of two. Only the positive-frequency half is kept.
    pub fn compute(signal: &[f64], sample_rate: f64) -> Self {
        if signal.len() < 4 || sample_rate <= 0.0 {
            return Self {
                mags: Vec::new(),
                freq_resolution: 0.0,
                mainlobe_bins: 0,
            };
        }

        let n = signal.len();
        let mean = signal.iter().sum::<f64>() / n as f64;
        let padded = n.next_power_of_two();

        let mut buffer: Vec<Complex<f64>> = signal
            .iter()
            .enumerate()
            .map(|(i, &x)| {
                let window =
                    0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / n as f64).cos());
                Complex::new((x - mean) * window, 0.0)
            })
            .collect();
        buffer.resize(padded, Complex::new(0.0, 0.0));

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(padded);
        fft.process(&mut buffer);

        let mags = buffer.iter().take(padded / 2).map(|c| c.norm()).collect();

        // Hann mainlobe spans ±2 natural bins; zero-padding widens that by
        // the padding ratio.
        let mainlobe_bins = (2.0 * padded as f64 / n as f64).ceil() as usize + 1;

        Self {
            mags,
            freq_resolution: sample_rate / padded as f64,
            mainlobe_bins,
        }
    }

    /// Frequency spacing between bins, Hz.
    pub fn freq_resolution(&self) -> f64 {
        self.freq_resolution
    }

    /// Magnitudes for the positive-frequency bins.
    pub fn magnitudes(&self) -> &[f64] {
        &self.mags
    }

    fn band_bins(&self, low_hz: f64, high_hz: f64) -> Option<(usize, usize)> {
        if self.mags.is_empty() || self.freq_resolution <= 0.0 {
            return None;
        }
        let lo = (low_hz / self.freq_resolution).ceil() as usize;
        let hi = ((high_hz / self.freq_resolution).floor() as usize).min(self.mags.len() - 1);
        if lo >= hi {
            return None;
        }
        Some((lo.max(1), hi))
    }

    /// The strongest bin inside `low_hz..=high_hz` as `(frequency, magnitude)`.
    pub fn dominant_in_band(&self, low_hz: f64, high_hz: f64) -> Option<(f64, f64)> {
        let (lo, hi) = self.band_bins(low_hz, high_hz)?;
        let (idx, &mag) = self.mags[lo..=hi]
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())?;
        Some(((lo + idx) as f64 * self.freq_resolution, mag))
    }

    /// Total magnitude in `low_hz..=high_hz`.
    pub fn band_energy(&self, low_hz: f64, high_hz: f64) -> f64 {
        match self.band_bins(low_hz, high_hz) {
            Some((lo, hi)) => self.mags[lo..=hi].iter().sum(),
            None => 0.0,
        }
    }

    /// Ratio of the band's peak to the strongest bin elsewhere in the band,
    /// with the peak's own mainlobe excluded.
    ///
    /// A clean periodic component scores high; noise or several competing
    /// components score near 1. Used as the radar heart-rate confidence
    /// proxy and as a spectral purity check. `None` if the band is too
    /// narrow to measure.
    pub fn peak_to_sidelobe(&self, low_hz: f64, high_hz: f64) -> Option<f64> {
        let (lo, hi) = self.band_bins(low_hz, high_hz)?;
        let band = &self.mags[lo..=hi];
        if band.len() <= 2 * self.mainlobe_bins + 1 {
            return None;
        }
        let (peak_idx, &peak) = band
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())?;

        let sidelobe = band
            .iter()
            .enumerate()
            .filter(|(i, _)| i.abs_diff(peak_idx) > self.mainlobe_bins)
            .map(|(_, &m)| m)
            .fold(0.0f64, f64::max);
        if sidelobe <= 0.0 {
            return Some(f64::INFINITY);
        }
        Some(peak / sidelobe)
    }

    /// Ratio of the band's peak to the band's average magnitude (peak
    /// included), the prominence measure for envelope rhythm detection.
    pub fn peak_to_band_mean(&self, low_hz: f64, high_hz: f64) -> Option<f64> {
        let (lo, hi) = self.band_bins(low_hz, high_hz)?;
        let band = &self.mags[lo..=hi];
        if band.len() < 3 {
            return None;
        }
        let peak = band.iter().cloned().fold(0.0f64, f64::max);
        let mean = band.iter().sum::<f64>() / band.len() as f64;
        if mean <= 0.0 {
            return None;
        }
        Some(peak / mean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn sine(freq: f64, sample_rate: f64, seconds: f64) -> Vec<f64> {
        let n = (sample_rate * seconds) as usize;
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f64 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn dominant_frequency_of_pure_tone() {
        // 1.2 Hz heartbeat-range motion at the radar rate.
        let spectrum = Spectrum::compute(&sine(1.2, 10.0, 30.0), 10.0);
        let (freq, _) = spectrum.dominant_in_band(0.8, 2.0).unwrap();
        assert!((freq - 1.2).abs() < 0.1, "freq {freq}");
    }

    #[test]
    fn peak_to_sidelobe_high_for_clean_tone() {
        let spectrum = Spectrum::compute(&sine(1.0, 10.0, 30.0), 10.0);
        let ratio = spectrum.peak_to_sidelobe(0.8, 2.0).unwrap();
        assert!(ratio > 3.0, "ratio {ratio}");
    }

    #[test]
    fn peak_to_sidelobe_low_for_noise() {
        // Deterministic pseudo-noise spread across the band.
        let fs = 10.0;
        let noise: Vec<f64> = (0..300)
            .map(|i| {
                let t = i as f64 / fs;
                (2.0 * PI * 0.9 * t).sin()
                    + (2.0 * PI * 1.3 * t).sin()
                    + (2.0 * PI * 1.7 * t).sin()
            })
            .collect();
        let spectrum = Spectrum::compute(&noise, fs);
        let ratio = spectrum.peak_to_sidelobe(0.8, 2.0).unwrap();
        assert!(ratio < 3.0, "ratio {ratio}");
    }

    #[test]
    fn band_energy_concentrates_at_tone() {
        let spectrum = Spectrum::compute(&sine(3.0, 50.0, 10.0), 50.0);
        let in_band = spectrum.band_energy(2.0, 4.0);
        let out_band = spectrum.band_energy(10.0, 20.0);
        assert!(in_band > 5.0 * out_band);
    }

    #[test]
    fn degenerate_input_is_safe() {
        let spectrum = Spectrum::compute(&[1.0, 2.0], 10.0);
        assert!(spectrum.dominant_in_band(0.1, 1.0).is_none());
        assert_eq!(spectrum.band_energy(0.1, 1.0), 0.0);
    }
}
