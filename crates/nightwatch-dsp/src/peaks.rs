//! Peak detection with height, spacing, and prominence constraints.

/// Constraints for [`find_peaks`].
#[derive(Debug, Clone, Default)]
pub struct PeakOptions {
    /// Minimum absolute peak height.
    pub min_height: Option<f64>,
    /// Minimum samples between accepted peaks. Taller peaks win ties.
    pub min_distance: usize,
    /// Minimum prominence over the surrounding terrain.
    pub min_prominence: Option<f64>,
}

/// Finds indices of local maxima satisfying the options, ascending.
///
/// Distance filtering is greedy by height: the tallest candidate is accepted
/// first and suppresses anything closer than `min_distance`, mirroring how
/// inter-beat and inter-breath spacing limits are applied.
pub fn find_peaks(signal: &[f64], opts: &PeakOptions) -> Vec<usize> {
    if signal.len() < 3 {
        return Vec::new();
    }

    let mut candidates: Vec<usize> = Vec::new();
    for i in 1..signal.len() - 1 {
        if signal[i] > signal[i - 1] && signal[i] >= signal[i + 1] {
            candidates.push(i);
        }
    }

    if let Some(h) = opts.min_height {
        candidates.retain(|&i| signal[i] >= h);
    }

    if let Some(p) = opts.min_prominence {
        candidates.retain(|&i| prominence(signal, i) >= p);
    }

    if opts.min_distance > 1 && candidates.len() > 1 {
        let mut by_height = candidates.clone();
        by_height.sort_by(|&a, &b| signal[b].partial_cmp(&signal[a]).unwrap());

        let mut keep = vec![false; signal.len()];
        let mut blocked = vec![false; signal.len()];
        for &i in &by_height {
            if blocked[i] {
                continue;
            }
            keep[i] = true;
            let lo = i.saturating_sub(opts.min_distance - 1);
            let hi = (i + opts.min_distance).min(signal.len());
            for b in blocked.iter_mut().take(hi).skip(lo) {
                *b = true;
            }
        }
        candidates.retain(|&i| keep[i]);
    }

    candidates
}

/// Topographic prominence of the peak at `idx`: height above the higher of
/// the two valley floors that separate it from taller terrain (or the edges).
pub fn prominence(signal: &[f64], idx: usize) -> f64 {
    let peak = signal[idx];

    let mut left_min = peak;
    for i in (0..idx).rev() {
        if signal[i] > peak {
            break;
        }
        left_min = left_min.min(signal[i]);
    }

    let mut right_min = peak;
    for &v in &signal[idx + 1..] {
        if v > peak {
            break;
        }
        right_min = right_min.min(v);
    }

    peak - left_min.max(right_min)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_simple_peaks() {
        let signal = [0.0, 1.0, 0.0, 2.0, 0.0, 3.0, 0.0];
        let peaks = find_peaks(&signal, &PeakOptions::default());
        assert_eq!(peaks, vec![1, 3, 5]);
    }

    #[test]
    fn height_filter() {
        let signal = [0.0, 1.0, 0.0, 2.0, 0.0, 3.0, 0.0];
        let peaks = find_peaks(
            &signal,
            &PeakOptions {
                min_height: Some(1.5),
                ..Default::default()
            },
        );
        assert_eq!(peaks, vec![3, 5]);
    }

    #[test]
    fn distance_filter_prefers_taller_peaks() {
        let signal = [0.0, 1.0, 0.5, 3.0, 0.5, 1.0, 0.0];
        let peaks = find_peaks(
            &signal,
            &PeakOptions {
                min_distance: 3,
                ..Default::default()
            },
        );
        // The tall center peak suppresses both neighbors.
        assert_eq!(peaks, vec![3]);
    }

    #[test]
    fn prominence_ignores_ripple_on_a_slope() {
        // A small bump riding a large ramp has low prominence.
        let mut signal: Vec<f64> = (0..50).map(|i| i as f64 * 0.1).collect();
        signal[25] += 0.15;
        let peaks = find_peaks(
            &signal,
            &PeakOptions {
                min_prominence: Some(0.5),
                ..Default::default()
            },
        );
        assert!(peaks.is_empty());
    }

    #[test]
    fn periodic_peaks_on_sine() {
        let fs = 10.0;
        let freq = 0.25; // 15 BPM
        let signal: Vec<f64> = (0..300)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / fs).sin())
            .collect();
        let peaks = find_peaks(
            &signal,
            &PeakOptions {
                min_distance: (1.5 * fs) as usize,
                min_height: Some(0.5),
                ..Default::default()
            },
        );

        // 30 seconds at 0.25 Hz: expect ~7 breath peaks, 4 s apart.
        assert!(peaks.len() >= 6 && peaks.len() <= 8, "got {}", peaks.len());
        for pair in peaks.windows(2) {
            let spacing = (pair[1] - pair[0]) as f64 / fs;
            assert!((spacing - 4.0).abs() < 0.5, "spacing {spacing}");
        }
    }
}
