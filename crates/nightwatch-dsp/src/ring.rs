//! Fixed-size sliding windows.

use std::collections::VecDeque;

/// Capacity-bounded ring of samples; pushing past capacity evicts the oldest.
#[derive(Debug, Clone)]
pub struct Ring {
    buf: VecDeque<f64>,
    capacity: usize,
}

impl Ring {
    /// Creates a ring holding at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    /// Sized for `seconds` of data at `sample_rate`.
    pub fn for_window(seconds: f64, sample_rate: f64) -> Self {
        Self::new((seconds * sample_rate).ceil() as usize)
    }

    /// Appends a sample, evicting the oldest when full.
    pub fn push(&mut self, value: f64) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(value);
    }

    /// Appends a block of samples.
    pub fn extend(&mut self, values: &[f64]) {
        for &v in values {
            self.push(v);
        }
    }

    /// Number of stored samples.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// True when the window is completely filled.
    pub fn is_full(&self) -> bool {
        self.buf.len() == self.capacity
    }

    /// Contiguous copy of the window, oldest first.
    pub fn to_vec(&self) -> Vec<f64> {
        self.buf.iter().copied().collect()
    }

    /// Iterates oldest-first without copying.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.buf.iter().copied()
    }

    /// Drops all samples.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// Ring of `(timestamp, value)` pairs bounded by a time window.
#[derive(Debug, Clone)]
pub struct TimedRing {
    buf: VecDeque<(f64, f64)>,
    window_seconds: f64,
}

impl TimedRing {
    /// Creates a ring retaining `window_seconds` of history.
    pub fn new(window_seconds: f64) -> Self {
        Self {
            buf: VecDeque::new(),
            window_seconds: window_seconds.max(f64::EPSILON),
        }
    }

    /// Appends a timestamped sample and trims anything older than the window.
    pub fn push(&mut self, timestamp: f64, value: f64) {
        self.buf.push_back((timestamp, value));
        let horizon = timestamp - self.window_seconds;
        while matches!(self.buf.front(), Some(&(t, _)) if t < horizon) {
            self.buf.pop_front();
        }
    }

    /// Number of retained samples.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Values only, oldest first.
    pub fn values(&self) -> Vec<f64> {
        self.buf.iter().map(|&(_, v)| v).collect()
    }

    /// Timestamps only, oldest first.
    pub fn timestamps(&self) -> Vec<f64> {
        self.buf.iter().map(|&(t, _)| t).collect()
    }

    /// Values newer than `since`.
    pub fn values_since(&self, since: f64) -> Vec<f64> {
        self.buf
            .iter()
            .filter(|&&(t, _)| t >= since)
            .map(|&(_, v)| v)
            .collect()
    }

    /// Time span covered by the stored samples.
    pub fn span(&self) -> f64 {
        match (self.buf.front(), self.buf.back()) {
            (Some(&(first, _)), Some(&(last, _))) => last - first,
            _ => 0.0,
        }
    }

    /// Drops all samples.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_evicts_oldest() {
        let mut ring = Ring::new(3);
        ring.extend(&[1.0, 2.0, 3.0, 4.0]);
        assert!(ring.is_full());
        assert_eq!(ring.to_vec(), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn ring_window_sizing() {
        let ring = Ring::for_window(30.0, 10.0);
        assert_eq!(ring.capacity, 300);
    }

    #[test]
    fn timed_ring_trims_by_age() {
        let mut ring = TimedRing::new(5.0);
        for i in 0..10 {
            ring.push(i as f64, i as f64 * 10.0);
        }
        // At t=9 the 5 s window keeps t in [4, 9].
        assert_eq!(ring.timestamps(), vec![4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        assert_eq!(ring.values_since(7.0), vec![70.0, 80.0, 90.0]);
        assert!((ring.span() - 5.0).abs() < 1e-9);
    }
}
