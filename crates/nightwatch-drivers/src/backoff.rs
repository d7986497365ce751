//! Exponential backoff with jitter for transient driver errors.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff: starts at 200 ms, doubles to a 5 s cap, with ±20%
/// jitter on every delay so reconnecting drivers do not thundering-herd a
/// shared bus.
#[derive(Debug)]
pub struct Backoff {
    initial: Duration,
    cap: Duration,
    current: Duration,
    jitter: f64,
}

impl Backoff {
    /// Standard driver backoff (200 ms → 5 s, ±20%).
    pub fn new() -> Self {
        Self::with_bounds(Duration::from_millis(200), Duration::from_secs(5))
    }

    /// Custom bounds, keeping the ±20% jitter.
    pub fn with_bounds(initial: Duration, cap: Duration) -> Self {
        Self {
            initial,
            cap,
            current: initial,
            jitter: 0.2,
        }
    }

    /// The next delay to sleep, advancing the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.cap);

        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        base.mul_f64(factor.max(0.0))
    }

    /// Back to the initial delay after a successful read.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
