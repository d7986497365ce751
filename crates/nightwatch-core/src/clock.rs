//! Clock abstraction.
//!
//! Internal timing (dwell, cooldown, staleness, health) runs on monotonic
//! seconds from [`Clock::now_monotonic`]; wall time from [`Clock::now_wall`]
//! appears only in stored alert records. Tests drive time with
//! [`ManualClock`] instead of sleeping.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Source of monotonic and wall time.
pub trait Clock: Send + Sync {
    /// Monotonic seconds since the clock epoch, microsecond resolution.
    fn now_monotonic(&self) -> f64;

    /// Current wall-clock time for record stamps.
    fn now_wall(&self) -> DateTime<Utc>;
}

/// Real clock backed by [`Instant`] and [`Utc::now`].
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Creates a clock whose epoch is "now".
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Shared handle, the usual way components receive the clock.
    pub fn shared() -> Arc<dyn Clock> {
        Arc::new(Self::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_monotonic(&self) -> f64 {
        let elapsed = self.origin.elapsed();
        elapsed.as_secs() as f64 + f64::from(elapsed.subsec_micros()) / 1e6
    }

    fn now_wall(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock for tests.
pub struct ManualClock {
    mono: Mutex<f64>,
    wall_origin: DateTime<Utc>,
}

impl ManualClock {
    /// Creates a clock at monotonic zero.
    pub fn new() -> Self {
        Self {
            mono: Mutex::new(0.0),
            wall_origin: Utc::now(),
        }
    }

    /// Shared handle.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Advances monotonic time by `seconds`.
    pub fn advance(&self, seconds: f64) {
        *self.mono.lock() += seconds;
    }

    /// Jumps monotonic time to an absolute value.
    pub fn set(&self, seconds: f64) {
        *self.mono.lock() = seconds;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now_monotonic(&self) -> f64 {
        *self.mono.lock()
    }

    fn now_wall(&self) -> DateTime<Utc> {
        let mono = *self.mono.lock();
        self.wall_origin + chrono::Duration::microseconds((mono * 1e6) as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now_monotonic();
        let b = clock.now_monotonic();
        assert!(b >= a);
    }

    #[test]
    fn manual_clock_advances_on_demand() {
        let clock = ManualClock::new();
        assert_eq!(clock.now_monotonic(), 0.0);
        clock.advance(2.5);
        clock.advance(0.5);
        assert!((clock.now_monotonic() - 3.0).abs() < 1e-9);

        clock.set(100.0);
        assert_eq!(clock.now_monotonic(), 100.0);
    }

    #[test]
    fn manual_wall_time_tracks_monotonic() {
        let clock = ManualClock::new();
        let w0 = clock.now_wall();
        clock.advance(10.0);
        let w1 = clock.now_wall();
        assert_eq!((w1 - w0).num_seconds(), 10);
    }
}
