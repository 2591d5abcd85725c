//! Backoff schedule between reconnection attempts.

use std::time::Duration;

/// Exponential backoff: `min(interval * decay ^ attempts, max_interval)`.
///
/// `attempts` is the number of reconnection attempts already made since the
/// last successful open, so the first retry after a drop waits exactly
/// `interval`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    interval: Duration,
    max_interval: Duration,
    decay: f64,
}

impl Backoff {
    /// Creates a backoff schedule.
    ///
    /// # Arguments
    /// * `interval` - Base delay (e.g., 1 second)
    /// * `max_interval` - Delay ceiling (e.g., 30 seconds)
    /// * `decay` - Growth base applied per attempt (e.g., 1.5)
    pub fn new(interval: Duration, max_interval: Duration, decay: f64) -> Self {
        Self {
            interval,
            max_interval,
            decay,
        }
    }

    /// Returns the base delay.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns the delay ceiling.
    pub fn max_interval(&self) -> Duration {
        self.max_interval
    }

    /// Returns the growth base.
    pub fn decay(&self) -> f64 {
        self.decay
    }

    pub(crate) fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    pub(crate) fn set_max_interval(&mut self, max_interval: Duration) {
        self.max_interval = max_interval;
    }

    pub(crate) fn set_decay(&mut self, decay: f64) {
        self.decay = decay;
    }

    /// Get the delay before the next attempt, given how many reconnection
    /// attempts were already made.
    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        let secs = self.interval.as_secs_f64() * self.decay.powf(f64::from(attempts));
        let cap = self.max_interval.as_secs_f64();

        // Overflow and nonsensical decay values both land on the ceiling.
        if !secs.is_finite() || secs >= cap {
            return self.max_interval;
        }
        if secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_nanos((secs * 1e9).round() as u64)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), Duration::from_millis(30_000), 1.5)
    }
}
