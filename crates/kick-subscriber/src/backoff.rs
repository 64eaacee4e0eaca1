//! Reconnect backoff policy.

use std::time::Duration;

const GROWTH_FACTOR: f64 = 1.23;

/// Exponential reconnect delay: `min(initial * 1.23^attempt, max)`.
///
/// The attempt counter is incremented before the delay is computed, so the
/// first retry already waits `initial * 1.23`.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    initial: Duration,
    max: Duration,
    max_attempts: Option<u32>,
    attempts: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            initial,
            max,
            max_attempts,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Delay before the next attempt, or `None` once the ceiling is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| self.attempts >= max) {
            return None;
        }
        self.attempts = self.attempts.saturating_add(1);
        Some(delay_for(self.initial, self.max, self.attempts))
    }
}

fn delay_for(initial: Duration, max: Duration, attempt: u32) -> Duration {
    let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
    let scaled = initial.as_secs_f64() * GROWTH_FACTOR.powi(exp);
    if !scaled.is_finite() || scaled >= max.as_secs_f64() {
        return max;
    }
    Duration::from_secs_f64(scaled)
}
