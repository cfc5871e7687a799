// MIT License - Copyright (c) 2026 Peter Wright
// Reconnect backoff

use std::time::Duration;

/// Capped exponential backoff between connection attempts.
///
/// The n-th consecutive failure (counting from zero) waits
/// `min(base * 2^n, cap)`. A successful login resets the count.
#[derive(Debug, Clone)]
pub struct RetryState {
    base: Duration,
    cap: Duration,
    failures: u32,
    max_attempts: Option<u32>,
}

impl RetryState {
    pub fn new(base: Duration, cap: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            base,
            cap: cap.max(base),
            failures: 0,
            max_attempts,
        }
    }

    /// Consecutive failures since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Delay the next failure will be given.
    pub fn next_delay(&self) -> Duration {
        self.delay_for(self.failures)
    }

    /// Record a failed attempt and return how long to wait before the next
    /// one, or `None` once `max_attempts` consecutive attempts have failed.
    pub fn record_failure(&mut self) -> Option<Duration> {
        let delay = self.next_delay();
        self.failures = self.failures.saturating_add(1);
        if let Some(max) = self.max_attempts
            && self.failures >= max
        {
            return None;
        }
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    fn delay_for(&self, n: u32) -> Duration {
        let factor = 1u32 << n.min(31);
        self.base.saturating_mul(factor).min(self.cap)
    }
}
