//! Bounded exponential retry policy for client reconnection
//!
//! The policy is plain data; `RetrySchedule` walks it and implements
//! `backoff::backoff::Backoff`, returning `None` once the attempt budget
//! is spent. Neither touches sockets or timers.

use std::time::Duration;

use backoff::backoff::Backoff;

/// Parameters of a bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Attempts before giving up
    pub max_attempts: u32,

    /// Wait before the first attempt
    pub initial_delay: Duration,

    /// Growth factor applied after each failed attempt
    pub multiplier: f64,

    /// Upper bound for any single wait
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Wait before the zero-based `attempt`, capped at `max_delay`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);

        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }

        Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay)
    }

    /// All waits of one reconnection sequence, in order
    pub fn delays(&self) -> Vec<Duration> {
        (0..self.max_attempts)
            .map(|attempt| self.delay_for_attempt(attempt))
            .collect()
    }

    /// Fresh schedule positioned before the first attempt
    pub fn schedule(&self) -> RetrySchedule {
        RetrySchedule {
            policy: *self,
            attempt: 0,
        }
    }
}

/// Iteration state over a `RetryPolicy`
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    policy: RetryPolicy,
    attempt: u32,
}

impl RetrySchedule {
    /// Attempts handed out so far
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.policy.max_attempts
    }
}

impl Backoff for RetrySchedule {
    fn next_backoff(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let delay = self.policy.delay_for_attempt(self.attempt);
        self.attempt += 1;
        Some(delay)
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}
