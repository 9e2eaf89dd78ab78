//! Reconnection backoff.
//!
//! Deterministic exponential backoff with a hard ceiling and no jitter:
//!
//! ```text
//! attempt   1    2    3    4     5     6 …
//! delay     1s   2s   4s   8s    16s   30s (cap)
//! ```

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Delay for 1-based attempt `attempt`: `min(base * 2^(attempt-1), cap)`.
pub fn compute_backoff(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent)
        .map_or(cap, |delay| delay.min(cap))
}

/// Attempt counter plus the policy that turns it into delays.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Claim the next attempt and return its delay.
    ///
    /// Returns `None` once the budget is spent; the counter then stays put
    /// until [`reset`](Self::reset).
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempts += 1;
        Some(compute_backoff(
            self.attempts,
            self.config.base_delay,
            self.config.cap_delay,
        ))
    }

    /// Called on every successful connect and every explicit caller connect.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.config.max_attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }
}
