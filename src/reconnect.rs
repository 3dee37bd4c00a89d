//! Reconnect policy with exponential backoff and jitter.
//!
//! A session whose connection drops for any reason other than logout is
//! re-initialized after `delay_for(attempt)`. The delay starts at
//! `initial_backoff`, doubles per attempt up to `max_backoff`, and is
//! spread by ±`jitter` so a fleet of sessions does not reconnect in
//! lockstep. A successful open resets the attempt counter.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconnect policy, represented as data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Attempts before giving up; 0 retries forever
    pub max_attempts: u32,

    /// Delay before the first attempt, in milliseconds
    pub initial_backoff_ms: u64,

    /// Delay cap, in milliseconds
    pub max_backoff_ms: u64,

    /// Random spread applied to each delay, as a fraction in `[0, 1]`
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            jitter: 0.2,
        }
    }
}

impl ReconnectPolicy {
    /// Policy that retries immediately with no jitter
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            jitter: 0.0,
        }
    }

    /// Whether another attempt is allowed (attempts are 1-based)
    pub fn allows(&self, attempt: u32) -> bool {
        attempt >= 1 && (self.max_attempts == 0 || attempt <= self.max_attempts)
    }

    /// Backoff before `attempt`, without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let delay = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms.max(self.initial_backoff_ms));
        Duration::from_millis(delay)
    }

    /// Delay before `attempt`, or `None` once the policy gives up
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if !self.allows(attempt) {
            return None;
        }

        let base = self.base_delay(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || base.is_zero() {
            return Some(base);
        }

        let factor = 1.0 + rand::Rng::gen_range(&mut rand::thread_rng(), -jitter..=jitter);
        Some(base.mul_f64(factor))
    }
}
