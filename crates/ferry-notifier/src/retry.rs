//! Exponential backoff for webhook delivery.
//!
//! The schedule is a pure function of the attempt number and the base:
//! before attempt `n + 1` the dispatcher waits `base^n` seconds. Sleeping is
//! left to the caller's `Clock`, so tests run the whole schedule in virtual
//! time.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Upper bound on any single computed delay.
const MAX_BACKOFF_SECS: f64 = 86_400.0;

/// Returns `base^attempt` seconds.
///
/// Non-finite or out-of-range values saturate to one day; a base below 1.0
/// is treated as 1.0 so the schedule is never decreasing.
pub fn backoff_delay(attempt: u32, base: f64) -> Duration {
    let base = if base.is_finite() { base.max(1.0) } else { 1.0 };
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let secs = base.powi(exponent);

    if !secs.is_finite() || secs > MAX_BACKOFF_SECS {
        return Duration::from_secs_f64(MAX_BACKOFF_SECS);
    }
    Duration::from_secs_f64(secs)
}

/// Retry policy for delivering one webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,

    /// Base of the exponential schedule, in seconds.
    pub backoff_base: f64,

    /// Cap applied to each delay.
    pub max_delay: Duration,

    /// Jitter as a fraction of the delay (0.0 disables it).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: crate::DEFAULT_MAX_ATTEMPTS,
            backoff_base: 2.0,
            max_delay: Duration::from_secs(300),
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait before the given 1-based attempt.
    ///
    /// The first attempt goes out immediately. Attempt `n > 1` waits
    /// `base^(n-1)` seconds, capped at `max_delay`, then jittered.
    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        if attempt <= 1 {
            return None;
        }

        let delay = backoff_delay(attempt - 1, self.backoff_base).min(self.max_delay);
        Some(apply_jitter(delay, self.jitter_factor).min(self.max_delay))
    }

    /// The jitter-free delays between all attempts of this policy.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.max_attempts)
            .map(|retry| backoff_delay(retry, self.backoff_base).min(self.max_delay))
            .collect()
    }
}

/// Spreads a delay by up to `±jitter_factor` to avoid synchronized retries
/// against the receiver.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 || !jitter_factor.is_finite() {
        return duration;
    }

    let clamped = jitter_factor.clamp(0.0, 1.0);
    let range = duration.as_secs_f64() * clamped;
    if range <= 0.0 {
        return duration;
    }

    let offset = rand::rng().random_range(-range..=range);
    Duration::from_secs_f64((duration.as_secs_f64() + offset).max(0.0))
}
