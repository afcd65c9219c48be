//! Exponential backoff with optional jitter.

use std::time::Duration;
use rand::Rng;

/// Exponential backoff schedule: `base * 2^(attempt - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl BackoffPolicy {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self { base_ms, max_ms }
    }

    /// Deterministic delay before re-entry after `attempt` failed attempts.
    pub fn delay(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_ms, self.max_ms)
    }

    /// Delay with up to `ratio` of extra random jitter on top.
    pub fn jittered(&self, attempt: u32, ratio: f64) -> Duration {
        apply_jitter(self.delay(attempt), ratio)
    }
}

/// Calculate exponential backoff delay (no jitter).
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);

    Duration::from_millis(delay_ms.min(max_ms))
}

/// Add between 0 and `ratio * delay` of random jitter.
pub fn apply_jitter(delay: Duration, ratio: f64) -> Duration {
    let delay_ms = delay.as_millis() as u64;
    let jitter_range = (delay_ms as f64 * ratio.clamp(0.0, 1.0)) as u64;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(delay_ms + jitter)
}
