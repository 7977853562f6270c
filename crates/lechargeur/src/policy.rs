// Retry timing
//
// *La Patience* (The Patience) - Progressive per-attempt timeouts and the
// capped pause between attempts.

use crate::config::LoaderConfig;
use std::time::Duration;

/// Retry timing shared by every acquisition in a run.
///
/// Per-attempt timeouts grow by `timeout_step_ms` per attempt; the pause
/// between attempts grows linearly and is capped at `backoff_max_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Added to the descriptor timeout for every attempt after the first.
    pub timeout_step_ms: u64,
    /// Pause after the first failed attempt.
    pub backoff_base_ms: u64,
    /// Growth of the pause per further attempt.
    pub backoff_step_ms: u64,
    /// Upper bound on the pause.
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&LoaderConfig::default())
    }
}

impl RetryPolicy {
    /// Take the timing fields from loader configuration.
    pub fn from_config(config: &LoaderConfig) -> Self {
        Self {
            timeout_step_ms: config.timeout_step_ms,
            backoff_base_ms: config.backoff_base_ms,
            backoff_step_ms: config.backoff_step_ms,
            backoff_max_ms: config.backoff_max_ms.max(config.backoff_base_ms),
        }
    }

    /// Timeout for a 1-based attempt: `base + (attempt - 1) * step`.
    pub fn attempt_timeout_ms(&self, base_timeout_ms: u64, attempt: u32) -> u64 {
        let extra = u64::from(attempt.saturating_sub(1)).saturating_mul(self.timeout_step_ms);
        base_timeout_ms.max(1).saturating_add(extra)
    }

    /// [`Self::attempt_timeout_ms`] as a `Duration`.
    pub fn attempt_timeout(&self, base_timeout_ms: u64, attempt: u32) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms(base_timeout_ms, attempt))
    }

    /// Pause after the given failed attempt, capped.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let extra = u64::from(attempt.saturating_sub(1)).saturating_mul(self.backoff_step_ms);
        self.backoff_base_ms
            .saturating_add(extra)
            .min(self.backoff_max_ms)
    }

    /// [`Self::backoff_ms`] as a `Duration`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms(attempt))
    }
}
