use std::time::Duration;

use crate::BackoffPolicy;

/// Delay sequence of consecutive failures: `base * 2^n`, capped at `max`.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    pub(crate) fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Delay before the next retry; each call counts one more failure.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let factor = 1u64.checked_shl(self.attempt).unwrap_or(u64::MAX);
        let delay = self
            .policy
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.policy.max_delay_ms);
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(delay)
    }

    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempt
    }
}
