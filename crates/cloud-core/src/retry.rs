use std::time::Duration;

use crate::error::CloudError;

/// Caller-side backoff for re-attempting a failed login.
///
/// The coordinator never retries on its own; callers that want retries feed
/// each failure through [`RetryPolicy::next_delay`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base_delay_ms: u64,
    max_delay_ms: u64,
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64, max_attempts: u32) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Exponential delay for a zero-based attempt, raised to the retry hint and capped.
    pub fn delay_for_attempt(&self, attempt: u32, retry_after_hint_ms: Option<u64>) -> Duration {
        let multiplier = 1_u64 << attempt.min(20);
        let calculated = self.base_delay_ms.saturating_mul(multiplier);
        let hinted = retry_after_hint_ms.unwrap_or(0);
        Duration::from_millis(calculated.max(hinted).min(self.max_delay_ms))
    }

    /// Delay before the next attempt, or `None` when the caller should give up.
    ///
    /// `failed_attempts` counts attempts made so far, including the one that
    /// produced `error`.
    pub fn next_delay(&self, failed_attempts: u32, error: &CloudError) -> Option<Duration> {
        if !error.is_recoverable() || failed_attempts >= self.max_attempts {
            return None;
        }
        Some(self.delay_for_attempt(
            failed_attempts.saturating_sub(1),
            error.retry_after_ms,
        ))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(250, 10_000, 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    #[test]
    fn scales_exponentially_and_caps() {
        let policy = RetryPolicy::new(100, 1_000, 5);
        assert_eq!(policy.delay_for_attempt(0, None), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(3, None), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(6, None), Duration::from_millis(1_000));
    }

    #[test]
    fn honors_retry_after_hint_when_larger() {
        let policy = RetryPolicy::new(100, 20_000, 5);
        let err = CloudError::handshake("throttled", "slow down")
            .with_retry_after(Duration::from_secs(4));
        assert_eq!(policy.next_delay(1, &err), Some(Duration::from_secs(4)));
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let policy = RetryPolicy::new(100, 1_000, 2);
        let err = CloudError::handshake("ticket_rejected", "nope");
        assert_eq!(policy.next_delay(1, &err), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(2, &err), None);
    }

    #[test]
    fn never_retries_configuration_errors() {
        let policy = RetryPolicy::default();
        let err = CloudError::new(ErrorCategory::Config, "unknown_strategy", "bad");
        assert_eq!(policy.next_delay(1, &err), None);
    }
}
