use std::time::Duration;

/// Attempts per request when the homeserver keeps answering `429`.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay_ms: u64,
}

impl RetryPolicy {
    /// `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retrying after the zero-based `attempt` was rate limited.
    ///
    /// A server `retry_after_ms` hint wins; otherwise `base * 2^attempt`.
    pub fn delay_for_attempt(&self, attempt: u32, retry_after_hint_ms: Option<u64>) -> Duration {
        let millis = retry_after_hint_ms.unwrap_or_else(|| {
            let shift = attempt.min(20);
            self.base_delay_ms.saturating_mul(1_u64 << shift)
        });
        Duration::from_millis(millis)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_backoff_is_two_to_the_attempt_millis() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0, None), Duration::from_millis(1));
        assert_eq!(policy.delay_for_attempt(3, None), Duration::from_millis(8));
        assert_eq!(policy.delay_for_attempt(5, None), Duration::from_millis(32));
    }

    #[test]
    fn scales_from_base_delay() {
        let policy = RetryPolicy::new(4, 100);
        assert_eq!(
            policy.delay_for_attempt(3, None),
            Duration::from_millis(800)
        );
    }

    #[test]
    fn retry_after_hint_replaces_backoff() {
        let policy = RetryPolicy::new(6, 500);
        assert_eq!(
            policy.delay_for_attempt(4, Some(120)),
            Duration::from_millis(120)
        );
    }

    #[test]
    fn never_allows_zero_attempts() {
        assert_eq!(RetryPolicy::new(0, 1).max_attempts(), 1);
        assert_eq!(RetryPolicy::default().max_attempts(), DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn large_attempts_do_not_overflow() {
        let policy = RetryPolicy::new(64, u64::MAX / 2);
        assert_eq!(
            policy.delay_for_attempt(63, None),
            Duration::from_millis(u64::MAX)
        );
    }
}
