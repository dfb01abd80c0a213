use std::time::Duration;

/// Backoff policy for transient fetch failures.
///
/// Delay schedule: 1s, 2s, 4s, 8s, ... doubling per attempt, capped at 30s.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after `attempt` (1-indexed) failed, before the next try.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .base
            .saturating_mul(2u32.saturating_pow(exponent));
        delay.min(self.cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubling_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(8));
    }

    #[test]
    fn capped_at_thirty_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(6), Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(30));
    }

    #[test]
    fn zero_base_disables_waiting() {
        let policy = RetryPolicy {
            base: Duration::ZERO,
            cap: Duration::from_secs(30),
        };
        assert_eq!(policy.delay_for_attempt(3), Duration::ZERO);
    }
}
