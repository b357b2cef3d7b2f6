//! Bounded exponential backoff for event handlers.

use std::time::Duration;

/// How often, and how patiently, a failing event handler is retried.
///
/// Attempt `n` (1-based) that fails is followed by a wait of
/// `base_delay * 2^(n-1)`, capped at `max_delay`. No wait follows the final
/// attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per handler invocation, including the first.
    pub max_attempts: u32,
    /// Wait after the first failed attempt.
    pub base_delay: Duration,
    /// Upper bound for any single wait.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy with the given attempt budget and the default delays.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// The wait after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.max_delay)
    }

    /// Whether another attempt follows failed attempt number `attempt`.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::RetryPolicy;

    #[test]
    fn test_default_policy_allows_three_attempts() {
        let policy = RetryPolicy::default();

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_delay_doubles_after_each_failure() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
    }

    #[test]
    fn test_delay_is_capped() {
        // Arrange
        let policy = RetryPolicy {
            max_attempts: 40,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        };

        // Act
        let delays: Vec<Duration> = [4, 5, 40].iter().map(|n| policy.delay_after(*n)).collect();

        // Assert
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(4),
                Duration::from_secs(5),
                Duration::from_secs(5)
            ]
        );
    }
}
