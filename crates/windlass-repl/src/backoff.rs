//! Bounded exponential retry policy for task apply and DLQ writes.

use std::time::Duration;

/// Exponential backoff policy, constructed per consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_interval: Duration,
    /// Multiplier applied to the delay after each attempt.
    pub backoff_coefficient: f64,
    /// Upper bound on any single delay.
    pub max_interval: Duration,
    /// Maximum number of attempts, including the first (0 = unlimited).
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Policy used for applying replication tasks.
    pub fn task_apply() -> Self {
        Self {
            initial_interval: Duration::from_millis(50),
            backoff_coefficient: 1.2,
            max_interval: Duration::from_secs(2),
            max_attempts: 10,
        }
    }

    /// More patient policy used for DLQ writes, which must not be given up lightly.
    pub fn dlq_write() -> Self {
        Self {
            initial_interval: Duration::from_millis(100),
            backoff_coefficient: 2.0,
            max_interval: Duration::from_secs(5),
            max_attempts: 20,
        }
    }

    /// Delay to wait after a failed `attempt` (1-based), or `None` when the
    /// policy is exhausted and the caller must stop retrying.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if self.max_attempts != 0 && attempt >= self.max_attempts {
            return None;
        }
        let factor = self.backoff_coefficient.powi(attempt.saturating_sub(1) as i32);
        let delay = self.initial_interval.as_secs_f64() * factor;
        Some(Duration::from_secs_f64(
            delay.min(self.max_interval.as_secs_f64()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_retry_uses_initial_interval() {
        let policy = RetryPolicy::task_apply();
        assert_eq!(policy.delay_for(1), Some(Duration::from_millis(50)));
    }

    #[test]
    fn test_delays_grow_and_cap() {
        let policy = RetryPolicy::task_apply();
        let d2 = policy.delay_for(2).unwrap();
        let d3 = policy.delay_for(3).unwrap();
        assert!(d2 < d3);
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::task_apply()
        };
        let capped = policy.delay_for(60).unwrap();
        assert_eq!(capped, Duration::from_secs(2));
    }

    #[test]
    fn test_exhaustion() {
        let policy = RetryPolicy::task_apply();
        assert!(policy.delay_for(policy.max_attempts).is_none());
        assert!(policy.delay_for(policy.max_attempts + 1).is_none());
    }

    #[test]
    fn test_unlimited_attempts_never_exhaust() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::dlq_write()
        };
        assert!(policy.delay_for(1_000).is_some());
    }
}
