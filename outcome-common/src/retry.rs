use std::time;

/// How the worker redelivers an outcome that failed with a transient error.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Coefficient to multiply initial_interval with for every past attempt.
    backoff_coefficient: u32,
    /// The backoff interval for the first retry.
    initial_interval: time::Duration,
    /// The maximum possible backoff between retries.
    maximum_interval: Option<time::Duration>,
    /// Attempts allowed in total, the first delivery included.
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(
        backoff_coefficient: u32,
        initial_interval: time::Duration,
        maximum_interval: Option<time::Duration>,
        max_attempts: u32,
    ) -> Self {
        Self {
            backoff_coefficient,
            initial_interval,
            maximum_interval,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Calculate the time to wait before the attempt following `attempt` (1-based).
    pub fn time_until_next_retry(&self, attempt: u32) -> time::Duration {
        let exponent = attempt.saturating_sub(1);
        let multiplier = self.backoff_coefficient.saturating_pow(exponent);
        let candidate_interval = self.initial_interval.saturating_mul(multiplier);

        match self.maximum_interval {
            Some(max_interval) => std::cmp::min(candidate_interval, max_interval),
            None => candidate_interval,
        }
    }

    /// Whether another attempt is allowed after `attempt` attempts failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_coefficient: 2,
            initial_interval: time::Duration::from_secs(1),
            maximum_interval: None,
            max_attempts: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy::new(2, time::Duration::from_millis(100), None, 5);

        assert_eq!(policy.time_until_next_retry(1), time::Duration::from_millis(100));
        assert_eq!(policy.time_until_next_retry(2), time::Duration::from_millis(200));
        assert_eq!(policy.time_until_next_retry(3), time::Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::new(
            10,
            time::Duration::from_secs(1),
            Some(time::Duration::from_secs(30)),
            5,
        );

        assert_eq!(policy.time_until_next_retry(2), time::Duration::from_secs(10));
        assert_eq!(policy.time_until_next_retry(3), time::Duration::from_secs(30));
        assert_eq!(policy.time_until_next_retry(40), time::Duration::from_secs(30));
    }

    #[test]
    fn test_should_retry_counts_first_delivery() {
        let policy = RetryPolicy::default();

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!RetryPolicy::new(2, time::Duration::from_secs(1), None, 0).should_retry(1));
    }
}
