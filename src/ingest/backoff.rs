//! Reconnection backoff schedule

use std::time::Duration;

/// Delays between reconnection attempts, in multiples of a base time unit.
///
/// The n-th consecutive transient failure waits `min(2^n, max_backoff_units)`
/// units. Once the failure count exceeds `max_retries` the camera gives up.
/// Unclassified faults wait a fixed `unexpected_pause_units` and do not count
/// against the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub unit: Duration,
    pub max_retries: u32,
    pub max_backoff_units: u32,
    pub unexpected_pause_units: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            unit: Duration::from_secs(1),
            max_retries: 5,
            max_backoff_units: 30,
            unexpected_pause_units: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `retry_count` consecutive failures,
    /// or `None` once the budget is exhausted.
    pub fn backoff(&self, retry_count: u32) -> Option<Duration> {
        if retry_count > self.max_retries {
            return None;
        }
        let units = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX).min(self.max_backoff_units);
        Some(self.unit * units)
    }

    /// Fixed pause after an unclassified upstream error.
    pub fn unexpected_pause(&self) -> Duration {
        self.unit * self.unexpected_pause_units
    }

    /// Full backoff schedule until the budget runs out.
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..).map_while(|retry| self.backoff(retry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_schedule_doubles_then_caps() {
        let policy = RetryPolicy::default();
        let schedule: Vec<u64> = policy.schedule().map(|d| d.as_secs()).collect();
        assert_eq!(schedule, vec![2, 4, 8, 16, 30]);
        assert_eq!(policy.backoff(6), None);
        assert_eq!(policy.unexpected_pause(), Duration::from_secs(5));
    }

    #[test]
    fn larger_budget_stays_capped() {
        let policy = RetryPolicy { max_retries: 40, ..RetryPolicy::default() };
        let schedule: Vec<u64> = policy.schedule().map(|d| d.as_secs()).collect();
        assert_eq!(&schedule[..6], &[2, 4, 8, 16, 30, 30]);
        assert_eq!(schedule.len(), 40);
        assert!(schedule.iter().all(|&s| s <= 30));
    }

    #[test]
    fn unit_scales_delays() {
        let policy = RetryPolicy { unit: Duration::from_millis(10), ..RetryPolicy::default() };
        assert_eq!(policy.backoff(1), Some(Duration::from_millis(20)));
        assert_eq!(policy.backoff(5), Some(Duration::from_millis(300)));
    }

    proptest! {
        #[test]
        fn backoff_is_monotonic_and_capped(max_retries in 0u32..64, cap in 1u32..600) {
            let policy = RetryPolicy { max_retries, max_backoff_units: cap, ..RetryPolicy::default() };
            let schedule: Vec<Duration> = policy.schedule().collect();

            prop_assert_eq!(schedule.len() as u32, max_retries);
            prop_assert!(schedule.windows(2).all(|w| w[0] <= w[1]));
            prop_assert!(schedule.iter().all(|d| *d <= policy.unit * cap));
            prop_assert_eq!(policy.backoff(max_retries + 1), None);
        }
    }
}
