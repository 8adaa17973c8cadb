//! Capped exponential backoff between delivery retries.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry budget and delay schedule.
///
/// `delay(n) = min(base_delay * 2^(n - 1), max_delay)` for the 1-indexed
/// attempt `n`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry, in seconds
    ///
    /// Default: 10 seconds
    #[serde(default = "defaults::base_delay_secs", alias = "base_delay")]
    pub base_delay_secs: u64,

    /// Upper bound on any single delay, in seconds
    ///
    /// Default: 172800 seconds (2 days)
    #[serde(default = "defaults::max_delay_secs", alias = "max_delay")]
    pub max_delay_secs: u64,

    /// Retries allowed before a message is failed permanently
    ///
    /// Default: 5
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_secs: defaults::base_delay_secs(),
            max_delay_secs: defaults::max_delay_secs(),
            max_retries: defaults::max_retries(),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt`. Attempts below 1 are clamped to 1.
    #[must_use]
    pub fn delay(&self, attempt: i64) -> Duration {
        let attempt = u32::try_from(attempt.max(1)).unwrap_or(u32::MAX);
        Duration::from_secs(calculate_delay_secs(
            attempt,
            self.base_delay_secs,
            self.max_delay_secs,
        ))
    }

    /// [`Self::delay`] in whole milliseconds, as carried on the broker
    #[must_use]
    pub fn delay_millis(&self, attempt: i64) -> u64 {
        u64::try_from(self.delay(attempt).as_millis()).unwrap_or(u64::MAX)
    }

    /// Whether a message that has already been retried `retries` times may
    /// be retried again.
    #[must_use]
    pub const fn has_budget(&self, retries: u32) -> bool {
        retries < self.max_retries
    }
}

/// `base * 2^(attempt - 1)` capped at `max`, with saturating arithmetic
const fn calculate_delay_secs(attempt: u32, base_secs: u64, max_secs: u64) -> u64 {
    let exponent = attempt.saturating_sub(1);
    if exponent >= 63 {
        return max_secs;
    }

    let multiplier = 1u64 << exponent;
    let delay = base_secs.saturating_mul(multiplier);
    if delay < max_secs { delay } else { max_secs }
}

mod defaults {
    pub const fn base_delay_secs() -> u64 {
        10
    }

    pub const fn max_delay_secs() -> u64 {
        172_800 // 2 days
    }

    pub const fn max_retries() -> u32 {
        5
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn delay_doubles_until_capped() {
        let policy = BackoffPolicy::default();

        assert_eq!(policy.delay_millis(1), 10_000);
        assert_eq!(policy.delay_millis(2), 20_000);
        assert_eq!(policy.delay_millis(5), 160_000);
        assert_eq!(policy.delay_millis(7), 172_800_000);
        assert_eq!(policy.delay_millis(20), 172_800_000);
        assert_eq!(policy.delay_millis(i64::MAX), 172_800_000);
    }

    #[test]
    fn attempts_below_one_are_clamped() {
        let policy = BackoffPolicy::default();

        assert_eq!(policy.delay(0), Duration::from_secs(10));
        assert_eq!(policy.delay(-3), Duration::from_secs(10));
    }

    #[test]
    fn delay_matches_closed_form() {
        let policy = BackoffPolicy::default();

        for attempt in 1..=40_i64 {
            let exponent = u32::try_from(attempt - 1).unwrap_or(0);
            let expected = 10_000_u64
                .saturating_mul(2_u64.saturating_pow(exponent))
                .min(172_800_000);
            assert_eq!(policy.delay_millis(attempt), expected, "attempt {attempt}");
        }
    }

    #[test]
    fn budget_is_exhausted_after_max_retries() {
        let policy = BackoffPolicy::default();

        assert!(policy.has_budget(0));
        assert!(policy.has_budget(4));
        assert!(!policy.has_budget(5));
        assert!(!policy.has_budget(6));
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let policy: BackoffPolicy = ron::from_str("(max_retries: 2)").unwrap();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.base_delay_secs, 10);
    }
}
