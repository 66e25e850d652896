//! # Backoff Calculator
//!
//! Retry delay for a failed envelope: `attempt^4 + base + jitter` seconds,
//! where jitter is drawn uniformly from `0..jitter_per_attempt * attempt`.
//! With the defaults the first retry waits 16–45 s, the second 31–90 s, the
//! fourth 271–390 s.

use crate::constants::backoff::{BASE_DELAY_SECONDS, JITTER_SECONDS_PER_ATTEMPT};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub base_delay_seconds: u64,
    pub jitter_seconds_per_attempt: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_seconds: BASE_DELAY_SECONDS,
            jitter_seconds_per_attempt: JITTER_SECONDS_PER_ATTEMPT,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BackoffCalculator {
    config: BackoffConfig,
}

impl BackoffCalculator {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Deterministic part of the delay for `attempt` (1-based)
    pub fn base_delay_seconds(&self, attempt: u32) -> u64 {
        u64::from(attempt)
            .saturating_pow(4)
            .saturating_add(self.config.base_delay_seconds)
    }

    /// Exclusive upper bound of the jitter for `attempt`
    pub fn jitter_bound_seconds(&self, attempt: u32) -> u64 {
        self.config
            .jitter_seconds_per_attempt
            .saturating_mul(u64::from(attempt))
    }

    /// Delay before the envelope becomes eligible again after `attempt` failures
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let bound = self.jitter_bound_seconds(attempt);
        let jitter = if bound == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..bound)
        };
        Duration::from_secs(self.base_delay_seconds(attempt).saturating_add(jitter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_backoff_config_default() {
        let config = BackoffConfig::default();
        assert_eq!(config.base_delay_seconds, 15);
        assert_eq!(config.jitter_seconds_per_attempt, 30);
    }

    #[test]
    fn test_first_retry_window() {
        let calculator = BackoffCalculator::default();
        for _ in 0..100 {
            let delay = calculator.delay_for(1).as_secs();
            assert!((16..46).contains(&delay), "delay {delay} outside 16..46");
        }
    }

    #[test]
    fn test_zero_jitter_is_deterministic() {
        let calculator = BackoffCalculator::new(BackoffConfig {
            base_delay_seconds: 15,
            jitter_seconds_per_attempt: 0,
        });
        assert_eq!(calculator.delay_for(2), Duration::from_secs(31));
        assert_eq!(calculator.delay_for(3), Duration::from_secs(96));
    }

    proptest! {
        #[test]
        fn delay_stays_within_bounds(attempt in 1u32..50) {
            let calculator = BackoffCalculator::default();
            let delay = calculator.delay_for(attempt).as_secs();
            let low = calculator.base_delay_seconds(attempt);
            let high = low + calculator.jitter_bound_seconds(attempt);
            prop_assert!(delay >= low && delay < high);
        }

        #[test]
        fn base_delay_grows_with_attempts(attempt in 1u32..1000) {
            let calculator = BackoffCalculator::default();
            prop_assert!(calculator.base_delay_seconds(attempt + 1) > calculator.base_delay_seconds(attempt));
        }
    }
}
