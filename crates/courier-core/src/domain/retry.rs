//! RetryPolicy - バックオフ遅延とリトライ上限
//!
//! 遅延は `scale * min(max_backoff_secs, base^n)` 秒。
//! `test_mode` では常に 0 になります。

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy for failed jobs.
///
/// `delay = scale * min(max_backoff_secs, backoff_base ^ failure_count)` seconds.
///
/// Example with the defaults (base 1.9, scale 0.1):
/// - failure 1: 0.19s
/// - failure 5: ~2.5s
/// - failure 10: ~61s
/// - failure 13 and up: capped at 360s
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub backoff_base: f64,

    /// Cap applied to `backoff_base ^ failure_count` before scaling.
    pub max_backoff_secs: f64,

    pub scale: f64,

    /// Retryable failures tolerated before the next one becomes permanent.
    pub max_retries: u32,

    /// Skip all delays (tests).
    pub test_mode: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_base: 1.9,
            max_backoff_secs: 3600.0,
            scale: 0.1,
            max_retries: 10,
            test_mode: false,
        }
    }
}

impl RetryPolicy {
    /// Default policy with delays disabled.
    pub fn for_tests() -> Self {
        Self {
            test_mode: true,
            ..Self::default()
        }
    }

    /// Delay before re-dispatching a job that has failed `failure_count` times.
    pub fn next_delay(&self, failure_count: u32) -> Duration {
        if self.test_mode {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(failure_count).unwrap_or(i32::MAX);
        let backoff = self.backoff_base.powi(exponent).min(self.max_backoff_secs);
        let secs = self.scale * backoff;
        if secs.is_finite() && secs > 0.0 {
            Duration::from_secs_f64(secs)
        } else {
            Duration::ZERO
        }
    }

    /// True once `failure_count` retryable failures have used up the budget.
    pub fn is_exhausted(&self, failure_count: u32) -> bool {
        failure_count >= self.max_retries
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if !self.backoff_base.is_finite() || self.backoff_base < 1.0 {
            return Err(format!("backoff_base must be >= 1.0, got {}", self.backoff_base));
        }
        if !self.max_backoff_secs.is_finite() || self.max_backoff_secs < 0.0 {
            return Err(format!(
                "max_backoff_secs must be a non-negative number, got {}",
                self.max_backoff_secs
            ));
        }
        if !self.scale.is_finite() || self.scale < 0.0 {
            return Err(format!("scale must be a non-negative number, got {}", self.scale));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_documented_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_base, 1.9);
        assert_eq!(policy.max_backoff_secs, 3600.0);
        assert_eq!(policy.max_retries, 10);
        assert!(!policy.test_mode);
    }

    #[test]
    fn exponential_backoff_increases_and_caps() {
        let policy = RetryPolicy::default();

        let d0 = policy.next_delay(0);
        let d5 = policy.next_delay(5);
        let d20 = policy.next_delay(20);

        assert!(d0 < d5);
        assert!(d5 < d20);
        assert!(d20 <= Duration::from_secs(3600));
        assert_eq!(d0, Duration::from_millis(100));
        // 上限に達したあとは伸びない
        assert_eq!(policy.next_delay(40), d20);
    }

    #[test]
    fn early_failures_retry_within_a_second() {
        let policy = RetryPolicy::default();
        assert!(policy.next_delay(1) < Duration::from_secs(1));
        assert!(policy.next_delay(3) < Duration::from_secs(1));
    }

    #[test]
    fn test_mode_skips_delays() {
        let policy = RetryPolicy::for_tests();
        assert_eq!(policy.next_delay(0), Duration::ZERO);
        assert_eq!(policy.next_delay(9), Duration::ZERO);
    }

    #[test]
    fn budget_is_exhausted_at_max_retries() {
        let policy = RetryPolicy::default();
        assert!(!policy.is_exhausted(9));
        assert!(policy.is_exhausted(10));
    }

    #[test]
    fn rejects_shrinking_base() {
        let policy = RetryPolicy {
            backoff_base: 0.5,
            ..RetryPolicy::default()
        };
        assert!(policy.validate().is_err());
    }
}
