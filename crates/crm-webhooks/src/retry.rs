//! Retry scheduling for failed deliveries.
//!
//! Attempt indices are 0-based: index 0 is the original delivery, indices
//! 1..=6 are retries. The delay before attempt `n` is `BACKOFF_SCHEDULE_SECS[n]`
//! plus up to 10% random jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::WebhookConfig;

/// Base delay (seconds) before each attempt index: immediate, 1m, 5m, 30m, 2h, 8h, 24h.
pub const BACKOFF_SCHEDULE_SECS: [u64; 7] = [0, 60, 300, 1800, 7200, 28800, 86400];

/// Highest attempt index that is ever scheduled.
pub const DEFAULT_MAX_ATTEMPT_INDEX: u32 = 6;

/// Consecutive failures before a subscription is auto-disabled.
pub const DEFAULT_DISABLE_THRESHOLD: i32 = 50;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule `next_attempt` after `delay`.
    Retry { next_attempt: u32, delay: Duration },
    /// The failure class is never retried (e.g. 404).
    NotRetryable,
    /// The attempt budget is spent.
    Exhausted,
}

/// Backoff schedule, retryability rules and auto-disable threshold.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempt_index: u32,
    disable_threshold: i32,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempt_index: DEFAULT_MAX_ATTEMPT_INDEX,
            disable_threshold: DEFAULT_DISABLE_THRESHOLD,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_config(config: &WebhookConfig) -> Self {
        Self {
            max_attempt_index: config.max_attempt_index,
            disable_threshold: config.auto_disable_threshold,
            jitter: config.retry_jitter,
        }
    }

    /// Enable or disable random jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set the consecutive failure threshold for auto-disable.
    #[must_use]
    pub fn with_disable_threshold(mut self, threshold: i32) -> Self {
        self.disable_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_max_attempt_index(mut self, max: u32) -> Self {
        self.max_attempt_index = max;
        self
    }

    #[must_use]
    pub fn disable_threshold(&self) -> i32 {
        self.disable_threshold
    }

    /// Network errors (no status), 5xx and 429 are worth retrying.
    #[must_use]
    pub fn is_retryable(status: Option<u16>) -> bool {
        match status {
            None => true,
            Some(code) => code >= 500 || code == 429,
        }
    }

    /// Whether a subscription with this many consecutive failures must be disabled.
    #[must_use]
    pub fn should_disable(&self, consecutive_failures: i32) -> bool {
        consecutive_failures >= self.disable_threshold
    }

    /// Base delay before the given attempt index, without jitter.
    #[must_use]
    pub fn base_delay(attempt: u32) -> Duration {
        let idx = (attempt as usize).min(BACKOFF_SCHEDULE_SECS.len() - 1);
        Duration::from_secs(BACKOFF_SCHEDULE_SECS[idx])
    }

    /// Decide what follows a failed attempt with the given HTTP status.
    #[must_use]
    pub fn decide(&self, attempt: u32, status: Option<u16>) -> RetryDecision {
        if !Self::is_retryable(status) {
            return RetryDecision::NotRetryable;
        }
        if attempt >= self.max_attempt_index {
            return RetryDecision::Exhausted;
        }

        let next_attempt = attempt + 1;
        let base = Self::base_delay(next_attempt);
        RetryDecision::Retry {
            next_attempt,
            delay: base + self.jitter_for(base),
        }
    }

    /// Uniform jitter in `[0, base / 10]`.
    fn jitter_for(&self, base: Duration) -> Duration {
        let max_ms = base.as_millis() as u64 / 10;
        if !self.jitter || max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(RetryPolicy::is_retryable(None));
        assert!(RetryPolicy::is_retryable(Some(500)));
        assert!(RetryPolicy::is_retryable(Some(503)));
        assert!(RetryPolicy::is_retryable(Some(429)));
        assert!(!RetryPolicy::is_retryable(Some(400)));
        assert!(!RetryPolicy::is_retryable(Some(404)));
        assert!(!RetryPolicy::is_retryable(Some(410)));
        assert!(!RetryPolicy::is_retryable(Some(302)));
    }

    #[test]
    fn test_schedule_without_jitter_is_exact() {
        let policy = RetryPolicy::new().with_jitter(false);
        for attempt in 0..6u32 {
            match policy.decide(attempt, Some(503)) {
                RetryDecision::Retry {
                    next_attempt,
                    delay,
                } => {
                    assert_eq!(next_attempt, attempt + 1);
                    assert_eq!(
                        delay,
                        Duration::from_secs(BACKOFF_SCHEDULE_SECS[next_attempt as usize])
                    );
                }
                other => panic!("attempt {attempt} should retry, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let policy = RetryPolicy::new();
        for attempt in 0..6u32 {
            let base = RetryPolicy::base_delay(attempt + 1);
            for _ in 0..50 {
                let RetryDecision::Retry { delay, .. } = policy.decide(attempt, None) else {
                    panic!("expected retry");
                };
                assert!(delay >= base, "delay {delay:?} below base {base:?}");
                assert!(delay <= base + base / 10, "delay {delay:?} above base + 10%");
            }
        }
    }

    #[test]
    fn test_attempt_six_is_last() {
        let policy = RetryPolicy::new();
        assert_eq!(policy.decide(6, Some(500)), RetryDecision::Exhausted);
        assert_eq!(policy.decide(7, None), RetryDecision::Exhausted);
    }

    #[test]
    fn test_permanent_status_never_retries() {
        let policy = RetryPolicy::new();
        assert_eq!(policy.decide(0, Some(404)), RetryDecision::NotRetryable);
        assert_eq!(policy.decide(3, Some(401)), RetryDecision::NotRetryable);
    }

    #[test]
    fn test_first_retry_is_about_a_minute() {
        let RetryDecision::Retry {
            next_attempt,
            delay,
        } = RetryPolicy::new().decide(0, Some(503))
        else {
            panic!("503 should retry");
        };
        assert_eq!(next_attempt, 1);
        assert!(delay >= Duration::from_secs(60) && delay <= Duration::from_secs(66));
    }

    #[test]
    fn test_disable_threshold() {
        let policy = RetryPolicy::new();
        assert!(!policy.should_disable(49));
        assert!(policy.should_disable(50));
        assert!(policy.should_disable(51));

        let strict = RetryPolicy::new().with_disable_threshold(3);
        assert!(strict.should_disable(3));
    }

    #[test]
    fn test_from_config() {
        let config = WebhookConfig {
            max_attempt_index: 2,
            auto_disable_threshold: 5,
            retry_jitter: false,
            ..WebhookConfig::default()
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.disable_threshold(), 5);
        assert_eq!(policy.decide(2, None), RetryDecision::Exhausted);
        assert_eq!(
            policy.decide(1, None),
            RetryDecision::Retry {
                next_attempt: 2,
                delay: Duration::from_secs(300)
            }
        );
    }

    #[test]
    fn test_backoff_schedule_monotonically_increasing() {
        for i in 1..BACKOFF_SCHEDULE_SECS.len() {
            assert!(BACKOFF_SCHEDULE_SECS[i] > BACKOFF_SCHEDULE_SECS[i - 1]);
        }
    }
}
