//! Retry policy and the per-call retry state machine.
//!
//! A logical call moves `Idle -> Attempting -> {Succeeded, Retrying, FailedTerminal}`.
//! [`RetryState`] owns the counters for one call and turns each classified
//! failure into a [`RetryDecision`]; the request executor performs the actual
//! sleeping, so the same state machine drives the blocking and async paths.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Backoff strategy for retrying failed requests.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    /// Uses a fixed delay between retries.
    Fixed {
        #[serde(with = "millis")]
        delay: Duration,
    },
    /// Uses an exponential delay between retries.
    ///
    /// The delay is `base * factor^attempt`, clamped to `[min, max]`.
    Exponential {
        #[serde(with = "millis")]
        base: Duration,
        factor: f64,
        #[serde(with = "millis")]
        min: Duration,
        #[serde(with = "millis")]
        max: Duration,
        /// Whether to apply random jitter (+/- 50%) before clamping.
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_secs(1),
            factor: 2.0,
            min: Duration::from_secs(4),
            max: Duration::from_secs(10),
            jitter: false,
        }
    }
}

impl Backoff {
    /// Delay before the retry that follows attempt number `attempt` (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                min,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let mut seconds = base.as_secs_f64() * factor.powi(exponent);

                if jitter {
                    seconds *= 0.5 + fastrand::f64();
                }

                let seconds = if seconds.is_finite() {
                    seconds.clamp(min.as_secs_f64(), max.as_secs_f64().max(min.as_secs_f64()))
                } else {
                    max.as_secs_f64()
                };
                Duration::from_secs_f64(seconds)
            }
        }
    }
}

/// Bounds for one logical call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts allowed for failures other than rate limits. Zero is treated as one.
    pub max_attempts: u32,
    /// Rate-limited attempts allowed before the rate limit becomes terminal.
    pub max_rate_limit_retries: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_rate_limit_retries: 3,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Outcome of a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Sleep for `delay`, then attempt again.
    Retry { delay: Duration, error: ApiError },
    /// Surface `error` to the caller.
    Fail(ApiError),
}

/// Counters for a single logical call. Create a fresh one per call.
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    attempts_made: u32,
    rate_limit_retries: u32,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts_made: 0,
            rate_limit_retries: 0,
        }
    }

    pub const fn attempts_made(&self) -> u32 {
        self.attempts_made
    }

    pub const fn rate_limit_retries(&self) -> u32 {
        self.rate_limit_retries
    }

    /// Marks the start of an attempt that is about to be sent.
    pub fn begin_attempt(&mut self) {
        self.attempts_made = self.attempts_made.saturating_add(1);
    }

    /// Decides what follows a failed attempt.
    ///
    /// Non-retryable errors fail immediately. Rate limits wait for the
    /// attached `retry_after` and are capped by `max_rate_limit_retries`;
    /// other retryable errors back off exponentially and are capped by
    /// `max_attempts`. A cap always surfaces the last error itself.
    pub fn on_failure(&mut self, error: ApiError) -> RetryDecision {
        if !is_retryable(&error) {
            return RetryDecision::Fail(error);
        }

        if let ApiError::RateLimit { retry_after, .. } = &error {
            self.rate_limit_retries = self.rate_limit_retries.saturating_add(1);
            if self.rate_limit_retries >= self.policy.max_rate_limit_retries {
                return RetryDecision::Fail(error);
            }
            return RetryDecision::Retry {
                delay: *retry_after,
                error,
            };
        }

        let other_attempts = self.attempts_made.saturating_sub(self.rate_limit_retries);
        if other_attempts >= self.policy.max_attempts.max(1) {
            return RetryDecision::Fail(error);
        }

        RetryDecision::Retry {
            delay: self.policy.backoff.delay(self.attempts_made.saturating_sub(1)),
            error,
        }
    }
}

/// Whether a classified failure may be retried.
pub fn is_retryable(error: &ApiError) -> bool {
    error.is_retryable()
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32, max_rate_limit_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            max_rate_limit_retries,
            backoff: Backoff::Fixed {
                delay: Duration::from_millis(5),
            },
        }
    }

    #[test]
    fn test_exponential_backoff_is_clamped() {
        let backoff = Backoff::Exponential {
            base: Duration::from_secs(1),
            factor: 2.0,
            min: Duration::from_secs(4),
            max: Duration::from_secs(10),
            jitter: false,
        };

        assert_eq!(backoff.delay(0), Duration::from_secs(4));
        assert_eq!(backoff.delay(1), Duration::from_secs(4));
        assert_eq!(backoff.delay(2), Duration::from_secs(4));
        assert_eq!(backoff.delay(3), Duration::from_secs(8));
        assert_eq!(backoff.delay(4), Duration::from_secs(10));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_exponential_backoff_with_jitter_stays_in_bounds() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(100),
            factor: 2.0,
            min: Duration::from_millis(50),
            max: Duration::from_secs(1),
            jitter: true,
        };

        for _ in 0..10 {
            for attempt in 0..6 {
                let delay = backoff.delay(attempt);
                assert!(delay >= Duration::from_millis(50), "attempt={attempt}, delay={delay:?}");
                assert!(delay <= Duration::from_secs(1), "attempt={attempt}, delay={delay:?}");
            }
        }
    }

    #[test]
    fn test_fixed_backoff() {
        let backoff = Backoff::Fixed {
            delay: Duration::from_millis(100),
        };

        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(10), Duration::from_millis(100));
    }

    #[test]
    fn non_retryable_error_fails_on_first_attempt() {
        let mut state = RetryState::new(policy(5, 5));
        state.begin_attempt();

        let decision = state.on_failure(ApiError::authentication("bad key"));

        assert_eq!(decision, RetryDecision::Fail(ApiError::authentication("bad key")));
        assert_eq!(state.attempts_made(), 1);
    }

    #[test]
    fn server_errors_retry_until_max_attempts() {
        let mut state = RetryState::new(policy(3, 3));
        let error = ApiError::server(Some(503), "unavailable");

        state.begin_attempt();
        assert!(matches!(state.on_failure(error.clone()), RetryDecision::Retry { .. }));
        state.begin_attempt();
        assert!(matches!(state.on_failure(error.clone()), RetryDecision::Retry { .. }));
        state.begin_attempt();
        assert_eq!(state.on_failure(error.clone()), RetryDecision::Fail(error));
    }

    #[test]
    fn rate_limit_waits_for_retry_after_and_has_its_own_cap() {
        let mut state = RetryState::new(policy(1, 2));
        let error = ApiError::rate_limited("too many", Duration::from_millis(750), Some(429));

        state.begin_attempt();
        assert_eq!(
            state.on_failure(error.clone()),
            RetryDecision::Retry {
                delay: Duration::from_millis(750),
                error: error.clone(),
            }
        );

        state.begin_attempt();
        assert_eq!(state.on_failure(error.clone()), RetryDecision::Fail(error));
        assert_eq!(state.rate_limit_retries(), 2);
    }

    #[test]
    fn rate_limited_attempts_do_not_consume_general_budget() {
        let mut state = RetryState::new(policy(2, 5));

        state.begin_attempt();
        let decision = state.on_failure(ApiError::rate_limited("slow", Duration::ZERO, Some(429)));
        assert!(matches!(decision, RetryDecision::Retry { .. }));

        state.begin_attempt();
        let decision = state.on_failure(ApiError::network("reset", false));
        assert!(matches!(decision, RetryDecision::Retry { .. }));

        state.begin_attempt();
        let decision = state.on_failure(ApiError::network("reset", false));
        assert!(matches!(decision, RetryDecision::Fail(_)));
    }

    #[test]
    fn zero_max_attempts_still_allows_one_attempt() {
        let mut state = RetryState::new(policy(0, 0));
        state.begin_attempt();

        let decision = state.on_failure(ApiError::network("timeout", true));

        assert!(matches!(decision, RetryDecision::Fail(ApiError::NetworkFailure { .. })));
    }

    #[test]
    fn default_policy_matches_upstream_client() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.max_rate_limit_retries, 3);
        assert_eq!(policy.backoff.delay(0), Duration::from_secs(4));
    }
}
