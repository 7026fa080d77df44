use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::quota::QuotaConfig;
use crate::retry::RetryPolicy;

pub const DEFAULT_BASE_URL: &str = "https://financialmodelingprep.com/api";

/// What a call does when the local quota is saturated before sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleMode {
    /// Sleep until the quota frees up, then send.
    #[default]
    Block,
    /// Fail immediately with a rate-limit error carrying the wait time.
    Reject,
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientConfig {
    pub api_key: String,
    /// Per-request transport timeout, in seconds when deserialized.
    #[serde(default = "default_timeout", with = "secs")]
    pub timeout: Duration,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub rate_limit: QuotaConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub throttle_mode: ThrottleMode,
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_base_url() -> String {
    String::from(DEFAULT_BASE_URL)
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            timeout: default_timeout(),
            base_url: default_base_url(),
            rate_limit: QuotaConfig::default(),
            retry: RetryPolicy::default(),
            throttle_mode: ThrottleMode::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: QuotaConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_throttle_mode(mut self, throttle_mode: ThrottleMode) -> Self {
        self.throttle_mode = throttle_mode;
        self
    }

    /// Reads configuration from `FMP_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("FMP_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let mut config = Self::new(api_key);
        if let Some(timeout) = parse_var::<u64, _>(&lookup, "FMP_TIMEOUT")? {
            config.timeout = Duration::from_secs(timeout);
        }
        if let Some(base_url) = lookup("FMP_BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(max_retries) = parse_var(&lookup, "FMP_MAX_RETRIES")? {
            config.retry.max_attempts = max_retries;
        }
        if let Some(max_rate_limit_retries) = parse_var(&lookup, "FMP_MAX_RATE_LIMIT_RETRIES")? {
            config.retry.max_rate_limit_retries = max_rate_limit_retries;
        }
        if let Some(daily_limit) = parse_var(&lookup, "FMP_DAILY_LIMIT")? {
            config.rate_limit.daily_limit = daily_limit;
        }
        if let Some(per_second) = parse_var(&lookup, "FMP_REQUESTS_PER_SECOND")? {
            config.rate_limit.per_second_limit = per_second;
        }
        if let Some(per_minute) = parse_var(&lookup, "FMP_REQUESTS_PER_MINUTE")? {
            config.rate_limit.per_minute_limit = per_minute;
        }
        if let Some(mode) = lookup("FMP_THROTTLE_MODE") {
            config.throttle_mode = match mode.trim().to_ascii_lowercase().as_str() {
                "block" => ThrottleMode::Block,
                "reject" => ThrottleMode::Reject,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        key: "FMP_THROTTLE_MODE",
                        value: mode,
                        reason: String::from("expected 'block' or 'reject'"),
                    })
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidBaseUrl {
                value: self.base_url.clone(),
            });
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::NonPositive { field: "timeout" });
        }
        for (field, value) in [
            ("daily_limit", self.rate_limit.daily_limit),
            ("per_second_limit", self.rate_limit.per_second_limit),
            ("per_minute_limit", self.rate_limit.per_minute_limit),
        ] {
            if value == 0 {
                return Err(ConfigError::NonPositive { field });
            }
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| {
            value.trim().parse::<T>().map_err(|e| ConfigError::InvalidEnv {
                key,
                reason: e.to_string(),
                value,
            })
        })
        .transpose()
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
