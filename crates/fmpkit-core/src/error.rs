use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::http_client::HttpError;

/// Field-less classification of [`ApiError`] for programmatic branching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    RateLimit,
    Authentication,
    Validation,
    ServerError,
    NetworkFailure,
    MalformedResponse,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::Authentication => "authentication",
            Self::Validation => "validation",
            Self::ServerError => "server_error",
            Self::NetworkFailure => "network_failure",
            Self::MalformedResponse => "malformed_response",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every failure a request can surface. The set is closed: transport and
/// decoding failures are translated into one of these variants before they
/// reach the caller.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApiError {
    /// Local quota is saturated or the API answered 429.
    #[error("{message} (retry after {:.1} seconds)", .retry_after.as_secs_f64())]
    RateLimit {
        message: String,
        retry_after: Duration,
        /// `Some(429)` when the server rejected the call, `None` for a local quota block.
        status: Option<u16>,
    },

    #[error("authentication failed: {message}")]
    Authentication { message: String },

    /// Request shape problem, either rejected locally or by a 400 response.
    #[error("invalid request parameters: {message}")]
    Validation { message: String, details: Value },

    /// Non-2xx status other than 400/401/429, or an error payload in a 2xx body.
    #[error("{}", server_error_display(.status, .message))]
    ServerError { status: Option<u16>, message: String },

    #[error("network failure: {message}")]
    NetworkFailure { message: String, timed_out: bool },

    #[error("malformed response: {message}")]
    MalformedResponse { message: String },
}

fn server_error_display(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(status) => format!("HTTP {status} error occurred: {message}"),
        None => format!("API error: {message}"),
    }
}

impl ApiError {
    pub fn rate_limited(
        message: impl Into<String>,
        retry_after: Duration,
        status: Option<u16>,
    ) -> Self {
        Self::RateLimit {
            message: message.into(),
            retry_after,
            status,
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>, details: Value) -> Self {
        Self::Validation {
            message: message.into(),
            details,
        }
    }

    /// Validation failure detected before anything was sent.
    pub fn invalid_param(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Validation {
            details: Value::String(message.clone()),
            message,
        }
    }

    pub fn server(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::ServerError {
            status,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>, timed_out: bool) -> Self {
        Self::NetworkFailure {
            message: message.into(),
            timed_out,
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            message: message.into(),
        }
    }

    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimit { .. } => ErrorKind::RateLimit,
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::ServerError { .. } => ErrorKind::ServerError,
            Self::NetworkFailure { .. } => ErrorKind::NetworkFailure,
            Self::MalformedResponse { .. } => ErrorKind::MalformedResponse,
        }
    }

    /// Whether another attempt may succeed: network failures (timeouts
    /// included), 5xx responses and rate limits.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkFailure { .. } | Self::RateLimit { .. } => true,
            Self::ServerError { status, .. } => status.is_some_and(|status| status >= 500),
            Self::Authentication { .. }
            | Self::Validation { .. }
            | Self::MalformedResponse { .. } => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RateLimit { status, .. } | Self::ServerError { status, .. } => *status,
            Self::Authentication { .. } => Some(401),
            Self::Validation { .. }
            | Self::NetworkFailure { .. }
            | Self::MalformedResponse { .. } => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::RateLimit { message, .. }
            | Self::Authentication { message }
            | Self::Validation { message, .. }
            | Self::ServerError { message, .. }
            | Self::NetworkFailure { message, .. }
            | Self::MalformedResponse { message } => message,
        }
    }
}

impl From<HttpError> for ApiError {
    fn from(error: HttpError) -> Self {
        Self::NetworkFailure {
            timed_out: error.timed_out(),
            message: error.message().to_owned(),
        }
    }
}

/// Configuration loading errors. These never surface from a request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("API key must be provided either explicitly or via FMP_API_KEY environment variable")]
    MissingApiKey,
    #[error("environment variable {key} has invalid value '{value}': {reason}")]
    InvalidEnv {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("field '{field}' must be greater than zero")]
    NonPositive { field: &'static str },
    #[error("base URL must start with http:// or https://: '{value}'")]
    InvalidBaseUrl { value: String },
}
