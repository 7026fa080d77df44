//! Optional `tracing` subscriber setup for applications embedding the client.
//!
//! The library itself only emits `tracing` events; call [`init_logging`] once
//! from the application if no subscriber is installed yet.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Multi-line human-readable output.
    Pretty,
    #[default]
    Compact,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" => Some(Self::Pretty),
            "compact" => Some(Self::Compact),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `fmpkit_core=debug`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: LogFormat::default(),
        }
    }
}

impl LoggingConfig {
    /// Reads `FMP_LOG_LEVEL` and `FMP_LOG_FORMAT`; unknown formats fall back to compact.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            level: std::env::var("FMP_LOG_LEVEL").unwrap_or(defaults.level),
            format: std::env::var("FMP_LOG_FORMAT")
                .ok()
                .and_then(|value| LogFormat::parse(&value))
                .unwrap_or(defaults.format),
        }
    }
}

/// Installs a global fmt subscriber. `RUST_LOG` takes precedence over
/// `config.level`. Fails if a global subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_names_are_case_insensitive() {
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse(" pretty "), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse("xml"), None);
    }

    #[test]
    fn second_init_fails_instead_of_panicking() {
        let config = LoggingConfig::default();
        let _ = init_logging(&config);

        assert!(init_logging(&config).is_err());
    }
}
