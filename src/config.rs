//! Configuration for Herald.
//!
//! Supports:
//! - [`BroadcasterConfig`] for constructing a broadcaster in code
//! - [`Config`] for the soak binary, via CLI arguments and environment

use clap::Parser;
use std::time::Duration;

use crate::observability::tracing::LogFormat;

/// Default wait timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Configuration for a single broadcaster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcasterConfig {
    /// Upper bound on every `wait_for_effects` call
    pub timeout: Duration,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

impl BroadcasterConfig {
    /// Create a BroadcasterConfig from a timeout in milliseconds.
    pub fn from_config(timeout_ms: u64) -> Self {
        Self {
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    /// Create a test config with a short timeout.
    #[cfg(test)]
    pub fn test_config() -> Self {
        Self {
            timeout: Duration::from_millis(50),
        }
    }
}

/// Herald soak runner: repeatedly waits for broadcast effects and reports failures.
#[derive(Parser, Debug, Clone)]
#[command(name = "herald")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Timeout for each wait, in milliseconds
    #[arg(short, long, env = "HERALD_TIMEOUT_MS", default_value_t = DEFAULT_TIMEOUT_MS)]
    pub timeout_ms: u64,

    /// Number of wait rounds to run
    #[arg(short, long, env = "HERALD_ROUNDS", default_value_t = 1000)]
    pub rounds: u64,

    /// Number of effects registered per round
    #[arg(short, long, env = "HERALD_EFFECTS", default_value_t = 1)]
    pub effects: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Log line format
    #[arg(long, env = "HERALD_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// OpenTelemetry collector endpoint for metrics export (optional)
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otel_endpoint: Option<String>,
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Broadcaster settings derived from this configuration.
    pub fn broadcaster_config(&self) -> BroadcasterConfig {
        BroadcasterConfig::from_config(self.timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            rounds: 1000,
            effects: 1,
            log_level: "info".into(),
            log_format: LogFormat::Text,
            otel_endpoint: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.timeout_ms, 100);
        assert_eq!(config.rounds, 1000);
        assert_eq!(config.effects, 1);
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.broadcaster_config(), BroadcasterConfig::default());
    }

    #[test]
    fn test_parse_overrides() {
        let config =
            Config::try_parse_from(["herald", "--timeout-ms", "250", "--rounds", "5", "-e", "3"])
                .unwrap();
        assert_eq!(config.rounds, 5);
        assert_eq!(config.effects, 3);
        assert_eq!(
            config.broadcaster_config().timeout,
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_parse_json_log_format() {
        let config = Config::try_parse_from(["herald", "--log-format", "json"]).unwrap();
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_broadcaster_test_config_is_short() {
        assert!(BroadcasterConfig::test_config().timeout < BroadcasterConfig::default().timeout);
    }
}
