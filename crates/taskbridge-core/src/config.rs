//! Agent runtime configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::OrchestrationError;

/// Log verbosity accepted by the binaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_filter())
    }
}

impl FromStr for LogLevel {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            other => Err(OrchestrationError::InvalidInput(format!(
                "unknown log level '{}'",
                other
            ))),
        }
    }
}

/// Agent runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Retries after the first attempt.
    #[serde(alias = "maxRetries")]
    pub max_retries: u32,

    /// Delay before the first retry (milliseconds).
    #[serde(alias = "retryDelayBaseMs", alias = "retryDelay")]
    pub retry_delay_base_ms: u64,

    /// Cap on a single retry delay (milliseconds).
    #[serde(alias = "retryDelayMaxMs")]
    pub retry_delay_max_ms: u64,

    /// Per-attempt timeout (milliseconds). No timeout when unset.
    #[serde(alias = "timeoutMs", alias = "timeout")]
    pub timeout_ms: Option<u64>,

    #[serde(alias = "logLevel")]
    pub log_level: LogLevel,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_delay_base_ms: 1_000,
            retry_delay_max_ms: 30_000,
            timeout_ms: None,
            log_level: LogLevel::Info,
        }
    }
}

impl RuntimeConfig {
    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, OrchestrationError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| OrchestrationError::InvalidInput(format!("runtime config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), OrchestrationError> {
        if self.retry_delay_base_ms > self.retry_delay_max_ms {
            return Err(OrchestrationError::InvalidInput(format!(
                "retry_delay_base_ms ({}) exceeds retry_delay_max_ms ({})",
                self.retry_delay_base_ms, self.retry_delay_max_ms
            )));
        }
        if self.timeout_ms == Some(0) {
            return Err(OrchestrationError::InvalidInput(
                "timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Builder method to set the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Builder method to set the backoff bounds.
    pub fn with_retry_delays(mut self, base_ms: u64, max_ms: u64) -> Self {
        self.retry_delay_base_ms = base_ms;
        self.retry_delay_max_ms = max_ms;
        self
    }

    /// Builder method to set the per-attempt timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.retry_delay_base_ms, 1_000);
        assert_eq!(config.retry_delay_max_ms, 30_000);
        assert_eq!(config.timeout_ms, None);
        assert_eq!(config.log_level, LogLevel::Info);
    }

    #[test]
    fn test_from_json_partial_camel_case() {
        let config = RuntimeConfig::from_json(r#"{"maxRetries": 3, "logLevel": "debug"}"#).unwrap();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.retry_delay_base_ms, 1_000);
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let err = RuntimeConfig::from_json(
            r#"{"retry_delay_base_ms": 5000, "retry_delay_max_ms": 100}"#,
        )
        .unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidInput(_)));
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("verbose".parse::<LogLevel>().is_err());
    }
}
