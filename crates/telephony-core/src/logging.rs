//! Logging setup
//!
//! Logs always go to stderr: stdout carries the JSON protocol when the
//! backend is hosted by the CLI.

use std::str::FromStr;

use serde::Deserialize;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{TelephonyError, TelephonyResult};

/// Configuration for the logging system
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum level, overridable per target through `RUST_LOG`
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Include file and line information
    pub file_info: bool,
    /// Log span enter/exit
    pub log_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_info: false,
            log_spans: false,
        }
    }
}

impl LoggingConfig {
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Default::default()
        }
    }

    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    pub fn with_spans(mut self) -> Self {
        self.log_spans = true;
        self
    }
}

/// Install the global subscriber
pub fn setup_logging(config: &LoggingConfig) -> TelephonyResult<()> {
    let level = parse_log_level(&config.level)?;
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let span_events = if config.log_spans {
        FmtSpan::ACTIVE
    } else {
        FmtSpan::NONE
    };

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info)
        .with_writer(std::io::stderr);

    let installed = if config.json {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };
    installed.map_err(|e| TelephonyError::config(format!("Failed to install logger: {}", e)))
}

/// Parse a log level name
pub fn parse_log_level(level: &str) -> TelephonyResult<Level> {
    Level::from_str(level).map_err(|_| TelephonyError::config(format!("Invalid log level: {}", level)))
}

/// Log the start-up banner
pub fn log_welcome(app_name: &str, version: &str) {
    tracing::info!("Starting {} v{}", app_name, version);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("WARN").unwrap(), Level::WARN);
        assert!(matches!(parse_log_level("loud"), Err(TelephonyError::Configuration { .. })));
    }

    #[test]
    fn test_builder() {
        let config = LoggingConfig::new("trace").with_json().with_file_info();
        assert_eq!(config.level, "trace");
        assert!(config.json);
        assert!(config.file_info);
        assert!(!config.log_spans);

        let config = LoggingConfig::new("debug").with_spans();
        assert!(config.log_spans);
        assert!(!config.json);
    }
}
