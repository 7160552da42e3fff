//! Backend configuration
//!
//! Sources, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. an optional TOML file
//! 3. `XWALK_TELEPHONY_*` environment variables, nested keys separated by
//!    `__` (`XWALK_TELEPHONY_LOGGING__LEVEL=debug`)

use std::path::Path;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::{TelephonyError, TelephonyResult};
use crate::logging::LoggingConfig;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "XWALK_TELEPHONY";

/// Message bus oFono is reached on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    #[default]
    System,
    Session,
}

/// oFono connection settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OfonoConfig {
    pub bus: BusKind,
    /// Well-known bus name of the daemon
    pub service: String,
}

impl Default for OfonoConfig {
    fn default() -> Self {
        Self {
            bus: BusKind::System,
            service: "org.ofono".to_string(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TelephonyConfig {
    /// Whether notifications are posted before the page asks for them
    pub notifications_enabled: bool,
    /// Capacity of the inbound request channel
    pub channel_capacity: usize,
    pub logging: LoggingConfig,
    pub ofono: OfonoConfig,
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            notifications_enabled: false,
            channel_capacity: 64,
            logging: LoggingConfig::default(),
            ofono: OfonoConfig::default(),
        }
    }
}

impl TelephonyConfig {
    /// Load from the environment only
    pub fn from_env() -> TelephonyResult<Self> {
        Self::load(None)
    }

    /// Load from an optional TOML file plus the environment
    pub fn load(path: Option<&Path>) -> TelephonyResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            if !path.exists() {
                return Err(TelephonyError::config(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        );

        let config: TelephonyConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TelephonyResult<()> {
        if self.channel_capacity == 0 {
            return Err(TelephonyError::config("channel_capacity must be greater than zero"));
        }
        if self.ofono.service.is_empty() {
            return Err(TelephonyError::config("ofono.service must not be empty"));
        }
        Ok(())
    }
}
