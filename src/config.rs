//! Session configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/session.toml` (or a caller-supplied path)
//! 2. Environment variables prefixed with `SPECAN_ATTRS_`
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! SPECAN_ATTRS_FLAGS__SIMULATE=true
//! SPECAN_ATTRS_TIMING__IO_TIMEOUT_MS=2000
//! SPECAN_ATTRS_LOGGING__LEVEL=debug
//! ```
//!
//! # Example
//!
//! ```no_run
//! use specan_attrs::config::SessionConfig;
//!
//! let config = SessionConfig::load_from("config/session.toml")?;
//! println!("Simulate: {}", config.flags.simulate);
//! println!("I/O timeout: {:?}", config.io_timeout());
//! # Ok::<(), specan_attrs::config::ConfigError>(())
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::sync::SessionFlags;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "SPECAN_ATTRS_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level session configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Cache, simulation and checking switches
    #[serde(default)]
    pub flags: SessionFlags,
    /// Device I/O timing
    #[serde(default)]
    pub timing: TimingConfig,
    /// Coercion record queue
    #[serde(default)]
    pub coercion_records: CoercionRecordConfig,
    /// Logging output
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Optional TOML attribute catalog to load at session start
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
}

/// Device I/O timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Maximum wait for one flushed write or device query, in milliseconds
    #[serde(default = "default_io_timeout")]
    pub io_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            io_timeout_ms: default_io_timeout(),
        }
    }
}

/// Coercion record queue settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoercionRecordConfig {
    /// Records kept before the oldest is dropped
    #[serde(default = "default_record_capacity")]
    pub capacity: usize,
}

impl Default for CoercionRecordConfig {
    fn default() -> Self {
        Self {
            capacity: default_record_capacity(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_io_timeout() -> u64 {
    5000
}

fn default_record_capacity() -> usize {
    64
}

fn default_log_level() -> String {
    "info".to_string()
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl SessionConfig {
    /// Load configuration from `config/session.toml` and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config/session.toml")
    }

    /// Load configuration from a specific file path
    ///
    /// Environment variables take precedence over the file. A missing file
    /// yields the defaults plus any environment overrides.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file cannot be parsed or validation fails.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::extract(Figment::new().merge(Toml::file(path.as_ref())))
    }

    /// Load configuration from TOML text plus environment variables
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Self::extract(Figment::new().merge(Toml::string(source)))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(ConfigError::LoadError)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - I/O timeout is non-zero
    /// - Coercion record capacity is non-zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        if self.timing.io_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "io_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.coercion_records.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "coercion_records.capacity must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Device I/O timeout as a duration
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.timing.io_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    #[serial]
    fn test_defaults() {
        let config = SessionConfig::from_toml_str("").unwrap();
        assert_eq!(config, SessionConfig::default());
        assert!(config.flags.cache);
        assert!(!config.flags.simulate);
        assert!(config.flags.range_check);
        assert_eq!(config.io_timeout(), Duration::from_millis(5000));
    }

    #[test]
    #[serial]
    fn test_partial_file() {
        let config = SessionConfig::from_toml_str(
            r#"
            [flags]
            simulate = true
            record_coercions = true

            [timing]
            io_timeout_ms = 250
            "#,
        )
        .unwrap();
        assert!(config.flags.simulate);
        assert!(config.flags.record_coercions);
        // Unset flags keep their defaults.
        assert!(config.flags.cache);
        assert_eq!(config.timing.io_timeout_ms, 250);
    }

    #[test]
    #[serial]
    fn test_invalid_log_level() {
        let result = SessionConfig::from_toml_str("[logging]\nlevel = \"verbose\"\n");
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Invalid log level"));
    }

    #[test]
    #[serial]
    fn test_zero_timeout_rejected() {
        let result = SessionConfig::from_toml_str("[timing]\nio_timeout_ms = 0\n");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "catalog_path = \"config/catalog.toml\"").unwrap();
        writeln!(file, "[flags]\ncache = false").unwrap();
        let config = SessionConfig::load_from(file.path()).unwrap();
        assert!(!config.flags.cache);
        assert_eq!(config.catalog_path, Some(PathBuf::from("config/catalog.toml")));
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        std::env::set_var("SPECAN_ATTRS_FLAGS__SIMULATE", "true");
        std::env::set_var("SPECAN_ATTRS_TIMING__IO_TIMEOUT_MS", "750");
        let config = SessionConfig::from_toml_str("[flags]\nsimulate = false\n");
        std::env::remove_var("SPECAN_ATTRS_FLAGS__SIMULATE");
        std::env::remove_var("SPECAN_ATTRS_TIMING__IO_TIMEOUT_MS");

        let config = config.unwrap();
        assert!(config.flags.simulate);
        assert_eq!(config.timing.io_timeout_ms, 750);
    }
}
