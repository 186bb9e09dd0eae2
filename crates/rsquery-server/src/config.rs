//! Configuration management for rsquery.
//!
//! This module provides configuration loading with multiple sources:
//! 1. Default values (hardcoded)
//! 2. Configuration file (YAML)
//! 3. Environment variables (override)
//!
//! # Configuration Hierarchy
//!
//! Environment variables take precedence over config file values,
//! which take precedence over defaults.
//!
//! # Example
//!
//! ```ignore
//! use rsquery_server::config::ServerConfig;
//!
//! // Load from file with env overrides
//! let config = ServerConfig::load("rsquery.yaml")?;
//!
//! // Or load from environment only
//! let config = ServerConfig::from_env()?;
//! ```

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use rsquery_domain::{CacheConfig, DispatcherConfig};
use serde::{Deserialize, Serialize};

/// Environment variable prefix, e.g. `RSQUERY_CACHE__CAPACITY`.
const ENV_PREFIX: &str = "RSQUERY";

/// Runtime configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ServerConfig {
    /// Dispatcher settings
    #[serde(default)]
    pub dispatcher: DispatcherSettings,

    /// Request cache settings
    #[serde(default)]
    pub cache: CacheSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Dispatcher settings.
///
/// # Example YAML Configuration
///
/// ```yaml
/// dispatcher:
///   batching_enabled: true
///   round_timeout_ms: 5000
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DispatcherSettings {
    /// Batch requests issued outside an explicit batching region.
    ///
    /// Environment variable: `RSQUERY_DISPATCHER__BATCHING_ENABLED`
    #[serde(default = "default_true")]
    pub batching_enabled: bool,

    /// Upper bound on a single dispatch round, in milliseconds.
    ///
    /// Unset means rounds are unbounded.
    /// Environment variable: `RSQUERY_DISPATCHER__ROUND_TIMEOUT_MS`
    #[serde(default)]
    pub round_timeout_ms: Option<u64>,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            batching_enabled: true,
            round_timeout_ms: None,
        }
    }
}

impl DispatcherSettings {
    /// Converts the settings into a dispatcher configuration.
    pub fn to_dispatcher_config(&self) -> DispatcherConfig {
        let config = DispatcherConfig::default().with_batching(self.batching_enabled);
        match self.round_timeout_ms {
            Some(ms) => config.with_round_timeout(Duration::from_millis(ms)),
            None => config,
        }
    }
}

/// Request cache settings, applied to every cache built by the runtime.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CacheSettings {
    /// Maximum number of entries per cache
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// Entry time-to-live in milliseconds
    #[serde(default = "default_cache_ttl_ms")]
    pub ttl_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_ms: default_cache_ttl_ms(),
        }
    }
}

impl CacheSettings {
    /// Converts the settings into a cache configuration.
    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig::default()
            .with_capacity(self.capacity)
            .with_ttl(Duration::from_millis(self.ttl_ms))
    }
}

fn default_cache_capacity() -> usize {
    CacheConfig::default().capacity
}

fn default_cache_ttl_ms() -> u64 {
    CacheConfig::default().ttl.as_millis() as u64
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format (true for production, false for development)
    #[serde(default)]
    pub json: bool,

    /// Emit span enter/exit events, such as each `dispatch_round`.
    ///
    /// Environment variable: `RSQUERY_LOGGING__SPANS`
    #[serde(default)]
    pub spans: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            spans: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl ServerConfig {
    /// Load configuration from a YAML file with environment variable overrides.
    ///
    /// Environment variables are prefixed with `RSQUERY_` and use `__` as separator.
    /// For example:
    /// - `RSQUERY_CACHE__CAPACITY=1000` overrides `cache.capacity`
    /// - `RSQUERY_LOGGING__JSON=true` overrides `logging.json`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(env_source())
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;

        Ok(server_config)
    }

    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(env_source())
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;

        Ok(server_config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if let Err(error) = self.cache.to_cache_config().validate() {
            return Err(ConfigLoadError::Invalid {
                message: format!("cache.capacity: {error}"),
            });
        }

        if self.dispatcher.round_timeout_ms == Some(0) {
            return Err(ConfigLoadError::Invalid {
                message: "dispatcher.round_timeout_ms must be greater than 0".to_string(),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "logging.level must be one of: {:?}, got: {}",
                    valid_levels, self.logging.level
                ),
            });
        }

        Ok(())
    }
}

// RSQUERY_CACHE__TTL_MS -> cache.ttl_ms
fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    #[serial]
    fn test_can_load_config_from_yaml_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
dispatcher:
  batching_enabled: false
  round_timeout_ms: 2500

cache:
  capacity: 128
  ttl_ms: 1500

logging:
  level: debug
  json: true
  spans: true
"#
        )
        .unwrap();

        let config = ServerConfig::load(file.path()).unwrap();

        assert!(!config.dispatcher.batching_enabled);
        assert_eq!(config.dispatcher.round_timeout_ms, Some(2500));
        assert_eq!(config.cache.capacity, 128);
        assert_eq!(config.cache.ttl_ms, 1500);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert!(config.logging.spans);
    }

    #[test]
    #[serial]
    fn test_missing_sections_fall_back_to_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "cache:\n  capacity: 10").unwrap();

        let config = ServerConfig::load(file.path()).unwrap();

        assert_eq!(config.cache.capacity, 10);
        assert_eq!(config.cache.ttl_ms, 60_000);
        assert_eq!(config.dispatcher, DispatcherSettings::default());
        assert_eq!(config.logging, LoggingSettings::default());
    }

    #[test]
    #[serial]
    fn test_can_override_config_with_env_vars() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
cache:
  capacity: 128
  ttl_ms: 1500
"#
        )
        .unwrap();

        std::env::set_var("RSQUERY_CACHE__CAPACITY", "512");
        std::env::set_var("RSQUERY_LOGGING__LEVEL", "warn");

        let config = ServerConfig::load(file.path());

        std::env::remove_var("RSQUERY_CACHE__CAPACITY");
        std::env::remove_var("RSQUERY_LOGGING__LEVEL");

        let config = config.unwrap();
        assert_eq!(config.cache.capacity, 512); // Overridden by env
        assert_eq!(config.cache.ttl_ms, 1500); // From file
        assert_eq!(config.logging.level, "warn"); // Overridden by env
    }

    #[test]
    #[serial]
    fn test_from_env_loads_defaults_with_env_overrides() {
        std::env::set_var("RSQUERY_DISPATCHER__BATCHING_ENABLED", "false");

        let config = ServerConfig::from_env();

        std::env::remove_var("RSQUERY_DISPATCHER__BATCHING_ENABLED");

        let config = config.unwrap();
        assert!(!config.dispatcher.batching_enabled);
        assert_eq!(config.cache, CacheSettings::default());
    }

    #[test]
    fn test_config_validation_catches_errors() {
        let mut config = ServerConfig::default();
        config.cache.capacity = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cache.capacity"));

        let mut config = ServerConfig::default();
        config.dispatcher.round_timeout_ms = Some(0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("round_timeout_ms"));

        let mut config = ServerConfig::default();
        config.logging.level = "verbose".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("logging.level"));

        let mut config = ServerConfig::default();
        config.logging.level = "DEBUG".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_invalid_config_returns_clear_error() {
        let result = ServerConfig::load("/nonexistent/path/rsquery.yaml");
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigLoadError::FileNotFound { .. }));
        assert!(err.to_string().contains("not found"));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "invalid: yaml: syntax: [").unwrap();

        let err = ServerConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Load(_)));
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();

        assert!(config.validate().is_ok());
        assert!(config.dispatcher.batching_enabled);
        assert_eq!(config.dispatcher.round_timeout_ms, None);
        assert_eq!(config.cache.capacity, 65_536);
        assert_eq!(config.cache.ttl_ms, 60_000);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
        assert!(!config.logging.spans);
    }

    #[test]
    fn test_settings_convert_to_domain_configs() {
        let settings = DispatcherSettings {
            batching_enabled: false,
            round_timeout_ms: Some(250),
        };
        let cache = CacheSettings {
            capacity: 42,
            ttl_ms: 750,
        };

        assert_eq!(
            settings.to_dispatcher_config(),
            DispatcherConfig {
                batching_enabled: false,
                round_timeout: Some(Duration::from_millis(250)),
            }
        );
        assert_eq!(
            cache.to_cache_config(),
            CacheConfig {
                capacity: 42,
                ttl: Duration::from_millis(750),
            }
        );
    }
}
