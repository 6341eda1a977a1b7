//! Configuration for ircdm-keys
//!
//! Configuration is stored in TOML format at the platform config directory
//! (`~/.config/ircdm/keys.toml` on Linux). A default file is written on
//! first run. Command-line flags override file values.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use ircdm_core::ExchangeConfig;

use crate::output::OutputFormat;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Key manager configuration
///
/// # Example TOML
///
/// ```toml
/// [storage]
/// backend = "file"  # "file" | "sqlite"
/// # path = ""       # Empty = default location
///
/// [identity]
/// nick = "alice"
///
/// [exchange]
/// await_timeout_secs = 36
///
/// [network]
/// default = "Libera"
///
/// [output]
/// format = "table"  # "table" | "json" | "quiet"
///
/// [logging]
/// level = "warn"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub exchange: ExchangeConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "file" (JSON secrets file) or "sqlite"
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Secrets file or database (empty = default location)
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_backend() -> String {
    "file".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: None,
        }
    }
}

impl StorageConfig {
    /// Configured path, or the default for the backend.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.path {
            return Some(path.clone());
        }
        let file = if self.backend == "sqlite" {
            "secrets.db"
        } else {
            "secrets.json"
        };
        Config::data_dir().map(|dir| dir.join(file))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Own nick, written into exported payloads
    #[serde(default)]
    pub nick: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network used when `--network` is not given
    #[serde(default)]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_format")]
    pub format: String,

    #[serde(default)]
    pub verbose: bool,
}

fn default_format() -> String {
    "table".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_default() -> Result<Self, ConfigError> {
        if let Some(path) = Self::default_path() {
            if path.exists() {
                return Self::load(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load from `--config` if given, otherwise the default location.
    pub fn load_from(custom_path: Option<&Path>) -> Result<Self, ConfigError> {
        match custom_path {
            Some(path) => Self::load(path),
            None => Self::load_default(),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("keys.toml"))
    }

    pub fn data_dir() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("chat", "ircdm", "ircdm")
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns whether a file was written.
    pub fn create_default_if_missing() -> Result<bool, ConfigError> {
        match Self::default_path() {
            Some(path) if !path.exists() => {
                Self::default().save(&path)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_backends = ["file", "sqlite"];
        if !valid_backends.contains(&self.storage.backend.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid storage backend '{}'. Valid values: {:?}",
                self.storage.backend, valid_backends
            )));
        }

        self.output
            .format
            .parse::<OutputFormat>()
            .map_err(ConfigError::ValidationError)?;

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}'. Valid values: {:?}",
                self.logging.level, valid_levels
            )));
        }

        if self.exchange.await_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "await_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if matches!(&self.network.default, Some(n) if n.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "network.default must not be empty".to_string(),
            ));
        }

        if matches!(&self.identity.nick, Some(n) if n.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "identity.nick must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Command-line flags that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub output_format: Option<String>,
    pub verbose: Option<bool>,
    pub debug: Option<bool>,
    pub network: Option<String>,
    pub nick: Option<String>,
    pub storage_path: Option<PathBuf>,
}

impl Config {
    pub fn with_overrides(mut self, overrides: &CliOverrides) -> Self {
        if let Some(ref format) = overrides.output_format {
            self.output.format = format.clone();
        }
        if let Some(verbose) = overrides.verbose {
            self.output.verbose = verbose;
        }
        if overrides.debug == Some(true) {
            self.logging.level = "debug".to_string();
        }
        if let Some(ref network) = overrides.network {
            self.network.default = Some(network.clone());
        }
        if let Some(ref nick) = overrides.nick {
            self.identity.nick = Some(nick.clone());
        }
        if let Some(ref path) = overrides.storage_path {
            self.storage.path = Some(path.clone());
        }
        self
    }
}
