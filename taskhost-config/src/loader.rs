//! Configuration loading and environment variable handling

use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::domains::logging::{LogFormat, LogLevel, LoggingConfig};
use crate::domains::TaskhostConfig;
use crate::error::{ConfigError, ConfigResult};

const DEFAULT_CONFIG_FILE_NAME: &str = ".taskhost.yaml";

/// Serialization format of a configuration file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Pick the format from the file extension; anything but `.json` is YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Yaml,
        }
    }
}

/// `~/.taskhost.yaml`, or `.taskhost.yaml` in the working directory when no
/// home directory is known.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(DEFAULT_CONFIG_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE_NAME))
}

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "TASKHOST".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML or JSON file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<TaskhostConfig> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "loading configuration");
        self.parse_str(&content, ConfigFormat::from_path(path))
    }

    /// Parse configuration text, apply environment overrides and validate
    pub fn parse_str(&self, content: &str, format: ConfigFormat) -> ConfigResult<TaskhostConfig> {
        let mut config: TaskhostConfig = match format {
            ConfigFormat::Yaml => serde_yaml::from_str(content)?,
            ConfigFormat::Json => serde_json::from_str(content)?,
        };

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;

        Ok(config)
    }

    /// Load configuration with fallback to the default path
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<TaskhostConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_file(default_config_path()),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut TaskhostConfig) -> ConfigResult<()> {
        self.apply_logging_overrides(&mut config.logging)
    }

    /// Apply logging config overrides
    fn apply_logging_overrides(&self, config: &mut LoggingConfig) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.level = LogLevel::from_str(&log_level)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {}", log_level)))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.format = LogFormat::from_str(&format)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_FORMAT: {}", format)))?;
        }

        Ok(())
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
