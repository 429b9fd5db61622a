/*!
tunconf script configuration

Knobs read once at startup, including:
- the redirect-gateway method for this deployment
- log verbosity, timestamps and destination

Values come from an optional TOML file, then `LOG_LEVEL` / `LOG2FILE`
from the environment.
*/

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tunconf::logging::{default_log_file, LogDestination, LogLevel, LogSettings};
use tunconf::RedirectMethod;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Toml parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Toml serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Script configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ScriptConfig {
    pub engine: Engine,
    pub log: Log,
}

/// Engine behaviour fixed per deployment
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Engine {
    pub redirect_method: RedirectMethod,
}

/// Log sink configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Log {
    pub level: LogLevel,
    pub to_file: bool,
    pub timestamps: bool,
    pub file: Option<PathBuf>,
}

impl ScriptConfig {
    /// Apply `LOG_LEVEL` and `LOG2FILE` overrides
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("LOG_LEVEL").filter(|v| !v.trim().is_empty()) {
            self.log.level = level.parse().map_err(ConfigError::Invalid)?;
        }
        if lookup("LOG2FILE").map_or(false, |v| !v.is_empty()) {
            self.log.to_file = true;
        }
        Ok(())
    }

    pub fn log_settings(&self) -> LogSettings {
        let destination = if self.log.to_file {
            LogDestination::File(self.log.file.clone().unwrap_or_else(default_log_file))
        } else {
            LogDestination::Stdout
        };
        LogSettings {
            level: self.log.level,
            timestamps: self.log.timestamps,
            destination,
        }
    }
}

/// Load the configuration file, or defaults when no path is given
pub fn load_config(path: Option<&Path>) -> Result<ScriptConfig, ConfigError> {
    match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        }
        None => Ok(ScriptConfig::default()),
    }
}

/// Render the effective configuration
pub fn to_toml(config: &ScriptConfig) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(config)?)
}

/// Validate configuration
pub fn validate_config(config: &ScriptConfig) -> Result<(), ConfigError> {
    if let Some(file) = &config.log.file {
        if file.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("log.file must not be empty".to_string()));
        }
    }
    Ok(())
}
