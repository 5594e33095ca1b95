//! # Configuration loading
//!
//! Configuration documents are YAML. This module owns the mechanics shared
//! by every document: the search path, reading, parsing and the error type.
//! The document itself (`CsrdConfig`) lives with the simulation crate that
//! consumes it.
//!
//! ## Search path
//!
//! The first file found wins:
//! 1. the path in the `CSRD_CONFIG` environment variable
//! 2. `./csrd.yaml`
//! 3. the user config directory, e.g. `~/.config/csrd/config.yaml`
//! 4. `/etc/csrd/config.yaml`

use crate::error::CsrdError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV: &str = "CSRD_CONFIG";

/// Error type for configuration operations.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Configuration file not found
    NotFound(String),
    /// Failed to read or write a configuration file
    ReadError(String),
    /// Failed to parse configuration
    ParseError(String),
    /// A value failed validation
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NotFound(msg) => write!(f, "config not found: {}", msg),
            ConfigError::ReadError(msg) => write!(f, "failed to read config: {}", msg),
            ConfigError::ParseError(msg) => write!(f, "failed to parse config: {}", msg),
            ConfigError::ValidationError(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<CsrdError> for ConfigError {
    fn from(err: CsrdError) -> Self {
        ConfigError::ValidationError(err.to_string())
    }
}

/// Candidate locations after the environment variable
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("./csrd.yaml")];
    if let Some(dirs) = directories::ProjectDirs::from("", "", "csrd") {
        paths.push(dirs.config_dir().join("config.yaml"));
    }
    paths.push(PathBuf::from("/etc/csrd/config.yaml"));
    paths
}

/// The configuration file to load, if any.
///
/// A `CSRD_CONFIG` that names a missing file is an error rather than a
/// silent fallback to the next location.
pub fn find_config_file() -> Result<Option<PathBuf>, ConfigError> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(path);
        if !path.exists() {
            return Err(ConfigError::NotFound(format!(
                "{}={} does not exist",
                CONFIG_ENV,
                path.display()
            )));
        }
        return Ok(Some(path));
    }
    Ok(config_search_paths().into_iter().find(|p| p.exists()))
}

/// Parse a YAML document
pub fn parse_yaml<T: DeserializeOwned>(yaml: &str) -> Result<T, ConfigError> {
    serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Read and parse a YAML file
pub fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
    parse_yaml(&content).map_err(|e| match e {
        ConfigError::ParseError(msg) => ConfigError::ParseError(format!("{}: {}", path.display(), msg)),
        other => other,
    })
}

/// Serialise and write a YAML file
pub fn write_yaml<T: Serialize>(value: &T, path: &Path) -> Result<(), ConfigError> {
    let content = serde_yaml::to_string(value).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    std::fs::write(path, content).map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))
}
