//! Errors raised by the simulation layer

use csrd_core::{ConfigError, CsrdError};
use std::path::PathBuf;

/// Result type for simulation operations
pub type SimResult<T> = Result<T, SimError>;

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// A signal-chain block rejected its configuration or input
    #[error(transparent)]
    Core(#[from] CsrdError),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A factory could not resolve or build a block
    #[error("{factory} factory: {reason}")]
    Factory { factory: &'static str, reason: String },

    #[error("Scenario '{scenario}': {reason}")]
    Scenario { scenario: String, reason: String },

    #[error("Runner error: {0}")]
    Runner(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<ConfigError> for SimError {
    fn from(err: ConfigError) -> Self {
        SimError::Config(err.to_string())
    }
}

impl SimError {
    pub fn factory(factory: &'static str, reason: impl Into<String>) -> Self {
        SimError::Factory {
            factory,
            reason: reason.into(),
        }
    }

    pub fn scenario(scenario: impl Into<String>, reason: impl Into<String>) -> Self {
        SimError::Scenario {
            scenario: scenario.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SimError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_is_transparent() {
        let err: SimError = CsrdError::MissingField("handle".into()).into();
        assert_eq!(err.to_string(), "Missing required field 'handle'");
    }

    #[test]
    fn test_factory_error_names_factory() {
        let err = SimError::factory("modulation", "unknown TypeID 'LORA'");
        assert_eq!(err.to_string(), "modulation factory: unknown TypeID 'LORA'");
    }
}
