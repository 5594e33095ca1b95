//! Error types shared by every csrd-core block

use thiserror::Error;

/// Result type for csrd-core operations
pub type CsrdResult<T> = Result<T, CsrdError>;

/// Errors raised while configuring or running a signal-chain block
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CsrdError {
    /// Modulation order rejected by the modulator family
    #[error("Invalid order {order} for {modulation}: {reason}")]
    InvalidOrder {
        modulation: String,
        order: usize,
        reason: String,
    },

    /// Dependent configuration values contradict each other
    #[error("Inconsistent configuration: {0}")]
    InconsistentConfiguration(String),

    /// Enumerated value not recognised (e.g. an unknown nonlinearity method)
    #[error("Unsupported {field} '{value}'")]
    UnsupportedValue { field: String, value: String },

    /// Required configuration or signal field absent
    #[error("Missing required field '{0}'")]
    MissingField(String),

    /// Field present but its value violates the input contract
    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    /// Signal antenna count differs from the configured block
    #[error("Antenna mismatch: expected {expected}, got {actual}")]
    AntennaMismatch { expected: usize, actual: usize },

    /// Numeric parameter outside its allowed range
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Input too short to produce a single symbol/block
    #[error("Empty input: {0}")]
    EmptyInput(String),

    /// Message payload kind does not match what the modulator consumes
    #[error("Payload mismatch: {0}")]
    PayloadMismatch(String),
}

impl CsrdError {
    pub fn invalid_order(modulation: impl Into<String>, order: usize, reason: impl Into<String>) -> Self {
        CsrdError::InvalidOrder {
            modulation: modulation.into(),
            order,
            reason: reason.into(),
        }
    }

    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        CsrdError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        CsrdError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn unsupported(field: impl Into<String>, value: impl Into<String>) -> Self {
        CsrdError::UnsupportedValue {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Short machine-readable code, used when tagging failed segments
    pub fn code(&self) -> &'static str {
        match self {
            CsrdError::InvalidOrder { .. } => "invalid_order",
            CsrdError::InconsistentConfiguration(_) => "inconsistent_configuration",
            CsrdError::UnsupportedValue { .. } => "unsupported_value",
            CsrdError::MissingField(_) => "missing_field",
            CsrdError::InvalidField { .. } => "invalid_field",
            CsrdError::AntennaMismatch { .. } => "antenna_mismatch",
            CsrdError::InvalidParameter { .. } => "invalid_parameter",
            CsrdError::EmptyInput(_) => "empty_input",
            CsrdError::PayloadMismatch(_) => "payload_mismatch",
        }
    }

    /// Configuration errors are fatal at setup time and never retried
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CsrdError::InvalidOrder { .. }
                | CsrdError::InconsistentConfiguration(_)
                | CsrdError::UnsupportedValue { .. }
                | CsrdError::MissingField(_)
                | CsrdError::InvalidParameter { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_names_field() {
        let err = CsrdError::invalid_field("sample_rate", "must be positive");
        assert_eq!(err.to_string(), "Invalid field 'sample_rate': must be positive");
        assert_eq!(err.code(), "invalid_field");
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_configuration_classification() {
        assert!(CsrdError::invalid_order("QAM", 6, "not a power of two").is_configuration());
        assert!(CsrdError::unsupported("method", "foo").is_configuration());
        assert!(!CsrdError::AntennaMismatch { expected: 1, actual: 2 }.is_configuration());
    }
}
