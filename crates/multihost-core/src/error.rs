//! Error types for the core value types.
//!
//! Every error here is a configuration error: it is raised while parsing or
//! constructing a value and never after a value exists.

use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while building core values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Prefix length outside `1..=31`.
    #[error("prefix length must be between 1 and 31, got {0}")]
    InvalidPrefix(u32),

    /// The base address is not a dotted IPv4 address.
    #[error("invalid IPv4 address: {0}")]
    InvalidAddress(String),

    /// The text is not in `address/prefix` form.
    #[error("invalid subnet '{value}': {reason}")]
    InvalidSubnet {
        /// The offending text.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// An environment-file line without a `=` separator.
    #[error("malformed environment line {line_no}: '{line}'")]
    MalformedLine {
        /// 1-based line number.
        line_no: usize,
        /// The offending line.
        line: String,
    },

    /// A key that was required but not present.
    #[error("missing key: {0}")]
    MissingKey(String),

    /// A key whose value could not be interpreted.
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue {
        /// The key.
        key: String,
        /// The raw value.
        value: String,
    },
}

impl CoreError {
    /// Creates an invalid subnet error.
    pub fn invalid_subnet(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSubnet {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            CoreError::InvalidPrefix(32).to_string(),
            "prefix length must be between 1 and 31, got 32"
        );
        assert_eq!(
            CoreError::MissingKey("FLANNEL_MTU".to_string()).to_string(),
            "missing key: FLANNEL_MTU"
        );
    }
}
