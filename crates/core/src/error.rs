//! Error types shared across the intake crates

use thiserror::Error;

/// Top-level error for configuration and validation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntakeError {
    /// A configuration value is missing, unparseable or out of range
    #[error("Configuration error: {message}")]
    ConfigurationError {
        message: String,
        /// Environment variable the value was read from
        key: Option<String>,
    },

    /// A value failed a validation rule
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },
}

impl IntakeError {
    /// Build a configuration error tied to an environment variable
    pub fn configuration(message: impl Into<String>, key: &str) -> Self {
        Self::ConfigurationError {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }

    /// Build a validation error tied to a named field
    pub fn validation_field(message: impl Into<String>, field: &str) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IntakeError::configuration("topic must not be empty", "INTAKE_RELAY_TOPIC");
        assert_eq!(
            err.to_string(),
            "Configuration error: topic must not be empty"
        );
        assert!(matches!(
            err,
            IntakeError::ConfigurationError { key: Some(ref k), .. } if k == "INTAKE_RELAY_TOPIC"
        ));
    }

    #[test]
    fn test_validation_field_error() {
        let err = IntakeError::validation_field("Invalid email address format", "Email");
        assert_eq!(
            err,
            IntakeError::ValidationError {
                message: "Invalid email address format".to_string(),
                field: Some("Email".to_string()),
            }
        );
    }
}
