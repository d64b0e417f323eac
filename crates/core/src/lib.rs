//! # Intake Core
//!
//! Shared data structures for the intake live-sync components.
//!
//! ## Modules
//!
//! - `models`: form field catalog, form record and activity status
//! - `validation`: required-field and format rules applied on submit and blur
//! - `config`: environment configuration loading and validation
//! - `error`: error types

pub mod config;
pub mod error;
pub mod models;
pub mod validation;

// Re-export commonly used types
pub use config::{load_dotenv, ConfigLoader, RelayConfig, SessionConfig, DEFAULT_TOPIC};
pub use error::IntakeError;
pub use models::{ActivityStatus, FieldName, FormRecord};
pub use validation::{validate_field, validate_for_submit, FieldError, ValidationErrors};

/// Result type alias for intake operations
pub type Result<T> = std::result::Result<T, IntakeError>;
