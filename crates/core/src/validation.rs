//! Validation rules for the intake form
//!
//! Required fields must be non-blank before submit. Non-empty values of a few
//! fields are additionally format-checked, matching the constraints the intake
//! form enforces in the browser.

use crate::models::{FieldName, FormRecord};
use chrono::{Local, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Thai phone number: local `0` prefix or `+66`, followed by 8-9 digits
pub static PHONE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(0\d{8,9}|\+66\d{8,9})$").expect("Failed to compile phone number regex")
});

/// Email regex pattern (basic validation)
pub static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
        .expect("Failed to compile email regex")
});

/// Date format used by the birth date input
const BIRTH_DATE_FORMAT: &str = "%Y-%m-%d";

/// Per-field validation failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("This field is required")]
    Required,

    #[error("{0}")]
    InvalidFormat(&'static str),
}

/// Per-field error set, ordered by field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: BTreeMap<FieldName, FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn get(&self, field: FieldName) -> Option<&FieldError> {
        self.errors.get(&field)
    }

    pub fn contains(&self, field: FieldName) -> bool {
        self.errors.contains_key(&field)
    }

    pub fn insert(&mut self, field: FieldName, error: FieldError) {
        self.errors.insert(field, error);
    }

    pub fn remove(&mut self, field: FieldName) -> Option<FieldError> {
        self.errors.remove(&field)
    }

    pub fn clear(&mut self) {
        self.errors.clear();
    }

    pub fn fields(&self) -> impl Iterator<Item = FieldName> + '_ {
        self.errors.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FieldName, &FieldError)> {
        self.errors.iter().map(|(field, error)| (*field, error))
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .errors
            .iter()
            .map(|(field, error)| format!("{}: {}", field, error))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

impl std::error::Error for ValidationErrors {}

/// Check a single field value
///
/// Blank required fields yield [`FieldError::Required`]; blank optional fields
/// always pass. Non-blank values are format-checked where a format exists.
pub fn validate_field(field: FieldName, value: &str) -> Option<FieldError> {
    if value.trim().is_empty() {
        return field.is_required().then_some(FieldError::Required);
    }

    match field {
        FieldName::PhoneNumber => validate_phone_number(value).err(),
        FieldName::Email => validate_email(value).err(),
        FieldName::BirthDate => validate_birth_date(value, Local::now().date_naive()).err(),
        _ => None,
    }
}

/// Validate a whole record before submit
///
/// # Examples
///
/// ```
/// use intake_core::models::{FieldName, FormRecord};
/// use intake_core::validation::validate_for_submit;
///
/// let errors = validate_for_submit(&FormRecord::new()).unwrap_err();
/// assert!(errors.contains(FieldName::FirstName));
/// assert!(!errors.contains(FieldName::MiddleName));
/// ```
pub fn validate_for_submit(record: &FormRecord) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();

    for field in FieldName::ALL {
        if let Some(error) = validate_field(field, record.get(field)) {
            errors.insert(field, error);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate phone number format
///
/// # Examples
///
/// ```
/// use intake_core::validation::validate_phone_number;
///
/// assert!(validate_phone_number("0812345678").is_ok());
/// assert!(validate_phone_number("+66812345678").is_ok());
/// assert!(validate_phone_number("12345").is_err());
/// ```
pub fn validate_phone_number(phone: &str) -> Result<(), FieldError> {
    if PHONE_REGEX.is_match(phone) {
        Ok(())
    } else {
        Err(FieldError::InvalidFormat(
            "Invalid phone number (expected 0 or +66 followed by 8-9 digits)",
        ))
    }
}

/// Validate email address format
pub fn validate_email(email: &str) -> Result<(), FieldError> {
    if EMAIL_REGEX.is_match(email) {
        Ok(())
    } else {
        Err(FieldError::InvalidFormat("Invalid email address format"))
    }
}

/// Validate an ISO birth date that is not after `today`
pub fn validate_birth_date(value: &str, today: NaiveDate) -> Result<(), FieldError> {
    let date = NaiveDate::parse_from_str(value, BIRTH_DATE_FORMAT)
        .map_err(|_| FieldError::InvalidFormat("Invalid date (expected YYYY-MM-DD)"))?;

    if date > today {
        return Err(FieldError::InvalidFormat(
            "Date of birth cannot be in the future",
        ));
    }

    Ok(())
}
