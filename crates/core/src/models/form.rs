//! Patient intake form record
//!
//! The record lives only in memory: the editor owns the authoritative copy and
//! every viewer holds a replica rebuilt from field deltas.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::IntakeError;

/// Closed catalog of intake form fields
///
/// Serialized with the PascalCase names used on the wire (`"FirstName"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FieldName {
    FirstName,
    MiddleName,
    LastName,
    BirthDate,
    Gender,
    PhoneNumber,
    Email,
    PreferredLanguage,
    Nationality,
    Religion,
    Address,
    ContactName,
    Relationship,
    ContactNumber,
}

impl FieldName {
    /// Every field in form order
    pub const ALL: [FieldName; 14] = [
        FieldName::FirstName,
        FieldName::MiddleName,
        FieldName::LastName,
        FieldName::BirthDate,
        FieldName::Gender,
        FieldName::PhoneNumber,
        FieldName::Email,
        FieldName::PreferredLanguage,
        FieldName::Nationality,
        FieldName::Religion,
        FieldName::Address,
        FieldName::ContactName,
        FieldName::Relationship,
        FieldName::ContactNumber,
    ];

    /// Fields that must be non-empty before submit is accepted
    pub const REQUIRED: [FieldName; 7] = [
        FieldName::FirstName,
        FieldName::LastName,
        FieldName::BirthDate,
        FieldName::Gender,
        FieldName::PhoneNumber,
        FieldName::Email,
        FieldName::Nationality,
    ];

    /// Wire name of the field
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldName::FirstName => "FirstName",
            FieldName::MiddleName => "MiddleName",
            FieldName::LastName => "LastName",
            FieldName::BirthDate => "BirthDate",
            FieldName::Gender => "Gender",
            FieldName::PhoneNumber => "PhoneNumber",
            FieldName::Email => "Email",
            FieldName::PreferredLanguage => "PreferredLanguage",
            FieldName::Nationality => "Nationality",
            FieldName::Religion => "Religion",
            FieldName::Address => "Address",
            FieldName::ContactName => "ContactName",
            FieldName::Relationship => "Relationship",
            FieldName::ContactNumber => "ContactNumber",
        }
    }

    pub fn is_required(&self) -> bool {
        Self::REQUIRED.contains(self)
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldName {
    type Err = IntakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldName::ALL
            .iter()
            .copied()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| IntakeError::validation_field(format!("Unknown form field '{}'", s), s))
    }
}

/// In-memory intake record, one string per field (empty means not provided)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FormRecord {
    pub first_name: String,
    pub middle_name: String,
    pub last_name: String,
    pub birth_date: String,
    pub gender: String,
    pub phone_number: String,
    pub email: String,
    pub preferred_language: String,
    pub nationality: String,
    pub religion: String,
    pub address: String,
    pub contact_name: String,
    pub relationship: String,
    pub contact_number: String,
}

impl FormRecord {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a field
    pub fn get(&self, field: FieldName) -> &str {
        match field {
            FieldName::FirstName => &self.first_name,
            FieldName::MiddleName => &self.middle_name,
            FieldName::LastName => &self.last_name,
            FieldName::BirthDate => &self.birth_date,
            FieldName::Gender => &self.gender,
            FieldName::PhoneNumber => &self.phone_number,
            FieldName::Email => &self.email,
            FieldName::PreferredLanguage => &self.preferred_language,
            FieldName::Nationality => &self.nationality,
            FieldName::Religion => &self.religion,
            FieldName::Address => &self.address,
            FieldName::ContactName => &self.contact_name,
            FieldName::Relationship => &self.relationship,
            FieldName::ContactNumber => &self.contact_number,
        }
    }

    /// Overwrite a single field, leaving every other field untouched
    pub fn set(&mut self, field: FieldName, value: impl Into<String>) {
        *self.slot(field) = value.into();
    }

    /// Reset every field to empty
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Fields that currently hold a non-empty value, in form order
    pub fn filled_fields(&self) -> impl Iterator<Item = (FieldName, &str)> {
        FieldName::ALL
            .into_iter()
            .map(move |field| (field, self.get(field)))
            .filter(|(_, value)| !value.is_empty())
    }

    fn slot(&mut self, field: FieldName) -> &mut String {
        match field {
            FieldName::FirstName => &mut self.first_name,
            FieldName::MiddleName => &mut self.middle_name,
            FieldName::LastName => &mut self.last_name,
            FieldName::BirthDate => &mut self.birth_date,
            FieldName::Gender => &mut self.gender,
            FieldName::PhoneNumber => &mut self.phone_number,
            FieldName::Email => &mut self.email,
            FieldName::PreferredLanguage => &mut self.preferred_language,
            FieldName::Nationality => &mut self.nationality,
            FieldName::Religion => &mut self.religion,
            FieldName::Address => &mut self.address,
            FieldName::ContactName => &mut self.contact_name,
            FieldName::Relationship => &mut self.relationship,
            FieldName::ContactNumber => &mut self.contact_number,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_name_round_trips_through_str() {
        for field in FieldName::ALL {
            assert_eq!(field.as_str().parse::<FieldName>().unwrap(), field);
        }
        assert!("first_name".parse::<FieldName>().is_err());
    }

    #[test]
    fn test_field_name_serde_uses_wire_name() {
        let json = serde_json::to_string(&FieldName::PhoneNumber).unwrap();
        assert_eq!(json, "\"PhoneNumber\"");
        assert!(serde_json::from_str::<FieldName>("\"Nickname\"").is_err());
    }

    #[test]
    fn test_required_fields() {
        assert!(FieldName::FirstName.is_required());
        assert!(FieldName::Nationality.is_required());
        assert!(!FieldName::MiddleName.is_required());
        assert!(!FieldName::ContactNumber.is_required());
    }

    #[test]
    fn test_last_write_wins_per_field() {
        let mut record = FormRecord::new();
        record.set(FieldName::FirstName, "Jane");
        record.set(FieldName::LastName, "Doe");
        record.set(FieldName::FirstName, "Janet");

        assert_eq!(record.get(FieldName::FirstName), "Janet");
        assert_eq!(record.get(FieldName::LastName), "Doe");
        assert_eq!(record.filled_fields().count(), 2);
    }

    #[test]
    fn test_clear_resets_to_empty() {
        let mut record = FormRecord::new();
        record.set(FieldName::Address, "12 Sukhumvit Rd");
        assert!(!record.is_empty());

        record.clear();
        assert!(record.is_empty());
        assert_eq!(record, FormRecord::default());
    }

    #[test]
    fn test_record_serializes_with_wire_names() {
        let mut record = FormRecord::new();
        record.set(FieldName::BirthDate, "1990-04-01");

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["BirthDate"], "1990-04-01");
        assert_eq!(value["FirstName"], "");
    }
}
