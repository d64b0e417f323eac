/// Role-parameterized form model
///
/// Editor and viewer render the same form. The role decides whether fields are
/// editable, whether errors are shown and whether the status label appears.
use crate::relay::Role;
use intake_core::{ActivityStatus, FieldError, FieldName, FormRecord, ValidationErrors};
use serde::Serialize;

/// Placeholder shown to staff for an empty field
pub const EMPTY_PLACEHOLDER: &str = "Not provided";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldView {
    pub field: FieldName,
    pub value: String,
    pub display_value: String,
    pub read_only: bool,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormView {
    pub role: Role,
    pub fields: Vec<FieldView>,
    pub status_label: Option<&'static str>,
    pub can_submit: bool,
}

impl FormView {
    pub fn render(
        role: Role,
        record: &FormRecord,
        status: ActivityStatus,
        errors: &ValidationErrors,
    ) -> Self {
        let editor = role.is_editor();

        let fields = FieldName::ALL
            .iter()
            .map(|&field| {
                let value = record.get(field).to_string();
                let display_value = if !editor && value.trim().is_empty() {
                    EMPTY_PLACEHOLDER.to_string()
                } else {
                    value.clone()
                };

                FieldView {
                    field,
                    value,
                    display_value,
                    read_only: !editor,
                    required: field.is_required(),
                    error: if editor {
                        errors.get(field).map(FieldError::to_string)
                    } else {
                        None
                    },
                }
            })
            .collect();

        Self {
            role,
            fields,
            status_label: (!editor).then(|| status.label()),
            can_submit: editor,
        }
    }

    pub fn field(&self, field: FieldName) -> Option<&FieldView> {
        self.fields.iter().find(|view| view.field == field)
    }
}
