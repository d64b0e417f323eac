/// Wire protocol for live field sync
///
/// Two relay events carry every message:
/// - `field-change`: `{"field": "FirstName", "value": "Jane"}` or `{"action": "clear"}`
/// - `typing`: `{"status": "typing" | "idle" | "submitted" | "inactive"}`
///
/// Incoming payloads are decoded into the closed [`RelayMessage`] union;
/// anything else is rejected with a [`ProtocolError`].
use intake_core::{ActivityStatus, FieldName};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Event carrying field deltas and clear actions
pub const FIELD_CHANGE_EVENT: &str = "field-change";

/// Event carrying the editor activity status
pub const TYPING_EVENT: &str = "typing";

/// Events a viewer subscribes to
pub const SUBSCRIBED_EVENTS: [&str; 2] = [FIELD_CHANGE_EVENT, TYPING_EVENT];

/// One atomic change published by the editor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    /// Overwrite a single field
    FieldChange { field: FieldName, value: String },

    /// Reset every field to empty
    Clear,

    /// Editor activity status
    StatusUpdate(ActivityStatus),
}

/// Protocol decode errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Malformed {event} payload: {reason}")]
    MalformedPayload { event: String, reason: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum FieldChangePayload {
    Set {
        field: FieldName,
        value: Option<String>,
    },
    Action {
        action: DeltaAction,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum DeltaAction {
    Clear,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct TypingPayload {
    status: ActivityStatus,
}

impl RelayMessage {
    pub fn field_change(field: FieldName, value: impl Into<String>) -> Self {
        Self::FieldChange {
            field,
            value: value.into(),
        }
    }

    /// Relay event this message is published under
    pub fn event_name(&self) -> &'static str {
        match self {
            RelayMessage::FieldChange { .. } | RelayMessage::Clear => FIELD_CHANGE_EVENT,
            RelayMessage::StatusUpdate(_) => TYPING_EVENT,
        }
    }

    /// Encode into `(event, payload)` for publishing
    pub fn encode(&self) -> Result<(&'static str, serde_json::Value), ProtocolError> {
        let payload = match self {
            RelayMessage::FieldChange { field, value } => {
                serde_json::to_value(FieldChangePayload::Set {
                    field: *field,
                    value: Some(value.clone()),
                })
            }
            RelayMessage::Clear => serde_json::to_value(FieldChangePayload::Action {
                action: DeltaAction::Clear,
            }),
            RelayMessage::StatusUpdate(status) => {
                serde_json::to_value(TypingPayload { status: *status })
            }
        }
        .map_err(|e| ProtocolError::SerializationError(e.to_string()))?;

        Ok((self.event_name(), payload))
    }

    /// Decode a received payload, rejecting unknown events and shapes
    ///
    /// A `null` field value is accepted as an empty string.
    pub fn decode(event: &str, payload: &serde_json::Value) -> Result<Self, ProtocolError> {
        let malformed = |e: serde_json::Error| ProtocolError::MalformedPayload {
            event: event.to_string(),
            reason: e.to_string(),
        };

        match event {
            FIELD_CHANGE_EVENT => {
                let object = payload.as_object().ok_or_else(|| ProtocolError::MalformedPayload {
                    event: event.to_string(),
                    reason: "expected a JSON object".to_string(),
                })?;

                check_field_change_keys(object).map_err(|reason| ProtocolError::MalformedPayload {
                    event: event.to_string(),
                    reason,
                })?;

                match serde_json::from_value::<FieldChangePayload>(payload.clone()) {
                    Ok(FieldChangePayload::Set { field, value }) => Ok(RelayMessage::FieldChange {
                        field,
                        value: value.unwrap_or_default(),
                    }),
                    Ok(FieldChangePayload::Action { action: DeltaAction::Clear }) => {
                        Ok(RelayMessage::Clear)
                    }
                    Err(e) => Err(malformed(e)),
                }
            }
            TYPING_EVENT => serde_json::from_value::<TypingPayload>(payload.clone())
                .map(|p| RelayMessage::StatusUpdate(p.status))
                .map_err(malformed),
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }
}

/// Key sets accepted on `field-change`: exactly `{field, value}` or `{action}`
///
/// Untagged enums ignore `deny_unknown_fields` and treat a missing `Option` as
/// `None`, so the shape is checked before deserializing.
fn check_field_change_keys(
    object: &serde_json::Map<String, serde_json::Value>,
) -> Result<(), String> {
    if object.contains_key("action") {
        if object.len() != 1 {
            return Err("`action` payload must carry no other keys".to_string());
        }
        return Ok(());
    }

    if !object.contains_key("field") || !object.contains_key("value") {
        return Err("expected `field` and `value`".to_string());
    }
    match object.keys().find(|key| *key != "field" && *key != "value") {
        Some(extra) => Err(format!("unexpected key `{}`", extra)),
        None => Ok(()),
    }
}
