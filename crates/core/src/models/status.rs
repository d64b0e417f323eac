/// Editor activity status mirrored to viewers
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    /// An edit happened within the debounce window
    Typing,
    /// No edit for at least one debounce window
    #[default]
    Idle,
    /// The editor submitted a valid form
    Submitted,
    /// The editor cancelled and left the form
    Inactive,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Typing => "typing",
            ActivityStatus::Idle => "idle",
            ActivityStatus::Submitted => "submitted",
            ActivityStatus::Inactive => "inactive",
        }
    }

    /// Human-readable label shown to staff
    pub fn label(&self) -> &'static str {
        match self {
            ActivityStatus::Typing => "Patient is typing…",
            ActivityStatus::Idle => "Patient is idle",
            ActivityStatus::Submitted => "Form submitted",
            ActivityStatus::Inactive => "Patient inactive",
        }
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_idle() {
        assert_eq!(ActivityStatus::default(), ActivityStatus::Idle);
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(
            serde_json::to_string(&ActivityStatus::Submitted).unwrap(),
            "\"submitted\""
        );
        assert_eq!(
            serde_json::from_str::<ActivityStatus>("\"inactive\"").unwrap(),
            ActivityStatus::Inactive
        );
        assert!(serde_json::from_str::<ActivityStatus>("\"away\"").is_err());
    }
}
