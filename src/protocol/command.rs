//! Control commands written to the command channel.
//!
//! A command request is a JSON object `{"command": <name>, ...params}`.
//! Status and attendance queries await a correlated response; the clear
//! commands are fire-and-forget, and callers confirm their effect with a
//! follow-up status refresh.

use serde_json::{Value, json};

/// A control command accepted by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Query roster count, storage and memory figures.
    GetStatus,
    /// Pull everything the device has collected.
    GetAttendance,
    /// Clear attendance for one class.
    ClearAttendance {
        /// Class to clear.
        class_id: String,
    },
    /// Clear attendance for every class.
    ClearAllAttendance,
}

impl Command {
    /// Wire name of the command.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::GetStatus => "get_status",
            Self::GetAttendance => "get_attendance",
            Self::ClearAttendance { .. } => "clear_attendance",
            Self::ClearAllAttendance => "clear_all_attendance",
        }
    }

    /// True if the device answers this command with a correlated response.
    #[must_use]
    pub const fn awaits_response(&self) -> bool {
        matches!(self, Self::GetStatus | Self::GetAttendance)
    }

    /// Serializes the request body.
    #[must_use]
    pub fn request_body(&self) -> String {
        let body: Value = match self {
            Self::ClearAttendance { class_id } => {
                json!({"command": self.name(), "class_id": class_id})
            }
            _ => json!({"command": self.name()}),
        };
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        assert_eq!(Command::GetStatus.name(), "get_status");
        assert_eq!(Command::GetAttendance.name(), "get_attendance");
        assert_eq!(
            Command::ClearAttendance {
                class_id: "c1".into()
            }
            .name(),
            "clear_attendance"
        );
        assert_eq!(Command::ClearAllAttendance.name(), "clear_all_attendance");
    }

    #[test]
    fn test_response_policy() {
        assert!(Command::GetStatus.awaits_response());
        assert!(Command::GetAttendance.awaits_response());
        assert!(!Command::ClearAllAttendance.awaits_response());
        assert!(
            !Command::ClearAttendance {
                class_id: "c1".into()
            }
            .awaits_response()
        );
    }

    #[test]
    fn test_request_body_carries_params() {
        let body = Command::ClearAttendance {
            class_id: "c1".into(),
        }
        .request_body();
        let parsed: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["command"], "clear_attendance");
        assert_eq!(parsed["class_id"], "c1");

        let body = Command::GetStatus.request_body();
        let parsed: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["command"], "get_status");
        assert!(parsed.get("class_id").is_none());
    }
}
