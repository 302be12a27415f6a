//! Classification of reassembled messages.
//!
//! The wire format carries no explicit type tag, so a reassembled unit is
//! typed by its shape. The sniffing heuristic lives entirely in
//! [`classify`] so the ambiguity is contained and testable in isolation;
//! everything downstream works with the tagged [`LogicalMessage`] union.
//!
//! Classification is order-sensitive: the device-identity check runs before
//! the attendance-bundle check, because an empty object `{}` (a peer with no
//! recorded attendance) is a valid, vacuous bundle.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::types::{AttendanceBundle, ClassAttendance, CommandAck, DeviceStatus};

/// One complete, classified application-level payload.
#[derive(Debug, Clone)]
pub enum LogicalMessage {
    /// Response to a `get_status` command.
    Status(DeviceStatus),
    /// Bulk attendance payload.
    Attendance(AttendanceBundle),
    /// Roster-sync or control-command acknowledgement.
    Ack(CommandAck),
    /// Anything else that parsed: arrays, unrecognized objects, scalars.
    Payload {
        /// The parsed value.
        value: Value,
        /// True if the text only parsed after truncation repair.
        repaired: bool,
    },
    /// The unit did not parse, even after repair. Carries a bounded detail
    /// string, never the raw unbounded text.
    Malformed {
        /// Parse error plus a truncated snippet of the offending text.
        detail: String,
    },
}

impl LogicalMessage {
    /// True if the message only parsed after truncation repair. Repaired
    /// payloads may be structurally valid but semantically short; callers
    /// decide whether to trust them.
    #[must_use]
    pub fn was_repaired(&self) -> bool {
        match self {
            Self::Status(status) => status.repaired,
            Self::Attendance(bundle) => bundle.repaired,
            Self::Payload { repaired, .. } => *repaired,
            Self::Ack(_) | Self::Malformed { .. } => false,
        }
    }
}

/// Classifies one reassembled text unit.
///
/// Parse failures get one best-effort repair attempt (closing the brackets a
/// truncated transfer left open) before the unit is declared malformed; a
/// message recovered that way is tagged via `repaired` so wrong-but-valid
/// data is never silently indistinguishable from clean data.
#[must_use]
pub fn classify(text: &str) -> LogicalMessage {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => classify_value(value, false),
        Err(parse_err) => {
            if let Some(value) = repair_truncated(text) {
                tracing::warn!(%parse_err, "message recovered by truncation repair");
                return classify_value(value, true);
            }
            tracing::warn!(%parse_err, "malformed message");
            LogicalMessage::Malformed {
                detail: bounded_detail(&parse_err, text),
            }
        }
    }
}

fn classify_value(value: Value, repaired: bool) -> LogicalMessage {
    if let Value::Object(map) = &value {
        if map.contains_key("device_name") {
            if let Ok(mut status) = serde_json::from_value::<DeviceStatus>(value.clone()) {
                status.repaired = repaired;
                return LogicalMessage::Status(status);
            }
        } else if map
            .values()
            .all(|v| v.as_object().is_some_and(|o| o.contains_key("records")))
        {
            // Vacuously true for {}: an empty bundle is a valid result.
            if let Ok(classes) =
                serde_json::from_value::<BTreeMap<String, ClassAttendance>>(value.clone())
            {
                return LogicalMessage::Attendance(AttendanceBundle { classes, repaired });
            }
        } else if map.contains_key("status") {
            if let Ok(ack) = serde_json::from_value::<CommandAck>(value.clone()) {
                return LogicalMessage::Ack(ack);
            }
        }
    }
    LogicalMessage::Payload { value, repaired }
}

/// Attempts to repair a truncated JSON transfer by closing whatever brackets
/// the balance scan finds open, re-parsing the result.
///
/// Returns `None` when the text does not look like truncated JSON (wrong
/// leading character, already balanced, or still unparseable after the fix).
fn repair_truncated(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    let first = trimmed.bytes().next()?;
    if first != b'{' && first != b'[' {
        return None;
    }

    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for b in trimmed.bytes() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => stack.push(b'}'),
            b'[' => stack.push(b']'),
            b'}' | b']' => {
                // Mismatched closers mean garbling, not truncation.
                if stack.pop() != Some(b) {
                    return None;
                }
            }
            _ => {}
        }
    }

    if stack.is_empty() && !in_string {
        return None;
    }

    let mut fixed = trimmed.to_owned();
    if in_string {
        if escaped {
            fixed.pop();
        }
        fixed.push('"');
    }
    while fixed.ends_with([',', ' ', '\t']) {
        fixed.pop();
    }
    while let Some(closer) = stack.pop() {
        fixed.push(char::from(closer));
    }

    serde_json::from_str(&fixed).ok()
}

fn bounded_detail(parse_err: &serde_json::Error, text: &str) -> String {
    const SNIPPET_LEN: usize = 120;
    let snippet: String = text.chars().take(SNIPPET_LEN).collect();
    if text.chars().count() > SNIPPET_LEN {
        format!("{parse_err} (text: {snippet}…)")
    } else {
        format!("{parse_err} (text: {snippet})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_shape() {
        let msg = classify(r#"{"device_name":"ESP32-Attendance","classes_count":2}"#);
        let LogicalMessage::Status(status) = msg else {
            panic!("expected status, got {msg:?}");
        };
        assert_eq!(status.classes_count, 2);
        assert!(!status.repaired);
    }

    #[test]
    fn test_bundle_shape() {
        let msg = classify(
            r#"{"c1":{"records":[{"roll":1,"name":"Ada","present":true}],"total_students":1,"present_count":1,"absent_count":0}}"#,
        );
        let LogicalMessage::Attendance(bundle) = msg else {
            panic!("expected bundle, got {msg:?}");
        };
        assert_eq!(bundle.classes["c1"].records.len(), 1);
    }

    #[test]
    fn test_empty_object_is_empty_bundle() {
        let msg = classify("{}");
        let LogicalMessage::Attendance(bundle) = msg else {
            panic!("expected bundle, got {msg:?}");
        };
        assert!(bundle.is_empty());
    }

    #[test]
    fn test_status_checked_before_bundle() {
        // An object carrying device_name is a status response even if its
        // remaining values happen to look bundle-ish.
        let msg = classify(r#"{"device_name":"ESP32-Attendance"}"#);
        assert!(matches!(msg, LogicalMessage::Status(_)));
    }

    #[test]
    fn test_ack_shape() {
        let msg = classify(r#"{"status":"success","message":"Data synced successfully"}"#);
        let LogicalMessage::Ack(ack) = msg else {
            panic!("expected ack, got {msg:?}");
        };
        assert!(ack.is_success());
    }

    #[test]
    fn test_array_is_generic_payload() {
        let msg = classify("[1,2,3]");
        assert!(matches!(msg, LogicalMessage::Payload { repaired: false, .. }));
    }

    #[test]
    fn test_truncated_status_is_repaired_and_tagged() {
        // Cut mid-object, as a dropped link would leave it.
        let msg = classify(r#"{"device_name":"ESP32-Attendance","classes_count":2"#);
        assert!(msg.was_repaired());
        let LogicalMessage::Status(status) = msg else {
            panic!("expected repaired status, got {msg:?}");
        };
        assert_eq!(status.classes_count, 2);
    }

    #[test]
    fn test_truncated_mid_string_is_repaired() {
        let msg = classify(r#"{"device_name":"ESP32-Atte"#);
        let LogicalMessage::Status(status) = msg else {
            panic!("expected repaired status, got {msg:?}");
        };
        assert!(status.repaired);
        assert_eq!(status.device_name, "ESP32-Atte");
    }

    #[test]
    fn test_truncated_bundle_keeps_complete_entries() {
        let msg = classify(r#"{"c1":{"records":[],"total_students":0,"present_count":0,"absent_count":0},"c2":{"records":["#);
        let LogicalMessage::Attendance(bundle) = msg else {
            panic!("expected repaired bundle, got {msg:?}");
        };
        assert!(bundle.repaired);
        assert!(bundle.classes.contains_key("c1"));
    }

    #[test]
    fn test_unrepairable_text_is_malformed_with_bounded_detail() {
        let garbage = format!("not json at all {}", "x".repeat(5000));
        let msg = classify(&garbage);
        let LogicalMessage::Malformed { detail } = msg else {
            panic!("expected malformed, got {msg:?}");
        };
        assert!(detail.len() < 400);
    }

    #[test]
    fn test_mismatched_brackets_are_not_repaired() {
        let msg = classify(r#"{"a":[1}"#);
        assert!(matches!(msg, LogicalMessage::Malformed { .. }));
    }
}
