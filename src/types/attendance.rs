//! Attendance data pulled from the device.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One student's mark within a class attendance sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    /// Roll number within the class.
    pub roll: u32,
    /// Student name as stored on the device.
    pub name: String,
    /// True if the student was marked present.
    pub present: bool,
}

/// Attendance collected for one class.
///
/// The device computes the summary counts when the sheet is saved; they are
/// carried as-is rather than recomputed, so disagreements with `records` are
/// visible to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassAttendance {
    /// Class identifier (echoed by newer firmware, absent on older).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_id: Option<String>,
    /// Per-student marks in roll order.
    pub records: Vec<AttendanceRecord>,
    /// Number of students on the sheet.
    #[serde(default)]
    pub total_students: u32,
    /// Students marked present.
    #[serde(default)]
    pub present_count: u32,
    /// Students marked absent.
    #[serde(default)]
    pub absent_count: u32,
    /// Device-local timestamp when the sheet was saved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Everything the device has collected, keyed by class id.
///
/// An empty bundle is a valid result: a peer with no recorded attendance
/// reports `{}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttendanceBundle {
    /// Per-class sheets, keyed by class id.
    pub classes: BTreeMap<String, ClassAttendance>,
    /// True if the payload only parsed after truncation repair. Repaired
    /// bundles may be missing trailing entries; callers decide whether to
    /// trust them.
    pub repaired: bool,
}

impl AttendanceBundle {
    /// Builds a bundle from its wire map form.
    #[must_use]
    pub fn from_classes(classes: BTreeMap<String, ClassAttendance>) -> Self {
        Self {
            classes,
            repaired: false,
        }
    }

    /// True if no class has recorded attendance.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Number of classes with recorded attendance.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }
}
