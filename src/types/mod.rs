//! Data types for attendance-device entities.
//!
//! This module contains the core data structures exchanged with the device:
//! - Class rosters and students
//! - Attendance bundles and records
//! - Device status and storage figures

pub mod attendance;
pub mod roster;
pub mod status;

pub use attendance::{AttendanceBundle, AttendanceRecord, ClassAttendance};
pub use roster::{ClassRoster, Student};
pub use status::{CommandAck, DeviceStatus, MemoryInfo, StorageInfo};
