//! Device status, storage figures and command acknowledgements.

use serde::{Deserialize, Serialize};

/// Storage utilization reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StorageInfo {
    /// Total filesystem bytes.
    pub total: u64,
    /// Bytes in use.
    pub used: u64,
    /// Bytes free.
    pub free: u64,
    /// Used fraction as a percentage.
    #[serde(default)]
    pub percent_used: f64,
}

/// Heap figures reported by the device after a collection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryInfo {
    /// Free heap bytes.
    pub free: u64,
    /// Allocated heap bytes.
    #[serde(default)]
    pub allocated: u64,
}

/// Response to a `get_status` command.
///
/// This is the canonical way to learn the peer's roster count and free-memory
/// figures; `push_roster` re-reads it to confirm the acknowledged class count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Advertised device name.
    pub device_name: String,
    /// Number of classes currently stored on the device.
    #[serde(default)]
    pub classes_count: u32,
    /// Storage utilization, if the firmware reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageInfo>,
    /// Heap figures, if the firmware reports them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_free: Option<MemoryInfo>,
    /// True if the payload only parsed after truncation repair.
    #[serde(skip)]
    pub repaired: bool,
}

/// Acknowledgement sent by the device after a roster sync or a control
/// command: `{"status": "success"|"error", ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandAck {
    /// `"success"` or `"error"`.
    pub status: String,
    /// Echo of the originating command, when the firmware restates it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Class id the command applied to, for scoped clears.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_id: Option<String>,
    /// Human-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommandAck {
    /// True if the device reported success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}
