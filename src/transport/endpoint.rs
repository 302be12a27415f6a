//! Endpoint identity: the device's advertised name, its GATT service and the
//! logical channels it exposes.
//!
//! The descriptor is static build-time data. Channel handles resolved from it
//! belong to one session and are invalidated on disconnect, but the
//! descriptor itself outlives every session.

use std::fmt;

use uuid::Uuid;

/// Advertised name prefix used to filter discovery.
pub const DEVICE_NAME_PREFIX: &str = "ESP32-Attendance";

/// Primary GATT service.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x1234_5678_1234_1234_1234_1234_5678_9abc);

const ROSTER_DATA_UUID: Uuid = Uuid::from_u128(0x1234_5678_1234_1234_1234_1234_5678_9abd);
const STORAGE_INFO_UUID: Uuid = Uuid::from_u128(0x1234_5678_1234_1234_1234_1234_5678_9abe);
const ATTENDANCE_DATA_UUID: Uuid = Uuid::from_u128(0x1234_5678_1234_1234_1234_1234_5678_9abf);
const COMMAND_UUID: Uuid = Uuid::from_u128(0x1234_5678_1234_1234_1234_1234_5678_9ac0);

/// A named logical data path exposed by the peer endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelId {
    /// Roster push channel (write, ack by notification).
    RosterData,
    /// Storage utilization (one-shot read).
    StorageInfo,
    /// Collected attendance (read / notify).
    AttendanceData,
    /// Control commands (write, correlated response by notification).
    Command,
}

impl ChannelId {
    /// Every channel, in declaration order.
    pub const ALL: [Self; 4] = [
        Self::RosterData,
        Self::StorageInfo,
        Self::AttendanceData,
        Self::Command,
    ];

    /// Channel name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RosterData => "roster-data",
            Self::StorageInfo => "storage-info",
            Self::AttendanceData => "attendance-data",
            Self::Command => "command",
        }
    }

    /// GATT characteristic backing this channel.
    #[must_use]
    pub const fn uuid(self) -> Uuid {
        match self {
            Self::RosterData => ROSTER_DATA_UUID,
            Self::StorageInfo => STORAGE_INFO_UUID,
            Self::AttendanceData => ATTENDANCE_DATA_UUID,
            Self::Command => COMMAND_UUID,
        }
    }

    /// Resolves a characteristic UUID back to its channel.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.uuid() == uuid)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data-transfer capabilities of one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelCapabilities {
    /// Accepts chunked writes.
    pub write: bool,
    /// Supports one-shot pull reads.
    pub read: bool,
    /// Emits notifications.
    pub notify: bool,
}

impl ChannelCapabilities {
    const fn new(write: bool, read: bool, notify: bool) -> Self {
        Self {
            write,
            read,
            notify,
        }
    }
}

/// One channel entry in the endpoint descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSpec {
    /// Channel identity.
    pub id: ChannelId,
    /// Capabilities the endpoint declares for it.
    pub capabilities: ChannelCapabilities,
    /// True if a session cannot operate without it.
    pub critical: bool,
}

/// Static identity of the device: discovery filters plus the channel table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// Advertised name prefix to match during discovery.
    pub name_prefix: String,
    /// Primary service to match during discovery.
    pub service: Uuid,
    /// Declared channels.
    pub channels: Vec<ChannelSpec>,
}

impl Default for EndpointDescriptor {
    fn default() -> Self {
        Self::attendance_device()
    }
}

impl EndpointDescriptor {
    /// The attendance-device endpoint as the firmware registers it.
    #[must_use]
    pub fn attendance_device() -> Self {
        Self {
            name_prefix: DEVICE_NAME_PREFIX.to_owned(),
            service: SERVICE_UUID,
            channels: vec![
                ChannelSpec {
                    id: ChannelId::RosterData,
                    capabilities: ChannelCapabilities::new(true, true, true),
                    critical: false,
                },
                ChannelSpec {
                    id: ChannelId::StorageInfo,
                    capabilities: ChannelCapabilities::new(false, true, false),
                    critical: false,
                },
                ChannelSpec {
                    id: ChannelId::AttendanceData,
                    capabilities: ChannelCapabilities::new(false, true, true),
                    critical: false,
                },
                ChannelSpec {
                    id: ChannelId::Command,
                    capabilities: ChannelCapabilities::new(true, false, true),
                    critical: true,
                },
            ],
        }
    }

    /// Looks up the spec for a channel.
    #[must_use]
    pub fn channel(&self, id: ChannelId) -> Option<&ChannelSpec> {
        self.channels.iter().find(|c| c.id == id)
    }
}
