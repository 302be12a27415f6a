//! High-level [`RollSync`] client.
//!
//! This module combines session management, framing and command correlation
//! into the caller-facing sync surface: push a roster, pull attendance,
//! clear remote state, query status. Each operation is safe for the caller
//! to retry.

use crate::error::{Error, Result};
use crate::event::Subscription;
use crate::protocol::{Command, LogicalMessage, classify};
use crate::session::{Session, SessionConfig};
use crate::transport::{ChannelId, EndpointDescriptor, Transport};
use crate::types::{AttendanceBundle, ClassRoster, DeviceStatus, StorageInfo};

/// Client for synchronizing with an attendance device.
///
/// ```no_run
/// use rollsync::{MockTransport, RollSync};
///
/// #[tokio::main]
/// async fn main() -> Result<(), rollsync::Error> {
///     let (transport, _peer) = MockTransport::new();
///     let mut client = RollSync::new(transport);
///     client.connect().await?;
///
///     let status = client.get_status().await?;
///     println!("{} classes on {}", status.classes_count, status.device_name);
///
///     let attendance = client.pull_attendance().await?;
///     println!("{} classes recorded", attendance.len());
///
///     client.disconnect().await;
///     Ok(())
/// }
/// ```
pub struct RollSync<T> {
    session: Session<T>,
}

#[cfg(feature = "btle")]
impl RollSync<crate::transport::BleTransport> {
    /// Creates a client over the BLE transport with default settings.
    #[must_use]
    pub fn ble() -> Self {
        Self::new(crate::transport::BleTransport::new())
    }
}

impl<T: Transport + 'static> RollSync<T> {
    /// Creates a client over the given transport with the default endpoint
    /// and configuration.
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, SessionConfig::default())
    }

    /// Creates a client with a custom session configuration.
    #[must_use]
    pub fn with_config(transport: T, config: SessionConfig) -> Self {
        Self {
            session: Session::new(transport, EndpointDescriptor::default(), config),
        }
    }

    /// Connects to the device. A no-op when already connected.
    pub async fn connect(&mut self) -> Result<()> {
        self.session.connect().await
    }

    /// Disconnects. Idempotent and infallible; every in-flight operation is
    /// rejected with [`Error::SessionLost`].
    pub async fn disconnect(&mut self) {
        self.session.disconnect().await;
    }

    /// True while connected.
    pub async fn is_connected(&self) -> bool {
        self.session.is_connected().await
    }

    /// Subscribes to connection changes, unsolicited data and asynchronous
    /// errors.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.session.subscribe()
    }

    /// Pushes the class roster to the device, then refreshes status to
    /// confirm the acknowledged class count.
    ///
    /// The returned status is the device's own word on what it stored; a
    /// count that disagrees with the pushed roster is logged and left to the
    /// caller to judge.
    pub async fn push_roster(&self, roster: &[ClassRoster]) -> Result<DeviceStatus> {
        if roster.is_empty() {
            return Err(Error::InvalidInput {
                detail: "roster must not be empty".into(),
            });
        }
        let payload = serde_json::to_string(roster)?;
        self.session.write(ChannelId::RosterData, &payload).await?;
        tracing::info!(classes = roster.len(), "roster pushed");

        let status = self.get_status().await?;
        if status.classes_count as usize != roster.len() {
            tracing::warn!(
                pushed = roster.len(),
                acknowledged = status.classes_count,
                "device acknowledged a different class count"
            );
        }
        Ok(status)
    }

    /// Pulls everything the device has collected.
    ///
    /// A peer with no recorded attendance returns an empty bundle, not an
    /// error. Every class entry is validated to carry a `records` array; a
    /// payload that fails that check surfaces as [`Error::Malformed`].
    pub async fn pull_attendance(&self) -> Result<AttendanceBundle> {
        match self.session.issue(&Command::GetAttendance).await? {
            Some(LogicalMessage::Attendance(bundle)) => {
                if bundle.repaired {
                    tracing::warn!(
                        classes = bundle.len(),
                        "attendance bundle was repaired after truncation"
                    );
                }
                Ok(bundle)
            }
            Some(LogicalMessage::Ack(ack)) if !ack.is_success() => Err(Error::Device {
                message: ack.message.unwrap_or_else(|| "command failed".into()),
            }),
            Some(other) => Err(Error::Malformed {
                detail: format!("unexpected response to get_attendance: {}", describe(&other)),
            }),
            None => Err(Error::Malformed {
                detail: "get_attendance returned no response".into(),
            }),
        }
    }

    /// Clears attendance on the device: one class when `class_id` is given,
    /// everything otherwise.
    ///
    /// Fire-and-forget: the call returns once the command is written. Confirm
    /// the effect with a subsequent [`RollSync::get_status`].
    pub async fn clear_attendance(&self, class_id: Option<&str>) -> Result<()> {
        let command = match class_id {
            Some(id) => Command::ClearAttendance {
                class_id: id.to_owned(),
            },
            None => Command::ClearAllAttendance,
        };
        self.session.issue(&command).await?;
        Ok(())
    }

    /// Queries the device's current roster count, storage and memory
    /// figures.
    pub async fn get_status(&self) -> Result<DeviceStatus> {
        match self.session.issue(&Command::GetStatus).await? {
            Some(LogicalMessage::Status(status)) => Ok(status),
            Some(LogicalMessage::Ack(ack)) if !ack.is_success() => Err(Error::Device {
                message: ack.message.unwrap_or_else(|| "command failed".into()),
            }),
            Some(other) => Err(Error::Malformed {
                detail: format!("unexpected response to get_status: {}", describe(&other)),
            }),
            None => Err(Error::Malformed {
                detail: "get_status returned no response".into(),
            }),
        }
    }

    /// Reads the device's storage utilization directly from the storage
    /// channel.
    pub async fn read_storage_info(&self) -> Result<StorageInfo> {
        let text = self.session.read(ChannelId::StorageInfo).await?;
        serde_json::from_str(&text).map_err(|err| Error::malformed(err, &text))
    }

    /// Pulls attendance through a one-shot read of the attendance channel
    /// instead of the command path. Useful against firmware revisions that
    /// prepare the payload on read requests.
    pub async fn read_attendance(&self) -> Result<AttendanceBundle> {
        let text = self.session.read(ChannelId::AttendanceData).await?;
        match classify(&text) {
            LogicalMessage::Attendance(bundle) => Ok(bundle),
            LogicalMessage::Malformed { detail } => Err(Error::Malformed { detail }),
            other => Err(Error::Malformed {
                detail: format!("unexpected attendance payload: {}", describe(&other)),
            }),
        }
    }
}

fn describe(message: &LogicalMessage) -> &'static str {
    match message {
        LogicalMessage::Status(_) => "status",
        LogicalMessage::Attendance(_) => "attendance bundle",
        LogicalMessage::Ack(_) => "acknowledgement",
        LogicalMessage::Payload { .. } => "generic payload",
        LogicalMessage::Malformed { .. } => "malformed text",
    }
}
