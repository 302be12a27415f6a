//! # rollsync
//!
//! A Rust client library for BLE classroom attendance devices.
//!
//! This library provides async synchronization with a battery- and
//! memory-constrained attendance peripheral over a small-MTU wireless link:
//! rosters go out, collected attendance comes back, both as JSON text far
//! larger than a single link packet.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Structural reassembly of chunked, newline-delimited JSON messages
//! - Command correlation with per-command timeouts
//! - Event-driven delivery of unsolicited device notifications
//! - Comprehensive error handling
//!
//! ## Quick Start
//!
//! ```no_run
//! use rollsync::{ClassRoster, MockTransport, RollSync};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), rollsync::Error> {
//!     let (transport, _peer) = MockTransport::new();
//!     let mut client = RollSync::new(transport);
//!     client.connect().await?;
//!
//!     // Push this term's rosters
//!     let roster = vec![
//!         ClassRoster::new("c1", "Physics").student(1, "Ada").student(2, "Grace"),
//!     ];
//!     let status = client.push_roster(&roster).await?;
//!     println!("device stores {} classes", status.classes_count);
//!
//!     // Pull whatever attendance the device collected
//!     let attendance = client.pull_attendance().await?;
//!     for (class_id, sheet) in &attendance.classes {
//!         println!("{class_id}: {}/{} present", sheet.present_count, sheet.total_students);
//!     }
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`protocol`] - Chunk framing, message classification, command encoding
//! - [`types`] - Data structures (rosters, attendance, device status)
//! - [`transport`] - Transport implementations (BLE behind the `btle`
//!   feature, in-memory mock)
//! - [`session`] - Connection lifecycle and command correlation
//! - [`event`] - Async event system for handling notifications
//! - [`client`] - High-level [`RollSync`] client

pub mod client;
pub mod error;
pub mod event;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use client::RollSync;
pub use error::{Error, Result};
pub use event::{Event, EventDispatcher, Subscription};
pub use protocol::{ChunkAssembler, Command, LogicalMessage};
pub use session::{ConnectionState, Session, SessionConfig};
pub use transport::{ChannelId, EndpointDescriptor, MockHandle, MockTransport, Transport};
pub use types::{
    AttendanceBundle, AttendanceRecord, ClassAttendance, ClassRoster, CommandAck, DeviceStatus,
    MemoryInfo, StorageInfo, Student,
};

#[cfg(feature = "btle")]
pub use transport::BleTransport;
