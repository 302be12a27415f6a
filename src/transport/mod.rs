//! Transport layer for attendance-device communication.
//!
//! This module provides the abstraction over the physical link. The session
//! drives a [`Transport`] for connecting, chunk writes and one-shot reads;
//! incoming notification chunks and link loss are pushed back through an
//! event channel set with [`Transport::set_event_sender`].

#[cfg(feature = "btle")]
pub mod ble;
pub mod endpoint;
pub mod mock;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::Result;

pub use endpoint::{ChannelCapabilities, ChannelId, ChannelSpec, EndpointDescriptor};
pub use mock::{MockHandle, MockTransport};

#[cfg(feature = "btle")]
pub use ble::BleTransport;

/// Something the transport pushed up outside a request/response exchange.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// One raw notification chunk, in arrival order per channel. No
    /// cross-channel ordering is guaranteed.
    Chunk {
        /// Channel the chunk arrived on.
        channel: ChannelId,
        /// Raw chunk bytes.
        data: Bytes,
    },
    /// The link dropped without a local `disconnect` call.
    LinkLost,
}

/// Trait for transport implementations.
pub trait Transport: Send + Sync {
    /// Discovers and connects to the endpoint, resolving its channels.
    fn connect<'a>(
        &'a mut self,
        endpoint: &'a EndpointDescriptor,
    ) -> BoxFuture<'a, Result<()>>;

    /// Tears the link down. Must be safe to call in any state.
    fn disconnect(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Writes one chunk, completing when the transport acknowledges it.
    /// Constrained peers process one packet at a time, so the caller never
    /// pipelines chunk writes.
    fn write_chunk(&mut self, channel: ChannelId, chunk: Bytes) -> BoxFuture<'_, Result<()>>;

    /// One-shot pull read of a channel's current value.
    fn read_channel(&mut self, channel: ChannelId) -> BoxFuture<'_, Result<Bytes>>;

    /// Enables notifications on a channel; chunks then arrive through the
    /// event sender.
    fn subscribe(&mut self, channel: ChannelId) -> BoxFuture<'_, Result<()>>;

    /// Sets the sink for notification chunks and link-loss events. Called by
    /// the session before every connect.
    fn set_event_sender(&mut self, sender: mpsc::Sender<TransportEvent>);

    /// Channels resolved on the live connection.
    fn channels(&self) -> Vec<ChannelId>;

    /// True while the link is up.
    fn is_connected(&self) -> bool;

    /// Largest chunk the negotiated link packet carries.
    fn chunk_size(&self) -> usize {
        crate::protocol::DEFAULT_CHUNK_SIZE
    }
}
