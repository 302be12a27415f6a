//! In-memory transport for tests and examples.
//!
//! [`MockTransport`] stands in for the wireless link: it records every chunk
//! the session writes, reassembles them into the messages the peer would
//! see, and plays back scripted replies as notification chunks. The paired
//! [`MockHandle`] drives the peer side from a test.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::protocol::{ChunkAssembler, DEFAULT_CHUNK_SIZE, encode_chunks};
use crate::transport::{ChannelId, EndpointDescriptor, Transport, TransportEvent};

#[derive(Default)]
struct MockState {
    connected: bool,
    chunk_size: usize,
    channels: Vec<ChannelId>,
    subscribed: Vec<ChannelId>,
    event_tx: Option<mpsc::Sender<TransportEvent>>,

    written: HashMap<ChannelId, Vec<Bytes>>,
    received: HashMap<ChannelId, Vec<String>>,
    assemblers: HashMap<ChannelId, ChunkAssembler>,

    read_values: HashMap<ChannelId, VecDeque<Bytes>>,
    replies: HashMap<ChannelId, VecDeque<(ChannelId, String)>>,

    fail_connects: u32,
    stall_connect: bool,
    missing_channels: Vec<ChannelId>,
    fail_writes: u32,
    drop_after_chunks: Option<usize>,
    link_lost_sent: bool,
}

/// Scripted in-memory transport.
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

/// Test-side handle to a [`MockTransport`].
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Creates a transport and the handle that drives its peer side.
    #[must_use]
    pub fn new() -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(MockState {
            chunk_size: DEFAULT_CHUNK_SIZE,
            ..MockState::default()
        }));
        (
            Self {
                state: Arc::clone(&state),
            },
            MockHandle { state },
        )
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }
}

impl Transport for MockTransport {
    fn connect<'a>(
        &'a mut self,
        endpoint: &'a EndpointDescriptor,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let stall = {
                let mut state = self.lock();
                if state.fail_connects > 0 {
                    state.fail_connects -= 1;
                    return Err(Error::Transport {
                        message: "connect refused".into(),
                    });
                }
                state.stall_connect
            };
            if stall {
                futures::future::pending::<()>().await;
            }

            let mut state = self.lock();
            state.connected = true;
            state.link_lost_sent = false;
            let missing = state.missing_channels.clone();
            state.channels = endpoint
                .channels
                .iter()
                .map(|c| c.id)
                .filter(|id| !missing.contains(id))
                .collect();
            Ok(())
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.connected = false;
            state.subscribed.clear();
            state.channels.clear();
            Ok(())
        })
    }

    fn write_chunk(&mut self, channel: ChannelId, chunk: Bytes) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let (events, result) = {
                let mut state = self.lock();
                if !state.connected {
                    (Vec::new(), Err(Error::NotConnected))
                } else if state.fail_writes > 0 {
                    state.fail_writes -= 1;
                    (
                        Vec::new(),
                        Err(Error::Transport {
                            message: "write rejected".into(),
                        }),
                    )
                } else if state.drop_after_chunks == Some(0) {
                    state.connected = false;
                    let mut events = Vec::new();
                    if !state.link_lost_sent {
                        state.link_lost_sent = true;
                        if let Some(tx) = state.event_tx.clone() {
                            events.push((tx, TransportEvent::LinkLost));
                        }
                    }
                    (
                        events,
                        Err(Error::Transport {
                            message: "link dropped".into(),
                        }),
                    )
                } else {
                    if let Some(remaining) = state.drop_after_chunks {
                        state.drop_after_chunks = Some(remaining - 1);
                    }

                    state.written.entry(channel).or_default().push(chunk.clone());

                    // Reassemble what the peer would see and play back any
                    // scripted reaction to each complete message.
                    let fed = state
                        .assemblers
                        .entry(channel)
                        .or_default()
                        .feed(&chunk);
                    let mut events = Vec::new();
                    for message in fed.messages {
                        state.received.entry(channel).or_default().push(message);
                        let reply = state
                            .replies
                            .get_mut(&channel)
                            .and_then(VecDeque::pop_front);
                        if let Some((reply_channel, text)) = reply {
                            if let Some(tx) = state.event_tx.clone() {
                                let chunk_size = state.chunk_size;
                                for piece in encode_chunks(&text, chunk_size) {
                                    events.push((
                                        tx.clone(),
                                        TransportEvent::Chunk {
                                            channel: reply_channel,
                                            data: piece,
                                        },
                                    ));
                                }
                            }
                        }
                    }
                    (events, Ok(()))
                }
            };
            for (tx, event) in events {
                let _ = tx.send(event).await;
            }
            result
        })
    }

    fn read_channel(&mut self, channel: ChannelId) -> BoxFuture<'_, Result<Bytes>> {
        Box::pin(async move {
            let value = {
                let mut state = self.lock();
                if !state.connected {
                    return Err(Error::NotConnected);
                }
                state
                    .read_values
                    .get_mut(&channel)
                    .and_then(VecDeque::pop_front)
            };
            match value {
                Some(bytes) => Ok(bytes),
                // Nothing scripted: behave like a peer that never answers.
                None => Ok(futures::future::pending::<Bytes>().await),
            }
        })
    }

    fn subscribe(&mut self, channel: ChannelId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.lock();
            if !state.connected {
                return Err(Error::NotConnected);
            }
            if !state.channels.contains(&channel) {
                return Err(Error::ChannelUnavailable { channel });
            }
            state.subscribed.push(channel);
            Ok(())
        })
    }

    fn set_event_sender(&mut self, sender: mpsc::Sender<TransportEvent>) {
        self.lock().event_tx = Some(sender);
    }

    fn channels(&self) -> Vec<ChannelId> {
        self.lock().channels.clone()
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn chunk_size(&self) -> usize {
        self.lock().chunk_size
    }
}

impl MockHandle {
    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }

    /// Chunks written to a channel, in order.
    #[must_use]
    pub fn written_chunks(&self, channel: ChannelId) -> Vec<Bytes> {
        self.lock().written.get(&channel).cloned().unwrap_or_default()
    }

    /// Complete messages the peer side reassembled from writes to a channel.
    #[must_use]
    pub fn received_messages(&self, channel: ChannelId) -> Vec<String> {
        self.lock().received.get(&channel).cloned().unwrap_or_default()
    }

    /// Channels the session subscribed to.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<ChannelId> {
        self.lock().subscribed.clone()
    }

    /// Scripts the value returned by the next one-shot read of `channel`.
    pub fn push_read_value(&self, channel: ChannelId, text: &str) {
        self.lock()
            .read_values
            .entry(channel)
            .or_default()
            .push_back(Bytes::copy_from_slice(text.as_bytes()));
    }

    /// Scripts a reply: when the next complete message arrives on
    /// `trigger`, `text` is notified back on `reply_channel` in chunks.
    pub fn reply_on(&self, trigger: ChannelId, reply_channel: ChannelId, text: &str) {
        self.lock()
            .replies
            .entry(trigger)
            .or_default()
            .push_back((reply_channel, text.to_owned()));
    }

    /// Notifies `text` on `channel`, chunked at the transport chunk size.
    pub async fn notify(&self, channel: ChannelId, text: &str) {
        let (tx, chunks) = {
            let state = self.lock();
            let chunk_size = state.chunk_size;
            (state.event_tx.clone(), encode_chunks(text, chunk_size))
        };
        if let Some(tx) = tx {
            for chunk in chunks {
                let _ = tx
                    .send(TransportEvent::Chunk {
                        channel,
                        data: chunk,
                    })
                    .await;
            }
        }
    }

    /// Notifies one raw chunk without framing.
    pub async fn notify_raw(&self, channel: ChannelId, data: &[u8]) {
        let tx = self.lock().event_tx.clone();
        if let Some(tx) = tx {
            let _ = tx
                .send(TransportEvent::Chunk {
                    channel,
                    data: Bytes::copy_from_slice(data),
                })
                .await;
        }
    }

    /// Drops the link out from under the session.
    pub async fn link_lost(&self) {
        let tx = {
            let mut state = self.lock();
            state.connected = false;
            if state.link_lost_sent {
                None
            } else {
                state.link_lost_sent = true;
                state.event_tx.clone()
            }
        };
        if let Some(tx) = tx {
            let _ = tx.send(TransportEvent::LinkLost).await;
        }
    }

    /// Makes the next `count` connect attempts fail.
    pub fn fail_connects(&self, count: u32) {
        self.lock().fail_connects = count;
    }

    /// Makes connect attempts hang forever.
    pub fn stall_connect(&self, stall: bool) {
        self.lock().stall_connect = stall;
    }

    /// Hides channels from the resolved endpoint.
    pub fn remove_channels(&self, channels: &[ChannelId]) {
        self.lock().missing_channels = channels.to_vec();
    }

    /// Makes the next `count` chunk writes fail.
    pub fn fail_writes(&self, count: u32) {
        self.lock().fail_writes = count;
    }

    /// Drops the link after `count` more successful chunk writes; writes
    /// beyond that fail and a link-loss event fires.
    pub fn drop_link_after_chunks(&self, count: usize) {
        self.lock().drop_after_chunks = Some(count);
    }

    /// Overrides the negotiated chunk size.
    pub fn set_chunk_size(&self, size: usize) {
        self.lock().chunk_size = size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::EndpointDescriptor;

    #[tokio::test]
    async fn test_mock_reassembles_writes() {
        let (mut transport, handle) = MockTransport::new();
        transport
            .connect(&EndpointDescriptor::default())
            .await
            .unwrap();

        for chunk in encode_chunks("{\"command\":\"get_status\"}", 4) {
            transport
                .write_chunk(ChannelId::Command, chunk)
                .await
                .unwrap();
        }

        assert_eq!(
            handle.received_messages(ChannelId::Command),
            vec!["{\"command\":\"get_status\"}"]
        );
        assert!(handle.written_chunks(ChannelId::Command).len() > 1);
    }

    #[tokio::test]
    async fn test_mock_scripted_reply() {
        let (mut transport, handle) = MockTransport::new();
        let (tx, mut rx) = mpsc::channel(64);
        transport.set_event_sender(tx);
        transport
            .connect(&EndpointDescriptor::default())
            .await
            .unwrap();
        handle.reply_on(ChannelId::Command, ChannelId::Command, "{\"status\":\"success\"}");

        for chunk in encode_chunks("{\"command\":\"clear_all_attendance\"}", 20) {
            transport
                .write_chunk(ChannelId::Command, chunk)
                .await
                .unwrap();
        }

        let mut collected = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let TransportEvent::Chunk { data, .. } = event {
                collected.extend_from_slice(&data);
            }
        }
        assert_eq!(
            String::from_utf8_lossy(&collected).trim(),
            "{\"status\":\"success\"}"
        );
    }

    #[tokio::test]
    async fn test_mock_write_when_disconnected() {
        let (mut transport, _handle) = MockTransport::new();
        let err = transport
            .write_chunk(ChannelId::Command, Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }
}
