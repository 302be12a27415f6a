//! Session lifecycle and dispatch.
//!
//! A [`Session`] owns one connect-to-disconnect lifetime of the link:
//! discovery and connect with bounded retries, per-channel reassembly,
//! routing of classified messages to pending commands or the event stream,
//! and teardown that fails every outstanding operation instead of leaving it
//! to time out. Exactly one session is live at a time; channel handles and
//! reassembly buffers never survive a disconnect.

pub mod correlator;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher, Subscription};
use crate::protocol::{
    ChunkAssembler, Command, DEFAULT_BUFFER_CAP, LogicalMessage, classify, encode_chunks,
};
use crate::session::correlator::PendingCommands;
use crate::transport::{ChannelId, EndpointDescriptor, Transport, TransportEvent};

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No link.
    Disconnected,
    /// Link negotiation in progress.
    Connecting,
    /// Link up, channels resolved.
    Connected,
}

/// Tunable timeouts and retry policy for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Overall budget for one connect attempt.
    pub connect_timeout: Duration,
    /// Connect attempts before the error surfaces.
    pub connect_attempts: u32,
    /// Delay between connect attempts.
    pub connect_retry_delay: Duration,
    /// Whole-write attempts before `WriteFailed`.
    pub write_attempts: u32,
    /// Delay between write attempts.
    pub write_retry_delay: Duration,
    /// Delay between chunks of a multi-chunk write, so the peer's receive
    /// buffer is not overrun.
    pub inter_chunk_delay: Duration,
    /// Wait for a one-shot read; constrained peers take time to prepare
    /// large payloads.
    pub read_timeout: Duration,
    /// Wait for a correlated command response.
    pub command_timeout: Duration,
    /// Reassembly buffer cap per channel.
    pub buffer_cap: usize,
    /// Depth of the transport event queue.
    pub event_queue_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            connect_attempts: 3,
            connect_retry_delay: Duration::from_secs(2),
            write_attempts: 3,
            write_retry_delay: Duration::from_millis(500),
            inter_chunk_delay: Duration::from_millis(100),
            read_timeout: Duration::from_secs(15),
            command_timeout: Duration::from_secs(10),
            buffer_cap: DEFAULT_BUFFER_CAP,
            event_queue_depth: 256,
        }
    }
}

impl SessionConfig {
    /// Sets the connect timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, value: Duration) -> Self {
        self.connect_timeout = value;
        self
    }

    /// Sets the number of connect attempts.
    #[must_use]
    pub const fn connect_attempts(mut self, value: u32) -> Self {
        self.connect_attempts = value;
        self
    }

    /// Sets the wait for a correlated command response.
    #[must_use]
    pub const fn command_timeout(mut self, value: Duration) -> Self {
        self.command_timeout = value;
        self
    }

    /// Sets the wait for a one-shot read.
    #[must_use]
    pub const fn read_timeout(mut self, value: Duration) -> Self {
        self.read_timeout = value;
        self
    }

    /// Sets the reassembly buffer cap.
    #[must_use]
    pub const fn buffer_cap(mut self, value: usize) -> Self {
        self.buffer_cap = value;
        self
    }
}

/// One connect-to-disconnect lifetime of the logical link.
pub struct Session<T> {
    transport: Arc<Mutex<T>>,
    endpoint: EndpointDescriptor,
    config: SessionConfig,
    state: Arc<Mutex<ConnectionState>>,
    assemblers: Arc<Mutex<HashMap<ChannelId, ChunkAssembler>>>,
    pending: Arc<PendingCommands>,
    dispatcher: EventDispatcher,
    dispatch_task: Option<JoinHandle<()>>,
}

impl<T: Transport + 'static> Session<T> {
    /// Creates a session over the given transport. Nothing connects until
    /// [`Session::connect`] is called.
    #[must_use]
    pub fn new(transport: T, endpoint: EndpointDescriptor, config: SessionConfig) -> Self {
        let dispatcher = EventDispatcher::new(config.event_queue_depth);
        Self {
            transport: Arc::new(Mutex::new(transport)),
            endpoint,
            config,
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            assemblers: Arc::new(Mutex::new(HashMap::new())),
            pending: Arc::new(PendingCommands::new()),
            dispatcher,
            dispatch_task: None,
        }
    }

    /// Current connection state.
    pub async fn state(&self) -> ConnectionState {
        *self.state.lock().await
    }

    /// True while the session is connected.
    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    /// Subscribes to session events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.dispatcher.subscribe()
    }

    /// Connects to the endpoint.
    ///
    /// A no-op when already connected. Fails with
    /// [`Error::ConnectInProgress`] while another attempt is running (a
    /// cancelled attempt leaves that state behind; [`Session::disconnect`]
    /// resets it). Connection failures are retried a bounded number of times
    /// before the last error surfaces; a timeout tears down and surfaces
    /// immediately.
    pub async fn connect(&mut self) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            match *state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => return Err(Error::ConnectInProgress),
                ConnectionState::Disconnected => *state = ConnectionState::Connecting,
            }
        }

        match self.connect_inner().await {
            Ok(()) => {
                *self.state.lock().await = ConnectionState::Connected;
                tracing::info!("session connected");
                self.dispatcher.dispatch(Event::Connected);
                Ok(())
            }
            Err(err) => {
                let teardown = {
                    let mut transport = self.transport.lock().await;
                    transport.disconnect().await
                };
                if let Err(teardown_err) = teardown {
                    tracing::debug!(error = %teardown_err, "teardown after failed connect");
                }
                *self.state.lock().await = ConnectionState::Disconnected;
                Err(err)
            }
        }
    }

    async fn connect_inner(&mut self) -> Result<()> {
        // Fresh event path per connect; the previous channel dies with the
        // old dispatch task, so stale notifications cannot cross sessions.
        let (event_tx, event_rx) = mpsc::channel(self.config.event_queue_depth);
        {
            let mut transport = self.transport.lock().await;
            transport.set_event_sender(event_tx);
        }

        let attempts = self.config.connect_attempts.max(1);
        let mut last_err = Error::DeviceNotFound;
        let mut linked = false;
        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(self.config.connect_retry_delay).await;
            }
            let result = timeout(self.config.connect_timeout, async {
                let mut transport = self.transport.lock().await;
                transport.connect(&self.endpoint).await
            })
            .await;
            match result {
                Err(_) => {
                    return Err(Error::ConnectTimeout {
                        timeout_ms: millis(self.config.connect_timeout),
                    });
                }
                Ok(Ok(())) => {
                    linked = true;
                    break;
                }
                Ok(Err(err)) => {
                    tracing::warn!(attempt, error = %err, "connect attempt failed");
                    last_err = err;
                }
            }
        }
        if !linked {
            return Err(last_err);
        }

        // Resolve declared channels and enable notifications. Missing or
        // unsubscribable non-critical channels are logged, not fatal.
        {
            let mut transport = self.transport.lock().await;
            let resolved = transport.channels();
            for spec in &self.endpoint.channels {
                if !resolved.contains(&spec.id) {
                    if spec.critical {
                        return Err(Error::ChannelUnavailable { channel: spec.id });
                    }
                    tracing::warn!(channel = %spec.id, "endpoint is missing an optional channel");
                    continue;
                }
                if spec.capabilities.notify {
                    if let Err(err) = transport.subscribe(spec.id).await {
                        if spec.critical {
                            return Err(err);
                        }
                        tracing::warn!(channel = %spec.id, error = %err, "subscribe failed on optional channel");
                    }
                }
            }
        }

        self.assemblers.lock().await.clear();

        if let Some(task) = self.dispatch_task.take() {
            task.abort();
        }
        self.dispatch_task = Some(tokio::spawn(run_dispatch(
            event_rx,
            Arc::clone(&self.state),
            Arc::clone(&self.assemblers),
            Arc::clone(&self.pending),
            self.dispatcher.clone(),
            self.config.buffer_cap,
        )));
        Ok(())
    }

    /// Disconnects. Idempotent: always ends in `Disconnected` regardless of
    /// prior state, and never errors. Every pending command is rejected with
    /// [`Error::SessionLost`].
    pub async fn disconnect(&mut self) {
        let previous = {
            let mut state = self.state.lock().await;
            std::mem::replace(&mut *state, ConnectionState::Disconnected)
        };
        if let Some(task) = self.dispatch_task.take() {
            task.abort();
        }
        self.pending.fail_all(|| Error::SessionLost);
        self.assemblers.lock().await.clear();
        let result = {
            let mut transport = self.transport.lock().await;
            transport.disconnect().await
        };
        if let Err(err) = result {
            tracing::debug!(error = %err, "transport disconnect reported an error");
        }
        if previous != ConnectionState::Disconnected {
            tracing::info!("session disconnected");
            self.dispatcher.dispatch(Event::Disconnected);
        }
    }

    /// Writes a payload to a channel, chunked at the transport's packet
    /// size.
    ///
    /// Chunks go out strictly in order, each awaiting the transport ack, with
    /// a small delay between chunks of a multi-chunk payload. On failure the
    /// entire write is retried, not individual chunks; the error surfaces as
    /// [`Error::WriteFailed`] once retries are exhausted, or as
    /// [`Error::SessionLost`] when the link dropped underneath the write.
    pub async fn write(&self, channel: ChannelId, payload: &str) -> Result<()> {
        self.ensure_connected().await?;
        let spec = self
            .endpoint
            .channel(channel)
            .ok_or(Error::ChannelUnavailable { channel })?;
        if !spec.capabilities.write {
            return Err(Error::ChannelUnavailable { channel });
        }

        let chunk_size = { self.transport.lock().await.chunk_size() };
        let chunks = encode_chunks(payload, chunk_size.max(1));

        let attempts = self.config.write_attempts.max(1);
        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(self.config.write_retry_delay).await;
                if !self.is_connected().await {
                    return Err(Error::SessionLost);
                }
            }
            match self.write_once(channel, &chunks).await {
                Ok(()) => {
                    tracing::debug!(
                        channel = %channel,
                        bytes = payload.len(),
                        chunks = chunks.len(),
                        "write complete"
                    );
                    return Ok(());
                }
                Err(err) => {
                    if !self.is_connected().await {
                        tracing::warn!(channel = %channel, error = %err, "write aborted by link loss");
                        return Err(Error::SessionLost);
                    }
                    tracing::warn!(channel = %channel, attempt, error = %err, "write attempt failed");
                }
            }
        }
        Err(Error::WriteFailed { channel, attempts })
    }

    async fn write_once(&self, channel: ChannelId, chunks: &[Bytes]) -> Result<()> {
        for (index, chunk) in chunks.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.inter_chunk_delay).await;
            }
            let mut transport = self.transport.lock().await;
            transport.write_chunk(channel, chunk.clone()).await?;
        }
        Ok(())
    }

    /// One-shot pull read of a channel, as text.
    pub async fn read(&self, channel: ChannelId) -> Result<String> {
        self.ensure_connected().await?;
        let spec = self
            .endpoint
            .channel(channel)
            .ok_or(Error::ChannelUnavailable { channel })?;
        if !spec.capabilities.read {
            return Err(Error::ChannelUnavailable { channel });
        }

        // A new logical read starts clean.
        self.clear_assembler(channel).await;

        let wait = self.config.read_timeout;
        let result = timeout(wait, async {
            let mut transport = self.transport.lock().await;
            transport.read_channel(channel).await
        })
        .await;
        match result {
            Err(_) => Err(Error::ReadTimeout {
                channel,
                timeout_ms: millis(wait),
            }),
            Ok(Ok(bytes)) => Ok(String::from_utf8_lossy(&bytes).trim().to_owned()),
            Ok(Err(err)) => Err(err),
        }
    }

    /// Issues a control command.
    ///
    /// Response-awaited commands register their pending entry before the
    /// request is written, so a fast reply cannot slip past, and resolve to
    /// `Some(message)`; they fail with [`Error::CommandTimeout`] when the
    /// reply never arrives and [`Error::SessionLost`] on teardown.
    /// Fire-and-forget commands resolve to `None` right after the write.
    pub async fn issue(&self, command: &Command) -> Result<Option<LogicalMessage>> {
        self.ensure_connected().await?;
        let body = command.request_body();

        if !command.awaits_response() {
            self.write(ChannelId::Command, &body).await?;
            tracing::debug!(command = command.name(), "fire-and-forget command written");
            return Ok(None);
        }

        // Stale fragments of an earlier exchange must not be glued onto the
        // response of this one.
        self.clear_all_assemblers().await;

        let reply_rx = self.pending.register_command(command)?;
        if let Err(err) = self.write(ChannelId::Command, &body).await {
            self.pending.remove(command.name());
            return Err(err);
        }

        let wait = self.config.command_timeout;
        match timeout(wait, reply_rx).await {
            Err(_) => {
                self.pending.remove(command.name());
                Err(Error::CommandTimeout {
                    command: command.name(),
                    timeout_ms: millis(wait),
                })
            }
            Ok(Ok(reply)) => reply.map(Some),
            // The sender side was dropped without a reply: teardown raced us.
            Ok(Err(_)) => Err(Error::SessionLost),
        }
    }

    async fn ensure_connected(&self) -> Result<()> {
        if self.is_connected().await {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    async fn clear_assembler(&self, channel: ChannelId) {
        if let Some(assembler) = self.assemblers.lock().await.get_mut(&channel) {
            assembler.clear();
        }
    }

    async fn clear_all_assemblers(&self) {
        for assembler in self.assemblers.lock().await.values_mut() {
            assembler.clear();
        }
    }
}

impl<T> Drop for Session<T> {
    fn drop(&mut self) {
        if let Some(task) = self.dispatch_task.take() {
            task.abort();
        }
    }
}

/// Routes transport events: reassembly, classification, correlation, and
/// link-loss teardown.
async fn run_dispatch(
    mut events: mpsc::Receiver<TransportEvent>,
    state: Arc<Mutex<ConnectionState>>,
    assemblers: Arc<Mutex<HashMap<ChannelId, ChunkAssembler>>>,
    pending: Arc<PendingCommands>,
    dispatcher: EventDispatcher,
    buffer_cap: usize,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Chunk { channel, data } => {
                tracing::trace!(channel = %channel, bytes = data.len(), "chunk received");
                let fed = {
                    let mut map = assemblers.lock().await;
                    map.entry(channel)
                        .or_insert_with(|| ChunkAssembler::with_cap(buffer_cap))
                        .feed(&data)
                };
                if fed.truncated {
                    dispatcher.dispatch(Event::Error {
                        message: format!(
                            "reassembly buffer on {channel} exceeded {buffer_cap} bytes and was flushed"
                        ),
                    });
                }
                for text in fed.messages {
                    match classify(&text) {
                        LogicalMessage::Malformed { detail } => {
                            tracing::warn!(channel = %channel, detail = %detail, "malformed message");
                            dispatcher.dispatch(Event::Error { message: detail });
                        }
                        message => {
                            if let Some(unclaimed) = pending.resolve(channel, message) {
                                dispatcher.dispatch(Event::DataReceived {
                                    channel,
                                    message: unclaimed,
                                });
                            }
                        }
                    }
                }
            }
            TransportEvent::LinkLost => {
                tracing::info!("link lost");
                *state.lock().await = ConnectionState::Disconnected;
                assemblers.lock().await.clear();
                pending.fail_all(|| Error::SessionLost);
                dispatcher.dispatch(Event::Disconnected);
                break;
            }
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockHandle, MockTransport};

    fn session_pair() -> (Session<MockTransport>, MockHandle) {
        let (transport, handle) = MockTransport::new();
        let session = Session::new(
            transport,
            EndpointDescriptor::default(),
            SessionConfig::default(),
        );
        (session, handle)
    }

    async fn connected_pair() -> (Session<MockTransport>, MockHandle) {
        let (mut session, handle) = session_pair();
        session.connect().await.unwrap();
        (session, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_subscribes_notify_channels() {
        let (session, handle) = connected_pair().await;
        assert!(session.is_connected().await);

        let subs = handle.subscriptions();
        assert!(subs.contains(&ChannelId::Command));
        assert!(subs.contains(&ChannelId::RosterData));
        assert!(subs.contains(&ChannelId::AttendanceData));
        assert!(!subs.contains(&ChannelId::StorageInfo));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_noop_when_connected() {
        let (mut session, _handle) = connected_pair().await;
        session.connect().await.unwrap();
        assert!(session.is_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_then_succeeds() {
        let (mut session, handle) = session_pair();
        handle.fail_connects(2);
        session.connect().await.unwrap();
        assert!(session.is_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_surfaces_error_after_retries() {
        let (mut session, handle) = session_pair();
        handle.fail_connects(3);
        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
        assert_eq!(session.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_tears_down() {
        let (mut session, handle) = session_pair();
        handle.stall_connect(true);
        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, Error::ConnectTimeout { .. }));
        assert_eq!(session.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_critical_channel_is_fatal() {
        let (mut session, handle) = session_pair();
        handle.remove_channels(&[ChannelId::Command]);
        let err = session.connect().await.unwrap_err();
        assert!(matches!(
            err,
            Error::ChannelUnavailable {
                channel: ChannelId::Command
            }
        ));
        assert_eq!(session.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_optional_channel_is_tolerated() {
        let (mut session, handle) = session_pair();
        handle.remove_channels(&[ChannelId::StorageInfo]);
        session.connect().await.unwrap();
        assert!(session.is_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_connect_leaves_connect_in_progress() {
        let (mut session, handle) = session_pair();
        handle.stall_connect(true);
        {
            let fut = session.connect();
            tokio::pin!(fut);
            // One poll flips the state machine to Connecting, then the
            // future is dropped mid-attempt.
            let _ = futures::poll!(fut.as_mut());
        }
        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, Error::ConnectInProgress));

        // disconnect() recovers the state machine.
        session.disconnect().await;
        handle.stall_connect(false);
        session.connect().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent_from_any_state() {
        let (mut session, _handle) = session_pair();
        session.disconnect().await;
        session.disconnect().await;
        assert_eq!(session.state().await, ConnectionState::Disconnected);

        let (mut session, _handle) = connected_pair().await;
        session.disconnect().await;
        session.disconnect().await;
        session.disconnect().await;
        assert_eq!(session.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operations_require_connection() {
        let (session, _handle) = session_pair();
        let err = session.write(ChannelId::RosterData, "[]").await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        let err = session.read(ChannelId::StorageInfo).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        let err = session.issue(&Command::GetStatus).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_chunks_at_packet_size() {
        let (session, handle) = connected_pair().await;
        let payload = r#"[{"id":"c1","name":"Physics","students":[{"roll":1,"name":"Ada"}]}]"#;
        session.write(ChannelId::RosterData, payload).await.unwrap();

        let chunks = handle.written_chunks(ChannelId::RosterData);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.len() <= 20));
        assert_eq!(
            handle.received_messages(ChannelId::RosterData),
            vec![payload.to_owned()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_retries_whole_payload() {
        let (session, handle) = connected_pair().await;
        handle.fail_writes(1);
        session.write(ChannelId::RosterData, "[1,2,3]").await.unwrap();
        assert_eq!(
            handle.received_messages(ChannelId::RosterData),
            vec!["[1,2,3]".to_owned()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_fails_after_retries() {
        let (session, handle) = connected_pair().await;
        // Every attempt of every chunk fails.
        handle.fail_writes(u32::MAX);
        let err = session.write(ChannelId::RosterData, "[1]").await.unwrap_err();
        assert!(matches!(
            err,
            Error::WriteFailed {
                channel: ChannelId::RosterData,
                attempts: 3
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_to_read_only_channel_is_rejected() {
        let (session, _handle) = connected_pair().await;
        let err = session.write(ChannelId::StorageInfo, "{}").await.unwrap_err();
        assert!(matches!(err, Error::ChannelUnavailable { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_returns_scripted_value() {
        let (session, handle) = connected_pair().await;
        handle.push_read_value(ChannelId::StorageInfo, "{\"total\":100,\"used\":25,\"free\":75}");
        let text = session.read(ChannelId::StorageInfo).await.unwrap();
        assert_eq!(text, "{\"total\":100,\"used\":25,\"free\":75}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_times_out_without_response() {
        let (session, _handle) = connected_pair().await;
        let err = session.read(ChannelId::AttendanceData).await.unwrap_err();
        assert!(matches!(
            err,
            Error::ReadTimeout {
                channel: ChannelId::AttendanceData,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_issue_resolves_with_classified_response() {
        let (session, handle) = connected_pair().await;
        handle.reply_on(
            ChannelId::Command,
            ChannelId::Command,
            r#"{"device_name":"ESP32-Attendance","classes_count":2}"#,
        );

        let reply = session.issue(&Command::GetStatus).await.unwrap().unwrap();
        let LogicalMessage::Status(status) = reply else {
            panic!("expected status, got {reply:?}");
        };
        assert_eq!(status.classes_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_issue_accepts_response_on_data_channel() {
        let (session, handle) = connected_pair().await;
        handle.reply_on(
            ChannelId::Command,
            ChannelId::AttendanceData,
            r#"{"c1":{"records":[]}}"#,
        );

        let reply = session.issue(&Command::GetAttendance).await.unwrap().unwrap();
        assert!(matches!(reply, LogicalMessage::Attendance(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_issue_times_out_and_clears_pending() {
        let (session, _handle) = connected_pair().await;
        let err = session.issue(&Command::GetStatus).await.unwrap_err();
        assert!(matches!(
            err,
            Error::CommandTimeout {
                command: "get_status",
                ..
            }
        ));
        // The entry is gone, so the command can be reissued.
        let err = session.issue(&Command::GetStatus).await.unwrap_err();
        assert!(matches!(err, Error::CommandTimeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_and_forget_returns_after_write() {
        let (session, handle) = connected_pair().await;
        let reply = session.issue(&Command::ClearAllAttendance).await.unwrap();
        assert!(reply.is_none());
        assert_eq!(
            handle.received_messages(ChannelId::Command),
            vec![r#"{"command":"clear_all_attendance"}"#.to_owned()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_same_command_rejected() {
        let (session, handle) = connected_pair().await;
        let session = Arc::new(session);

        let first = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.issue(&Command::GetStatus).await }
        });
        // Wait until the first request is on the wire.
        for _ in 0..100 {
            if !handle.received_messages(ChannelId::Command).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let err = session.issue(&Command::GetStatus).await.unwrap_err();
        assert!(matches!(
            err,
            Error::CommandAlreadyPending {
                command: "get_status"
            }
        ));

        // The first command still ends deterministically (here: timeout).
        let first = first.await.unwrap().unwrap_err();
        assert!(matches!(first, Error::CommandTimeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_loss_mid_write_rejects_write_and_pending() {
        let (session, handle) = connected_pair().await;
        let session = Arc::new(session);

        let pending_status = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.issue(&Command::GetStatus).await }
        });
        for _ in 0..100 {
            if !handle.received_messages(ChannelId::Command).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // Drop the link after two more chunks; the 5-chunk write dies
        // mid-flight.
        handle.drop_link_after_chunks(2);
        let payload = "x".repeat(90);
        let err = session
            .write(ChannelId::RosterData, &payload)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::SessionLost | Error::WriteFailed { .. }
        ));

        let status = pending_status.await.unwrap().unwrap_err();
        assert!(matches!(status, Error::SessionLost));
        assert!(!session.is_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_loss_rejects_pending_and_emits_disconnect() {
        let (session, handle) = connected_pair().await;
        let session = Arc::new(session);
        let mut events = session.subscribe();

        let pending_status = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.issue(&Command::GetStatus).await }
        });
        for _ in 0..100 {
            if !handle.received_messages(ChannelId::Command).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        handle.link_lost().await;

        let err = pending_status.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::SessionLost));
        assert!(!session.is_connected().await);

        let mut saw_disconnect = false;
        while let Ok(Some(event)) =
            timeout(Duration::from_millis(100), events.recv()).await
        {
            if matches!(event, Event::Disconnected) {
                saw_disconnect = true;
                break;
            }
        }
        assert!(saw_disconnect);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unclaimed_messages_become_events() {
        let (session, handle) = connected_pair().await;
        let mut events = session.subscribe();

        handle
            .notify(
                ChannelId::RosterData,
                r#"{"status":"success","message":"Data synced successfully"}"#,
            )
            .await;

        let event = timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        let Event::DataReceived { channel, message } = event else {
            panic!("expected data event, got {event:?}");
        };
        assert_eq!(channel, ChannelId::RosterData);
        assert!(matches!(message, LogicalMessage::Ack(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_truncation_flush_is_reported() {
        let (transport, handle) = MockTransport::new();
        let mut session = Session::new(
            transport,
            EndpointDescriptor::default(),
            SessionConfig::default().buffer_cap(64),
        );
        session.connect().await.unwrap();
        let mut events = session.subscribe();

        // A stream that never completes a unit must flush at the cap.
        handle
            .notify_raw(ChannelId::AttendanceData, &[b'{'; 80])
            .await;

        let mut saw_truncation = false;
        while let Ok(Some(event)) = timeout(Duration::from_millis(200), events.recv()).await {
            if let Event::Error { message } = event {
                if message.contains("flushed") || message.contains("malformed") {
                    saw_truncation = true;
                    break;
                }
            }
        }
        assert!(saw_truncation);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_notification_is_reported_not_thrown() {
        let (session, handle) = connected_pair().await;
        let mut events = session.subscribe();

        handle.notify(ChannelId::Command, "not json at all").await;

        let event = timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, Event::Error { .. }));
    }
}
