//! Correlation of outgoing commands with their asynchronous responses.
//!
//! The peer does not reliably echo the originating command name, so a
//! response is attributed by explicit echo when present and by structural
//! signature otherwise (a status-shaped reply belongs to `get_status`, a
//! bundle-shaped reply to `get_attendance`). Only one response-awaited
//! command per name may be in flight; a second registration fails fast
//! instead of silently orphaning the first continuation.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::protocol::{Command, LogicalMessage};
use crate::transport::ChannelId;

struct Pending {
    reply_tx: oneshot::Sender<Result<LogicalMessage>>,
    issued_at: Instant,
}

/// Table of in-flight response-awaited commands.
#[derive(Default)]
pub struct PendingCommands {
    inner: Mutex<HashMap<&'static str, Pending>>,
}

impl PendingCommands {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pending command, returning the receiver its response will
    /// be delivered on.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::CommandAlreadyPending`] if a command with the same
    /// name is already in flight.
    pub fn register(
        &self,
        command: &'static str,
    ) -> Result<oneshot::Receiver<Result<LogicalMessage>>> {
        let mut map = self.lock();
        if map.contains_key(command) {
            return Err(Error::CommandAlreadyPending { command });
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        map.insert(
            command,
            Pending {
                reply_tx,
                issued_at: Instant::now(),
            },
        );
        Ok(reply_rx)
    }

    /// Removes a pending command without resolving it (issuer-side timeout or
    /// failed write). Returns true if an entry was removed.
    pub fn remove(&self, command: &str) -> bool {
        self.lock().remove(command).is_some()
    }

    /// Number of commands currently in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Offers a classified message to the table.
    ///
    /// Returns `None` when a pending command consumed it, or gives the
    /// message back for general event dispatch when nothing matched.
    pub fn resolve(
        &self,
        channel: ChannelId,
        message: LogicalMessage,
    ) -> Option<LogicalMessage> {
        let Some(key) = self.match_key(channel, &message) else {
            return Some(message);
        };
        let pending = self.lock().remove(key);
        match pending {
            Some(pending) => {
                tracing::debug!(command = key, "resolved pending command");
                let _ = pending.reply_tx.send(Ok(message));
                None
            }
            None => Some(message),
        }
    }

    /// Picks the pending-table key a message should resolve, if any.
    fn match_key(&self, channel: ChannelId, message: &LogicalMessage) -> Option<&'static str> {
        match message {
            // An explicit command echo always wins.
            LogicalMessage::Ack(ack) => {
                if let Some(echo) = ack.command.as_deref() {
                    return self.key_matching(|key| key == echo);
                }
                // An un-echoed ack on the command channel is a direct reply
                // to whatever was asked first; acks on data channels are
                // unsolicited (roster-sync results) and stay events.
                if channel == ChannelId::Command {
                    return self.oldest_key();
                }
                None
            }
            // No echo: fall back to the structural signature. Bulk replies
            // may arrive on a data channel rather than the command channel,
            // so no channel restriction here.
            LogicalMessage::Status(_) => self.key_matching(|key| key == "get_status"),
            LogicalMessage::Attendance(_) => self.key_matching(|key| key == "get_attendance"),
            LogicalMessage::Payload { .. } | LogicalMessage::Malformed { .. } => None,
        }
    }

    fn key_matching(&self, predicate: impl Fn(&'static str) -> bool) -> Option<&'static str> {
        self.lock().keys().copied().find(|&key| predicate(key))
    }

    fn oldest_key(&self) -> Option<&'static str> {
        let map = self.lock();
        map.iter()
            .min_by_key(|(_, pending)| pending.issued_at)
            .map(|(key, _)| *key)
    }

    /// Rejects every pending command. Used on session teardown so no command
    /// is ever silently dropped.
    pub fn fail_all(&self, error: impl Fn() -> Error) {
        let drained: Vec<Pending> = {
            let mut map = self.lock();
            map.drain().map(|(_, pending)| pending).collect()
        };
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "rejecting pending commands");
        }
        for pending in drained {
            let _ = pending.reply_tx.send(Err(error()));
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<&'static str, Pending>> {
        self.inner.lock().expect("pending-command table poisoned")
    }
}

/// Convenience: registers using the command's wire name.
impl PendingCommands {
    /// Registers a pending entry for `command`.
    pub fn register_command(
        &self,
        command: &Command,
    ) -> Result<oneshot::Receiver<Result<LogicalMessage>>> {
        self.register(command.name())
    }
}
