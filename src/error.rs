//! Error types for the rollsync library.

use thiserror::Error;

use crate::transport::ChannelId;

/// The main error type for rollsync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No usable transport on this host (e.g. no Bluetooth adapter).
    #[error("transport not supported on this host: {reason}")]
    NotSupported { reason: String },

    /// The host denied access to the transport.
    #[error("permission denied: {reason}")]
    PermissionDenied { reason: String },

    /// No matching device was found during discovery.
    #[error("device not found")]
    DeviceNotFound,

    /// Connection attempt exceeded the configured timeout.
    #[error("connect timed out after {timeout_ms}ms")]
    ConnectTimeout { timeout_ms: u64 },

    /// A connection attempt is already running.
    #[error("connect already in progress")]
    ConnectInProgress,

    /// Operation requires an active session.
    #[error("not connected")]
    NotConnected,

    /// The named channel does not exist on the connected endpoint.
    #[error("channel unavailable: {channel}")]
    ChannelUnavailable { channel: ChannelId },

    /// Write failed after exhausting retries.
    #[error("write to {channel} failed after {attempts} attempts")]
    WriteFailed { channel: ChannelId, attempts: u32 },

    /// One-shot read exceeded the configured wait.
    #[error("read from {channel} timed out after {timeout_ms}ms")]
    ReadTimeout { channel: ChannelId, timeout_ms: u64 },

    /// Command response did not arrive in time.
    #[error("command '{command}' timed out after {timeout_ms}ms")]
    CommandTimeout {
        command: &'static str,
        timeout_ms: u64,
    },

    /// A response-awaited command with the same name is already in flight.
    #[error("command '{command}' is already pending")]
    CommandAlreadyPending { command: &'static str },

    /// The session was torn down while the operation was in flight.
    #[error("session lost")]
    SessionLost,

    /// A message could not be parsed or failed structural validation.
    #[error("malformed message: {detail}")]
    Malformed { detail: String },

    /// The device reported a command failure.
    #[error("device error: {message}")]
    Device { message: String },

    /// Caller-supplied input failed validation before anything was sent.
    #[error("invalid input: {detail}")]
    InvalidInput { detail: String },

    /// Underlying transport error.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Builds a [`Error::Malformed`] carrying a bounded snippet of the
    /// offending text, so asynchronous parse failures never drag unbounded
    /// payloads into logs.
    #[must_use]
    pub fn malformed(detail: impl std::fmt::Display, offending: &str) -> Self {
        const SNIPPET_LEN: usize = 120;
        let snippet: String = offending.chars().take(SNIPPET_LEN).collect();
        let detail = if offending.chars().count() > SNIPPET_LEN {
            format!("{detail} (text: {snippet}…)")
        } else {
            format!("{detail} (text: {snippet})")
        };
        Self::Malformed { detail }
    }
}

/// Result type alias for rollsync operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_snippet_is_bounded() {
        let long = "x".repeat(10_000);
        let err = Error::malformed("unexpected end of input", &long);
        let rendered = err.to_string();
        assert!(rendered.len() < 300);
        assert!(rendered.contains("unexpected end of input"));
    }

    #[test]
    fn test_display_includes_command_name() {
        let err = Error::CommandTimeout {
            command: "get_status",
            timeout_ms: 10_000,
        };
        assert!(err.to_string().contains("get_status"));
    }
}
