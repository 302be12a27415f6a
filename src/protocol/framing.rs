//! Chunk framing and reassembly for the attendance-device link.
//!
//! The wire format carries newline-terminated JSON text with no length
//! prefix. The link fragments every payload into packet-sized chunks
//! (~20 bytes at the default ATT MTU), so message boundaries must be
//! recovered structurally:
//!
//! ```text
//! {"command":"get_status"}\n
//! └──────┬─────┘└────┬────┘
//!   chunk 1..n   terminator
//! ```
//!
//! A unit is complete when either its braces/brackets balance (string and
//! escape state respected) or a newline delimiter arrives, whichever comes
//! first. Peers emit both conventions.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Default chunk size dictated by the ATT MTU (23 bytes minus 3 overhead).
pub const DEFAULT_CHUNK_SIZE: usize = 20;

/// Reassembly buffer hard cap. A buffer that exceeds this without yielding a
/// complete unit is force-flushed as a best-effort message.
pub const DEFAULT_BUFFER_CAP: usize = 2000;

/// Splits a payload into transmission chunks.
///
/// A single `\n` delimiter is appended first, so every transmitted message is
/// self-terminating. The split is byte-level on the UTF-8 form; payloads are
/// ASCII-safe JSON, and reassembly accumulates bytes before decoding, so a
/// multi-byte sequence split across chunks survives the round trip.
///
/// # Panics
///
/// Panics if `max_chunk_size` is zero.
#[must_use]
pub fn encode_chunks(payload: &str, max_chunk_size: usize) -> Vec<Bytes> {
    assert!(max_chunk_size > 0, "chunk size must be at least 1 byte");

    let mut framed = BytesMut::with_capacity(payload.len() + 1);
    framed.put_slice(payload.as_bytes());
    framed.put_u8(b'\n');
    let mut framed = framed.freeze();

    let mut chunks = Vec::with_capacity(framed.len().div_ceil(max_chunk_size));
    while !framed.is_empty() {
        let take = framed.len().min(max_chunk_size);
        chunks.push(framed.split_to(take));
    }
    chunks
}

/// Result of feeding one chunk into a [`ChunkAssembler`].
#[derive(Debug, Default)]
pub struct FeedResult {
    /// Complete units extracted by this feed, in order.
    pub messages: Vec<String>,
    /// True if the buffer exceeded its cap and was force-flushed; the last
    /// entry of `messages` is then a best-effort (possibly truncated) unit.
    pub truncated: bool,
}

/// Reassembles a stream of received chunks into complete logical messages.
///
/// One assembler exists per channel and is owned by the session. Feeding never
/// fails: what cannot be extracted yet stays buffered, and a buffer that grows
/// past the cap without completing is flushed rather than retained.
#[derive(Debug)]
pub struct ChunkAssembler {
    buffer: BytesMut,
    cap: usize,
}

impl Default for ChunkAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkAssembler {
    /// Creates an assembler with the default buffer cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_cap(DEFAULT_BUFFER_CAP)
    }

    /// Creates an assembler with a custom buffer cap.
    #[must_use]
    pub fn with_cap(cap: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            cap,
        }
    }

    /// Appends a chunk and extracts every complete unit now available.
    pub fn feed(&mut self, chunk: &[u8]) -> FeedResult {
        self.buffer.extend_from_slice(chunk);

        let mut result = FeedResult::default();
        loop {
            // Leading whitespace (trailing delimiters of the previous unit)
            // is dropped before scanning.
            let skip = self
                .buffer
                .iter()
                .take_while(|b| b.is_ascii_whitespace())
                .count();
            self.buffer.advance(skip);

            let Some(end) = scan_complete(&self.buffer) else {
                break;
            };
            let unit = self.buffer.split_to(end);
            push_unit(&mut result.messages, &unit);
        }

        if self.buffer.len() > self.cap {
            tracing::warn!(
                buffered = self.buffer.len(),
                cap = self.cap,
                "reassembly buffer exceeded cap, force-flushing"
            );
            let unit = self.buffer.split();
            push_unit(&mut result.messages, &unit);
            result.truncated = true;
        }

        result
    }

    /// Discards buffered fragments. Called when a new logical read or command
    /// is issued and on disconnect, so stale partial data from a previous
    /// exchange cannot bleed into the next one.
    pub fn clear(&mut self) {
        if !self.buffer.is_empty() {
            tracing::debug!(discarded = self.buffer.len(), "clearing stale fragments");
            self.buffer.clear();
        }
    }

    /// Number of bytes currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

fn push_unit(messages: &mut Vec<String>, unit: &[u8]) {
    let text = String::from_utf8_lossy(unit);
    let text = text.trim();
    if !text.is_empty() {
        messages.push(text.to_owned());
    }
}

/// Scans the buffer front for one complete unit, returning the index one past
/// its final byte.
///
/// A unit starting with `{` or `[` completes when its braces/brackets balance
/// or at a newline, whichever comes first. A newline inside an unbalanced
/// value means the peer gave up on it; flushing the prefix lets the
/// classifier's repair path have a go instead of wedging the buffer. Any
/// other unit completes at the first newline.
///
/// Structural characters inside quoted strings (including escaped quotes) are
/// not counted.
fn scan_complete(buffer: &[u8]) -> Option<usize> {
    let first = *buffer.first()?;

    if first != b'{' && first != b'[' {
        return buffer.iter().position(|&b| b == b'\n').map(|i| i + 1);
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in buffer.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            b'\n' => return Some(i + 1),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(assembler: &mut ChunkAssembler, chunks: &[Bytes]) -> (Vec<String>, bool) {
        let mut messages = Vec::new();
        let mut truncated = false;
        for chunk in chunks {
            let result = assembler.feed(chunk);
            messages.extend(result.messages);
            truncated |= result.truncated;
        }
        (messages, truncated)
    }

    #[test]
    fn test_encode_appends_delimiter() {
        let chunks = encode_chunks("{\"a\":1}", 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(&chunks[0][..], b"{\"a\":1}\n");
    }

    #[test]
    fn test_encode_respects_chunk_size() {
        let chunks = encode_chunks("abcdefghij", 4);
        // 11 bytes including the delimiter
        assert_eq!(chunks.len(), 3);
        assert_eq!(&chunks[0][..], b"abcd");
        assert_eq!(&chunks[2][..], b"ij\n");
        assert!(chunks.iter().all(|c| c.len() <= 4));
    }

    #[test]
    fn test_roundtrip_across_chunk_sizes() {
        let payloads = [
            "{\"command\":\"get_status\"}",
            "[{\"id\":\"c1\",\"students\":[{\"roll\":1}]}]",
            "{}",
            "plain text unit",
        ];
        for payload in payloads {
            for chunk_size in [1, 2, 3, 7, 20, 512] {
                let mut assembler = ChunkAssembler::new();
                let (messages, truncated) =
                    feed_all(&mut assembler, &encode_chunks(payload, chunk_size));
                assert!(!truncated);
                assert_eq!(messages, vec![payload.to_owned()], "chunk size {chunk_size}");
                assert_eq!(assembler.buffered(), 0);
            }
        }
    }

    #[test]
    fn test_braces_inside_strings_are_not_structural() {
        let payload = r#"{"name":"a}b"}"#;
        for chunk_size in [1, 5, 64] {
            let mut assembler = ChunkAssembler::new();
            let (messages, _) = feed_all(&mut assembler, &encode_chunks(payload, chunk_size));
            assert_eq!(messages, vec![payload.to_owned()]);
        }
    }

    #[test]
    fn test_escaped_quotes_inside_strings() {
        let payload = r#"{"name":"a\"}{\"b"}"#;
        let mut assembler = ChunkAssembler::new();
        let (messages, _) = feed_all(&mut assembler, &encode_chunks(payload, 3));
        assert_eq!(messages, vec![payload.to_owned()]);
    }

    #[test]
    fn test_two_messages_in_one_chunk() {
        let mut assembler = ChunkAssembler::new();
        let result = assembler.feed(b"{\"a\":1}\n{\"b\":2}\n");
        assert_eq!(result.messages, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[test]
    fn test_message_without_newline_completes_on_balance() {
        let mut assembler = ChunkAssembler::new();
        let result = assembler.feed(b"{\"a\":{\"b\":[1,2]}}");
        assert_eq!(result.messages, vec!["{\"a\":{\"b\":[1,2]}}"]);
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn test_partial_message_stays_buffered() {
        let mut assembler = ChunkAssembler::new();
        assert!(assembler.feed(b"{\"a\":").messages.is_empty());
        assert_eq!(assembler.buffered(), 5);
        let result = assembler.feed(b"1}");
        assert_eq!(result.messages, vec!["{\"a\":1}"]);
    }

    #[test]
    fn test_garbled_prefix_flushed_at_newline() {
        // An unbalanced value abandoned at a newline is flushed so the next
        // message is not wedged behind it.
        let mut assembler = ChunkAssembler::new();
        let result = assembler.feed(b"{\"a\":\n{\"b\":2}\n");
        assert_eq!(result.messages, vec!["{\"a\":", "{\"b\":2}"]);
    }

    #[test]
    fn test_buffer_cap_forces_flush() {
        let mut assembler = ChunkAssembler::with_cap(64);
        let mut flushed = None;
        let mut fed = 0usize;
        // A stream that never terminates must not grow the buffer unboundedly.
        for _ in 0..64 {
            let result = assembler.feed(b"{\"x\":\"yyyyyyyy");
            fed += 14;
            assert!(assembler.buffered() <= 64);
            if result.truncated {
                flushed = Some(result.messages);
                break;
            }
        }
        let flushed = flushed.expect("cap never triggered");
        assert_eq!(flushed.len(), 1);
        assert!(fed > 64);
        assert!(flushed[0].starts_with("{\"x\":"));
    }

    #[test]
    fn test_clear_discards_stale_fragments() {
        let mut assembler = ChunkAssembler::new();
        assembler.feed(b"{\"stale\":");
        assembler.clear();
        assert_eq!(assembler.buffered(), 0);
        let result = assembler.feed(b"{\"fresh\":1}\n");
        assert_eq!(result.messages, vec!["{\"fresh\":1}"]);
    }

    #[test]
    fn test_whitespace_only_input_yields_nothing() {
        let mut assembler = ChunkAssembler::new();
        let result = assembler.feed(b"\n\n  \n");
        assert!(result.messages.is_empty());
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        // Byte-level chunking may split a UTF-8 sequence; reassembly is
        // byte-accumulating so the character survives.
        let payload = "{\"name\":\"café\"}";
        let mut assembler = ChunkAssembler::new();
        let (messages, _) = feed_all(&mut assembler, &encode_chunks(payload, 1));
        assert_eq!(messages, vec![payload.to_owned()]);
    }

    #[test]
    #[should_panic(expected = "chunk size must be at least 1 byte")]
    fn test_zero_chunk_size_panics() {
        let _ = encode_chunks("x", 0);
    }
}
