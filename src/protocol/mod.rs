//! Protocol definitions for the attendance-device link.
//!
//! This module contains the low-level protocol pieces:
//! - Chunk framing and reassembly
//! - Shape-based message classification
//! - Control command serialization

pub mod classify;
pub mod command;
pub mod framing;

pub use classify::{LogicalMessage, classify};
pub use command::Command;
pub use framing::{
    ChunkAssembler, DEFAULT_BUFFER_CAP, DEFAULT_CHUNK_SIZE, FeedResult, encode_chunks,
};
