// src/protocol/mod.rs
//! Wire protocol: relay signaling messages and direct-channel frames.

pub mod framing;
pub mod types;

pub use framing::{
    encode_chunk, encode_file_start, is_chunk, is_file_start, parse_chunk, parse_file_start,
    ChunkHeader, FileStart,
};
pub use types::{FragmentFrame, FriendRequestPayload, ProtocolError, SignalMessage};
