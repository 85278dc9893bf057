// src/types.rs
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{CryptoError, KeyError};
use crate::peer::PeerError;
use crate::protocol::ProtocolError;
use crate::transport::TransportError;
use crate::tunnel::TunnelError;

/// Error types for P2P client operations
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Tunnel error: {0}")]
    Tunnel(#[from] TunnelError),

    #[error("Peer error: {0}")]
    Peer(#[from] PeerError),

    #[error("Relay disconnected")]
    RelayDisconnected,

    #[error("Unknown peer: {0}")]
    UnknownPeer(String),
}

/// Result type for P2P client operations
pub type Result<T> = std::result::Result<T, LinkError>;

/// Notifications delivered to the application layer.
///
/// Replaces callback wiring with a single event queue; the multiplicities
/// are part of the contract: one `ConnectionReady` per establishment, one
/// `FileProgress` per chunk, one `MessageReceived` per complete message.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Both sub-channels to this peer are open; direct sends may begin
    ConnectionReady { peer: String },

    /// A previously ready peer lost one of its sub-channels
    PeerDisconnected { peer: String },

    /// One complete (possibly reassembled) text message
    MessageReceived { peer: String, text: String },

    /// File transfer progress, reported after every received or sent chunk
    FileProgress {
        peer: String,
        file_name: String,
        percent: u8,
    },

    /// A fully reconstructed inbound file
    FileReceived {
        peer: String,
        file_name: String,
        data: Vec<u8>,
    },

    /// A decrypted friend request that arrived through the relay tunnel
    SecureRequestReceived {
        peer: String,
        identity_key: String,
        message: String,
    },
}

/// Command line arguments for the demo binary
#[derive(clap::Parser, Debug, Clone)]
#[clap(author, version, about = "P2P chat and file-transfer client core")]
pub struct Args {
    /// Log level
    #[clap(short, long, default_value = "info")]
    pub log_level: String,

    /// Optional log file; rolling daily when set
    #[clap(long)]
    pub log_file: Option<String>,

    /// Local peer name for the loopback demo
    #[clap(long, default_value = "alice")]
    pub peer_a: String,

    /// Remote peer name for the loopback demo
    #[clap(long, default_value = "bob")]
    pub peer_b: String,
}

/// Kinds of long-term keys the storage layer can hand out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerKeyKind {
    Identity,
    LongTerm,
}
