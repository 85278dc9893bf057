// src/peer/mod.rs
//! Direct peer connections: negotiation, dual channels, fragmentation,
//! flow control, and file transfer.

pub mod connection;
pub mod fragment;
pub mod registry;
pub mod transfer;

pub use connection::{ConnectionState, PeerConnection};
pub use registry::ConnectionRegistry;

use thiserror::Error;

use crate::protocol::ProtocolError;
use crate::transport::TransportError;

/// Error type for peer connection operations
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("Connection to {0} is not ready")]
    NotReady(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Transfer {transfer_id} finished with {missing} missing chunk(s)")]
    IncompleteTransfer { transfer_id: String, missing: u32 },

    #[error("Negotiation with {0} failed")]
    NegotiationFailed(String),
}
