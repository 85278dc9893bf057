// src/transport/mod.rs
//! Channel and negotiation-engine abstractions.
//!
//! The fragmentation, flow-control, and reconstruction core never touches a
//! concrete WebRTC library; it only sees these traits. A real adapter wraps
//! whatever connection engine the application embeds, and the mock
//! implementation backs tests and the loopback demo.

pub mod mock;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Errors from channel and engine operations
#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Channel is not open")]
    ChannelClosed,

    #[error("Negotiation failed: {0}")]
    Negotiation(String),
}

/// Ready state of a data channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

/// Options requested when a sub-channel is created
#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    /// Preserve message order end-to-end
    pub ordered: bool,
    /// Retransmit cap; `None` means reliable delivery
    pub max_retransmits: Option<u16>,
}

/// One direct sub-channel to a remote peer.
///
/// `buffered_amount` is the number of bytes queued locally but not yet
/// handed to the network; the flow-control wait in the peer connection
/// polls it against the high-water mark.
#[async_trait]
pub trait DataChannel: Send + Sync {
    /// Label this channel was created with
    fn label(&self) -> &str;

    /// Current ready state
    fn ready_state(&self) -> ChannelState;

    /// Bytes queued for send but not yet transmitted
    fn buffered_amount(&self) -> usize;

    /// Send one frame to the peer
    async fn send(&self, data: Vec<u8>) -> Result<(), TransportError>;

    /// Receive the next frame; `None` once the channel is closed
    async fn recv(&self) -> Option<Vec<u8>>;

    /// Close the channel
    async fn close(&self);
}

/// Connection negotiation capability for one remote peer.
///
/// Offer/answer/candidate handling is delegated to an external engine; the
/// core only moves the resulting opaque descriptions through the relay.
#[async_trait]
pub trait ConnectionEngine: Send + Sync {
    /// Create a local offer description
    async fn create_offer(&self) -> Result<String, TransportError>;

    /// Create an answer to a previously applied remote offer
    async fn create_answer(&self) -> Result<String, TransportError>;

    /// Apply the remote peer's offer or answer description
    async fn set_remote_description(&self, description: &str) -> Result<(), TransportError>;

    /// Apply one remote connectivity candidate
    async fn add_candidate(&self, candidate: &str) -> Result<(), TransportError>;

    /// Create an outbound sub-channel with the given label and options
    async fn create_channel(
        &self,
        label: &str,
        config: ChannelConfig,
    ) -> Result<Arc<dyn DataChannel>, TransportError>;

    /// Take the next channel the remote side created towards us
    async fn take_incoming_channel(&self, label: &str)
        -> Result<Arc<dyn DataChannel>, TransportError>;

    /// Tear down the engine and every channel it created
    async fn close(&self);
}

/// Builds one negotiation engine per remote peer
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn new_engine(
        &self,
        local_peer: &str,
        remote_peer: &str,
    ) -> Result<Arc<dyn ConnectionEngine>, TransportError>;
}
