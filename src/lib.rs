// src/lib.rs
//! Peer-to-peer chat and file-transfer client core.
//!
//! The crate bootstraps peers through an untrusted rendezvous relay: a
//! hybrid-encrypted key-exchange tunnel carries friend requests the relay
//! cannot read, and offer/answer negotiation upgrades pairs of peers to
//! direct dual-channel connections with fragmentation, flow control, and
//! chunked file transfer.

pub mod client;
pub mod config;
pub mod crypto;
pub mod peer;
pub mod protocol;
pub mod relay;
pub mod storage;
pub mod transport;
pub mod tunnel;
pub mod types;
pub mod utils;

pub use client::LinkClient;
pub use types::{ClientEvent, LinkError, Result};
