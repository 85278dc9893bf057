// src/crypto/mod.rs
//! Cryptographic functionality for the P2P client.
//!
//! This module provides the hybrid encryption primitive used to protect
//! relay-tunneled payloads, and the key pair management underneath it.

pub mod hybrid;
pub mod keys;

pub use hybrid::{decrypt, encrypt, CryptoError};
pub use keys::{KeyAlgorithm, KeyError, KeyPair};
