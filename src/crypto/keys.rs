// src/crypto/keys.rs
//! Key management for the P2P client.
//!
//! This module handles generation of the asymmetric key pairs used for
//! the hybrid encryption scheme and the relay key-exchange tunnel.

use rand::RngCore;
use thiserror::Error;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519SecretKey};

use crate::config::constants::X25519_KEY_SIZE;

/// Error type for key-related operations
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Key generation failed: {0}")]
    Generation(String),

    #[error("Invalid key data: {0}")]
    InvalidData(String),
}

/// Asymmetric key algorithm tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    X25519,
}

/// An asymmetric key pair.
///
/// Long-lived pairs identify a tunnel endpoint; ephemeral pairs live for a
/// single encrypt operation and are dropped immediately afterwards, which is
/// what gives each message independent forward secrecy.
#[derive(Clone)]
pub struct KeyPair {
    /// Public key bytes
    pub public: Vec<u8>,
    /// Private key bytes
    pub private: Vec<u8>,
    /// Algorithm this pair belongs to
    pub algorithm: KeyAlgorithm,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print private key material
        f.debug_struct("KeyPair")
            .field("public", &hex::encode(&self.public))
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

impl KeyPair {
    /// Generate a fresh X25519 key pair from the OS RNG
    pub fn generate() -> Result<Self, KeyError> {
        let mut seed = [0u8; X25519_KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut seed);

        let secret = X25519SecretKey::from(seed);
        let public = X25519PublicKey::from(&secret);

        Ok(Self {
            public: public.as_bytes().to_vec(),
            private: secret.to_bytes().to_vec(),
            algorithm: KeyAlgorithm::X25519,
        })
    }
}

/// Compute the ECDH shared secret between a private key and a peer public key
pub fn shared_secret(private: &[u8], peer_public: &[u8]) -> Result<Vec<u8>, KeyError> {
    let secret = X25519SecretKey::from(key_array(private)?);
    let public = X25519PublicKey::from(key_array(peer_public)?);
    Ok(secret.diffie_hellman(&public).as_bytes().to_vec())
}

fn key_array(bytes: &[u8]) -> Result<[u8; X25519_KEY_SIZE], KeyError> {
    if bytes.len() != X25519_KEY_SIZE {
        return Err(KeyError::InvalidData(format!(
            "Invalid key length: {} (expected {})",
            bytes.len(),
            X25519_KEY_SIZE
        )));
    }
    let mut arr = [0u8; X25519_KEY_SIZE];
    arr.copy_from_slice(bytes);
    Ok(arr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_keypair() {
        let pair1 = KeyPair::generate().unwrap();
        let pair2 = KeyPair::generate().unwrap();

        assert_eq!(pair1.public.len(), X25519_KEY_SIZE);
        assert_eq!(pair1.private.len(), X25519_KEY_SIZE);
        assert_ne!(pair1.public, pair2.public);
    }

    #[test]
    fn test_shared_secret_agreement() {
        let alice = KeyPair::generate().unwrap();
        let bob = KeyPair::generate().unwrap();

        let ab = shared_secret(&alice.private, &bob.public).unwrap();
        let ba = shared_secret(&bob.private, &alice.public).unwrap();

        assert_eq!(ab, ba);
        assert_eq!(ab.len(), X25519_KEY_SIZE);
    }

    #[test]
    fn test_shared_secret_bad_key_length() {
        let alice = KeyPair::generate().unwrap();
        let result = shared_secret(&alice.private, &[0u8; 16]);
        assert!(matches!(result, Err(KeyError::InvalidData(_))));
    }

    #[test]
    fn test_debug_hides_private_key() {
        let pair = KeyPair::generate().unwrap();
        let rendered = format!("{:?}", pair);
        assert!(!rendered.contains(&hex::encode(&pair.private)));
    }
}
