// src/crypto/hybrid.rs
//! Hybrid asymmetric + symmetric encryption primitive.
//!
//! Every payload is encrypted under a fresh ephemeral X25519 key pair:
//! the ephemeral private key and the recipient's public key are combined
//! via ECDH, the shared secret is hashed with SHA-256 into a 256-bit
//! symmetric key, and the payload is sealed with ChaCha20-Poly1305.
//! The ephemeral key is dropped right after the operation, so compromise
//! of one ephemeral key exposes only that single message.
//!
//! Envelope layout (self-describing, no out-of-band key-size negotiation):
//!
//! ```text
//! u32_le(ephemeral_key_len) || ephemeral_key || nonce(12) || tag(16) || ciphertext
//! ```
//!
//! The ciphertext is exactly as long as the plaintext (no padding).

use chacha20poly1305::aead::{Aead, NewAead};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::config::constants::{MIN_AEAD_PAYLOAD, NONCE_SIZE, TAG_SIZE};
use crate::crypto::keys::{shared_secret, KeyError, KeyPair};

/// Error type for hybrid encryption operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGen(#[from] KeyError),

    #[error("Encryption failed: {0}")]
    Encrypt(String),

    #[error("Decryption failed: {0}")]
    Decrypt(String),
}

/// Encrypt a payload for the holder of `recipient_public`.
///
/// Generates a one-shot ephemeral key pair and returns the full
/// length-prefixed envelope.
pub fn encrypt(plaintext: &[u8], recipient_public: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let ephemeral = KeyPair::generate()?;
    let shared = shared_secret(&ephemeral.private, recipient_public)?;
    let key = derive_symmetric_key(&shared);

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    let nonce = Nonce::from_slice(&nonce_bytes);
    // The aead crate appends the tag to the ciphertext; the envelope wants
    // nonce || tag || ciphertext, so split and reorder.
    let sealed = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::Encrypt(format!("ChaCha20-Poly1305 encryption failed: {}", e)))?;
    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_SIZE);

    let mut envelope =
        Vec::with_capacity(4 + ephemeral.public.len() + NONCE_SIZE + TAG_SIZE + ciphertext.len());
    envelope.extend_from_slice(&(ephemeral.public.len() as u32).to_le_bytes());
    envelope.extend_from_slice(&ephemeral.public);
    envelope.extend_from_slice(&nonce_bytes);
    envelope.extend_from_slice(tag);
    envelope.extend_from_slice(ciphertext);

    Ok(envelope)
}

/// Decrypt an envelope produced by [`encrypt`] with the owner's private key.
pub fn decrypt(envelope: &[u8], owner_private: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if envelope.len() < 4 {
        return Err(CryptoError::Decrypt(
            "Envelope shorter than length prefix".into(),
        ));
    }

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&envelope[0..4]);
    let key_len = i32::from_le_bytes(len_bytes);
    // The prefix is a signed 32-bit value on the wire; reject anything that
    // does not fit inside the buffer before indexing.
    if key_len < 0 || key_len as usize > envelope.len() - 4 {
        return Err(CryptoError::Decrypt(format!(
            "Ephemeral key length {} exceeds envelope of {} bytes",
            key_len,
            envelope.len()
        )));
    }
    let key_len = key_len as usize;

    let ephemeral_public = &envelope[4..4 + key_len];
    let aead_payload = &envelope[4 + key_len..];
    if aead_payload.len() < MIN_AEAD_PAYLOAD {
        return Err(CryptoError::Decrypt(format!(
            "AEAD payload of {} bytes shorter than nonce + tag",
            aead_payload.len()
        )));
    }

    let shared = shared_secret(owner_private, ephemeral_public)?;
    let key = derive_symmetric_key(&shared);

    let nonce = &aead_payload[..NONCE_SIZE];
    let tag = &aead_payload[NONCE_SIZE..NONCE_SIZE + TAG_SIZE];
    let ciphertext = &aead_payload[NONCE_SIZE + TAG_SIZE..];

    // Rebuild ciphertext || tag for the aead crate's combined layout
    let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_SIZE);
    sealed.extend_from_slice(ciphertext);
    sealed.extend_from_slice(tag);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    cipher
        .decrypt(Nonce::from_slice(nonce), sealed.as_slice())
        .map_err(|e| {
            debug!("ChaCha20-Poly1305 decryption failed: {}", e);
            CryptoError::Decrypt("Authentication failed".into())
        })
}

/// Hash the ECDH shared secret into a 256-bit symmetric key
fn derive_symmetric_key(shared: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(shared);
    hasher.finalize().into()
}
