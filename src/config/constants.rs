// src/config/constants.rs
//! Application constants and fixed settings.
//!
//! This module contains fixed values that are used throughout the application,
//! such as frame limits, flow-control thresholds, and security parameters.

use std::time::Duration;

/// Cryptographic constants
pub const NONCE_SIZE: usize = 12; // For ChaCha20-Poly1305
pub const TAG_SIZE: usize = 16; // For ChaCha20-Poly1305
pub const SYMMETRIC_KEY_SIZE: usize = 32;
pub const X25519_KEY_SIZE: usize = 32;
/// Minimum AEAD payload: nonce + tag (empty ciphertext is legal)
pub const MIN_AEAD_PAYLOAD: usize = NONCE_SIZE + TAG_SIZE;

/// Largest payload sent as a single control-channel frame (16 KiB)
pub const SINGLE_FRAME_LIMIT: usize = 16 * 1024;
/// Reserved headroom for the JSON fragment envelope around a chunk
pub const FRAGMENT_ENVELOPE_OVERHEAD: usize = 200;
/// Raw bytes per message fragment. Chunks travel base64-encoded inside the
/// JSON envelope, so only 3/4 of the remaining frame budget is raw payload
/// (rounded down to a multiple of three to avoid padding waste).
pub const FRAGMENT_CHUNK_SIZE: usize = (SINGLE_FRAME_LIMIT - FRAGMENT_ENVELOPE_OVERHEAD) / 4 * 3;
/// Fixed file chunk size on the bulk channel (64 KiB)
pub const FILE_CHUNK_SIZE: usize = 64 * 1024;
/// Files at or below this size travel as one inline frame
pub const INLINE_FILE_LIMIT: usize = 2 * FILE_CHUNK_SIZE;
/// Bulk channel retransmit cap; keeps head-of-line blocking bounded
pub const BULK_MAX_RETRANSMITS: u16 = 3;

/// Flow control
pub const BUFFER_HIGH_WATER_MARK: usize = 1024 * 1024; // 1 MiB queued bytes
pub const BUFFER_POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const BUFFER_POLL_LIMIT: u32 = 500; // 500 * 10ms = 5s cap
pub const BUFFER_WAIT_WARN_THRESHOLD: Duration = Duration::from_millis(50);
/// Chunks sent between micro-pauses on the bulk channel
pub const CHUNK_BURST_SIZE: usize = 5;
pub const CHUNK_BURST_PAUSE: Duration = Duration::from_millis(1);
pub const INTER_FRAGMENT_DELAY: Duration = Duration::from_millis(10);

/// Tunnel key exchange
pub const KEY_WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const KEY_WAIT_POLL_LIMIT: u32 = 50; // 50 * 100ms = 5s cap

/// Stale-state sweeping
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
pub const STALE_ENTRY_AGE: Duration = Duration::from_secs(300);

/// Connection state polling
pub const CHANNEL_STATE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Channel labels
pub const CONTROL_CHANNEL_LABEL: &str = "control";
pub const BULK_CHANNEL_LABEL: &str = "bulk";

/// Random identifier length for transfers and fragmented messages
pub const TRANSFER_ID_LENGTH: usize = 8;

/// Logging
pub const DEFAULT_LOG_LEVEL: &str = "info";
