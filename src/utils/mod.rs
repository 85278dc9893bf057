// src/utils/mod.rs
//! Utility functions and helpers.
//!
//! This module contains general-purpose utilities used across
//! the application.

pub mod logging;

use rand::{distributions::Alphanumeric, thread_rng, Rng};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current timestamp in milliseconds
pub fn current_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_millis() as u64
}

/// Check if an Instant has expired given a TTL
pub fn is_expired(timestamp: Instant, ttl: Duration) -> bool {
    timestamp.elapsed() > ttl
}

/// Generate a random alphanumeric string of specified length
pub fn random_string(length: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Short hex fingerprint of a key for log lines
pub fn key_fingerprint(key: &[u8]) -> String {
    let hex = hex::encode(key);
    hex.chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_string() {
        let s1 = random_string(8);
        let s2 = random_string(8);

        assert_eq!(s1.len(), 8);
        assert_eq!(s2.len(), 8);
        assert_ne!(s1, s2); // Ensure randomness
    }

    #[test]
    fn test_is_expired() {
        let now = Instant::now();
        std::thread::sleep(Duration::from_millis(10));

        assert!(!is_expired(now, Duration::from_millis(500)));
        assert!(is_expired(now, Duration::from_millis(5)));
    }

    #[test]
    fn test_key_fingerprint() {
        let fp = key_fingerprint(&[0xab, 0xcd, 0xef, 0x01, 0x23]);
        assert_eq!(fp, "abcdef01");
    }
}
