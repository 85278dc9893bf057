// src/storage.rs
//! Narrow key-lookup surface the core needs from persistent storage.
//!
//! The real database lives outside this crate; components receive a shared
//! handle by construction instead of reaching for a global accessor.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::crypto::KeyPair;
use crate::types::PeerKeyKind;

/// Key lookups consumed by the tunnel and file-transfer paths
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// The local identity key pair
    async fn get_identity(&self) -> Option<KeyPair>;

    /// Known long-term keys for a peer, most recent first
    async fn get_peer_keys(&self, peer: &str, kind: PeerKeyKind) -> Vec<Vec<u8>>;

    /// Record a key learned for a peer (trust-on-first-use)
    async fn store_peer_key(&self, peer: &str, kind: PeerKeyKind, key: Vec<u8>);
}

/// In-memory key store for tests and the demo binary
#[derive(Default)]
pub struct MemoryKeyStore {
    identity: RwLock<Option<KeyPair>>,
    peer_keys: RwLock<HashMap<(String, PeerKeyKind), Vec<Vec<u8>>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn set_identity(&self, identity: KeyPair) {
        *self.identity.write().await = Some(identity);
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn get_identity(&self) -> Option<KeyPair> {
        self.identity.read().await.clone()
    }

    async fn get_peer_keys(&self, peer: &str, kind: PeerKeyKind) -> Vec<Vec<u8>> {
        self.peer_keys
            .read()
            .await
            .get(&(peer.to_string(), kind))
            .cloned()
            .unwrap_or_default()
    }

    async fn store_peer_key(&self, peer: &str, kind: PeerKeyKind, key: Vec<u8>) {
        let mut keys = self.peer_keys.write().await;
        let entry = keys.entry((peer.to_string(), kind)).or_default();
        // Most recent first, no duplicates
        entry.retain(|k| k != &key);
        entry.insert(0, key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_identity_round_trip() {
        let store = MemoryKeyStore::new();
        assert!(store.get_identity().await.is_none());

        let pair = KeyPair::generate().unwrap();
        store.set_identity(pair.clone()).await;
        assert_eq!(store.get_identity().await.unwrap().public, pair.public);
    }

    #[tokio::test]
    async fn test_peer_keys_most_recent_first() {
        let store = MemoryKeyStore::new();
        store
            .store_peer_key("bob", PeerKeyKind::Identity, vec![1])
            .await;
        store
            .store_peer_key("bob", PeerKeyKind::Identity, vec![2])
            .await;
        // Re-storing an old key moves it to the front instead of duplicating
        store
            .store_peer_key("bob", PeerKeyKind::Identity, vec![1])
            .await;

        let keys = store.get_peer_keys("bob", PeerKeyKind::Identity).await;
        assert_eq!(keys, vec![vec![1], vec![2]]);
        assert!(store
            .get_peer_keys("bob", PeerKeyKind::LongTerm)
            .await
            .is_empty());
    }
}
