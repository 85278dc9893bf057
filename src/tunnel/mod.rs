// src/tunnel/mod.rs
//! Secure key-exchange tunnel over the untrusted relay.
//!
//! Two peers that have never talked before announce their tunnel public
//! keys to each other through the relay, then exchange a hybrid-encrypted
//! friend request the relay cannot read. Keys are accepted trust-on-first-
//! use; the relay only ever sees opaque `KEY_EXCHANGE` / `TUNNEL_MESSAGE`
//! lines.
//!
//! The reply rule is deliberately asymmetric: a peer's *first* announcement
//! of a key value gets our key announced back, a repeat of the same value
//! gets nothing. That single rule is what stops two well-behaved peers from
//! re-announcing at each other forever.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, warn};

use crate::config::constants::{KEY_WAIT_POLL_INTERVAL, KEY_WAIT_POLL_LIMIT};
use crate::crypto::{self, CryptoError, KeyError, KeyPair};
use crate::protocol::{FriendRequestPayload, ProtocolError, SignalMessage};
use crate::types::ClientEvent;
use crate::utils;

/// Error type for tunnel operations
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Key generation failed: {0}")]
    KeyGen(#[from] KeyError),

    #[error("Tunnel not established")]
    NotEstablished,

    #[error("Timed out waiting for {0}'s tunnel key")]
    KeyTimeout(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Relay send failed")]
    SendFailed,
}

/// Client side of the relay key-exchange tunnel
pub struct KeyExchangeTunnel {
    local_peer: String,
    keypair: RwLock<Option<KeyPair>>,
    /// Peer name -> their announced tunnel public key (TOFU)
    peer_keys: Mutex<HashMap<String, Vec<u8>>>,
    established: AtomicBool,
    outbound: mpsc::Sender<SignalMessage>,
    events: mpsc::Sender<ClientEvent>,
}

impl KeyExchangeTunnel {
    pub fn new(
        local_peer: String,
        outbound: mpsc::Sender<SignalMessage>,
        events: mpsc::Sender<ClientEvent>,
    ) -> Self {
        Self {
            local_peer,
            keypair: RwLock::new(None),
            peer_keys: Mutex::new(HashMap::new()),
            established: AtomicBool::new(false),
            outbound,
            events,
        }
    }

    /// Generate the local tunnel key pair. Idempotent; a second call keeps
    /// the existing pair.
    pub async fn establish(&self) -> Result<(), TunnelError> {
        let mut keypair = self.keypair.write().await;
        if keypair.is_none() {
            *keypair = Some(KeyPair::generate()?);
        }
        self.established.store(true, Ordering::Relaxed);
        if let Some(pair) = keypair.as_ref() {
            debug!(
                "Key-exchange tunnel established for {} with key {}",
                self.local_peer,
                utils::key_fingerprint(&pair.public)
            );
        }
        Ok(())
    }

    pub fn is_established(&self) -> bool {
        self.established.load(Ordering::Relaxed)
    }

    /// Our tunnel public key, once established
    pub async fn local_public_key(&self) -> Option<Vec<u8>> {
        self.keypair.read().await.as_ref().map(|k| k.public.clone())
    }

    /// Stored tunnel key for a peer, if any
    pub async fn peer_key(&self, peer: &str) -> Option<Vec<u8>> {
        self.peer_keys.lock().await.get(peer).cloned()
    }

    /// Send an encrypted friend request to `to_peer` through the relay.
    ///
    /// Announces our key, waits up to five seconds for the peer's key to
    /// arrive, then encrypts the request under it. Every failure is terminal
    /// for this call; retry policy belongs to the caller.
    pub async fn send_secure_request(
        &self,
        to_peer: &str,
        identity_key: &str,
        long_term_key: &str,
        message: &str,
    ) -> Result<(), TunnelError> {
        if !self.is_established() {
            return Err(TunnelError::NotEstablished);
        }

        self.announce_key(to_peer).await?;
        let peer_key = self.wait_for_peer_key(to_peer).await?;

        let payload = FriendRequestPayload {
            request_type: "friend_request".to_string(),
            from_peer: self.local_peer.clone(),
            to_peer: to_peer.to_string(),
            identity_key: identity_key.to_string(),
            long_term_key: long_term_key.to_string(),
            message: message.to_string(),
            timestamp: utils::current_timestamp_millis(),
        };
        let plaintext = serde_json::to_vec(&payload).map_err(ProtocolError::from)?;
        let envelope = crypto::encrypt(&plaintext, &peer_key)?;

        self.outbound
            .send(SignalMessage::TunnelMessage {
                from: self.local_peer.clone(),
                to: to_peer.to_string(),
                data: base64::encode(envelope),
            })
            .await
            .map_err(|_| TunnelError::SendFailed)?;

        debug!("Sent secure friend request to {}", to_peer);
        Ok(())
    }

    /// Dispatch one inbound tunnel message from the relay
    pub async fn handle_message(&self, msg: SignalMessage) {
        match msg {
            SignalMessage::KeyExchange {
                from,
                to,
                public_key,
            } => {
                if to != self.local_peer {
                    debug!("Ignoring KEY_EXCHANGE addressed to {}", to);
                    return;
                }
                self.handle_key_exchange(&from, &public_key).await;
            }
            SignalMessage::TunnelMessage { from, to, data } => {
                if to != self.local_peer {
                    debug!("Ignoring TUNNEL_MESSAGE addressed to {}", to);
                    return;
                }
                self.handle_tunnel_message(&from, &data).await;
            }
            other => {
                debug!("Tunnel ignoring non-tunnel message: {:?}", other);
            }
        }
    }

    /// Forget everything: key pair, peer keys, established flag. The next
    /// use starts a brand-new handshake with every peer.
    pub async fn reset(&self) {
        self.established.store(false, Ordering::Relaxed);
        *self.keypair.write().await = None;
        self.peer_keys.lock().await.clear();
        debug!("Key-exchange tunnel reset for {}", self.local_peer);
    }

    async fn announce_key(&self, to_peer: &str) -> Result<(), TunnelError> {
        let public = self
            .local_public_key()
            .await
            .ok_or(TunnelError::NotEstablished)?;

        self.outbound
            .send(SignalMessage::KeyExchange {
                from: self.local_peer.clone(),
                to: to_peer.to_string(),
                public_key: base64::encode(public),
            })
            .await
            .map_err(|_| TunnelError::SendFailed)
    }

    /// Bounded poll for a peer's key; 100ms intervals, 5s cap
    async fn wait_for_peer_key(&self, peer: &str) -> Result<Vec<u8>, TunnelError> {
        for _ in 0..KEY_WAIT_POLL_LIMIT {
            if let Some(key) = self.peer_key(peer).await {
                return Ok(key);
            }
            tokio::time::sleep(KEY_WAIT_POLL_INTERVAL).await;
        }
        warn!("Timed out waiting for tunnel key from {}", peer);
        Err(TunnelError::KeyTimeout(peer.to_string()))
    }

    async fn handle_key_exchange(&self, from: &str, public_key_b64: &str) {
        let key = match base64::decode(public_key_b64) {
            Ok(key) => key,
            Err(e) => {
                warn!("Dropping KEY_EXCHANGE from {} with bad key: {}", from, e);
                return;
            }
        };

        // Anti-loop rule: reply once per distinct key value. The same key
        // announced again is a no-op, so two peers can never ping-pong.
        let fingerprint = utils::key_fingerprint(&key);
        let is_new = {
            let mut keys = self.peer_keys.lock().await;
            let changed = keys.get(from).map(|k| k != &key).unwrap_or(true);
            if changed {
                keys.insert(from.to_string(), key);
            }
            changed
        };

        if !is_new {
            debug!("Repeat KEY_EXCHANGE from {}, no reply", from);
            return;
        }

        debug!("Stored tunnel key {} for {}", fingerprint, from);
        if self.is_established() {
            if let Err(e) = self.announce_key(from).await {
                warn!("Failed to answer {}'s key announcement: {}", from, e);
            }
        }
    }

    async fn handle_tunnel_message(&self, from: &str, data_b64: &str) {
        // The sender's key must already be known; an unsolicited encrypted
        // payload is dropped, not retried.
        if self.peer_key(from).await.is_none() {
            warn!("Dropping TUNNEL_MESSAGE from {}: no key on file", from);
            return;
        }

        let private = match self.keypair.read().await.as_ref() {
            Some(pair) => pair.private.clone(),
            None => {
                warn!("Dropping TUNNEL_MESSAGE from {}: tunnel not established", from);
                return;
            }
        };

        let envelope = match base64::decode(data_b64) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Dropping TUNNEL_MESSAGE from {} with bad base64: {}", from, e);
                return;
            }
        };

        let plaintext = match crypto::decrypt(&envelope, &private) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!("Failed to decrypt TUNNEL_MESSAGE from {}: {}", from, e);
                return;
            }
        };

        let payload: FriendRequestPayload = match serde_json::from_slice(&plaintext) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Malformed friend request from {}: {}", from, e);
                return;
            }
        };
        if payload.from_peer != from {
            warn!(
                "Friend request sender mismatch: envelope {} vs payload {}",
                from, payload.from_peer
            );
        }

        let _ = self
            .events
            .send(ClientEvent::SecureRequestReceived {
                peer: from.to_string(),
                identity_key: payload.identity_key,
                message: payload.message,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn make_tunnel(
        name: &str,
    ) -> (
        Arc<KeyExchangeTunnel>,
        mpsc::Receiver<SignalMessage>,
        mpsc::Receiver<ClientEvent>,
    ) {
        let (out_tx, out_rx) = mpsc::channel(64);
        let (ev_tx, ev_rx) = mpsc::channel(64);
        (
            Arc::new(KeyExchangeTunnel::new(name.to_string(), out_tx, ev_tx)),
            out_rx,
            ev_rx,
        )
    }

    #[tokio::test]
    async fn test_establish_is_idempotent() {
        let (tunnel, _out, _ev) = make_tunnel("alice");

        tunnel.establish().await.unwrap();
        let first = tunnel.local_public_key().await.unwrap();
        tunnel.establish().await.unwrap();
        let second = tunnel.local_public_key().await.unwrap();

        assert!(tunnel.is_established());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_anti_loop_reply_rule() {
        let (tunnel, mut out, _ev) = make_tunnel("alice");
        tunnel.establish().await.unwrap();

        let bob_key = KeyPair::generate().unwrap();
        let announce = SignalMessage::KeyExchange {
            from: "bob".into(),
            to: "alice".into(),
            public_key: base64::encode(&bob_key.public),
        };

        // First announcement: stored and answered exactly once
        tunnel.handle_message(announce.clone()).await;
        match out.try_recv().unwrap() {
            SignalMessage::KeyExchange { to, .. } => assert_eq!(to, "bob"),
            other => panic!("expected KEY_EXCHANGE reply, got {:?}", other),
        }

        // Same key again: no-op, no reply
        tunnel.handle_message(announce).await;
        assert!(out.try_recv().is_err());

        // A different key triggers exactly one more reply
        let bob_key2 = KeyPair::generate().unwrap();
        tunnel
            .handle_message(SignalMessage::KeyExchange {
                from: "bob".into(),
                to: "alice".into(),
                public_key: base64::encode(&bob_key2.public),
            })
            .await;
        assert!(matches!(
            out.try_recv().unwrap(),
            SignalMessage::KeyExchange { .. }
        ));
        assert!(out.try_recv().is_err());
        assert_eq!(tunnel.peer_key("bob").await.unwrap(), bob_key2.public);
    }

    #[tokio::test]
    async fn test_key_exchange_for_other_peer_ignored() {
        let (tunnel, mut out, _ev) = make_tunnel("alice");
        tunnel.establish().await.unwrap();

        tunnel
            .handle_message(SignalMessage::KeyExchange {
                from: "bob".into(),
                to: "carol".into(),
                public_key: base64::encode([1u8; 32]),
            })
            .await;

        assert!(tunnel.peer_key("bob").await.is_none());
        assert!(out.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_tunnel_message_without_key_dropped() {
        let (tunnel, _out, mut ev) = make_tunnel("alice");
        tunnel.establish().await.unwrap();

        tunnel
            .handle_message(SignalMessage::TunnelMessage {
                from: "stranger".into(),
                to: "alice".into(),
                data: base64::encode([0u8; 64]),
            })
            .await;

        assert!(ev.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_times_out_without_peer_key() {
        let (tunnel, _out, _ev) = make_tunnel("alice");
        tunnel.establish().await.unwrap();

        let result = tunnel
            .send_secure_request("bob", "idkey", "ltkey", "hello")
            .await;
        assert!(matches!(result, Err(TunnelError::KeyTimeout(_))));
    }

    #[tokio::test]
    async fn test_request_requires_establish() {
        let (tunnel, _out, _ev) = make_tunnel("alice");
        let result = tunnel
            .send_secure_request("bob", "idkey", "ltkey", "hello")
            .await;
        assert!(matches!(result, Err(TunnelError::NotEstablished)));
    }

    #[tokio::test]
    async fn test_full_friend_request_exchange() {
        let (alice, mut alice_out, _alice_ev) = make_tunnel("alice");
        let (bob, mut bob_out, mut bob_ev) = make_tunnel("bob");
        alice.establish().await.unwrap();
        bob.establish().await.unwrap();

        // Pump each tunnel's outbound lines into the other's handler
        let bob_for_pump = bob.clone();
        let pump_a = tokio::spawn(async move {
            while let Some(msg) = alice_out.recv().await {
                bob_for_pump.handle_message(msg).await;
            }
        });
        let alice_for_pump = alice.clone();
        let pump_b = tokio::spawn(async move {
            while let Some(msg) = bob_out.recv().await {
                alice_for_pump.handle_message(msg).await;
            }
        });

        alice
            .send_secure_request("bob", "alice-id-key", "alice-lt-key", "hi bob!")
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), bob_ev.recv())
            .await
            .expect("timed out")
            .expect("event channel closed");
        match event {
            ClientEvent::SecureRequestReceived {
                peer,
                identity_key,
                message,
            } => {
                assert_eq!(peer, "alice");
                assert_eq!(identity_key, "alice-id-key");
                assert_eq!(message, "hi bob!");
            }
            other => panic!("unexpected event: {:?}", other),
        }

        pump_a.abort();
        pump_b.abort();
    }

    #[tokio::test]
    async fn test_reset_clears_state() {
        let (tunnel, _out, _ev) = make_tunnel("alice");
        tunnel.establish().await.unwrap();

        tunnel
            .handle_message(SignalMessage::KeyExchange {
                from: "bob".into(),
                to: "alice".into(),
                public_key: base64::encode(KeyPair::generate().unwrap().public),
            })
            .await;
        assert!(tunnel.peer_key("bob").await.is_some());

        tunnel.reset().await;
        assert!(!tunnel.is_established());
        assert!(tunnel.local_public_key().await.is_none());
        assert!(tunnel.peer_key("bob").await.is_none());
    }
}
