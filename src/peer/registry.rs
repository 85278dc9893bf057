// src/peer/registry.rs
//! Registry of live peer connections.
//!
//! One connection per remote peer, created lazily: either because the local
//! side asked to connect, or because an offer arrived through the relay.
//! Creation is serialized through the registry lock, so two racing callers
//! always end up sharing one connection.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::peer::connection::PeerConnection;
use crate::protocol::SignalMessage;
use crate::transport::EngineFactory;
use crate::types::{ClientEvent, LinkError, Result};

pub struct ConnectionRegistry {
    local_peer: String,
    factory: Arc<dyn EngineFactory>,
    outbound: mpsc::Sender<SignalMessage>,
    events: mpsc::Sender<ClientEvent>,
    connections: Mutex<HashMap<String, Arc<PeerConnection>>>,
}

impl ConnectionRegistry {
    pub fn new(
        local_peer: String,
        factory: Arc<dyn EngineFactory>,
        outbound: mpsc::Sender<SignalMessage>,
        events: mpsc::Sender<ClientEvent>,
    ) -> Self {
        Self {
            local_peer,
            factory,
            outbound,
            events,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Open (or reuse) a connection to `peer` as the initiating side
    pub async fn connect_to(&self, peer: &str) -> Result<Arc<PeerConnection>> {
        let (conn, created) = self.get_or_create(peer).await?;
        if created {
            info!("Initiating connection to {}", peer);
            conn.initiate().await?;
        }
        Ok(conn)
    }

    /// Existing connection to `peer`, if any
    pub async fn get(&self, peer: &str) -> Option<Arc<PeerConnection>> {
        self.connections.lock().await.get(peer).cloned()
    }

    /// Route one negotiation message to the right connection.
    ///
    /// An offer from a peer we have no connection with creates one on the
    /// answering side; answers and candidates for unknown peers are dropped.
    pub async fn handle_signal(&self, msg: SignalMessage) -> Result<()> {
        let from = msg.from_peer().to_string();

        let conn = match &msg {
            SignalMessage::Offer { .. } => {
                let (conn, created) = self.get_or_create(&from).await?;
                if created {
                    info!("Answering inbound connection from {}", from);
                }
                conn
            }
            _ => match self.get(&from).await {
                Some(conn) => conn,
                None => {
                    warn!("Dropping {:?} from unknown peer {}", msg, from);
                    return Ok(());
                }
            },
        };

        conn.handle_signal(msg).await?;
        Ok(())
    }

    /// Send a text message to a connected peer
    pub async fn send_message(&self, peer: &str, text: &str) -> Result<()> {
        let conn = self
            .get(peer)
            .await
            .ok_or_else(|| LinkError::UnknownPeer(peer.to_string()))?;
        conn.send_message(text).await?;
        Ok(())
    }

    /// Send a file to a connected peer
    pub async fn send_file(&self, peer: &str, file_name: &str, data: &[u8]) -> Result<()> {
        let conn = self
            .get(peer)
            .await
            .ok_or_else(|| LinkError::UnknownPeer(peer.to_string()))?;
        conn.send_file(file_name, data).await?;
        Ok(())
    }

    /// Drop one peer's connection
    pub async fn remove(&self, peer: &str) {
        if let Some(conn) = self.connections.lock().await.remove(peer) {
            conn.close().await;
            debug!("Removed connection to {}", peer);
        }
    }

    /// Close every connection and clear the registry
    pub async fn close_all(&self) {
        let drained: Vec<_> = self.connections.lock().await.drain().collect();
        for (peer, conn) in drained {
            conn.close().await;
            debug!("Closed connection to {}", peer);
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    async fn get_or_create(&self, peer: &str) -> Result<(Arc<PeerConnection>, bool)> {
        let mut connections = self.connections.lock().await;
        if let Some(conn) = connections.get(peer) {
            return Ok((conn.clone(), false));
        }

        let engine = self.factory.new_engine(&self.local_peer, peer).await?;
        let conn = PeerConnection::new(
            self.local_peer.clone(),
            peer.to_string(),
            engine,
            self.outbound.clone(),
            self.events.clone(),
        );
        connections.insert(peer.to_string(), conn.clone());
        Ok((conn, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockEngineFactory, MockHub};
    use std::time::Duration;
    use tokio::time::timeout;

    fn make_registry(
        name: &str,
        hub: Arc<MockHub>,
    ) -> (
        Arc<ConnectionRegistry>,
        mpsc::Receiver<SignalMessage>,
        mpsc::Receiver<ClientEvent>,
    ) {
        let (out_tx, out_rx) = mpsc::channel(64);
        let (ev_tx, ev_rx) = mpsc::channel(256);
        let registry = Arc::new(ConnectionRegistry::new(
            name.to_string(),
            Arc::new(MockEngineFactory::new(hub)),
            out_tx,
            ev_tx,
        ));
        (registry, out_rx, ev_rx)
    }

    async fn next_event(rx: &mut mpsc::Receiver<ClientEvent>) -> ClientEvent {
        timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_connect_to_reuses_connection() {
        let hub = MockHub::new();
        let (registry, _out, _ev) = make_registry("alice", hub);

        let first = registry.connect_to("bob").await.unwrap();
        let second = registry.connect_to("bob").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_connects_share_one_connection() {
        let hub = MockHub::new();
        let (registry, _out, _ev) = make_registry("alice", hub);

        let r1 = registry.clone();
        let r2 = registry.clone();
        let (a, b) = tokio::join!(r1.connect_to("bob"), r2.connect_to("bob"));

        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(registry.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_answer_for_unknown_peer_dropped() {
        let hub = MockHub::new();
        let (registry, _out, _ev) = make_registry("alice", hub);

        registry
            .handle_signal(SignalMessage::Answer {
                from: "stranger".into(),
                to: "alice".into(),
                sdp: "answer:x:y".into(),
            })
            .await
            .unwrap();
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_send_to_unknown_peer_is_an_error() {
        let hub = MockHub::new();
        let (registry, _out, _ev) = make_registry("alice", hub);

        assert!(matches!(
            registry.send_message("bob", "hi").await,
            Err(LinkError::UnknownPeer(_))
        ));
    }

    #[tokio::test]
    async fn test_end_to_end_through_registries() {
        let hub = MockHub::new();
        let (alice, mut alice_out, mut alice_ev) = make_registry("alice", hub.clone());
        let (bob, mut bob_out, mut bob_ev) = make_registry("bob", hub);

        // Relay stand-in: pump each registry's signals into the other
        let bob_for_pump = bob.clone();
        tokio::spawn(async move {
            while let Some(msg) = alice_out.recv().await {
                let _ = bob_for_pump.handle_signal(msg).await;
            }
        });
        let alice_for_pump = alice.clone();
        tokio::spawn(async move {
            while let Some(msg) = bob_out.recv().await {
                let _ = alice_for_pump.handle_signal(msg).await;
            }
        });

        alice.connect_to("bob").await.unwrap();

        assert_eq!(
            next_event(&mut alice_ev).await,
            ClientEvent::ConnectionReady { peer: "bob".into() }
        );
        assert_eq!(
            next_event(&mut bob_ev).await,
            ClientEvent::ConnectionReady {
                peer: "alice".into()
            }
        );

        // The inbound offer created bob's side automatically
        assert_eq!(bob.connection_count().await, 1);

        alice.send_message("bob", "hello from alice").await.unwrap();
        assert_eq!(
            next_event(&mut bob_ev).await,
            ClientEvent::MessageReceived {
                peer: "alice".into(),
                text: "hello from alice".into(),
            }
        );

        bob.send_file("alice", "pic.png", b"pngbytes").await.unwrap();
        assert_eq!(
            next_event(&mut alice_ev).await,
            ClientEvent::FileProgress {
                peer: "bob".into(),
                file_name: "pic.png".into(),
                percent: 100,
            }
        );
        assert_eq!(
            next_event(&mut alice_ev).await,
            ClientEvent::FileReceived {
                peer: "bob".into(),
                file_name: "pic.png".into(),
                data: b"pngbytes".to_vec(),
            }
        );
    }
}
