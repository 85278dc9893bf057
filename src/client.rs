// src/client.rs
//! Top-level client: one relay link, one key-exchange tunnel, and one
//! connection registry, glued together by two background tasks.
//!
//! Inbound relay lines are demultiplexed by message type: key-exchange
//! traffic goes to the tunnel, negotiation traffic to the registry. All
//! outbound signaling funnels through a single writer task so components
//! never touch the relay link directly.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::peer::ConnectionRegistry;
use crate::protocol::SignalMessage;
use crate::relay::RelayLink;
use crate::storage::KeyStore;
use crate::transport::EngineFactory;
use crate::tunnel::KeyExchangeTunnel;
use crate::types::{ClientEvent, PeerKeyKind, Result};

const EVENT_QUEUE_DEPTH: usize = 256;
const SIGNAL_QUEUE_DEPTH: usize = 256;

pub struct LinkClient {
    local_peer: String,
    relay: Arc<dyn RelayLink>,
    tunnel: Arc<KeyExchangeTunnel>,
    registry: Arc<ConnectionRegistry>,
    key_store: Arc<dyn KeyStore>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LinkClient {
    /// Build a client and the event stream the application consumes
    pub fn new(
        local_peer: &str,
        relay: Arc<dyn RelayLink>,
        factory: Arc<dyn EngineFactory>,
        key_store: Arc<dyn KeyStore>,
    ) -> (Arc<Self>, mpsc::Receiver<ClientEvent>) {
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_QUEUE_DEPTH);
        let (internal_tx, internal_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (app_tx, app_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

        let tunnel = Arc::new(KeyExchangeTunnel::new(
            local_peer.to_string(),
            signal_tx.clone(),
            internal_tx.clone(),
        ));
        let registry = Arc::new(ConnectionRegistry::new(
            local_peer.to_string(),
            factory,
            signal_tx,
            internal_tx,
        ));

        let client = Arc::new(Self {
            local_peer: local_peer.to_string(),
            relay,
            tunnel,
            registry,
            key_store,
            tasks: Mutex::new(Vec::new()),
        });
        client.spawn_tasks(signal_rx, internal_rx, app_tx);
        (client, app_rx)
    }

    pub fn local_peer(&self) -> &str {
        &self.local_peer
    }

    /// Generate the tunnel key pair; must run before secure requests
    pub async fn establish_tunnel(&self) -> Result<()> {
        self.tunnel.establish().await?;
        Ok(())
    }

    /// Send an encrypted friend request to a peer through the relay.
    ///
    /// Our identity public key rides inside the encrypted payload; the
    /// tunnel key doubles as the advertised long-term key.
    pub async fn send_secure_request(&self, to_peer: &str, message: &str) -> Result<()> {
        let identity_key = match self.key_store.get_identity().await {
            Some(pair) => base64::encode(&pair.public),
            None => String::new(),
        };
        let long_term_key = match self.tunnel.local_public_key().await {
            Some(key) => base64::encode(key),
            None => String::new(),
        };

        self.tunnel
            .send_secure_request(to_peer, &identity_key, &long_term_key, message)
            .await?;
        Ok(())
    }

    /// Open a direct connection to a peer
    pub async fn connect_to_peer(&self, peer: &str) -> Result<()> {
        self.registry.connect_to(peer).await?;
        Ok(())
    }

    /// Send a text message over an established direct connection
    pub async fn send_message(&self, peer: &str, text: &str) -> Result<()> {
        self.registry.send_message(peer, text).await
    }

    /// Send a file over an established direct connection
    pub async fn send_file(&self, peer: &str, file_name: &str, data: &[u8]) -> Result<()> {
        self.registry.send_file(peer, file_name, data).await
    }

    /// Close and forget the direct connection to one peer
    pub async fn disconnect_peer(&self, peer: &str) {
        self.registry.remove(peer).await;
    }

    /// Drop the tunnel key pair and every stored peer key
    pub async fn reset_tunnel(&self) {
        self.tunnel.reset().await;
    }

    /// Close every connection and the relay link
    pub async fn shutdown(&self) {
        info!("Shutting down client {}", self.local_peer);
        self.registry.close_all().await;
        self.relay.close().await;
        let tasks = {
            let mut tasks = self.tasks.lock().await;
            std::mem::take(&mut *tasks)
        };
        for task in tasks {
            task.abort();
        }
    }

    fn spawn_tasks(
        self: &Arc<Self>,
        mut signal_rx: mpsc::Receiver<SignalMessage>,
        mut internal_rx: mpsc::Receiver<ClientEvent>,
        app_tx: mpsc::Sender<ClientEvent>,
    ) {
        // Writer: serialize outbound signaling onto the relay
        let writer = self.clone();
        let writer_task = tokio::spawn(async move {
            while let Some(msg) = signal_rx.recv().await {
                let line = match msg.to_line() {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Unserializable signal message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = writer.relay.send_line(line).await {
                    warn!("Relay send failed: {}", e);
                }
            }
        });

        // Reader: demultiplex inbound relay lines
        let reader = self.clone();
        let reader_task = tokio::spawn(async move {
            while let Some(line) = reader.relay.recv_line().await {
                let msg = match SignalMessage::from_line(&line) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!("Dropping unparseable relay line: {}", e);
                        continue;
                    }
                };
                match msg {
                    SignalMessage::KeyExchange { .. } | SignalMessage::TunnelMessage { .. } => {
                        reader.tunnel.handle_message(msg).await;
                    }
                    SignalMessage::Offer { .. }
                    | SignalMessage::Answer { .. }
                    | SignalMessage::Candidate { .. } => {
                        if let Err(e) = reader.registry.handle_signal(msg).await {
                            warn!("Negotiation message failed: {}", e);
                        }
                    }
                }
            }
            info!("Relay link to {} ended", reader.local_peer);
        });

        // Event pump: record learned keys, then hand events to the app
        let pump = self.clone();
        let pump_task = tokio::spawn(async move {
            while let Some(event) = internal_rx.recv().await {
                if let ClientEvent::SecureRequestReceived {
                    peer, identity_key, ..
                } = &event
                {
                    if let Ok(key) = base64::decode(identity_key) {
                        pump.key_store
                            .store_peer_key(peer, PeerKeyKind::Identity, key)
                            .await;
                        debug!("Stored identity key for {}", peer);
                    }
                }
                if app_tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        // Construction is single-threaded, so the lock is free here
        if let Ok(mut tasks) = self.tasks.try_lock() {
            tasks.push(writer_task);
            tasks.push(reader_task);
            tasks.push(pump_task);
        }
    }
}
