// src/relay/mod.rs
//! Client link to the rendezvous relay.
//!
//! The relay is a dumb line forwarder: clients exchange newline-delimited
//! JSON signaling lines through it, addressed by peer name. This module
//! gives the client one trait for that link, a TCP implementation, and an
//! in-memory relay used by tests and the loopback demo.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

/// Error type for relay link operations
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Relay connection failed: {0}")]
    Connect(#[from] std::io::Error),

    #[error("Relay link closed")]
    Closed,

    #[error("Line codec error: {0}")]
    Codec(#[from] LinesCodecError),
}

/// One client's bidirectional line stream to the relay
#[async_trait]
pub trait RelayLink: Send + Sync {
    /// Send one signaling line (no trailing newline)
    async fn send_line(&self, line: String) -> Result<(), RelayError>;

    /// Receive the next line; `None` once the link is closed
    async fn recv_line(&self) -> Option<String>;

    /// Close the link
    async fn close(&self);
}

/// Relay link over a TCP connection, one JSON message per line
pub struct TcpRelayLink {
    writer: Mutex<FramedWrite<tokio::net::tcp::OwnedWriteHalf, LinesCodec>>,
    reader: Mutex<FramedRead<tokio::net::tcp::OwnedReadHalf, LinesCodec>>,
    open: AtomicBool,
}

impl TcpRelayLink {
    pub async fn connect(addr: &str) -> Result<Self, RelayError> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();
        info!("Connected to relay at {}", addr);

        Ok(Self {
            writer: Mutex::new(FramedWrite::new(write_half, LinesCodec::new())),
            reader: Mutex::new(FramedRead::new(read_half, LinesCodec::new())),
            open: AtomicBool::new(true),
        })
    }
}

#[async_trait]
impl RelayLink for TcpRelayLink {
    async fn send_line(&self, line: String) -> Result<(), RelayError> {
        if !self.open.load(Ordering::Relaxed) {
            return Err(RelayError::Closed);
        }
        self.writer.lock().await.send(line).await?;
        Ok(())
    }

    async fn recv_line(&self) -> Option<String> {
        loop {
            match self.reader.lock().await.next().await? {
                Ok(line) => return Some(line),
                Err(e) => {
                    warn!("Skipping unreadable relay line: {}", e);
                }
            }
        }
    }

    async fn close(&self) {
        self.open.store(false, Ordering::Relaxed);
        // LinesCodec encodes any AsRef<str>, so close() needs the item type
        // pinned explicitly.
        let _ = SinkExt::<String>::close(&mut *self.writer.lock().await).await;
    }
}

/// In-process relay shared by the links it hands out.
///
/// Routing mirrors the real relay: each line is delivered to the queue of
/// the peer named in its `to` field, and lines for unknown peers vanish.
#[derive(Default)]
pub struct MemoryRelayHub {
    peers: Mutex<HashMap<String, mpsc::Sender<String>>>,
}

impl MemoryRelayHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `peer` and return its link
    pub async fn attach(self: &Arc<Self>, peer: &str) -> MemoryRelayLink {
        let (tx, rx) = mpsc::channel(256);
        self.peers.lock().await.insert(peer.to_string(), tx);
        debug!("Peer {} attached to in-memory relay", peer);

        MemoryRelayLink {
            peer: peer.to_string(),
            hub: self.clone(),
            rx: Mutex::new(rx),
            open: AtomicBool::new(true),
        }
    }

    async fn route(&self, line: String) {
        // Peek only at the destination; payloads stay opaque to the relay
        let to = serde_json::from_str::<serde_json::Value>(&line)
            .ok()
            .and_then(|v| v.get("to").and_then(|t| t.as_str()).map(String::from));

        match to {
            Some(to) => {
                let target = self.peers.lock().await.get(&to).cloned();
                match target {
                    Some(tx) => {
                        let _ = tx.send(line).await;
                    }
                    None => warn!("Relay dropping line for unknown peer {}", to),
                }
            }
            None => warn!("Relay dropping unaddressed line"),
        }
    }

    async fn detach(&self, peer: &str) {
        self.peers.lock().await.remove(peer);
    }
}

/// One peer's link to the in-memory relay
pub struct MemoryRelayLink {
    peer: String,
    hub: Arc<MemoryRelayHub>,
    rx: Mutex<mpsc::Receiver<String>>,
    open: AtomicBool,
}

#[async_trait]
impl RelayLink for MemoryRelayLink {
    async fn send_line(&self, line: String) -> Result<(), RelayError> {
        if !self.open.load(Ordering::Relaxed) {
            return Err(RelayError::Closed);
        }
        self.hub.route(line).await;
        Ok(())
    }

    async fn recv_line(&self) -> Option<String> {
        self.rx.lock().await.recv().await
    }

    async fn close(&self) {
        self.open.store(false, Ordering::Relaxed);
        self.hub.detach(&self.peer).await;
        self.rx.lock().await.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SignalMessage;

    #[tokio::test]
    async fn test_memory_relay_routes_by_destination() {
        let hub = MemoryRelayHub::new();
        let alice = hub.attach("alice").await;
        let bob = hub.attach("bob").await;

        let line = SignalMessage::Offer {
            from: "alice".into(),
            to: "bob".into(),
            sdp: "offer:alice:bob".into(),
        }
        .to_line()
        .unwrap();
        alice.send_line(line.clone()).await.unwrap();

        assert_eq!(bob.recv_line().await.unwrap(), line);
    }

    #[tokio::test]
    async fn test_memory_relay_drops_unknown_destination() {
        let hub = MemoryRelayHub::new();
        let alice = hub.attach("alice").await;

        let line = SignalMessage::Offer {
            from: "alice".into(),
            to: "nobody".into(),
            sdp: "offer".into(),
        }
        .to_line()
        .unwrap();
        // Delivery to an absent peer is silently dropped, not an error
        alice.send_line(line).await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_link_rejects_sends() {
        let hub = MemoryRelayHub::new();
        let alice = hub.attach("alice").await;

        alice.close().await;
        assert!(matches!(
            alice.send_line("{}".into()).await,
            Err(RelayError::Closed)
        ));
        assert!(alice.recv_line().await.is_none());
    }

    #[tokio::test]
    async fn test_tcp_relay_line_round_trip() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let echo = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, write_half) = stream.into_split();
            let mut reader = FramedRead::new(read_half, LinesCodec::new());
            let mut writer = FramedWrite::new(write_half, LinesCodec::new());
            while let Some(Ok(line)) = reader.next().await {
                writer.send(line).await.unwrap();
            }
        });

        let link = TcpRelayLink::connect(&addr.to_string()).await.unwrap();
        link.send_line("{\"type\":\"CANDIDATE\",\"from\":\"a\",\"to\":\"b\",\"candidate\":\"c\"}".into())
            .await
            .unwrap();
        let line = link.recv_line().await.unwrap();
        assert!(line.contains("\"CANDIDATE\""));

        link.close().await;
        assert!(matches!(
            link.send_line("late".into()).await,
            Err(RelayError::Closed)
        ));
        echo.abort();
    }
}
