// src/transport/mock.rs
//! Mock implementations for testing and simulation.
//!
//! Provides in-memory data channels and a loopback negotiation engine that
//! pair up through a shared hub instead of a real WebRTC stack. Used by the
//! test suite and the demo binary.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::transport::{
    ChannelConfig, ChannelState, ConnectionEngine, DataChannel, EngineFactory, TransportError,
};

const PAIRING_POLL_INTERVAL: Duration = Duration::from_millis(10);
const PAIRING_POLL_LIMIT: u32 = 500;

/// In-memory data channel; one half of a connected pair
pub struct MockDataChannel {
    label: String,
    tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    rx: Mutex<mpsc::Receiver<Vec<u8>>>,
    /// Shared with the other half so a close tears down both ends
    open: Arc<AtomicBool>,
    buffered: AtomicUsize,
    /// When set, `buffered_amount` reports this fixed value (back-pressure tests)
    pinned_buffered: AtomicUsize,
    pinned: AtomicBool,
}

impl MockDataChannel {
    /// Create a connected pair of channels with the given label
    pub fn pair(label: &str) -> (Arc<Self>, Arc<Self>) {
        let (tx_a, rx_a) = mpsc::channel(256);
        let (tx_b, rx_b) = mpsc::channel(256);
        let open = Arc::new(AtomicBool::new(true));

        let a = Arc::new(Self {
            label: label.to_string(),
            tx: Mutex::new(Some(tx_b)), // A sends into B's receiver
            rx: Mutex::new(rx_a),
            open: open.clone(),
            buffered: AtomicUsize::new(0),
            pinned_buffered: AtomicUsize::new(0),
            pinned: AtomicBool::new(false),
        });
        let b = Arc::new(Self {
            label: label.to_string(),
            tx: Mutex::new(Some(tx_a)),
            rx: Mutex::new(rx_b),
            open,
            buffered: AtomicUsize::new(0),
            pinned_buffered: AtomicUsize::new(0),
            pinned: AtomicBool::new(false),
        });

        (a, b)
    }

    /// Pin `buffered_amount` to a fixed value to simulate a congested channel
    pub fn pin_buffered_amount(&self, value: usize) {
        self.pinned_buffered.store(value, Ordering::Relaxed);
        self.pinned.store(true, Ordering::Relaxed);
    }
}

#[async_trait]
impl DataChannel for MockDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn ready_state(&self) -> ChannelState {
        if self.open.load(Ordering::Relaxed) {
            ChannelState::Open
        } else {
            ChannelState::Closed
        }
    }

    fn buffered_amount(&self) -> usize {
        if self.pinned.load(Ordering::Relaxed) {
            self.pinned_buffered.load(Ordering::Relaxed)
        } else {
            self.buffered.load(Ordering::Relaxed)
        }
    }

    async fn send(&self, data: Vec<u8>) -> Result<(), TransportError> {
        if !self.open.load(Ordering::Relaxed) {
            return Err(TransportError::ChannelClosed);
        }

        let len = data.len();
        self.buffered.fetch_add(len, Ordering::Relaxed);
        let result = {
            let tx = self.tx.lock().await;
            match tx.as_ref() {
                Some(tx) => tx
                    .send(data)
                    .await
                    .map_err(|_| TransportError::ChannelClosed),
                None => Err(TransportError::ChannelClosed),
            }
        };
        self.buffered.fetch_sub(len, Ordering::Relaxed);
        result
    }

    async fn recv(&self) -> Option<Vec<u8>> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }

    async fn close(&self) {
        self.open.store(false, Ordering::Relaxed);
        // Dropping the sender ends the other half's recv loop
        self.tx.lock().await.take();
    }
}

/// Pairing hub shared by every mock engine in one test/demo universe.
///
/// When an engine creates a channel, the far half is parked here under a
/// `(owner, peer, label)` key until the owning engine picks it up.
#[derive(Default)]
pub struct MockHub {
    pending: RwLock<HashMap<String, Arc<MockDataChannel>>>,
}

impl MockHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn key(owner: &str, peer: &str, label: &str) -> String {
        format!("{}:{}:{}", owner, peer, label)
    }
}

/// Loopback negotiation engine for one local/remote pair
pub struct MockEngine {
    local_peer: String,
    remote_peer: String,
    hub: Arc<MockHub>,
    created: Mutex<Vec<Arc<MockDataChannel>>>,
    remote_description: Mutex<Option<String>>,
    candidates: Mutex<Vec<String>>,
}

impl MockEngine {
    pub fn new(local_peer: String, remote_peer: String, hub: Arc<MockHub>) -> Self {
        Self {
            local_peer,
            remote_peer,
            hub,
            created: Mutex::new(Vec::new()),
            remote_description: Mutex::new(None),
            candidates: Mutex::new(Vec::new()),
        }
    }

    /// Number of candidates applied so far (assertion helper)
    pub async fn candidate_count(&self) -> usize {
        self.candidates.lock().await.len()
    }
}

#[async_trait]
impl ConnectionEngine for MockEngine {
    async fn create_offer(&self) -> Result<String, TransportError> {
        Ok(format!("offer:{}:{}", self.local_peer, self.remote_peer))
    }

    async fn create_answer(&self) -> Result<String, TransportError> {
        if self.remote_description.lock().await.is_none() {
            return Err(TransportError::Negotiation(
                "No remote offer to answer".into(),
            ));
        }
        Ok(format!("answer:{}:{}", self.local_peer, self.remote_peer))
    }

    async fn set_remote_description(&self, description: &str) -> Result<(), TransportError> {
        *self.remote_description.lock().await = Some(description.to_string());
        Ok(())
    }

    async fn add_candidate(&self, candidate: &str) -> Result<(), TransportError> {
        self.candidates.lock().await.push(candidate.to_string());
        Ok(())
    }

    async fn create_channel(
        &self,
        label: &str,
        _config: ChannelConfig,
    ) -> Result<Arc<dyn DataChannel>, TransportError> {
        let (ours, theirs) = MockDataChannel::pair(label);

        let key = MockHub::key(&self.remote_peer, &self.local_peer, label);
        self.hub.pending.write().await.insert(key, theirs);
        self.created.lock().await.push(ours.clone());

        Ok(ours)
    }

    async fn take_incoming_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn DataChannel>, TransportError> {
        let key = MockHub::key(&self.local_peer, &self.remote_peer, label);

        for _ in 0..PAIRING_POLL_LIMIT {
            if let Some(channel) = self.hub.pending.write().await.remove(&key) {
                self.created.lock().await.push(channel.clone());
                return Ok(channel);
            }
            tokio::time::sleep(PAIRING_POLL_INTERVAL).await;
        }

        Err(TransportError::ConnectionFailed(format!(
            "No incoming '{}' channel from {}",
            label, self.remote_peer
        )))
    }

    async fn close(&self) {
        let channels = self.created.lock().await.clone();
        for channel in channels {
            channel.close().await;
        }
    }
}

/// Factory producing loopback engines wired through one hub
pub struct MockEngineFactory {
    hub: Arc<MockHub>,
}

impl MockEngineFactory {
    pub fn new(hub: Arc<MockHub>) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl EngineFactory for MockEngineFactory {
    async fn new_engine(
        &self,
        local_peer: &str,
        remote_peer: &str,
    ) -> Result<Arc<dyn ConnectionEngine>, TransportError> {
        Ok(Arc::new(MockEngine::new(
            local_peer.to_string(),
            remote_peer.to_string(),
            self.hub.clone(),
        )))
    }
}
