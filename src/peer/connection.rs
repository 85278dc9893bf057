// src/peer/connection.rs
//! One direct connection to a remote peer.
//!
//! Every connection runs two sub-channels: an ordered, reliable control
//! channel for text messages and negotiation chatter, and an unordered bulk
//! channel with a bounded retransmit cap for file chunks. The connection is
//! ready only once both channels are open, and readiness is announced to
//! the application exactly once.
//!
//! Outbound sends respect a buffered-bytes high-water mark: a frame waits
//! for the channel's queue to drain below the mark, but never for more than
//! five seconds, so a stuck channel degrades to best-effort instead of
//! wedging the sender.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::constants::{
    BUFFER_HIGH_WATER_MARK, BUFFER_POLL_INTERVAL, BUFFER_POLL_LIMIT, BUFFER_WAIT_WARN_THRESHOLD,
    BULK_CHANNEL_LABEL, BULK_MAX_RETRANSMITS, CHANNEL_STATE_POLL_INTERVAL, CHUNK_BURST_PAUSE,
    CHUNK_BURST_SIZE, CONTROL_CHANNEL_LABEL, FILE_CHUNK_SIZE, FRAGMENT_CHUNK_SIZE,
    INLINE_FILE_LIMIT, INTER_FRAGMENT_DELAY, SINGLE_FRAME_LIMIT, STALE_ENTRY_AGE, SWEEP_INTERVAL,
    TRANSFER_ID_LENGTH,
};
use crate::peer::fragment::FragmentAssemblyBuffer;
use crate::peer::transfer::{FileReassemblyTable, TransferUpdate};
use crate::peer::PeerError;
use crate::protocol::{self, ChunkHeader, FileStart, FragmentFrame, SignalMessage};
use crate::transport::{ChannelConfig, ChannelState, ConnectionEngine, DataChannel};
use crate::types::ClientEvent;
use crate::utils;

/// Lifecycle of a peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Offer/answer exchange in progress, no channel open yet
    Negotiating,
    /// Only the control channel is open
    ControlOpen,
    /// Only the bulk channel is open
    BulkOpen,
    /// Both channels open; direct sends allowed
    BothOpen,
    /// A channel closed after readiness, or the connection was shut down
    Closed,
}

/// A dual-channel direct connection to one remote peer
pub struct PeerConnection {
    local_peer: String,
    remote_peer: String,
    engine: Arc<dyn ConnectionEngine>,
    control: RwLock<Option<Arc<dyn DataChannel>>>,
    bulk: RwLock<Option<Arc<dyn DataChannel>>>,
    state: Mutex<ConnectionState>,
    ready_fired: AtomicBool,
    disconnect_fired: AtomicBool,
    outbound: mpsc::Sender<SignalMessage>,
    events: mpsc::Sender<ClientEvent>,
    fragments: Mutex<FragmentAssemblyBuffer>,
    transfers: Mutex<FileReassemblyTable>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PeerConnection {
    pub fn new(
        local_peer: String,
        remote_peer: String,
        engine: Arc<dyn ConnectionEngine>,
        outbound: mpsc::Sender<SignalMessage>,
        events: mpsc::Sender<ClientEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            local_peer,
            remote_peer,
            engine,
            control: RwLock::new(None),
            bulk: RwLock::new(None),
            state: Mutex::new(ConnectionState::Negotiating),
            ready_fired: AtomicBool::new(false),
            disconnect_fired: AtomicBool::new(false),
            outbound,
            events,
            fragments: Mutex::new(FragmentAssemblyBuffer::new()),
            transfers: Mutex::new(FileReassemblyTable::new()),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn remote_peer(&self) -> &str {
        &self.remote_peer
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.lock().await
    }

    pub fn is_ready(&self) -> bool {
        self.ready_fired.load(Ordering::Relaxed)
            && !self.disconnect_fired.load(Ordering::Relaxed)
    }

    /// Start an outbound connection: create both sub-channels and send the
    /// offer through the relay.
    pub async fn initiate(self: &Arc<Self>) -> Result<(), PeerError> {
        let control = self
            .engine
            .create_channel(
                CONTROL_CHANNEL_LABEL,
                ChannelConfig {
                    ordered: true,
                    max_retransmits: None,
                },
            )
            .await?;
        let bulk = self
            .engine
            .create_channel(
                BULK_CHANNEL_LABEL,
                ChannelConfig {
                    ordered: false,
                    max_retransmits: Some(BULK_MAX_RETRANSMITS),
                },
            )
            .await?;
        self.attach_control(control).await;
        self.attach_bulk(bulk).await;

        let sdp = self.engine.create_offer().await?;
        self.outbound
            .send(SignalMessage::Offer {
                from: self.local_peer.clone(),
                to: self.remote_peer.clone(),
                sdp,
            })
            .await
            .map_err(|_| PeerError::NegotiationFailed(self.remote_peer.clone()))?;

        self.spawn_monitor().await;
        self.spawn_sweeper().await;
        debug!("Sent offer to {}", self.remote_peer);
        Ok(())
    }

    /// Handle one negotiation message addressed to this connection
    pub async fn handle_signal(self: &Arc<Self>, msg: SignalMessage) -> Result<(), PeerError> {
        match msg {
            SignalMessage::Offer { sdp, .. } => self.handle_offer(&sdp).await,
            SignalMessage::Answer { sdp, .. } => {
                self.engine.set_remote_description(&sdp).await?;
                Ok(())
            }
            SignalMessage::Candidate { candidate, .. } => {
                self.engine.add_candidate(&candidate).await?;
                Ok(())
            }
            other => {
                debug!("Connection ignoring non-negotiation message: {:?}", other);
                Ok(())
            }
        }
    }

    async fn handle_offer(self: &Arc<Self>, sdp: &str) -> Result<(), PeerError> {
        self.engine.set_remote_description(sdp).await?;
        let answer = self.engine.create_answer().await?;
        self.outbound
            .send(SignalMessage::Answer {
                from: self.local_peer.clone(),
                to: self.remote_peer.clone(),
                sdp: answer,
            })
            .await
            .map_err(|_| PeerError::NegotiationFailed(self.remote_peer.clone()))?;

        // The initiator creates both channels; collect our halves as they
        // show up, without blocking the signal dispatcher.
        let conn = self.clone();
        self.tasks.lock().await.push(tokio::spawn(async move {
            match conn.engine.take_incoming_channel(CONTROL_CHANNEL_LABEL).await {
                Ok(channel) => conn.attach_control(channel).await,
                Err(e) => error!("No control channel from {}: {}", conn.remote_peer, e),
            }
            match conn.engine.take_incoming_channel(BULK_CHANNEL_LABEL).await {
                Ok(channel) => conn.attach_bulk(channel).await,
                Err(e) => error!("No bulk channel from {}: {}", conn.remote_peer, e),
            }
        }));

        self.spawn_monitor().await;
        self.spawn_sweeper().await;
        debug!("Answered offer from {}", self.remote_peer);
        Ok(())
    }

    /// Send one text message, fragmenting it when it exceeds the
    /// single-frame limit. Only the control channel needs to be open;
    /// messages do not wait for the bulk channel.
    pub async fn send_message(&self, text: &str) -> Result<(), PeerError> {
        let control = self
            .open_channel(&self.control)
            .await
            .ok_or_else(|| PeerError::NotReady(self.remote_peer.clone()))?;
        let bytes = text.as_bytes();

        if bytes.len() <= SINGLE_FRAME_LIMIT {
            wait_for_buffer_low(control.as_ref()).await;
            control.send(bytes.to_vec()).await?;
            return Ok(());
        }

        let message_id = utils::random_string(TRANSFER_ID_LENGTH);
        let frames = encode_fragments(&message_id, bytes)?;
        let total = frames.len();
        debug!(
            "Fragmenting {} byte message to {} into {} frames",
            bytes.len(),
            self.remote_peer,
            total
        );

        for (index, encoded) in frames.into_iter().enumerate() {
            wait_for_buffer_low(control.as_ref()).await;
            control.send(encoded).await?;
            if index + 1 < total {
                tokio::time::sleep(INTER_FRAGMENT_DELAY).await;
            }
        }
        Ok(())
    }

    /// Send a file over the bulk channel.
    ///
    /// Small files ride inline on the `FILESTART` frame; larger ones are
    /// split into fixed-size chunks sent in short bursts, with the pause
    /// between bursts stretched as the channel's queue fills.
    pub async fn send_file(&self, file_name: &str, data: &[u8]) -> Result<(), PeerError> {
        // Degraded mode: a lost bulk channel routes file frames over the
        // control channel instead of failing the transfer.
        let bulk = match self.open_channel(&self.bulk).await {
            Some(channel) => channel,
            None => match self.open_channel(&self.control).await {
                Some(channel) => {
                    warn!(
                        "Bulk channel to {} unavailable; sending '{}' over control",
                        self.remote_peer, file_name
                    );
                    channel
                }
                None => return Err(PeerError::NotReady(self.remote_peer.clone())),
            },
        };
        let transfer_id = utils::random_string(TRANSFER_ID_LENGTH);

        if data.len() <= INLINE_FILE_LIMIT {
            let meta = FileStart {
                transfer_id,
                file_name: file_name.to_string(),
                total_size: data.len() as u64,
                total_chunks: 1,
            };
            wait_for_buffer_low(bulk.as_ref()).await;
            bulk.send(protocol::encode_file_start(&meta, data)).await?;
            self.emit_progress(file_name, 100).await;
            return Ok(());
        }

        let total_chunks = data.len().div_ceil(FILE_CHUNK_SIZE) as u32;
        let meta = FileStart {
            transfer_id: transfer_id.clone(),
            file_name: file_name.to_string(),
            total_size: data.len() as u64,
            total_chunks,
        };
        info!(
            "Sending '{}' ({} bytes, {} chunks) to {}",
            file_name,
            data.len(),
            total_chunks,
            self.remote_peer
        );
        wait_for_buffer_low(bulk.as_ref()).await;
        bulk.send(protocol::encode_file_start(&meta, &[])).await?;

        for (index, chunk) in data.chunks(FILE_CHUNK_SIZE).enumerate() {
            let header = ChunkHeader {
                transfer_id: transfer_id.clone(),
                index: index as u32,
                total: total_chunks,
            };

            wait_for_buffer_low(bulk.as_ref()).await;
            bulk.send(protocol::encode_chunk(&header, chunk)).await?;

            let percent = ((index as u64 + 1) * 100 / total_chunks as u64) as u8;
            self.emit_progress(file_name, percent).await;

            // Burst pacing: a micro-pause every few chunks, stretched when
            // the channel queue is already deep.
            if (index + 1) % CHUNK_BURST_SIZE == 0 && (index as u32) + 1 < total_chunks {
                let fill = bulk.buffered_amount() * 4 / BUFFER_HIGH_WATER_MARK;
                tokio::time::sleep(CHUNK_BURST_PAUSE * (1 + fill as u32)).await;
            }
        }
        Ok(())
    }

    /// Tear down both channels and the background tasks
    pub async fn close(&self) {
        *self.state.lock().await = ConnectionState::Closed;
        self.engine.close().await;
        let tasks = {
            let mut tasks = self.tasks.lock().await;
            std::mem::take(&mut *tasks)
        };
        for task in tasks {
            task.abort();
        }
        debug!("Closed connection to {}", self.remote_peer);
    }

    async fn attach_control(self: &Arc<Self>, channel: Arc<dyn DataChannel>) {
        *self.control.write().await = Some(channel.clone());
        let conn = self.clone();
        self.tasks.lock().await.push(tokio::spawn(async move {
            while let Some(frame) = channel.recv().await {
                conn.handle_frame(frame).await;
            }
            debug!("Control channel to {} ended", conn.remote_peer);
        }));
    }

    async fn attach_bulk(self: &Arc<Self>, channel: Arc<dyn DataChannel>) {
        *self.bulk.write().await = Some(channel.clone());
        let conn = self.clone();
        self.tasks.lock().await.push(tokio::spawn(async move {
            while let Some(frame) = channel.recv().await {
                conn.handle_frame(frame).await;
            }
            debug!("Bulk channel to {} ended", conn.remote_peer);
        }));
    }

    /// Classify and dispatch one inbound frame from either channel.
    ///
    /// File frames are recognized by prefix before any text interpretation,
    /// so a degraded-mode transfer over the control channel still lands in
    /// the reconstruction table.
    async fn handle_frame(&self, frame: Vec<u8>) {
        if protocol::is_file_start(&frame) || protocol::is_chunk(&frame) {
            self.handle_file_frame(frame).await;
            return;
        }

        if let Some(fragment) = FragmentFrame::parse(&frame) {
            let complete = self.fragments.lock().await.accept(fragment);
            if let Some(text) = complete {
                self.emit_message(text).await;
            }
            return;
        }

        match String::from_utf8(frame) {
            Ok(text) => self.emit_message(text).await,
            Err(e) => warn!("Non-UTF-8 text frame from {}: {}", self.remote_peer, e),
        }
    }

    async fn handle_file_frame(&self, frame: Vec<u8>) {
        let update = if protocol::is_file_start(&frame) {
            match protocol::parse_file_start(&frame) {
                Ok((meta, payload)) => self.transfers.lock().await.begin(meta, payload),
                Err(e) => {
                    warn!("Bad FILESTART from {}: {}", self.remote_peer, e);
                    return;
                }
            }
        } else if protocol::is_chunk(&frame) {
            match protocol::parse_chunk(&frame) {
                Ok((header, payload)) => {
                    match self.transfers.lock().await.accept_chunk(header, payload) {
                        Ok(update) => update,
                        Err(e) => {
                            error!("Transfer from {} failed: {}", self.remote_peer, e);
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!("Bad CHUNK from {}: {}", self.remote_peer, e);
                    return;
                }
            }
        } else {
            return;
        };

        match update {
            Some(TransferUpdate::Progress { file_name, percent }) => {
                self.emit_progress(&file_name, percent).await;
            }
            Some(TransferUpdate::Complete { file_name, data }) => {
                self.emit_progress(&file_name, 100).await;
                let _ = self
                    .events
                    .send(ClientEvent::FileReceived {
                        peer: self.remote_peer.clone(),
                        file_name,
                        data,
                    })
                    .await;
            }
            None => {}
        }
    }

    async fn emit_message(&self, text: String) {
        let _ = self
            .events
            .send(ClientEvent::MessageReceived {
                peer: self.remote_peer.clone(),
                text,
            })
            .await;
    }

    async fn emit_progress(&self, file_name: &str, percent: u8) {
        let _ = self
            .events
            .send(ClientEvent::FileProgress {
                peer: self.remote_peer.clone(),
                file_name: file_name.to_string(),
                percent,
            })
            .await;
    }

    async fn open_channel(
        &self,
        slot: &RwLock<Option<Arc<dyn DataChannel>>>,
    ) -> Option<Arc<dyn DataChannel>> {
        slot.read()
            .await
            .clone()
            .filter(|channel| channel.ready_state() == ChannelState::Open)
    }

    /// Poll channel states, announce readiness once, and announce the loss
    /// of a previously ready connection once.
    async fn spawn_monitor(self: &Arc<Self>) {
        let conn = self.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(CHANNEL_STATE_POLL_INTERVAL).await;

                let control_state = channel_state(&conn.control).await;
                let bulk_state = channel_state(&conn.bulk).await;

                let next = match (control_state, bulk_state) {
                    (Some(ChannelState::Closed), _) | (_, Some(ChannelState::Closed)) => {
                        ConnectionState::Closed
                    }
                    (Some(ChannelState::Open), Some(ChannelState::Open)) => {
                        ConnectionState::BothOpen
                    }
                    (Some(ChannelState::Open), _) => ConnectionState::ControlOpen,
                    (_, Some(ChannelState::Open)) => ConnectionState::BulkOpen,
                    _ => ConnectionState::Negotiating,
                };
                *conn.state.lock().await = next;

                match next {
                    ConnectionState::BothOpen => {
                        if !conn.ready_fired.swap(true, Ordering::Relaxed) {
                            info!("Connection to {} ready", conn.remote_peer);
                            let _ = conn
                                .events
                                .send(ClientEvent::ConnectionReady {
                                    peer: conn.remote_peer.clone(),
                                })
                                .await;
                        }
                    }
                    ConnectionState::Closed => {
                        if conn.ready_fired.load(Ordering::Relaxed)
                            && !conn.disconnect_fired.swap(true, Ordering::Relaxed)
                        {
                            info!("Connection to {} lost", conn.remote_peer);
                            let _ = conn
                                .events
                                .send(ClientEvent::PeerDisconnected {
                                    peer: conn.remote_peer.clone(),
                                })
                                .await;
                        }
                        break;
                    }
                    _ => {}
                }
            }
        });
        self.tasks.lock().await.push(task);
    }

    /// Periodically drop abandoned partial messages and transfers
    async fn spawn_sweeper(self: &Arc<Self>) {
        let conn = self.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(SWEEP_INTERVAL).await;
                conn.fragments.lock().await.sweep(STALE_ENTRY_AGE);
                conn.transfers.lock().await.sweep(STALE_ENTRY_AGE);
                if *conn.state.lock().await == ConnectionState::Closed {
                    break;
                }
            }
        });
        self.tasks.lock().await.push(task);
    }
}

async fn channel_state(slot: &RwLock<Option<Arc<dyn DataChannel>>>) -> Option<ChannelState> {
    slot.read().await.as_ref().map(|c| c.ready_state())
}

/// Split an oversized text payload into encoded fragment frames.
///
/// Chunks are sized for their base64-encoded form, so every emitted frame
/// fits within the single-frame limit.
fn encode_fragments(message_id: &str, bytes: &[u8]) -> Result<Vec<Vec<u8>>, PeerError> {
    let chunks: Vec<&[u8]> = bytes.chunks(FRAGMENT_CHUNK_SIZE).collect();
    let total = chunks.len() as u32;
    chunks
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| {
            let frame = FragmentFrame::new(message_id.to_string(), index as u32, total, chunk);
            serde_json::to_vec(&frame)
                .map_err(|e| PeerError::from(protocol::ProtocolError::from(e)))
        })
        .collect()
}

/// Wait for the channel's send queue to drain below the high-water mark.
///
/// Bounded at five seconds; on timeout the caller proceeds anyway, trading
/// memory pressure for liveness. Waits long enough to matter are logged.
pub(crate) async fn wait_for_buffer_low(channel: &dyn DataChannel) {
    if channel.buffered_amount() < BUFFER_HIGH_WATER_MARK {
        return;
    }

    let started = tokio::time::Instant::now();
    for _ in 0..BUFFER_POLL_LIMIT {
        tokio::time::sleep(BUFFER_POLL_INTERVAL).await;
        if channel.buffered_amount() < BUFFER_HIGH_WATER_MARK {
            if started.elapsed() > BUFFER_WAIT_WARN_THRESHOLD {
                warn!(
                    "Channel '{}' drained after {:?} of back-pressure",
                    channel.label(),
                    started.elapsed()
                );
            }
            return;
        }
    }
    warn!(
        "Channel '{}' still above high-water mark after {:?}; sending anyway",
        channel.label(),
        started.elapsed()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockDataChannel, MockEngine, MockHub};
    use std::time::Duration;
    use tokio::time::timeout;

    struct Side {
        conn: Arc<PeerConnection>,
        events: mpsc::Receiver<ClientEvent>,
        _signals: JoinHandle<()>,
    }

    /// Two fully wired connections with signaling pumped between them
    async fn connected_pair() -> (Side, Side) {
        let hub = MockHub::new();
        let alice_engine = Arc::new(MockEngine::new("alice".into(), "bob".into(), hub.clone()));
        let bob_engine = Arc::new(MockEngine::new("bob".into(), "alice".into(), hub));

        let (a_out_tx, mut a_out_rx) = mpsc::channel(64);
        let (b_out_tx, mut b_out_rx) = mpsc::channel(64);
        let (a_ev_tx, a_ev_rx) = mpsc::channel(256);
        let (b_ev_tx, b_ev_rx) = mpsc::channel(256);

        let alice = PeerConnection::new("alice".into(), "bob".into(), alice_engine, a_out_tx, a_ev_tx);
        let bob = PeerConnection::new("bob".into(), "alice".into(), bob_engine, b_out_tx, b_ev_tx);

        let bob_for_pump = bob.clone();
        let alice_for_pump = alice.clone();
        let pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(msg) = a_out_rx.recv() => {
                        let _ = bob_for_pump.handle_signal(msg).await;
                    }
                    Some(msg) = b_out_rx.recv() => {
                        let _ = alice_for_pump.handle_signal(msg).await;
                    }
                    else => break,
                }
            }
        });

        alice.initiate().await.unwrap();

        let mut a = Side {
            conn: alice,
            events: a_ev_rx,
            _signals: pump,
        };
        let pump_done = tokio::spawn(async {});
        let mut b = Side {
            conn: bob,
            events: b_ev_rx,
            _signals: pump_done,
        };

        assert_eq!(
            next_event(&mut a).await,
            ClientEvent::ConnectionReady { peer: "bob".into() }
        );
        assert_eq!(
            next_event(&mut b).await,
            ClientEvent::ConnectionReady { peer: "alice".into() }
        );
        (a, b)
    }

    async fn next_event(side: &mut Side) -> ClientEvent {
        timeout(Duration::from_secs(10), side.events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_ready_fires_once_on_both_sides() {
        let (a, b) = connected_pair().await;
        assert!(a.conn.is_ready());
        assert!(b.conn.is_ready());
        assert_eq!(a.conn.state().await, ConnectionState::BothOpen);
    }

    #[tokio::test]
    async fn test_small_message_round_trip() {
        let (a, mut b) = connected_pair().await;

        a.conn.send_message("hello bob").await.unwrap();
        assert_eq!(
            next_event(&mut b).await,
            ClientEvent::MessageReceived {
                peer: "alice".into(),
                text: "hello bob".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_large_message_fragments_and_reassembles() {
        let (a, mut b) = connected_pair().await;

        let text: String = "x".repeat(SINGLE_FRAME_LIMIT * 2 + 123);
        a.conn.send_message(&text).await.unwrap();

        match next_event(&mut b).await {
            ClientEvent::MessageReceived { peer, text: got } => {
                assert_eq!(peer, "alice");
                assert_eq!(got, text);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_small_file_inline() {
        let (a, mut b) = connected_pair().await;

        a.conn.send_file("note.txt", b"tiny payload").await.unwrap();

        // Receiver sees one progress event and the file itself
        assert_eq!(
            next_event(&mut b).await,
            ClientEvent::FileProgress {
                peer: "alice".into(),
                file_name: "note.txt".into(),
                percent: 100,
            }
        );
        assert_eq!(
            next_event(&mut b).await,
            ClientEvent::FileReceived {
                peer: "alice".into(),
                file_name: "note.txt".into(),
                data: b"tiny payload".to_vec(),
            }
        );
    }

    #[tokio::test]
    async fn test_large_file_chunks_with_progress() {
        let (a, mut b) = connected_pair().await;

        let data: Vec<u8> = (0..FILE_CHUNK_SIZE * 4 + 17)
            .map(|i| (i % 251) as u8)
            .collect();
        a.conn.send_file("blob.bin", &data).await.unwrap();

        let mut last_percent = 0u8;
        loop {
            match next_event(&mut b).await {
                ClientEvent::FileProgress { percent, .. } => {
                    assert!(percent >= last_percent);
                    last_percent = percent;
                }
                ClientEvent::FileReceived {
                    file_name, data: got, ..
                } => {
                    assert_eq!(file_name, "blob.bin");
                    assert_eq!(got, data);
                    break;
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert_eq!(last_percent, 100);
    }

    #[test]
    fn test_fragment_frames_stay_within_single_frame_limit() {
        let text = "y".repeat(50_000);
        let frames = encode_fragments("msg00001", text.as_bytes()).unwrap();

        assert!(frames.len() > 1);
        for frame in &frames {
            assert!(
                frame.len() <= SINGLE_FRAME_LIMIT,
                "fragment frame of {} bytes exceeds the single-frame limit",
                frame.len()
            );
        }
    }

    #[tokio::test]
    async fn test_message_send_gated_on_control_channel_only() {
        let hub = MockHub::new();
        let engine = Arc::new(MockEngine::new("alice".into(), "bob".into(), hub));
        let (out_tx, _out_rx) = mpsc::channel(64);
        let (ev_tx, _ev_rx) = mpsc::channel(64);
        let conn = PeerConnection::new("alice".into(), "bob".into(), engine, out_tx, ev_tx);

        let (near, far) = MockDataChannel::pair(CONTROL_CHANNEL_LABEL);
        conn.attach_control(near).await;

        // Bulk channel absent and readiness never announced, yet text
        // messages flow as soon as the control channel is open.
        assert!(!conn.is_ready());
        conn.send_message("early bird").await.unwrap();
        assert_eq!(far.recv().await.unwrap(), b"early bird".to_vec());
    }

    #[tokio::test]
    async fn test_send_before_ready_is_rejected() {
        let hub = MockHub::new();
        let engine = Arc::new(MockEngine::new("alice".into(), "bob".into(), hub));
        let (out_tx, _out_rx) = mpsc::channel(64);
        let (ev_tx, _ev_rx) = mpsc::channel(64);
        let conn = PeerConnection::new("alice".into(), "bob".into(), engine, out_tx, ev_tx);

        assert!(matches!(
            conn.send_message("too soon").await,
            Err(PeerError::NotReady(_))
        ));
        assert!(matches!(
            conn.send_file("f", b"x").await,
            Err(PeerError::NotReady(_))
        ));
    }

    #[tokio::test]
    async fn test_disconnect_event_after_channel_close() {
        let (a, mut b) = connected_pair().await;

        a.conn.close().await;
        assert_eq!(
            next_event(&mut b).await,
            ClientEvent::PeerDisconnected {
                peer: "alice".into(),
            }
        );
        assert!(!b.conn.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backpressure_wait_gives_up_after_cap() {
        let (channel, _other) = MockDataChannel::pair("bulk");
        channel.pin_buffered_amount(BUFFER_HIGH_WATER_MARK * 8);

        let started = tokio::time::Instant::now();
        wait_for_buffer_low(channel.as_ref()).await;

        // Never blocks past the bounded poll window
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(5));
        assert!(waited < Duration::from_secs(6));
    }

    #[tokio::test]
    async fn test_backpressure_wait_skipped_when_drained() {
        let (channel, _other) = MockDataChannel::pair("bulk");
        let started = std::time::Instant::now();
        wait_for_buffer_low(channel.as_ref()).await;
        assert!(started.elapsed() < Duration::from_millis(100));
    }
}
