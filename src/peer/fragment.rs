// src/peer/fragment.rs
//! Reassembly of fragmented text messages.
//!
//! Messages above the single-frame limit arrive as JSON fragment frames on
//! the control channel. Fragments are buffered per message id and joined by
//! index once all of them are in; partially assembled messages that stop
//! receiving fragments are dropped by the periodic sweep.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::protocol::FragmentFrame;
use crate::utils;

struct PendingMessage {
    total_chunks: u32,
    chunks: HashMap<u32, Vec<u8>>,
    last_update: Instant,
}

/// Per-connection buffer of partially reassembled messages
#[derive(Default)]
pub struct FragmentAssemblyBuffer {
    pending: HashMap<String, PendingMessage>,
}

impl FragmentAssemblyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept one fragment; returns the complete message text once the last
    /// missing fragment arrives.
    ///
    /// A duplicated index overwrites the previous copy rather than counting
    /// twice, so a retransmitted fragment can never complete a message early.
    pub fn accept(&mut self, frame: FragmentFrame) -> Option<String> {
        if frame.total_chunks == 0 || frame.chunk_index >= frame.total_chunks {
            warn!(
                "Dropping fragment {}/{} of {}: index out of range",
                frame.chunk_index, frame.total_chunks, frame.message_id
            );
            return None;
        }

        let chunk = match base64::decode(&frame.data) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("Dropping undecodable fragment of {}: {}", frame.message_id, e);
                return None;
            }
        };

        let entry = self
            .pending
            .entry(frame.message_id.clone())
            .or_insert_with(|| PendingMessage {
                total_chunks: frame.total_chunks,
                chunks: HashMap::new(),
                last_update: Instant::now(),
            });

        // The first fragment fixes the chunk count for this message id
        if frame.total_chunks != entry.total_chunks {
            warn!(
                "Fragment of {} disagrees on chunk count ({} vs {})",
                frame.message_id, frame.total_chunks, entry.total_chunks
            );
            return None;
        }

        entry.chunks.insert(frame.chunk_index, chunk);
        entry.last_update = Instant::now();

        if entry.chunks.len() as u32 != entry.total_chunks {
            return None;
        }

        let entry = self.pending.remove(&frame.message_id)?;
        let mut bytes = Vec::new();
        for index in 0..entry.total_chunks {
            bytes.extend_from_slice(&entry.chunks[&index]);
        }

        match String::from_utf8(bytes) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!("Reassembled message {} is not UTF-8: {}", frame.message_id, e);
                None
            }
        }
    }

    /// Drop partial messages that have not advanced within `max_age`
    pub fn sweep(&mut self, max_age: Duration) {
        let before = self.pending.len();
        self.pending
            .retain(|_, entry| !utils::is_expired(entry.last_update, max_age));
        let dropped = before - self.pending.len();
        if dropped > 0 {
            debug!("Swept {} stale partial message(s)", dropped);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
