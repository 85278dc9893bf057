// src/peer/transfer.rs
//! Inbound file reconstruction.
//!
//! A transfer starts with a `FILESTART` frame on the bulk channel. Small
//! files carry their whole payload inline on that frame; larger ones follow
//! with indexed `CHUNK` frames. Chunks may arrive out of order; the table
//! keeps them per transfer id and assembles once the final index lands.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::peer::PeerError;
use crate::protocol::{ChunkHeader, FileStart};
use crate::utils;

struct PendingTransfer {
    file_name: String,
    total_size: u64,
    total_chunks: u32,
    chunks: HashMap<u32, Vec<u8>>,
    last_update: Instant,
}

/// Progress notifications produced while a transfer reconstructs
#[derive(Debug, Clone, PartialEq)]
pub enum TransferUpdate {
    Progress { file_name: String, percent: u8 },
    Complete { file_name: String, data: Vec<u8> },
}

/// Per-connection table of in-flight inbound transfers
#[derive(Default)]
pub struct FileReassemblyTable {
    transfers: HashMap<String, PendingTransfer>,
}

impl FileReassemblyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new transfer from its `FILESTART` frame.
    ///
    /// Single-chunk transfers complete immediately from the inline payload.
    /// A repeated transfer id restarts the reconstruction from scratch.
    pub fn begin(&mut self, meta: FileStart, inline_payload: &[u8]) -> Option<TransferUpdate> {
        if meta.total_chunks == 1 {
            debug!(
                "Inline file '{}' ({} bytes) from single FILESTART frame",
                meta.file_name,
                inline_payload.len()
            );
            return Some(TransferUpdate::Complete {
                file_name: meta.file_name,
                data: inline_payload.to_vec(),
            });
        }

        if self.transfers.contains_key(&meta.transfer_id) {
            warn!("Restarting transfer {} on repeated FILESTART", meta.transfer_id);
        }
        self.transfers.insert(
            meta.transfer_id.clone(),
            PendingTransfer {
                file_name: meta.file_name,
                total_size: meta.total_size,
                total_chunks: meta.total_chunks,
                chunks: HashMap::new(),
                last_update: Instant::now(),
            },
        );
        None
    }

    /// Accept one `CHUNK` frame.
    ///
    /// Chunks arrive in any order; a duplicated index overwrites in place so
    /// it can never inflate the received count. The transfer completes once
    /// every distinct index is present, and assembly re-verifies index
    /// coverage before any data is delivered.
    pub fn accept_chunk(
        &mut self,
        header: ChunkHeader,
        payload: &[u8],
    ) -> Result<Option<TransferUpdate>, PeerError> {
        let entry = match self.transfers.get_mut(&header.transfer_id) {
            Some(entry) => entry,
            None => {
                warn!("Dropping chunk for unknown transfer {}", header.transfer_id);
                return Ok(None);
            }
        };

        if header.total != entry.total_chunks || header.index >= entry.total_chunks {
            warn!(
                "Dropping chunk {}/{} of {}: inconsistent with FILESTART ({})",
                header.index, header.total, header.transfer_id, entry.total_chunks
            );
            return Ok(None);
        }

        entry.chunks.insert(header.index, payload.to_vec());
        entry.last_update = Instant::now();

        if (entry.chunks.len() as u32) < entry.total_chunks {
            let percent = (entry.chunks.len() as u64 * 100 / entry.total_chunks as u64) as u8;
            return Ok(Some(TransferUpdate::Progress {
                file_name: entry.file_name.clone(),
                percent,
            }));
        }

        let entry = match self.transfers.remove(&header.transfer_id) {
            Some(entry) => entry,
            None => return Ok(None),
        };

        // Partial data is never delivered as if complete
        let missing = (0..entry.total_chunks)
            .filter(|index| !entry.chunks.contains_key(index))
            .count() as u32;
        if missing > 0 {
            warn!(
                "Transfer {} ended with {} missing chunk(s)",
                header.transfer_id, missing
            );
            return Err(PeerError::IncompleteTransfer {
                transfer_id: header.transfer_id,
                missing,
            });
        }

        let mut data = Vec::with_capacity(entry.total_size as usize);
        for index in 0..entry.total_chunks {
            data.extend_from_slice(&entry.chunks[&index]);
        }
        debug!(
            "Reconstructed file '{}' ({} bytes, {} chunks)",
            entry.file_name,
            data.len(),
            entry.total_chunks
        );
        Ok(Some(TransferUpdate::Complete {
            file_name: entry.file_name,
            data,
        }))
    }

    /// Drop transfers that have not received a chunk within `max_age`
    pub fn sweep(&mut self, max_age: Duration) {
        let before = self.transfers.len();
        self.transfers
            .retain(|_, entry| !utils::is_expired(entry.last_update, max_age));
        let dropped = before - self.transfers.len();
        if dropped > 0 {
            debug!("Swept {} abandoned transfer(s)", dropped);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.transfers.len()
    }
}
