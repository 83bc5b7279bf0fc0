//! Upload work queue

use crate::delta::{changed_ranges, ByteRange, DeltaStatus, FileDelta};
use crate::signature::CHUNK_SIZE;
use crossbeam_queue::SegQueue;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One file waiting to be sent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferItem {
    /// Path relative to the project root
    pub path: String,

    pub abs_path: PathBuf,

    pub status: DeltaStatus,

    /// Current file size
    pub size: u64,

    /// Bytes the plan expects to send
    pub transfer_size: u64,

    /// Changed ranges for a partial upload, `None` for a whole-file upload
    pub ranges: Option<Vec<ByteRange>>,

    /// On-demand retries already spent
    pub retries: u32,

    /// Content hash the plan was computed from; the upload is refused if the
    /// file no longer matches it after sending
    #[serde(default)]
    pub expected_hash: Option<String>,

    /// Bytes of an interrupted whole-file upload already on the remote
    #[serde(default)]
    pub resume_offset: u64,
}

impl TransferItem {
    /// Build an item from a delta; `None` if the delta sends nothing
    pub fn from_delta(root: &Path, delta: &FileDelta) -> Option<Self> {
        if !delta.status.transfers_data() {
            return None;
        }
        Some(Self {
            path: delta.path.clone(),
            abs_path: root.join(&delta.path),
            status: delta.status,
            size: delta.total_size,
            transfer_size: delta.transfer_size,
            ranges: changed_ranges(delta, CHUNK_SIZE),
            retries: 0,
            expected_hash: delta.full_hash.clone(),
            resume_offset: 0,
        })
    }

    /// Drop the ranges and send the whole file instead
    pub fn into_whole(mut self) -> Self {
        self.ranges = None;
        self.transfer_size = self.size;
        self
    }

    /// Continue a whole-file upload from `offset`
    pub fn resume_at(mut self, offset: u64) -> Self {
        self.ranges = None;
        self.resume_offset = offset.min(self.size);
        self.transfer_size = self.size - self.resume_offset;
        self
    }

    /// Ranges to hand to the connection; `None` sends the whole file
    pub fn send_ranges(&self) -> Option<Vec<ByteRange>> {
        if self.ranges.is_none() && self.resume_offset > 0 {
            return Some(vec![ByteRange::new(
                self.resume_offset,
                self.size - self.resume_offset,
            )]);
        }
        self.ranges.clone()
    }
}

/// Lock-free FIFO shared by upload workers
#[derive(Debug, Default)]
pub struct TransferQueue {
    items: SegQueue<TransferItem>,
}

impl TransferQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: TransferItem) {
        self.items.push(item);
    }

    pub fn pop(&self) -> Option<TransferItem> {
        self.items.pop()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Take every remaining item in queue order
    pub fn drain(&self) -> Vec<TransferItem> {
        std::iter::from_fn(|| self.items.pop()).collect()
    }
}

impl FromIterator<TransferItem> for TransferQueue {
    fn from_iter<I: IntoIterator<Item = TransferItem>>(iter: I) -> Self {
        let queue = Self::new();
        for item in iter {
            queue.push(item);
        }
        queue
    }
}
