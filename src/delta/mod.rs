//! Delta planning: which files changed and how many bytes must move

pub mod analyze;
pub mod ranges;

pub use analyze::{DeltaPlanner, MIN_DELTA_FILE_SIZE};
pub use ranges::{changed_ranges, ByteRange};

use serde::{Deserialize, Serialize};

/// Outcome of comparing one file against its cached signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaStatus {
    /// No prior signature, transfer entirely
    New,
    /// Content differs, transfer changed chunks
    Modified,
    /// Full hash matches, skip transfer
    Unchanged,
    /// Below the chunking threshold, always transfer entirely
    SmallFile,
    /// Known from a previous sync but gone locally
    Deleted,
}

impl DeltaStatus {
    /// Check if this status puts bytes on the wire
    pub fn transfers_data(&self) -> bool {
        matches!(
            self,
            DeltaStatus::New | DeltaStatus::Modified | DeltaStatus::SmallFile
        )
    }
}

/// Transfer plan for a single file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDelta {
    /// Path relative to the project root
    pub path: String,

    pub status: DeltaStatus,

    /// Current file size (0 for deleted files)
    pub total_size: u64,

    /// Bytes that must actually be sent
    pub transfer_size: u64,

    /// Indices of changed chunks (only for `Modified`)
    pub changed_chunks: Vec<usize>,

    /// Percentage of the file that does not need to be sent
    pub savings_percent: f64,

    /// BLAKE3 of the content the plan was computed from, when it was read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_hash: Option<String>,
}

impl FileDelta {
    /// Build a delta, deriving the savings percentage
    pub fn new(
        path: impl Into<String>,
        status: DeltaStatus,
        total_size: u64,
        transfer_size: u64,
        changed_chunks: Vec<usize>,
    ) -> Self {
        Self {
            path: path.into(),
            status,
            total_size,
            transfer_size,
            changed_chunks,
            savings_percent: savings_percent(total_size, transfer_size),
            full_hash: None,
        }
    }

    /// Attach the content hash the plan was based on
    pub fn with_hash(mut self, full_hash: impl Into<String>) -> Self {
        self.full_hash = Some(full_hash.into());
        self
    }

    /// Bytes not sent thanks to the delta
    pub fn savings_bytes(&self) -> u64 {
        self.total_size.saturating_sub(self.transfer_size)
    }
}

/// Aggregate view over a list of file deltas
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaTransferStats {
    pub total_files: usize,
    pub new_files: usize,
    pub modified_files: usize,
    pub unchanged_files: usize,
    pub small_files: usize,
    pub deleted_files: usize,

    /// Size of every file still present locally
    pub total_size: u64,

    /// Bytes that must be sent
    pub transfer_size: u64,

    /// `total_size - transfer_size`
    pub savings_bytes: u64,

    /// `savings_bytes / total_size` as a percentage (0 when nothing to send)
    pub savings_percent: f64,
}

/// Reduce deltas into aggregate statistics
pub fn stats(deltas: &[FileDelta]) -> DeltaTransferStats {
    let mut stats = DeltaTransferStats {
        total_files: deltas.len(),
        ..Default::default()
    };

    for delta in deltas {
        match delta.status {
            DeltaStatus::New => stats.new_files += 1,
            DeltaStatus::Modified => stats.modified_files += 1,
            DeltaStatus::Unchanged => stats.unchanged_files += 1,
            DeltaStatus::SmallFile => stats.small_files += 1,
            DeltaStatus::Deleted => {
                stats.deleted_files += 1;
                continue;
            }
        }
        stats.total_size += delta.total_size;
        stats.transfer_size += delta.transfer_size;
    }

    stats.savings_bytes = stats.total_size - stats.transfer_size;
    stats.savings_percent = savings_percent(stats.total_size, stats.transfer_size);
    stats
}

fn savings_percent(total_size: u64, transfer_size: u64) -> f64 {
    if total_size == 0 {
        0.0
    } else {
        (1.0 - transfer_size as f64 / total_size as f64) * 100.0
    }
}
