//! Point-in-time records of a project tree, with optional content backups

pub mod store;

pub use store::SnapshotStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One file as it was when a snapshot was taken
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileVersion {
    pub id: String,

    /// Path relative to the project root
    pub path: String,

    /// BLAKE3 hash of the content (hex)
    pub hash: String,

    pub size: u64,

    pub modified: Option<DateTime<Utc>>,

    /// Snapshot (and sync run) this version belongs to
    pub sync_id: String,

    /// Location of the preserved copy, relative to the project's backup dir
    pub backup_path: Option<String>,
}

impl FileVersion {
    pub fn is_restorable(&self) -> bool {
        self.backup_path.is_some()
    }
}

/// Immutable record of a project's file set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSnapshot {
    pub id: String,
    pub project_id: String,
    pub timestamp: DateTime<Utc>,

    /// Files sorted by path
    pub files: Vec<FileVersion>,

    pub total_size: u64,
    pub files_count: usize,
    pub message: Option<String>,
}

impl SyncSnapshot {
    pub fn summary(&self) -> SnapshotSummary {
        SnapshotSummary {
            id: self.id.clone(),
            timestamp: self.timestamp,
            files_count: self.files_count,
            total_size: self.total_size,
            restorable_count: self.files.iter().filter(|f| f.is_restorable()).count(),
            message: self.message.clone(),
        }
    }

    pub fn file(&self, path: &str) -> Option<&FileVersion> {
        self.files.iter().find(|f| f.path == path)
    }
}

/// Listing entry for a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub files_count: usize,
    pub total_size: u64,

    /// Files with a preserved copy
    pub restorable_count: usize,

    pub message: Option<String>,
}

/// Path-level comparison of two snapshots, each list sorted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDiff {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: Vec<String>,
}

impl SnapshotDiff {
    pub fn has_changes(&self) -> bool {
        !(self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty())
    }
}

/// Compare `old` against `new` by path, then by content hash
pub fn diff(old: &SyncSnapshot, new: &SyncSnapshot) -> SnapshotDiff {
    let old_files: BTreeMap<&str, &FileVersion> =
        old.files.iter().map(|f| (f.path.as_str(), f)).collect();
    let new_files: BTreeMap<&str, &FileVersion> =
        new.files.iter().map(|f| (f.path.as_str(), f)).collect();

    let mut result = SnapshotDiff::default();

    for (path, new_file) in &new_files {
        match old_files.get(path) {
            Some(old_file) if old_file.hash == new_file.hash => {
                result.unchanged.push(path.to_string())
            }
            Some(_) => result.modified.push(path.to_string()),
            None => result.added.push(path.to_string()),
        }
    }

    for path in old_files.keys() {
        if !new_files.contains_key(path) {
            result.deleted.push(path.to_string());
        }
    }

    result
}
