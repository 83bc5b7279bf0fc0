//! Snapshot history and backups on disk
//!
//! Layout under the data directory:
//!
//! ```text
//! snapshots/<project>/history.json
//! snapshots/<project>/backups/<snapshot id>/<relative path>
//! ```
//!
//! Backups for a new snapshot are copied into `<snapshot id>.partial` first
//! and renamed into place only after every copy succeeded.

use super::{diff, FileVersion, SnapshotDiff, SnapshotSummary, SyncSnapshot};
use crate::config::{Config, DEFAULT_MAX_SNAPSHOTS, DEFAULT_SNAPSHOT_BUDGET};
use crate::error::{Error, Result};
use crate::persist::{read_json, record_stem, write_json_atomic};
use crate::scan::{scan_tree, LocalFile};
use crate::signature::hash_file;
use crate::sync::rules::SyncRules;
use chrono::Utc;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Persisted list of snapshots, oldest first
#[derive(Debug, Default, Serialize, Deserialize)]
struct History {
    project_id: String,
    snapshots: Vec<SyncSnapshot>,
}

/// Snapshot storage for all projects
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
    budget: u64,
    max_snapshots: usize,
    /// Serializes history read-modify-write cycles
    lock: Arc<Mutex<()>>,
    /// Staging directories of snapshots currently being created
    staging: Arc<Mutex<HashSet<PathBuf>>>,
}

/// Suffix of a backup directory that is still being filled
const STAGING_SUFFIX: &str = ".partial";

/// Releases a staging directory claim on drop
struct StagingClaim {
    active: Arc<Mutex<HashSet<PathBuf>>>,
    path: PathBuf,
}

impl Drop for StagingClaim {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        active.remove(&self.path);
    }
}

impl SnapshotStore {
    /// Create a store under `data_dir/snapshots`
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("snapshots"),
            budget: DEFAULT_SNAPSHOT_BUDGET,
            max_snapshots: DEFAULT_MAX_SNAPSHOTS,
            lock: Arc::new(Mutex::new(())),
            staging: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Create a store using the budget and retention from `config`
    pub fn from_config(data_dir: &Path, config: &Config) -> Self {
        Self::new(data_dir)
            .with_budget(config.snapshot_budget)
            .with_max_snapshots(config.max_snapshots)
    }

    /// Set the byte budget for backups per snapshot
    pub fn with_budget(mut self, budget: u64) -> Self {
        self.budget = budget;
        self
    }

    /// Set how many snapshots are kept per project
    pub fn with_max_snapshots(mut self, max: usize) -> Self {
        self.max_snapshots = max.max(1);
        self
    }

    fn project_dir(&self, project_id: &str) -> PathBuf {
        self.dir.join(record_stem(project_id))
    }

    fn history_path(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("history.json")
    }

    fn backup_root(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("backups")
    }

    fn load_history(&self, project_id: &str) -> Result<History> {
        let path = self.history_path(project_id);
        match read_json::<History>(&path)? {
            Some(history) if history.project_id != project_id => Err(Error::config(format!(
                "snapshot history {} belongs to {:?}, not {:?}",
                path.display(),
                history.project_id,
                project_id
            ))),
            Some(history) => Ok(history),
            None => Ok(History {
                project_id: project_id.to_string(),
                snapshots: Vec::new(),
            }),
        }
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot every non-hidden file under `local_root`
    pub fn create(
        &self,
        project_id: &str,
        local_root: &Path,
        message: Option<&str>,
    ) -> Result<SyncSnapshot> {
        self.create_filtered(project_id, local_root, &SyncRules::disabled(), message)
    }

    /// Snapshot the files under `local_root` that `rules` keep
    ///
    /// Files are backed up in path order until the byte budget is used up;
    /// the rest are recorded without a backup. A backed-up file's hash and
    /// size describe the bytes that were copied. Nothing is registered unless
    /// every backup copy succeeded.
    pub fn create_filtered(
        &self,
        project_id: &str,
        local_root: &Path,
        rules: &SyncRules,
        message: Option<&str>,
    ) -> Result<SyncSnapshot> {
        let files = rules.filter(scan_tree(local_root)?);
        let snapshot_id = Uuid::new_v4().to_string();

        let backup_root = self.backup_root(project_id);
        let staging = backup_root.join(format!("{}{}", snapshot_id, STAGING_SUFFIX));
        let final_dir = backup_root.join(&snapshot_id);

        let _staging = self.claim_staging(&staging);
        self.sweep_stale_staging(&backup_root);

        let versions = match self.stage_backups(&snapshot_id, files, &staging) {
            Ok(v) => v,
            Err(e) => {
                discard_dir(&staging);
                return Err(e);
            }
        };

        if let Err(e) = std::fs::rename(&staging, &final_dir) {
            discard_dir(&staging);
            return Err(Error::io("publishing snapshot backups", e));
        }

        let total_size = versions.iter().map(|v| v.size).sum();
        let snapshot = SyncSnapshot {
            id: snapshot_id,
            project_id: project_id.to_string(),
            timestamp: Utc::now(),
            files_count: versions.len(),
            total_size,
            files: versions,
            message: message.map(String::from),
        };

        if let Err(e) = self.register(project_id, &snapshot) {
            discard_dir(&final_dir);
            return Err(e);
        }

        tracing::info!(
            project = %project_id,
            snapshot = %snapshot.id,
            files = snapshot.files_count,
            restorable = snapshot.summary().restorable_count,
            "Snapshot created"
        );
        Ok(snapshot)
    }

    /// Mark a staging directory as in use by this store until the guard drops
    fn claim_staging(&self, staging: &Path) -> StagingClaim {
        let mut active = self.staging.lock().unwrap_or_else(|p| p.into_inner());
        active.insert(staging.to_path_buf());
        StagingClaim {
            active: Arc::clone(&self.staging),
            path: staging.to_path_buf(),
        }
    }

    /// Remove staging directories left behind by interrupted snapshots
    fn sweep_stale_staging(&self, backup_root: &Path) {
        let entries = match std::fs::read_dir(backup_root) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        let active = self.staging.lock().unwrap_or_else(|p| p.into_inner());

        for entry in entries.flatten() {
            let path = entry.path();
            let stale = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(STAGING_SUFFIX));
            if stale && !active.contains(&path) {
                tracing::info!(dir = %path.display(), "Removing leftover snapshot staging");
                discard_dir(&path);
            }
        }
    }

    fn stage_backups(
        &self,
        snapshot_id: &str,
        files: Vec<LocalFile>,
        staging: &Path,
    ) -> Result<Vec<FileVersion>> {
        std::fs::create_dir_all(staging).map_err(|e| Error::io("creating backup staging dir", e))?;

        let mut planned = 0u64;
        let (backed, recorded): (Vec<_>, Vec<_>) = files.into_iter().partition(|file| {
            if planned.saturating_add(file.size) <= self.budget {
                planned += file.size;
                true
            } else {
                false
            }
        });

        let mut used = 0u64;
        let mut versions = Vec::with_capacity(backed.len() + recorded.len());

        for file in backed {
            let target = staging.join(&file.path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| Error::io("creating backup dir", e))?;
            }
            let (size, hash) = match copy_and_hash(&file.abs_path, &target) {
                Ok(copied) => copied,
                Err(Error::NotFound { .. }) => {
                    tracing::warn!(path = %file.path, "File vanished while snapshotting, skipping");
                    let _ = std::fs::remove_file(&target);
                    continue;
                }
                Err(e) => return Err(e),
            };
            used += size;
            versions.push(FileVersion {
                id: Uuid::new_v4().to_string(),
                backup_path: Some(format!("{}/{}", snapshot_id, file.path)),
                path: file.path,
                hash,
                size,
                modified: file.modified,
                sync_id: snapshot_id.to_string(),
            });
        }

        let unbacked: Vec<Option<FileVersion>> = recorded
            .into_par_iter()
            .map(|file| match hash_file(&file.abs_path) {
                Ok(hash) => Ok(Some(FileVersion {
                    id: Uuid::new_v4().to_string(),
                    path: file.path,
                    hash,
                    size: file.size,
                    modified: file.modified,
                    sync_id: snapshot_id.to_string(),
                    backup_path: None,
                })),
                Err(Error::NotFound { .. }) => {
                    tracing::warn!(path = %file.path, "File vanished while snapshotting, skipping");
                    Ok(None)
                }
                Err(e) => Err(e),
            })
            .collect::<Result<_>>()?;

        versions.extend(unbacked.into_iter().flatten());
        versions.sort_by(|a, b| a.path.cmp(&b.path));

        tracing::debug!(snapshot = %snapshot_id, backed_up = used, budget = self.budget, "Backups staged");
        Ok(versions)
    }

    /// Append to the history and prune beyond the retention limit
    fn register(&self, project_id: &str, snapshot: &SyncSnapshot) -> Result<()> {
        let _guard = self.guard();
        let mut history = self.load_history(project_id)?;
        history.snapshots.push(snapshot.clone());

        let excess = history.snapshots.len().saturating_sub(self.max_snapshots);
        let pruned: Vec<SyncSnapshot> = history.snapshots.drain(..excess).collect();

        write_json_atomic(&self.history_path(project_id), &history)?;

        let backup_root = self.backup_root(project_id);
        for old in pruned {
            tracing::debug!(project = %project_id, snapshot = %old.id, "Pruning snapshot");
            discard_dir(&backup_root.join(&old.id));
        }
        Ok(())
    }

    /// Summaries of every snapshot, newest first
    pub fn list(&self, project_id: &str) -> Result<Vec<SnapshotSummary>> {
        let history = self.load_history(project_id)?;
        Ok(history.snapshots.iter().rev().map(|s| s.summary()).collect())
    }

    pub fn get(&self, project_id: &str, snapshot_id: &str) -> Result<Option<SyncSnapshot>> {
        let history = self.load_history(project_id)?;
        Ok(history.snapshots.into_iter().find(|s| s.id == snapshot_id))
    }

    fn require(&self, project_id: &str, snapshot_id: &str) -> Result<SyncSnapshot> {
        self.get(project_id, snapshot_id)?
            .ok_or_else(|| Error::SnapshotNotFound {
                id: snapshot_id.to_string(),
            })
    }

    /// Compare snapshot `a` (older) with snapshot `b` (newer)
    pub fn diff(&self, project_id: &str, a: &str, b: &str) -> Result<SnapshotDiff> {
        let old = self.require(project_id, a)?;
        let new = self.require(project_id, b)?;
        Ok(diff(&old, &new))
    }

    /// Copy preserved files from a snapshot back into `local_root`
    ///
    /// With `paths`, only those files are restored. Files without a usable
    /// backup are skipped with a warning. Returns the restored paths.
    pub fn restore(
        &self,
        project_id: &str,
        snapshot_id: &str,
        local_root: &Path,
        paths: Option<&[String]>,
    ) -> Result<Vec<String>> {
        let snapshot = self.require(project_id, snapshot_id)?;
        std::fs::create_dir_all(local_root)
            .map_err(|e| Error::io(format!("creating {}", local_root.display()), e))?;

        let backup_root = self.backup_root(project_id);
        let mut restored = Vec::new();

        for version in &snapshot.files {
            if let Some(wanted) = paths {
                if !wanted.iter().any(|p| p == &version.path) {
                    continue;
                }
            }

            let backup = match &version.backup_path {
                Some(rel) => backup_root.join(rel),
                None => {
                    tracing::warn!(path = %version.path, "No backup in snapshot, skipping");
                    continue;
                }
            };
            if !is_safe_relative(&version.path) {
                tracing::warn!(path = %version.path, "Refusing to restore outside the project root");
                continue;
            }

            let target = local_root.join(&version.path);
            let result = target
                .parent()
                .map_or(Ok(()), std::fs::create_dir_all)
                .and_then(|_| std::fs::copy(&backup, &target));

            match result {
                Ok(_) => restored.push(version.path.clone()),
                Err(e) => {
                    tracing::warn!(path = %version.path, error = %e, "Backup unavailable, skipping");
                }
            }
        }

        tracing::info!(
            project = %project_id,
            snapshot = %snapshot_id,
            restored = restored.len(),
            "Snapshot restored"
        );
        Ok(restored)
    }

    /// Delete one snapshot and its backups; false if it did not exist
    pub fn delete(&self, project_id: &str, snapshot_id: &str) -> Result<bool> {
        let _guard = self.guard();
        let mut history = self.load_history(project_id)?;
        let before = history.snapshots.len();
        history.snapshots.retain(|s| s.id != snapshot_id);
        if history.snapshots.len() == before {
            return Ok(false);
        }

        write_json_atomic(&self.history_path(project_id), &history)?;
        discard_dir(&self.backup_root(project_id).join(snapshot_id));
        Ok(true)
    }
}

fn discard_dir(dir: &Path) {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(dir = %dir.display(), error = %e, "Failed to remove directory"),
    }
}

/// Copy `source` to `target`, hashing the bytes as they are written
fn copy_and_hash(source: &Path, target: &Path) -> Result<(u64, String)> {
    let mut input = File::open(source).map_err(|e| Error::from_read(source, e))?;
    let mut output = BufWriter::new(
        File::create(target).map_err(|e| Error::io(format!("creating backup {}", target.display()), e))?,
    );
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; COPY_BUF_SIZE];
    let mut copied = 0u64;

    loop {
        let n = input.read(&mut buffer).map_err(|e| Error::from_read(source, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        output
            .write_all(&buffer[..n])
            .map_err(|e| Error::io(format!("backing up {}", source.display()), e))?;
        copied += n as u64;
    }
    output
        .flush()
        .map_err(|e| Error::io(format!("backing up {}", source.display()), e))?;

    Ok((copied, hex::encode(hasher.finalize().as_bytes())))
}

const COPY_BUF_SIZE: usize = 64 * 1024;

fn is_safe_relative(path: &str) -> bool {
    Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
}
