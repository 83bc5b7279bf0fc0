//! Compare local files against cached signatures

use super::{DeltaStatus, FileDelta};
use crate::error::{Error, Result};
use crate::scan::{scan_tree, LocalFile};
use crate::signature::generate::chunk_hashes_of;
use crate::signature::{hash_file, FileSignature, SignatureCache, SignatureStore, CHUNK_SIZE};
use crate::sync::rules::SyncRules;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Files smaller than this are always sent whole (256KB)
pub const MIN_DELTA_FILE_SIZE: u64 = 256 * 1024;

/// Builds transfer plans from a signature cache and a file list
///
/// The planner never mutates the cache. It keeps a counter of full chunk-hash
/// recomputations so callers can confirm that unchanged files were settled by
/// the whole-file hash alone.
#[derive(Debug, Default)]
pub struct DeltaPlanner {
    chunk_recomputes: AtomicUsize,
}

impl DeltaPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of files whose chunk hashes were recomputed so far
    pub fn chunk_recomputes(&self) -> usize {
        self.chunk_recomputes.load(Ordering::Relaxed)
    }

    /// Analyze a project: load its cache, scan the tree, apply rules
    pub fn analyze_project(
        &self,
        store: &SignatureStore,
        project_id: &str,
        root: &Path,
        rules: &SyncRules,
    ) -> Result<Vec<FileDelta>> {
        let cache = store.get(project_id);
        let files = rules.filter(scan_tree(root)?);
        tracing::debug!(
            project = %project_id,
            files = files.len(),
            cached = cache.len(),
            "Analyzing project"
        );
        self.analyze(&cache, &files)
    }

    /// Analyze a pre-filtered file list against `cache`
    ///
    /// The result lists `files` in their given order, followed by one
    /// `Deleted` entry per cached path missing from `files`, sorted by path.
    /// Files that vanish before they can be read are left out.
    pub fn analyze(&self, cache: &SignatureCache, files: &[LocalFile]) -> Result<Vec<FileDelta>> {
        let mut deltas = self.analyze_files(cache, files)?;

        let present: HashSet<&str> = files.iter().map(|f| f.path.as_str()).collect();
        // BTreeMap keys are already sorted
        for path in cache.signatures.keys() {
            if !present.contains(path.as_str()) {
                deltas.push(FileDelta::new(path.clone(), DeltaStatus::Deleted, 0, 0, vec![]));
            }
        }

        Ok(deltas)
    }

    /// Re-plan selected paths of a project against its current cache
    ///
    /// Unlike [`analyze_project`](Self::analyze_project) this reports no
    /// deletions; paths that no longer exist locally are simply absent.
    pub fn analyze_paths(
        &self,
        store: &SignatureStore,
        project_id: &str,
        root: &Path,
        paths: &[String],
    ) -> Result<Vec<FileDelta>> {
        let cache = store.get(project_id);
        let files: Vec<LocalFile> = paths
            .iter()
            .filter_map(|path| {
                let abs_path = root.join(path);
                let metadata = std::fs::metadata(&abs_path).ok()?;
                metadata.is_file().then(|| LocalFile {
                    path: path.clone(),
                    abs_path,
                    size: metadata.len(),
                    modified: metadata.modified().ok().map(DateTime::<Utc>::from),
                })
            })
            .collect();
        self.analyze_files(&cache, &files)
    }

    fn analyze_files(&self, cache: &SignatureCache, files: &[LocalFile]) -> Result<Vec<FileDelta>> {
        let results: Vec<Result<Option<FileDelta>>> = files
            .par_iter()
            .map(|file| match self.analyze_file(file, cache.get(&file.path)) {
                Ok(delta) => Ok(Some(delta)),
                Err(Error::NotFound { path }) => {
                    tracing::warn!(path = %path.display(), "File vanished during analysis, skipping");
                    Ok(None)
                }
                Err(e) => Err(e),
            })
            .collect();

        let mut deltas = Vec::with_capacity(results.len());
        for result in results {
            if let Some(delta) = result? {
                deltas.push(delta);
            }
        }
        Ok(deltas)
    }

    fn analyze_file(&self, file: &LocalFile, cached: Option<&FileSignature>) -> Result<FileDelta> {
        let total_size = std::fs::metadata(&file.abs_path)
            .map_err(|e| Error::from_read(&file.abs_path, e))?
            .len();

        let cached = match cached {
            Some(sig) => sig,
            None => {
                return Ok(FileDelta::new(
                    &file.path,
                    DeltaStatus::New,
                    total_size,
                    total_size,
                    vec![],
                ))
            }
        };

        if total_size < MIN_DELTA_FILE_SIZE {
            return Ok(FileDelta::new(
                &file.path,
                DeltaStatus::SmallFile,
                total_size,
                total_size,
                vec![],
            ));
        }

        let full_hash = hash_file(&file.abs_path)?;
        if full_hash == cached.full_hash {
            return Ok(FileDelta::new(
                &file.path,
                DeltaStatus::Unchanged,
                total_size,
                0,
                vec![],
            )
            .with_hash(full_hash));
        }

        if cached.chunk_size != CHUNK_SIZE {
            tracing::debug!(
                path = %file.path,
                cached_chunk_size = cached.chunk_size,
                "Chunk size changed, treating file as fully modified"
            );
            let chunk_count = total_size.div_ceil(CHUNK_SIZE as u64) as usize;
            return Ok(FileDelta::new(
                &file.path,
                DeltaStatus::Modified,
                total_size,
                total_size,
                (0..chunk_count).collect(),
            )
            .with_hash(full_hash));
        }

        self.chunk_recomputes.fetch_add(1, Ordering::Relaxed);
        let current = chunk_hashes_of(&file.abs_path, CHUNK_SIZE)?;

        let mut changed = Vec::new();
        let mut transfer_size = 0u64;
        for (index, hash) in current.iter().enumerate() {
            let same = cached
                .chunk_hashes
                .get(index)
                .is_some_and(|c| &c.hash == hash);
            if !same {
                let offset = index as u64 * CHUNK_SIZE as u64;
                changed.push(index);
                transfer_size += (CHUNK_SIZE as u64).min(total_size - offset);
            }
        }

        if changed.is_empty() {
            // Only shrank on a chunk boundary; nothing to patch, resend whole
            transfer_size = total_size;
        }

        tracing::trace!(
            path = %file.path,
            changed = changed.len(),
            transfer_size,
            "Modified file"
        );
        Ok(FileDelta::new(
            &file.path,
            DeltaStatus::Modified,
            total_size,
            transfer_size,
            changed,
        )
        .with_hash(full_hash))
    }
}
