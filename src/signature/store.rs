//! Durable per-project signature caches

use super::{FileSignature, SignatureCache};
use crate::error::Result;
use crate::persist::{read_json, record_stem, remove_record, write_json_atomic};
use std::path::{Path, PathBuf};

/// Signature cache storage keyed by project id
///
/// Each project has one JSON record that is replaced atomically on every
/// write, so readers always observe a complete cache.
#[derive(Debug, Clone)]
pub struct SignatureStore {
    /// Directory holding one record per project
    dir: PathBuf,
}

impl SignatureStore {
    /// Create a store rooted at `data_dir/signatures`
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("signatures"),
        }
    }

    fn record_path(&self, project_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", record_stem(project_id)))
    }

    /// Load a project's cache; empty if missing, unreadable, or owned by
    /// another project
    pub fn get(&self, project_id: &str) -> SignatureCache {
        let path = self.record_path(project_id);
        match read_json::<SignatureCache>(&path) {
            Ok(Some(cache)) if cache.project_id == project_id => cache,
            Ok(Some(cache)) => {
                tracing::warn!(
                    project = %project_id,
                    owner = %cache.project_id,
                    path = %path.display(),
                    "Ignoring signature cache recorded for another project"
                );
                SignatureCache::new(project_id)
            }
            Ok(None) => SignatureCache::new(project_id),
            Err(e) => {
                tracing::warn!(
                    project = %project_id,
                    path = %path.display(),
                    error = %e,
                    "Discarding unreadable signature cache"
                );
                SignatureCache::new(project_id)
            }
        }
    }

    /// Atomically replace a project's cache
    pub fn put(&self, project_id: &str, cache: &SignatureCache) -> Result<()> {
        write_json_atomic(&self.record_path(project_id), cache)?;
        tracing::debug!(project = %project_id, entries = cache.len(), "Saved signature cache");
        Ok(())
    }

    /// Remove every signature of a project
    pub fn clear(&self, project_id: &str) -> Result<()> {
        remove_record(&self.record_path(project_id))?;
        tracing::info!(project = %project_id, "Cleared signature cache");
        Ok(())
    }

    /// Insert or replace one signature and persist
    pub fn upsert(&self, project_id: &str, signature: FileSignature) -> Result<()> {
        let mut cache = self.get(project_id);
        cache.upsert(signature);
        self.put(project_id, &cache)
    }

    /// Remove signatures for `paths` and persist; returns how many were removed
    pub fn remove(&self, project_id: &str, paths: &[String]) -> Result<usize> {
        let mut cache = self.get(project_id);
        let removed = paths.iter().filter(|p| cache.remove(p)).count();
        if removed > 0 {
            self.put(project_id, &cache)?;
        }
        Ok(removed)
    }
}
