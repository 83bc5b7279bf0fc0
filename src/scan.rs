//! Local project tree enumeration

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// A regular file found under a project root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    /// Path relative to the root, `/` separated
    pub path: String,

    /// Absolute path on disk
    pub abs_path: PathBuf,

    /// Size in bytes at enumeration time
    pub size: u64,

    /// Last modification time, if the platform reports one
    pub modified: Option<DateTime<Utc>>,
}

/// Convert a relative filesystem path into the `/` separated key form
pub fn relative_key(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Whether any component of a relative key is hidden
pub fn is_hidden(key: &str) -> bool {
    key.split('/').any(|part| part.starts_with('.'))
}

/// Enumerate every regular, non-hidden file under `root`, sorted by path
///
/// Entries that disappear while walking are skipped. Fails only when the root
/// itself is missing or unreadable.
pub fn scan_tree(root: &Path) -> Result<Vec<LocalFile>> {
    let meta = std::fs::metadata(root)
        .map_err(|e| Error::io(format!("reading project root {}", root.display()), e))?;
    if !meta.is_dir() {
        return Err(Error::config(format!(
            "project root is not a directory: {}",
            root.display()
        )));
    }

    let mut files = Vec::new();

    for entry in jwalk::WalkDir::new(root)
        .skip_hidden(true)
        .follow_links(false)
        .parallelism(jwalk::Parallelism::RayonNewPool(num_cpus::get()))
    {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "Error walking directory");
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = match path.strip_prefix(root) {
            Ok(r) => relative_key(r),
            Err(_) => continue,
        };
        if relative.is_empty() || is_hidden(&relative) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(path = %relative, error = %e, "File vanished during scan");
                continue;
            }
        };

        files.push(LocalFile {
            path: relative,
            abs_path: path,
            size: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    tracing::debug!(root = %root.display(), files = files.len(), "Scan complete");
    Ok(files)
}
