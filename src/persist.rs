//! Atomic JSON records on disk
//!
//! Every persisted record (signature caches, snapshot histories, project
//! records) is replaced as a whole: the new content is written to a temporary
//! file in the same directory, flushed to disk and renamed over the old one.
//! A crash mid-write leaves either the previous record or a stray temp file,
//! never a torn record.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Atomically replace `path` with the JSON encoding of `value`
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::config(format!("record path has no parent: {}", path.display())))?;
    std::fs::create_dir_all(parent).map_err(|e| Error::io("creating record directory", e))?;

    let tmp = NamedTempFile::new_in(parent).map_err(|e| Error::io("creating temp record", e))?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush().map_err(|e| Error::io("flushing record", e))?;
    }
    tmp.as_file()
        .sync_all()
        .map_err(|e| Error::io("syncing record", e))?;
    tmp.persist(path)
        .map_err(|e| Error::io("replacing record", e.error))?;

    tracing::trace!(path = %path.display(), "Record written");
    Ok(())
}

/// Read a JSON record, `Ok(None)` if it does not exist
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::io("reading record", e)),
    };
    let value = serde_json::from_slice(&data)?;
    Ok(Some(value))
}

/// Remove a record if present
pub fn remove_record(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io("removing record", e)),
    }
}

/// Encode a project id as a file stem
///
/// Lowercase ASCII letters, digits, `-` and `_` are kept; every other byte is
/// written as `%XX`. Distinct ids always map to distinct stems, also on
/// case-insensitive filesystems.
pub fn record_stem(project_id: &str) -> String {
    let mut stem = String::with_capacity(project_id.len());
    for byte in project_id.bytes() {
        match byte {
            b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' => stem.push(byte as char),
            _ => stem.push_str(&format!("%{byte:02X}")),
        }
    }
    stem
}
