//! Interrupted whole-file uploads
//!
//! When a connection drops part way through a whole-file upload, the bytes
//! already written stay on the remote side. The session record remembers how
//! far each such upload got, so the next attempt (in this run or a later one)
//! can send only the tail when the local file is still the same.

use crate::error::Result;
use crate::persist::{read_json, record_stem, remove_record, write_json_atomic};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// How far one whole-file upload got before it was cut off
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialUpload {
    /// Local size when the upload started
    pub size: u64,

    /// BLAKE3 of the local content being sent
    pub hash: String,

    /// Bytes confirmed written from the start of the file
    pub offset: u64,

    pub updated_at: DateTime<Utc>,
}

/// Partial uploads of one project, keyed by relative path
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferSession {
    pub project_id: String,
    pub partial: BTreeMap<String, PartialUpload>,
}

/// One session record per project under `data_dir/sessions`
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl SessionStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("sessions"),
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn record_path(&self, project_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", record_stem(project_id)))
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Load a project's session; `None` if there is none or it is unusable
    pub fn load(&self, project_id: &str) -> Option<TransferSession> {
        let path = self.record_path(project_id);
        match read_json::<TransferSession>(&path) {
            Ok(Some(session)) if session.project_id == project_id => Some(session),
            Ok(Some(session)) => {
                tracing::warn!(
                    project = %project_id,
                    owner = %session.project_id,
                    "Ignoring transfer session recorded for another project"
                );
                None
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(project = %project_id, error = %e, "Discarding unreadable transfer session");
                None
            }
        }
    }

    /// Record or update partial uploads
    pub fn record(&self, project_id: &str, uploads: Vec<(String, PartialUpload)>) -> Result<()> {
        if uploads.is_empty() {
            return Ok(());
        }
        let _guard = self.guard();
        let mut session = self.load(project_id).unwrap_or_else(|| TransferSession {
            project_id: project_id.to_string(),
            partial: BTreeMap::new(),
        });
        for (path, upload) in uploads {
            tracing::debug!(project = %project_id, path = %path, offset = upload.offset, "Recording partial upload");
            session.partial.insert(path, upload);
        }
        write_json_atomic(&self.record_path(project_id), &session)
    }

    /// Forget the partial upload of `path` once the file is fully sent
    pub fn complete(&self, project_id: &str, path: &str) -> Result<()> {
        let _guard = self.guard();
        let Some(mut session) = self.load(project_id) else {
            return Ok(());
        };
        if session.partial.remove(path).is_none() {
            return Ok(());
        }
        if session.partial.is_empty() {
            remove_record(&self.record_path(project_id))
        } else {
            write_json_atomic(&self.record_path(project_id), &session)
        }
    }

    /// Drop every partial upload of a project
    pub fn clear(&self, project_id: &str) -> Result<()> {
        let _guard = self.guard();
        remove_record(&self.record_path(project_id))
    }
}
