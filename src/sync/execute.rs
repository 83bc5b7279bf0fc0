//! Upload queue execution
//!
//! Each worker owns one transport connection and pulls items from the shared
//! queue until it is empty, the run is cancelled or the connection drops.
//! Per-file failures are recorded on the run and do not stop the worker.

use super::events::SyncEvent;
use super::queue::{TransferItem, TransferQueue};
use super::registry::RunHandle;
use super::session::SessionStore;
use super::state::{FailedFile, LogLevel};
use crate::error::{Error, Result};
use crate::signature::{
    generate_signature, hash_file, FileSignature, SignatureCache, SignatureStore,
};
use crate::transport::Connection;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Writes signatures back as soon as each file is confirmed
pub(crate) struct SignatureCommitter {
    store: SignatureStore,
    project_id: String,
    cache: Mutex<SignatureCache>,
}

impl SignatureCommitter {
    pub(crate) fn new(store: SignatureStore, project_id: &str) -> Self {
        let cache = store.get(project_id);
        Self {
            store,
            project_id: project_id.to_string(),
            cache: Mutex::new(cache),
        }
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, SignatureCache> {
        self.cache.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub(crate) fn commit(&self, signature: FileSignature) -> Result<()> {
        let mut cache = self.cache();
        cache.upsert(signature);
        self.store.put(&self.project_id, &cache)
    }

    /// Drop the signature of a file whose remote copy may no longer match it
    pub(crate) fn forget(&self, path: &str, handle: &RunHandle) {
        let mut cache = self.cache();
        if !cache.remove(path) {
            return;
        }
        if let Err(e) = self.store.put(&self.project_id, &cache) {
            handle.warn(format!("{}: signature not cleared: {}", path, e));
        }
    }

    /// Drop signatures of files that no longer exist locally
    pub(crate) fn prune(&self, paths: &[String]) -> Result<usize> {
        let mut cache = self.cache();
        let removed = paths.iter().filter(|p| cache.remove(p)).count();
        if removed > 0 {
            self.store.put(&self.project_id, &cache)?;
        }
        Ok(removed)
    }
}

/// Everything workers share for one upload phase
pub(crate) struct UploadContext<'a> {
    pub handle: &'a RunHandle,
    pub queue: TransferQueue,
    pub committer: &'a SignatureCommitter,
    pub sessions: &'a SessionStore,
    pub project_id: &'a str,
    pub root: &'a Path,
    pub max_file_retries: u32,
}

/// Why a worker stopped
pub(crate) enum WorkerExit {
    Drained,
    Cancelled,
    ConnectionLost { item: TransferItem, error: Error },
}

/// Result of running every worker to the end
pub(crate) struct UploadOutcome {
    pub cancelled: bool,

    /// Items that were in flight when a connection dropped
    pub interrupted: Vec<TransferItem>,

    pub lost: Option<Error>,
}

/// Run one worker per connection until the queue is done
pub(crate) async fn upload_all(
    ctx: &UploadContext<'_>,
    connections: &mut [Box<dyn Connection>],
) -> UploadOutcome {
    let workers = connections.iter_mut().map(|conn| run_worker(ctx, conn));
    let exits = futures::future::join_all(workers).await;

    let mut outcome = UploadOutcome {
        cancelled: false,
        interrupted: Vec::new(),
        lost: None,
    };
    for exit in exits {
        match exit {
            WorkerExit::Drained => {}
            WorkerExit::Cancelled => outcome.cancelled = true,
            WorkerExit::ConnectionLost { item, error } => {
                outcome.interrupted.push(item);
                outcome.lost.get_or_insert(error);
            }
        }
    }
    outcome
}

async fn run_worker(ctx: &UploadContext<'_>, conn: &mut Box<dyn Connection>) -> WorkerExit {
    while let Some(item) = ctx.queue.pop() {
        if !ctx.handle.is_current() {
            ctx.queue.push(item);
            return WorkerExit::Cancelled;
        }

        let prepared = tokio::select! {
            biased;
            _ = ctx.handle.token().cancelled() => return WorkerExit::Cancelled,
            p = prepare_item(ctx, conn, item) => p,
        };
        let item = match prepared {
            Ok(item) => item,
            Err((item, e)) => {
                fail_file(ctx, item, e);
                continue;
            }
        };

        // Once a whole-file send starts, the remote copy no longer matches
        // the cached signature
        if item.ranges.is_none() {
            ctx.committer.forget(&item.path, ctx.handle);
        }

        ctx.handle.update(|state| {
            state.current_file = Some(item.path.clone());
            state.current_file_progress = 0.0;
            vec![SyncEvent::FileStarted {
                project_id: state.project_id.clone(),
                path: item.path.clone(),
                size: item.size,
                transfer_size: item.transfer_size,
            }]
        });
        tracing::debug!(
            path = %item.path,
            size = item.size,
            transfer_size = item.transfer_size,
            ranged = item.ranges.is_some(),
            resume_offset = item.resume_offset,
            "Uploading"
        );

        let handle = ctx.handle;
        let path = item.path.as_str();
        let expected = item.transfer_size;
        let confirmed = AtomicU64::new(0);
        let progress = |sent: u64| {
            confirmed.store(sent, Ordering::Relaxed);
            handle.update(|state| {
                state.current_file_progress = if expected == 0 {
                    100.0
                } else {
                    (sent as f64 / expected as f64 * 100.0).min(100.0)
                };
                vec![SyncEvent::FileProgress {
                    project_id: state.project_id.clone(),
                    path: path.to_string(),
                    bytes_sent: sent,
                    transfer_size: expected,
                }]
            });
        };

        let ranges = item.send_ranges();
        let result = tokio::select! {
            biased;
            _ = ctx.handle.token().cancelled() => return WorkerExit::Cancelled,
            r = conn.send(&item.abs_path, &item.path, ranges.as_deref(), &progress) => r,
        };

        match result {
            Ok(sent) => complete_file(ctx, item, sent).await,
            Err(e) if e.is_connection_level() => {
                let mut item = item;
                let written = confirmed.load(Ordering::Relaxed);
                if item.ranges.is_none() && written > 0 {
                    item.resume_offset += written;
                }
                tracing::warn!(
                    path = %item.path,
                    error = %e,
                    resume_offset = item.resume_offset,
                    "Connection lost during upload"
                );
                return WorkerExit::ConnectionLost { item, error: e };
            }
            Err(e) => {
                if confirmed.load(Ordering::Relaxed) > 0 {
                    ctx.committer.forget(&item.path, ctx.handle);
                }
                fail_file(ctx, item, e)
            }
        }
    }

    WorkerExit::Drained
}

/// Settle how an item is sent from the file as it is now
///
/// Ranges are only trusted while the file still has the content they were
/// planned from, and an interrupted upload only continues while the file is
/// unchanged and the remote holds its prefix. The item leaves with
/// `expected_hash` set to the content being sent.
async fn prepare_item(
    ctx: &UploadContext<'_>,
    conn: &mut Box<dyn Connection>,
    mut item: TransferItem,
) -> std::result::Result<TransferItem, (TransferItem, Error)> {
    if item.ranges.is_some() && !conn.supports_ranges() {
        ctx.handle.log(
            LogLevel::Warn,
            format!(
                "{}: remote does not support ranged writes, sending whole file",
                item.path
            ),
        );
        item = item.into_whole();
    }

    let abs_path = item.abs_path.clone();
    let current = match tokio::task::spawn_blocking(move || hash_file(&abs_path)).await {
        Ok(Ok(hash)) => hash,
        Ok(Err(e)) => return Err((item, e)),
        Err(e) => {
            let error = Error::transfer(item.path.clone(), format!("hashing task failed: {}", e));
            return Err((item, error));
        }
    };
    let as_planned = item.expected_hash.as_deref() == Some(current.as_str());

    if item.ranges.is_some() && !as_planned {
        ctx.handle.log(
            LogLevel::Warn,
            format!("{}: changed since analysis, sending whole file", item.path),
        );
        item = item.into_whole();
    }

    if item.resume_offset > 0 {
        item = match resume_point(conn, &item, as_planned).await {
            Some(offset) => {
                ctx.handle.log(
                    LogLevel::Info,
                    format!("{}: resuming upload at byte {}", item.path, offset),
                );
                item.resume_at(offset)
            }
            None => {
                tracing::debug!(path = %item.path, "Partial upload not reusable, starting over");
                item.resume_offset = 0;
                item.into_whole()
            }
        };
    }

    item.expected_hash = Some(current);
    Ok(item)
}

/// Offset an interrupted whole-file upload can continue from, if any
async fn resume_point(
    conn: &mut Box<dyn Connection>,
    item: &TransferItem,
    unchanged: bool,
) -> Option<u64> {
    if !unchanged || !conn.supports_ranges() || item.resume_offset >= item.size {
        return None;
    }
    match conn.remote_size(&item.path).await {
        Ok(Some(remote)) if remote > 0 => Some(remote.min(item.resume_offset)),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(path = %item.path, error = %e, "Remote size unavailable");
            None
        }
    }
}

async fn complete_file(ctx: &UploadContext<'_>, item: TransferItem, sent: u64) {
    let root = ctx.root.to_path_buf();
    let path = item.path.clone();
    let signature = tokio::task::spawn_blocking(move || generate_signature(&root, &path)).await;

    if !ctx.handle.is_current() {
        return;
    }

    match signature {
        Ok(Ok(sig)) if item.expected_hash.as_deref() != Some(sig.full_hash.as_str()) => {
            ctx.committer.forget(&item.path, ctx.handle);
            let error = Error::transfer(item.path.clone(), "file changed during upload");
            fail_file(ctx, item, error);
            return;
        }
        Ok(Ok(sig)) => {
            if let Err(e) = ctx.committer.commit(sig) {
                ctx.handle
                    .warn(format!("{}: signature not saved: {}", item.path, e));
            }
        }
        Ok(Err(e)) => {
            ctx.handle
                .warn(format!("{}: could not re-sign after upload: {}", item.path, e));
        }
        Err(e) => {
            ctx.handle
                .warn(format!("{}: signing task failed: {}", item.path, e));
        }
    }
    if let Err(e) = ctx.sessions.complete(ctx.project_id, &item.path) {
        tracing::debug!(path = %item.path, error = %e, "Transfer session not updated");
    }

    ctx.handle.update(|state| {
        state.files_completed += 1;
        state.bytes_sent += sent;
        state.current_file = None;
        state.current_file_progress = 100.0;
        state.refresh_progress();
        vec![
            SyncEvent::FileCompleted {
                project_id: state.project_id.clone(),
                path: item.path.clone(),
                bytes_sent: sent,
            },
            SyncEvent::Progress {
                project_id: state.project_id.clone(),
                progress: state.progress,
                files_completed: state.files_completed,
                files_total: state.files_total,
                bytes_sent: state.bytes_sent,
            },
        ]
    });
    tracing::info!(path = %item.path, bytes = sent, "Uploaded");
}

fn fail_file(ctx: &UploadContext<'_>, item: TransferItem, error: Error) {
    tracing::error!(path = %item.path, error = %error, "Upload failed");
    let message = error.to_string();
    let given_up = item.retries >= ctx.max_file_retries;

    ctx.handle.update(|state| {
        state.log(LogLevel::Error, format!("{}: {}", item.path, message));
        state.current_file = None;
        state.failed_files.push(FailedFile {
            path: item.path.clone(),
            error: message.clone(),
            retry_count: item.retries,
            given_up,
            item: item.clone(),
        });
        state.refresh_progress();
        vec![
            SyncEvent::FileFailed {
                project_id: state.project_id.clone(),
                path: item.path.clone(),
                error: message.clone(),
            },
            SyncEvent::Progress {
                project_id: state.project_id.clone(),
                progress: state.progress,
                files_completed: state.files_completed,
                files_total: state.files_total,
                bytes_sent: state.bytes_sent,
            },
        ]
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::{generate_signature_from_bytes, CHUNK_SIZE};
    use tempfile::TempDir;

    #[test]
    fn test_committer_persists_each_commit() {
        let tmp = TempDir::new().unwrap();
        let store = SignatureStore::new(tmp.path());
        let committer = SignatureCommitter::new(store.clone(), "p");

        committer
            .commit(generate_signature_from_bytes("a.html", b"a", CHUNK_SIZE))
            .unwrap();
        assert_eq!(store.get("p").len(), 1);

        committer
            .commit(generate_signature_from_bytes("b.html", b"b", CHUNK_SIZE))
            .unwrap();
        assert_eq!(store.get("p").len(), 2);

        assert_eq!(committer.prune(&["a.html".into(), "zzz".into()]).unwrap(), 1);
        assert!(store.get("p").get("a.html").is_none());
    }
}
